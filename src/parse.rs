use scraper::{ElementRef, Html, Selector};

use crate::domain::{CandidateHit, PageSchema, RecordStatus, Taxonomy};
use crate::error::BoldError;

/// Rows synthesized for a page without a result table.
pub const SENTINEL_ROWS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Rank,
    Phylum,
    Class,
    Order,
    Family,
    Genus,
    Species,
    Subspecies,
    Score,
    Similarity,
    EValue,
    Status,
}

impl Column {
    pub fn header(&self) -> &'static str {
        match self {
            Column::Rank => "Rank",
            Column::Phylum => "Phylum",
            Column::Class => "Class",
            Column::Order => "Order",
            Column::Family => "Family",
            Column::Genus => "Genus",
            Column::Species => "Species",
            Column::Subspecies => "Subspecies",
            Column::Score => "Score",
            Column::Similarity => "Similarity",
            Column::EValue => "E-Value",
            Column::Status => "Status",
        }
    }
}

const SINGLE_DB_COLUMNS: &[Column] = &[
    Column::Phylum,
    Column::Class,
    Column::Order,
    Column::Family,
    Column::Genus,
    Column::Species,
    Column::Subspecies,
    Column::Similarity,
    Column::Status,
];

const MULTI_DB_COLUMNS: &[Column] = &[
    Column::Rank,
    Column::Phylum,
    Column::Class,
    Column::Order,
    Column::Family,
    Column::Genus,
    Column::Species,
    Column::Subspecies,
    Column::Score,
    Column::Similarity,
    Column::EValue,
    Column::Status,
];

impl PageSchema {
    pub fn table_selector(&self) -> &'static str {
        match self {
            PageSchema::SingleDb => "table.resultsTable.noborder",
            PageSchema::MultiDb => "table.resultTable.noborder",
        }
    }

    pub fn columns(&self) -> &'static [Column] {
        match self {
            PageSchema::SingleDb => SINGLE_DB_COLUMNS,
            PageSchema::MultiDb => MULTI_DB_COLUMNS,
        }
    }

    /// Exact data row count, when the engine guarantees one.
    pub fn expected_rows(&self) -> Option<usize> {
        match self {
            PageSchema::SingleDb => Some(20),
            PageSchema::MultiDb => None,
        }
    }

    pub fn has_rank_column(&self) -> bool {
        matches!(self, PageSchema::MultiDb)
    }
}

pub fn no_match_hits() -> Vec<CandidateHit> {
    (1..=SENTINEL_ROWS as u32).map(CandidateHit::sentinel).collect()
}

/// Extracts the ranked hits of one result page. Content problems degrade to
/// empty fields; only structural problems are errors.
pub fn parse_page(body: &str, schema: PageSchema) -> Result<Vec<CandidateHit>, BoldError> {
    let document = Html::parse_document(body);
    let table_selector = selector(schema.table_selector())?;
    let Some(table) = document.select(&table_selector).next() else {
        return Ok(no_match_hits());
    };

    let row_selector = selector("tr")?;
    let cell_selector = selector("td")?;
    let columns = schema.columns();

    let mut hits = Vec::new();
    for row in table.select(&row_selector) {
        let cells: Vec<String> = row.select(&cell_selector).map(cell_text).collect();
        if cells.is_empty() || is_header_row(&cells, columns) {
            continue;
        }
        if cells.len() != columns.len() {
            return Err(BoldError::MalformedPage(format!(
                "row {} has {} cells, expected {}",
                hits.len() + 1,
                cells.len(),
                columns.len()
            )));
        }
        hits.push(build_hit(&cells, columns, hits.len() as u32 + 1));
    }

    if let Some(expected) = schema.expected_rows() {
        if hits.len() != expected {
            return Err(BoldError::MalformedPage(format!(
                "result table has {} rows, expected {expected}",
                hits.len()
            )));
        }
    }

    let process_ids = public_record_ids(&document)?;
    assign_process_ids(&mut hits, process_ids)?;
    Ok(hits)
}

fn build_hit(cells: &[String], columns: &[Column], position: u32) -> CandidateHit {
    let mut hit = CandidateHit {
        rank: position,
        taxonomy: Taxonomy::default(),
        similarity: None,
        status: None,
        process_id: None,
        score: None,
        e_value: None,
        specimen: None,
    };
    for (column, raw) in columns.iter().zip(cells) {
        let value = non_empty(raw);
        match column {
            Column::Rank => {
                if let Some(rank) = value.as_deref().and_then(|v| v.parse::<u32>().ok()) {
                    hit.rank = rank;
                }
            }
            Column::Phylum => hit.taxonomy.phylum = value,
            Column::Class => hit.taxonomy.class = value,
            Column::Order => hit.taxonomy.order = value,
            Column::Family => hit.taxonomy.family = value,
            Column::Genus => hit.taxonomy.genus = value,
            Column::Species => hit.taxonomy.species = value,
            Column::Subspecies => hit.taxonomy.subspecies = value,
            Column::Score => hit.score = value.as_deref().and_then(parse_number),
            Column::Similarity => hit.similarity = value.as_deref().and_then(parse_number),
            Column::EValue => hit.e_value = value,
            Column::Status => hit.status = value.map(RecordStatus::from),
        }
    }
    hit
}

/// Published rows take process ids in row order.
fn assign_process_ids(hits: &mut [CandidateHit], process_ids: Vec<String>) -> Result<(), BoldError> {
    if process_ids.is_empty() {
        return Ok(());
    }
    let published = hits
        .iter()
        .filter(|hit| hit.status == Some(RecordStatus::Published))
        .count();
    if published != process_ids.len() {
        return Err(BoldError::MalformedPage(format!(
            "{published} published rows but {} record ids",
            process_ids.len()
        )));
    }
    let mut ids = process_ids.into_iter();
    for hit in hits
        .iter_mut()
        .filter(|hit| hit.status == Some(RecordStatus::Published))
    {
        hit.process_id = ids.next();
    }
    Ok(())
}

fn public_record_ids(document: &Html) -> Result<Vec<String>, BoldError> {
    let public = selector(".publicrecord")?;
    Ok(document
        .select(&public)
        .filter_map(|element| element.value().attr("id"))
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect())
}

fn is_header_row(cells: &[String], columns: &[Column]) -> bool {
    cells
        .first()
        .zip(columns.first())
        .map(|(cell, column)| cell.eq_ignore_ascii_case(column.header()))
        .unwrap_or(false)
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .flat_map(|chunk| chunk.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parse_number(value: &str) -> Option<f64> {
    value
        .trim()
        .trim_end_matches('%')
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|number| number.is_finite())
}

fn selector(css: &str) -> Result<Selector, BoldError> {
    Selector::parse(css).map_err(|err| BoldError::MalformedPage(format!("selector {css}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_tolerate_percent_signs() {
        assert_eq!(parse_number("99.34%"), Some(99.34));
        assert_eq!(parse_number(" 100 "), Some(100.0));
        assert_eq!(parse_number("n/a"), None);
    }

    #[test]
    fn missing_table_yields_sentinels() {
        let hits = parse_page("<html><body>No hits</body></html>", PageSchema::SingleDb).unwrap();
        assert_eq!(hits.len(), SENTINEL_ROWS);
        assert!(hits.iter().all(CandidateHit::is_sentinel));
        assert_eq!(hits[0].rank, 1);
        assert_eq!(hits[19].rank, 20);
    }

    #[test]
    fn header_row_is_skipped() {
        let cells = vec!["Phylum".to_string(), "Class".to_string()];
        assert!(is_header_row(&cells, SINGLE_DB_COLUMNS));
        let cells = vec!["Arthropoda".to_string()];
        assert!(!is_header_row(&cells, SINGLE_DB_COLUMNS));
    }
}
