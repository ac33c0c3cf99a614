use std::collections::{HashMap, HashSet};

use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::{debug, warn};

use crate::domain::{RecordHits, SpecimenRecord};
use crate::error::BoldError;
use crate::retry::{RetryPolicy, is_retryable_status};
use crate::transport::{Transport, join_url};

/// The public specimen API answers at most this many ids per request.
pub const IDS_PER_REQUEST: usize = 100;

/// Looks up specimen metadata for the published process ids on result pages.
pub struct SpecimenLookup<'t, T: Transport> {
    transport: &'t T,
    policy: RetryPolicy,
}

impl<'t, T: Transport> SpecimenLookup<'t, T> {
    pub fn new(transport: &'t T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Requests metadata in chunks. A chunk that fails is logged and skipped;
    /// the others still count.
    pub fn fetch(&self, process_ids: &[String]) -> HashMap<String, SpecimenRecord> {
        let mut specimens = HashMap::new();
        let mut failed_chunks = 0;
        for (index, chunk) in process_ids.chunks(IDS_PER_REQUEST).enumerate() {
            match self.fetch_chunk(chunk) {
                Ok(records) => {
                    for record in records {
                        specimens.insert(record.process_id.clone(), record);
                    }
                }
                Err(err) => {
                    failed_chunks += 1;
                    warn!(chunk = index, ids = chunk.len(), error = %err, "specimen chunk skipped");
                }
            }
        }
        debug!(
            requested = process_ids.len(),
            found = specimens.len(),
            failed_chunks,
            "specimen lookup finished"
        );
        specimens
    }

    fn fetch_chunk(&self, chunk: &[String]) -> Result<Vec<SpecimenRecord>, BoldError> {
        let url = join_url(
            self.transport.base_url(),
            &format!("index.php/API_Public/specimen?ids={}", chunk.join("|")),
        );
        let body = self
            .policy
            .run(
                |_| {
                    let reply = self.transport.get(&url)?;
                    if is_retryable_status(reply.status) {
                        return Err(BoldError::Http(format!("status {}", reply.status)));
                    }
                    if !reply.is_success() {
                        return Err(BoldError::SpecimenParse(format!("status {}", reply.status)));
                    }
                    Ok(reply.body)
                },
                BoldError::is_retryable,
                |attempt, err| warn!(attempt, error = %err, "specimen lookup failed; retrying"),
            )
            .map_err(|exhausted| exhausted.error)?;
        parse_specimens(&body)
    }

    /// Attaches metadata to every hit carrying a known process id. Returns the
    /// number of hits enriched.
    pub fn enrich(&self, records: &mut [RecordHits]) -> usize {
        let ids = unique_process_ids(records);
        if ids.is_empty() {
            return 0;
        }
        let specimens = self.fetch(&ids);
        attach_specimens(records, &specimens)
    }
}

/// Process ids in first-seen order, without duplicates.
pub fn unique_process_ids(records: &[RecordHits]) -> Vec<String> {
    let mut seen = HashSet::new();
    records
        .iter()
        .flat_map(|record| record.hits.iter())
        .filter_map(|hit| hit.process_id.as_ref())
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}

pub fn attach_specimens(
    records: &mut [RecordHits],
    specimens: &HashMap<String, SpecimenRecord>,
) -> usize {
    let mut attached = 0;
    for hit in records.iter_mut().flat_map(|record| record.hits.iter_mut()) {
        let Some(specimen) = hit.process_id.as_ref().and_then(|id| specimens.get(id)) else {
            continue;
        };
        hit.specimen = Some(specimen.clone());
        attached += 1;
    }
    attached
}

/// Reads `record` elements from a specimen API response. Fields are taken
/// from the first matching element anywhere inside the record.
pub fn parse_specimens(xml: &str) -> Result<Vec<SpecimenRecord>, BoldError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut records = Vec::new();
    let mut current: Option<SpecimenRecord> = None;
    let mut path: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(element)) => {
                let name = String::from_utf8_lossy(element.name().as_ref()).to_string();
                if name == "record" {
                    current = Some(SpecimenRecord::default());
                }
                path.push(name);
            }
            Ok(Event::End(element)) => {
                path.pop();
                if element.name().as_ref() == b"record" {
                    if let Some(record) = current.take() {
                        if !record.process_id.is_empty() {
                            records.push(record);
                        }
                    }
                }
            }
            Ok(Event::Text(text)) => {
                let (Some(record), Some(tag)) = (current.as_mut(), path.last()) else {
                    continue;
                };
                let value = text
                    .unescape()
                    .map_err(|err| BoldError::SpecimenParse(err.to_string()))?;
                set_field(record, tag, value.trim());
            }
            Ok(Event::CData(data)) => {
                let (Some(record), Some(tag)) = (current.as_mut(), path.last()) else {
                    continue;
                };
                let value = String::from_utf8_lossy(data.as_ref()).to_string();
                set_field(record, tag, value.trim());
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                return Err(BoldError::SpecimenParse(format!(
                    "at byte {}: {err}",
                    reader.buffer_position()
                )));
            }
        }
    }
    Ok(records)
}

fn set_field(record: &mut SpecimenRecord, tag: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    let slot = match tag {
        "processid" => {
            if record.process_id.is_empty() {
                record.process_id = value.to_string();
            }
            return;
        }
        "record_id" => &mut record.record_id,
        "bin_uri" => &mut record.bin_uri,
        "sex" => &mut record.sex,
        "lifestage" => &mut record.life_stage,
        "country" => &mut record.country,
        "identification_provided_by" => &mut record.identified_by,
        "identification_method" => &mut record.identification_method,
        "institution_storing" => &mut record.institution_storing,
        _ => return,
    };
    if slot.is_none() {
        *slot = Some(value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;
    use crate::domain::CandidateHit;
    use crate::transport::Reply;

    /// Answers the first specimen request and fails every later one.
    struct FirstChunkOnly {
        calls: Mutex<usize>,
    }

    impl Transport for FirstChunkOnly {
        fn base_url(&self) -> &str {
            "http://bold.test"
        }

        fn post_form(
            &self,
            _url: &str,
            _form: &[(&str, &str)],
            _content_type: &str,
            _timeout: Duration,
        ) -> Result<Reply, BoldError> {
            Err(BoldError::Http("unexpected submission".into()))
        }

        fn get(&self, _url: &str) -> Result<Reply, BoldError> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls == 1 {
                Ok(Reply {
                    status: 200,
                    body: "<bold_records><record><processid>P-0</processid>\
                           <record_id>7</record_id></record></bold_records>"
                        .into(),
                })
            } else {
                Ok(Reply {
                    status: 404,
                    body: String::new(),
                })
            }
        }
    }

    #[test]
    fn failed_chunk_keeps_earlier_results() {
        let transport = FirstChunkOnly {
            calls: Mutex::new(0),
        };
        let lookup = SpecimenLookup::new(&transport, RetryPolicy::no_delay(2));
        let ids: Vec<String> = (0..IDS_PER_REQUEST + 5).map(|i| format!("P-{i}")).collect();

        let specimens = lookup.fetch(&ids);
        assert_eq!(*transport.calls.lock().unwrap(), 2);
        assert_eq!(specimens.len(), 1);
        assert_eq!(specimens["P-0"].record_id.as_deref(), Some("7"));
    }

    const XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<bold_records>
  <record>
    <record_id>4551234</record_id>
    <processid>GBMIN1234-13</processid>
    <bin_uri>BOLD:AAA1234</bin_uri>
    <specimen_identifiers><institution_storing>Mined from GenBank, NCBI</institution_storing></specimen_identifiers>
    <taxonomy>
      <identification_provided_by>Jane Doe</identification_provided_by>
      <identification_method>BIN Taxonomy Match</identification_method>
    </taxonomy>
    <specimen_desc><sex>female</sex><lifestage>adult</lifestage></specimen_desc>
    <collection_event><country>Germany</country></collection_event>
  </record>
  <record>
    <record_id>99</record_id>
  </record>
</bold_records>"#;

    #[test]
    fn parses_nested_fields() {
        let records = parse_specimens(XML).unwrap();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.process_id, "GBMIN1234-13");
        assert_eq!(record.bin_uri.as_deref(), Some("BOLD:AAA1234"));
        assert_eq!(
            record.identification_method.as_deref(),
            Some("BIN Taxonomy Match")
        );
        assert_eq!(record.country.as_deref(), Some("Germany"));
        assert_eq!(record.life_stage.as_deref(), Some("adult"));
        assert!(record.specimen_url().unwrap().ends_with("selectedrecordid=4551234"));
    }

    #[test]
    fn unique_ids_keep_first_seen_order() {
        let mut a = CandidateHit::sentinel(1);
        a.process_id = Some("B-1".into());
        let mut b = CandidateHit::sentinel(2);
        b.process_id = Some("A-1".into());
        let records = vec![
            RecordHits {
                id: "otu1".into(),
                hits: vec![a.clone(), b.clone()],
                fetch_failed: false,
            },
            RecordHits {
                id: "otu2".into(),
                hits: vec![b, a],
                fetch_failed: false,
            },
        ];
        assert_eq!(unique_process_ids(&records), vec!["B-1", "A-1"]);
    }
}
