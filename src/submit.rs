use scraper::{Html, Selector};
use tracing::debug;

use crate::batch::Batch;
use crate::domain::Engine;
use crate::error::BoldError;
use crate::transport::{Transport, join_url};

/// Encodes one batch for an engine and submits it. A failure here is retried
/// by the caller for the whole batch, never per record.
pub struct BatchSubmitter<'t, T: Transport> {
    transport: &'t T,
    engine: Engine,
}

impl<'t, T: Transport> BatchSubmitter<'t, T> {
    pub fn new(transport: &'t T, engine: Engine) -> Self {
        Self { transport, engine }
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    pub fn submit(&self, batch: &Batch<'_>) -> Result<Vec<String>, BoldError> {
        let query = batch.query();
        let form = submit_form(self.engine, &query);
        let url = join_url(self.transport.base_url(), self.engine.endpoint());
        debug!(
            engine = %self.engine,
            batch = batch.index,
            records = batch.len(),
            "submitting batch"
        );

        let reply = self
            .transport
            .post_form(
                &url,
                &form,
                self.engine.content_type(),
                self.engine.submit_timeout(),
            )
            .map_err(|err| match err {
                BoldError::Timeout(_) => BoldError::ServiceTimeout {
                    engine: self.engine.to_string(),
                    seconds: self.engine.submit_timeout().as_secs(),
                },
                BoldError::Http(message) => BoldError::Submission(message),
                other => other,
            })?;

        if !reply.is_success() {
            return Err(BoldError::SubmissionStatus {
                status: reply.status,
                message: truncate_message(&reply.body),
            });
        }

        let locators = extract_locators(&reply.body, self.transport.base_url());
        if locators.len() != batch.len() {
            return Err(BoldError::Submission(format!(
                "expected {} result links, found {}",
                batch.len(),
                locators.len()
            )));
        }
        Ok(locators)
    }
}

pub fn submit_form(engine: Engine, query: &str) -> Vec<(&'static str, &str)> {
    let mut form = vec![("tabtype", engine.tab_type())];
    if engine == Engine::Coi {
        form.push(("historicalDB", ""));
    }
    form.push(("searchdb", engine.search_db()));
    form.push(("sequence", query));
    form
}

/// Result page links of a submission response, in record order.
pub fn extract_locators(body: &str, base_url: &str) -> Vec<String> {
    let document = Html::parse_document(body);
    let Ok(selector) = Selector::parse("span[style][result]") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .filter(|span| {
            span.value()
                .attr("style")
                .map(|style| style.trim().trim_end_matches(';') == "text-decoration: none")
                .unwrap_or(false)
        })
        .filter_map(|span| span.value().attr("result"))
        .map(|path| join_url(base_url, path))
        .collect()
}

fn truncate_message(body: &str) -> String {
    const LIMIT: usize = 200;
    let trimmed = body.trim();
    if trimmed.chars().count() <= LIMIT {
        return trimmed.to_string();
    }
    let mut message: String = trimmed.chars().take(LIMIT).collect();
    message.push_str("...");
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coi_form_carries_historical_flag() {
        let form = submit_form(Engine::Coi, ">a\nACGT");
        assert_eq!(form[0], ("tabtype", "animalTabPane"));
        assert!(form.contains(&("historicalDB", "")));
        assert!(form.contains(&("searchdb", "COX1")));

        let form = submit_form(Engine::Its, ">a\nACGT");
        assert!(!form.iter().any(|(key, _)| *key == "historicalDB"));
        assert!(form.contains(&("searchdb", "ITS")));
    }

    #[test]
    fn locators_keep_page_order() {
        let body = r#"<html><body>
            <span style="text-decoration: none" result="/index.php/IDS_IdentificationRequest?res=1">a</span>
            <span style="color: red" result="/ignored">b</span>
            <span style="text-decoration: none" result="/index.php/IDS_IdentificationRequest?res=2">c</span>
        </body></html>"#;
        let locators = extract_locators(body, "http://boldsystems.org");
        assert_eq!(
            locators,
            vec![
                "http://boldsystems.org/index.php/IDS_IdentificationRequest?res=1",
                "http://boldsystems.org/index.php/IDS_IdentificationRequest?res=2",
            ]
        );
    }
}
