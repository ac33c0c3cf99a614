#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use bold_digger::domain::SequenceRecord;
use bold_digger::error::BoldError;
use bold_digger::transport::{Reply, Transport};

pub const BASE_URL: &str = "http://bold.test";

pub fn fixture(name: &str) -> String {
    let path = format!("{}/tests/fixtures/{name}", env!("CARGO_MANIFEST_DIR"));
    std::fs::read_to_string(&path).unwrap_or_else(|err| panic!("fixture {path}: {err}"))
}

pub fn records(n: usize) -> Vec<SequenceRecord> {
    (1..=n)
        .map(|i| SequenceRecord::new(format!("otu_{i}"), "ACGTACGTACGT"))
        .collect()
}

/// In-memory stand-in for the identification service. Every submitted record
/// gets a locator `/results/<id>`; pages come from `pages` by id, falling back
/// to `default_page`.
pub struct MockBold {
    pub default_page: String,
    pub pages: HashMap<String, Vec<Reply>>,
    pub unreachable: HashSet<String>,
    pub submit_failures: Mutex<u32>,
    pub submit_status: Option<u16>,
    pub specimen_xml: Option<String>,
    pub submitted: Mutex<Vec<Vec<String>>>,
    pub fetched: Mutex<Vec<String>>,
    served: Mutex<HashMap<String, usize>>,
}

impl MockBold {
    pub fn new(default_page: String) -> Self {
        Self {
            default_page,
            pages: HashMap::new(),
            unreachable: HashSet::new(),
            submit_failures: Mutex::new(0),
            submit_status: None,
            specimen_xml: None,
            submitted: Mutex::new(Vec::new()),
            fetched: Mutex::new(Vec::new()),
            served: Mutex::new(HashMap::new()),
        }
    }

    /// Replies for one record id, served in order; the last one repeats.
    pub fn with_pages(mut self, id: &str, replies: Vec<Reply>) -> Self {
        self.pages.insert(id.to_string(), replies);
        self
    }

    pub fn with_unreachable(mut self, id: &str) -> Self {
        self.unreachable.insert(id.to_string());
        self
    }

    pub fn with_submit_failures(self, failures: u32) -> Self {
        *self.submit_failures.lock().unwrap() = failures;
        self
    }

    pub fn submitted_ids(&self) -> Vec<String> {
        self.submitted.lock().unwrap().iter().flatten().cloned().collect()
    }

    pub fn submission_count(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }

    pub fn fetch_count(&self, id: &str) -> usize {
        let suffix = format!("/results/{id}");
        self.fetched
            .lock()
            .unwrap()
            .iter()
            .filter(|url| url.ends_with(&suffix))
            .count()
    }

    fn submission_page(ids: &[String]) -> String {
        let spans: String = ids
            .iter()
            .map(|id| {
                format!(r#"<span style="text-decoration: none" result="/results/{id}">{id}</span>"#)
            })
            .collect();
        format!("<html><body>{spans}</body></html>")
    }
}

pub fn ok(body: &str) -> Reply {
    Reply {
        status: 200,
        body: body.to_string(),
    }
}

pub fn status(code: u16) -> Reply {
    Reply {
        status: code,
        body: String::new(),
    }
}

impl Transport for MockBold {
    fn base_url(&self) -> &str {
        BASE_URL
    }

    fn post_form(
        &self,
        _url: &str,
        form: &[(&str, &str)],
        _content_type: &str,
        _timeout: Duration,
    ) -> Result<Reply, BoldError> {
        {
            let mut failures = self.submit_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(BoldError::Http("connection reset".to_string()));
            }
        }
        if let Some(code) = self.submit_status {
            return Ok(status(code));
        }
        let query = form
            .iter()
            .find(|(name, _)| *name == "sequence")
            .map(|(_, value)| *value)
            .unwrap_or_default();
        let ids: Vec<String> = query
            .lines()
            .filter_map(|line| line.strip_prefix('>'))
            .map(str::to_string)
            .collect();
        self.submitted.lock().unwrap().push(ids.clone());
        Ok(ok(&Self::submission_page(&ids)))
    }

    fn get(&self, url: &str) -> Result<Reply, BoldError> {
        self.fetched.lock().unwrap().push(url.to_string());
        if url.contains("API_Public/specimen") {
            return match &self.specimen_xml {
                Some(xml) => Ok(ok(xml)),
                None => Ok(status(404)),
            };
        }
        let Some((_, id)) = url.rsplit_once("/results/") else {
            return Ok(status(404));
        };
        if self.unreachable.contains(id) {
            return Ok(status(503));
        }
        let Some(replies) = self.pages.get(id) else {
            return Ok(ok(&self.default_page));
        };
        let mut served = self.served.lock().unwrap();
        let count = served.entry(id.to_string()).or_insert(0);
        let reply = replies[(*count).min(replies.len() - 1)].clone();
        *count += 1;
        Ok(reply)
    }
}
