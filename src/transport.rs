use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};

use crate::error::BoldError;

pub const DEFAULT_BASE_URL: &str = "https://boldsystems.org";

/// Status and body of one HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub body: String,
}

impl Reply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outbound HTTP used by every stage. Implementations are shared read-only
/// across concurrent fetches.
pub trait Transport: Send + Sync {
    fn base_url(&self) -> &str;

    fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
        content_type: &str,
        timeout: Duration,
    ) -> Result<Reply, BoldError>;

    fn get(&self, url: &str) -> Result<Reply, BoldError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Result<Self, BoldError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("bold-digger/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| BoldError::Http(err.to_string()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| BoldError::Http(err.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn into_reply(response: reqwest::blocking::Response) -> Result<Reply, BoldError> {
        let status = response.status().as_u16();
        let body = response.text().map_err(map_transport_error)?;
        Ok(Reply { status, body })
    }
}

impl Transport for HttpTransport {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post_form(
        &self,
        url: &str,
        form: &[(&str, &str)],
        content_type: &str,
        timeout: Duration,
    ) -> Result<Reply, BoldError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, content_type)
            .form(form)
            .timeout(timeout)
            .send()
            .map_err(map_transport_error)?;
        Self::into_reply(response)
    }

    fn get(&self, url: &str) -> Result<Reply, BoldError> {
        let response = self.client.get(url).send().map_err(map_transport_error)?;
        Self::into_reply(response)
    }
}

fn map_transport_error(err: reqwest::Error) -> BoldError {
    if err.is_timeout() {
        BoldError::Timeout(err.to_string())
    } else {
        BoldError::Http(err.to_string())
    }
}

/// Joins a service-relative path onto the base URL.
pub fn join_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_handles_slashes() {
        assert_eq!(
            join_url("https://boldsystems.org/", "/index.php/IDS_BlastRequest"),
            "https://boldsystems.org/index.php/IDS_BlastRequest"
        );
        assert_eq!(
            join_url("https://boldsystems.org", "http://other.org/x"),
            "http://other.org/x"
        );
    }

    #[test]
    fn success_range() {
        let reply = Reply {
            status: 204,
            body: String::new(),
        };
        assert!(reply.is_success());
        assert!(
            !Reply {
                status: 503,
                body: String::new()
            }
            .is_success()
        );
    }
}
