use std::fs;
use std::path::Path;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::consensus::ResolutionMethod;
use crate::domain::Engine;
use crate::error::BoldError;
use crate::fetch::FetchStrategy;
use crate::pipeline::PipelineOptions;
use crate::retry::RetryPolicy;
use crate::transport::DEFAULT_BASE_URL;

pub const CONFIG_FILE: &str = "bold-digger.json";
pub const BASE_URL_ENV: &str = "BOLD_BASE_URL";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub engine: Option<Engine>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub method: Option<ResolutionMethod>,
    #[serde(default)]
    pub specimen_lookup: Option<bool>,
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub fetch: Option<FetchSection>,
    #[serde(default)]
    pub submit: Option<SubmitSection>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct FetchSection {
    #[serde(default)]
    pub strategy: Option<FetchStrategy>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
    #[serde(default)]
    pub parse_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct SubmitSection {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub base_url: String,
    pub output_dir: Option<Utf8PathBuf>,
    pub pipeline: PipelineOptions,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// An explicit path must exist; the default file is optional.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, BoldError> {
        let config = match path {
            Some(path) => Self::read(Path::new(path))?,
            None => {
                let default = Path::new(CONFIG_FILE);
                if default.exists() {
                    Self::read(default)?
                } else {
                    Config::default()
                }
            }
        };
        let env_base_url = std::env::var(BASE_URL_ENV).ok();
        Self::resolve_config(config, env_base_url.as_deref())
    }

    fn read(path: &Path) -> Result<Config, BoldError> {
        let content =
            fs::read_to_string(path).map_err(|_| BoldError::ConfigRead(path.to_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| BoldError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config(
        config: Config,
        env_base_url: Option<&str>,
    ) -> Result<ResolvedConfig, BoldError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(BoldError::InvalidConfiguration(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let base_url = env_base_url
            .map(str::to_string)
            .or(config.base_url)
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(BoldError::InvalidConfiguration(format!(
                "base url must be http(s): {base_url}"
            )));
        }

        let mut pipeline = PipelineOptions::new(config.engine.unwrap_or(Engine::Coi));
        if let Some(batch_size) = config.batch_size {
            pipeline.batch_size = batch_size;
        }
        if let Some(method) = config.method {
            pipeline.method = method;
        }
        if let Some(specimen_lookup) = config.specimen_lookup {
            pipeline.specimen_lookup = specimen_lookup;
        }
        if let Some(fetch) = config.fetch {
            if let Some(strategy) = fetch.strategy {
                pipeline.strategy = strategy;
            }
            if let Some(parse_attempts) = fetch.parse_attempts {
                pipeline.parse_attempts = parse_attempts;
            }
            pipeline.fetch_policy = apply_policy(
                pipeline.fetch_policy,
                fetch.max_attempts,
                fetch.base_delay_ms,
                fetch.max_delay_ms,
            );
        }
        if let Some(submit) = config.submit {
            pipeline.submit_policy = apply_policy(
                pipeline.submit_policy,
                submit.max_attempts,
                submit.base_delay_ms,
                submit.max_delay_ms,
            );
        }
        pipeline.validate()?;

        Ok(ResolvedConfig {
            schema_version,
            base_url,
            output_dir: config.output_dir.map(Utf8PathBuf::from),
            pipeline,
        })
    }
}

fn apply_policy(
    mut policy: RetryPolicy,
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
) -> RetryPolicy {
    if let Some(max_attempts) = max_attempts {
        policy.max_attempts = max_attempts;
    }
    if let Some(ms) = base_delay_ms {
        policy.base_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = max_delay_ms {
        policy.max_delay = Duration::from_millis(ms);
    }
    policy
}
