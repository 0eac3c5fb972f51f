//! Startup configuration.
//!
//! The on-disk shape mirrors the job configuration the pacing pipeline is
//! deployed with: bucket parameters, the rulebook, and the two tick
//! cadences, with durations as humantime strings.
//!
//! ```json
//! {
//!   "bucketName": "prices",
//!   "ratePerSecond": 5.0,
//!   "bucketLimit": 100,
//!   "initialTokens": 10,
//!   "feedEvery": "200ms",
//!   "consumeEvery": "50ms",
//!   "rulebook": [
//!     { "match": { "region": "EU" }, "updateEvery": "30m" },
//!     { "default": true, "updateEvery": "6h" }
//!   ]
//! }
//! ```

use crate::bucket::BucketConfig;
use crate::rules::{RuleError, RuleSpec};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_FEED_EVERY: Duration = Duration::from_millis(200);
const DEFAULT_CONSUME_EVERY: Duration = Duration::from_millis(50);

/// Raw configuration as deserialized; compile with [`PacerSpec::compile`].
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacerSpec {
    pub bucket_name: String,
    pub rate_per_second: f64,
    #[serde(default)]
    pub bucket_limit: Option<u64>,
    #[serde(default)]
    pub initial_tokens: u64,
    /// Overrides the rate-derived throttle window when set.
    #[serde(default)]
    pub feed_window: Option<String>,
    #[serde(default)]
    pub feed_every: Option<String>,
    #[serde(default)]
    pub consume_every: Option<String>,
    #[serde(default)]
    pub rulebook: Vec<RuleSpec>,
}

/// Errors raised while loading configuration.
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("cannot read configuration file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("configuration is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("bad duration in {field}: {value:?}: {source}")]
    BadDuration {
        field: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },
    #[error("ratePerSecond must be a positive finite number, got {0}")]
    BadRate(f64),
    #[error(transparent)]
    Rule(#[from] RuleError),
}

/// Compiled configuration, ready to build a bucket and scheduler from.
#[derive(Debug, Clone)]
pub struct PacerConfig {
    pub bucket: BucketConfig,
    pub rulebook: Vec<RuleSpec>,
    pub feed_every: Duration,
    pub consume_every: Duration,
}

impl PacerSpec {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Read and parse a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Validate and normalize. Rule specs are carried through verbatim;
    /// they compile (and fail fast) when the scheduler is built.
    pub fn compile(self) -> Result<PacerConfig, ConfigError> {
        if !self.rate_per_second.is_finite() || self.rate_per_second <= 0.0 {
            return Err(ConfigError::BadRate(self.rate_per_second));
        }

        let mut bucket = BucketConfig::new(self.bucket_name, self.rate_per_second)
            .initial(self.initial_tokens);
        bucket.limit = self.bucket_limit;
        bucket.window = self.feed_window.as_deref().map(parse("feedWindow")).transpose()?;

        Ok(PacerConfig {
            bucket,
            rulebook: self.rulebook,
            feed_every: self
                .feed_every
                .as_deref()
                .map(parse("feedEvery"))
                .transpose()?
                .unwrap_or(DEFAULT_FEED_EVERY),
            consume_every: self
                .consume_every
                .as_deref()
                .map(parse("consumeEvery"))
                .transpose()?
                .unwrap_or(DEFAULT_CONSUME_EVERY),
        })
    }
}

fn parse(field: &'static str) -> impl Fn(&str) -> Result<Duration, ConfigError> {
    move |value| {
        humantime::parse_duration(value).map_err(|source| ConfigError::BadDuration {
            field,
            value: value.to_string(),
            source,
        })
    }
}
