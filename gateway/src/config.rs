use serde::Deserialize;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("max_body_size must be greater than 0")]
    InvalidBodyLimit,

    #[error("Duplication method label cannot be empty")]
    EmptyDuplicationMethod,

    #[error("Duplication queue_size must be greater than 0")]
    InvalidQueueSize,

    #[error("Duplication needs at least one worker")]
    NoWorkers,

    #[error("{0} timeout_secs must be greater than 0")]
    InvalidTimeout(&'static str),
}

/// Gateway configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener for storage requests
    pub listener: Listener,
    /// Admin listener for health and readiness probes
    pub admin_listener: Listener,
    /// Largest request body accepted, in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
    /// Serialize update/upsert/remove requests sharing a collection and select
    #[serde(default = "default_true")]
    pub serialize_writes: bool,
    #[serde(default)]
    pub store: StoreConfig,
    /// Permission enforcement. Disabled when absent.
    pub auth: Option<AuthConfig>,
    /// Duplication side channel. Disabled when absent.
    pub duplication: Option<DuplicationConfig>,
}

impl Config {
    /// Validates the gateway configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if self.max_body_size == 0 {
            return Err(ValidationError::InvalidBodyLimit);
        }

        if let Some(auth) = &self.auth
            && auth.timeout_secs == 0
        {
            return Err(ValidationError::InvalidTimeout("auth"));
        }

        if let Some(duplication) = &self.duplication {
            duplication.validate()?;
        }

        Ok(())
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum StoreConfig {
    #[default]
    Memory,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AuthConfig {
    /// Permission service endpoint
    pub url: Url,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// What a request does when the duplication queue is full.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Discard the envelope and count it as dropped.
    #[default]
    Drop,
    /// Wait for room. Only the detached duplication task waits, never the response.
    Block,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct DuplicationConfig {
    /// Label written into the `method` field of every envelope
    pub method: String,
    /// Consumer endpoint envelopes are POSTed to
    pub url: Url,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    #[serde(default)]
    pub overflow: OverflowPolicy,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl DuplicationConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.method.trim().is_empty() {
            return Err(ValidationError::EmptyDuplicationMethod);
        }
        if self.queue_size == 0 {
            return Err(ValidationError::InvalidQueueSize);
        }
        if self.workers == 0 {
            return Err(ValidationError::NoWorkers);
        }
        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout("duplication"));
        }
        Ok(())
    }
}

fn default_max_body_size() -> usize {
    1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_queue_size() -> usize {
    1024
}

fn default_workers() -> usize {
    4
}
