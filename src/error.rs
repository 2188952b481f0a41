use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// No configuration document in any of the searched locations
    #[error("Configuration not found, searched: {searched:?}")]
    ConfigNotFound { searched: Vec<PathBuf> },

    #[error("Malformed configuration: {0}")]
    ConfigMalformed(String),

    /// Not every worker agreed on the expected cloud size in time
    #[error("Cloud of {expected} did not form within {timeout:?}, last reported sizes: {last_sizes:?}")]
    ClusterFormationTimeout {
        expected: usize,
        timeout: Duration,
        last_sizes: Vec<Option<usize>>,
    },

    #[error("Transport error on {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    /// The worker answered, but with an error or an unusable body
    #[error("Remote error from {endpoint}: {message}")]
    Remote { endpoint: String, message: String },

    /// A remote job reported counters that cannot be jointly true
    #[error("'{description}' reported inconsistent state: {reason}")]
    StabilizationInconsistent { description: String, reason: String },

    #[error("'{description}' did not stabilize within {timeout:?} ({polls} polls)")]
    StabilizationTimeout {
        description: String,
        timeout: Duration,
        polls: usize,
    },

    #[error("Process error: {0}")]
    Process(String),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HarnessError>;

impl HarnessError {
    pub fn transport(endpoint: impl Into<String>, message: impl ToString) -> Self {
        HarnessError::Transport {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    pub fn remote(endpoint: impl Into<String>, message: impl ToString) -> Self {
        HarnessError::Remote {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    pub fn process(msg: impl Into<String>) -> Self {
        HarnessError::Process(msg.into())
    }

    /// Transport failures are the only errors a poll loop may ride out.
    pub fn is_transport(&self) -> bool {
        matches!(self, HarnessError::Transport { .. })
    }
}

impl From<reqwest::Error> for HarnessError {
    fn from(e: reqwest::Error) -> Self {
        let endpoint = e
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        HarnessError::Transport {
            endpoint,
            message: e.to_string(),
        }
    }
}
