//! Error types for E2E testing

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("No output region among {candidates} candidate(s) matching '{signature}'")]
    RegionNotFound { signature: String, candidates: usize },

    #[error("No input region among {candidates} candidate(s) matching '{signature}'")]
    InputNotFound { signature: String, candidates: usize },

    #[error("Output did not settle within {elapsed_ms} ms (last seen: {last_text:?})")]
    Timeout { elapsed_ms: u64, last_text: String },

    #[error("Region {region} invalidated: {reason}")]
    RegionInvalidated { region: String, reason: String },

    #[error("Region {region} does not accept text entry")]
    NotEditable { region: String },

    #[error("Observation of region {region} superseded by a newer session")]
    Superseded { region: String },

    #[error("Playwright not found. Install with: npx playwright install")]
    PlaywrightNotFound,

    #[error("Playwright bridge error: {0}")]
    Bridge(String),

    #[error("Fixture parse error: {0}")]
    FixtureParse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML encode error: {0}")]
    TomlSer(#[from] toml::ser::Error),
}

impl E2eError {
    /// Outcomes that end an observation session for good. Retrying any of
    /// them means starting a new session.
    pub fn is_terminal_for_session(&self) -> bool {
        matches!(
            self,
            E2eError::RegionNotFound { .. }
                | E2eError::Timeout { .. }
                | E2eError::RegionInvalidated { .. }
                | E2eError::Superseded { .. }
        )
    }

    /// Whether re-resolving the region and starting over can help.
    pub fn is_reresolvable(&self) -> bool {
        matches!(self, E2eError::RegionInvalidated { .. })
    }
}

pub type E2eResult<T> = Result<T, E2eError>;
