//! Runner configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::E2eResult;
use crate::playwright::PlaywrightConfig;
use crate::region::TieBreak;
use crate::watcher::WatchConfig;

/// Shared class list of the translator's input and output panes
pub const DEFAULT_STYLE_SIGNATURE: &str =
    ".w-full.h-80.p-3.rounded-lg.ring-1.ring-slate-300.whitespace-pre-wrap";

/// Runner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Fixture suites directory
    pub fixtures_dir: PathBuf,

    /// Output directory for results
    pub output_dir: PathBuf,

    /// Page under test
    pub page: PageConfig,

    /// Convergence detection
    pub watch: WatchConfig,

    /// Case flow
    pub flow: FlowConfig,

    /// Browser bridge
    pub playwright: PlaywrightConfig,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            fixtures_dir: PathBuf::from("fixtures"),
            output_dir: PathBuf::from("test-results"),
            page: PageConfig::default(),
            watch: WatchConfig::default(),
            flow: FlowConfig::default(),
            playwright: PlaywrightConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageConfig {
    pub url: String,

    /// Selector matching both the input control and the output display
    pub style_signature: String,

    /// Precedence among several non-input candidates
    pub tie_break: TieBreak,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            url: "https://www.swifttranslator.com/".to_string(),
            style_signature: DEFAULT_STYLE_SIGNATURE.to_string(),
            tie_break: TieBreak::DocumentOrder,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    /// Upper bound on waiting for the output to go blank after a clear
    pub clear_timeout_ms: u64,

    /// Per-character delay for incrementally typed cases
    pub type_delay_ms: u64,

    /// Re-resolve and retry a case once after its region was invalidated
    pub retry_invalidated: bool,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            clear_timeout_ms: 1000,
            type_delay_ms: 150,
            retry_invalidated: true,
        }
    }
}

impl FlowConfig {
    pub fn clear_timeout(&self) -> Duration {
        Duration::from_millis(self.clear_timeout_ms)
    }

    pub fn type_delay(&self) -> Duration {
        Duration::from_millis(self.type_delay_ms)
    }
}

impl RunnerConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> E2eResult<Self> {
        let config: Self = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            Self::default()
        };
        config.watch.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> E2eResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::E2eError;
    use crate::playwright::Browser;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunnerConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, RunnerConfig::default());
    }

    #[test]
    fn test_partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("e2e.toml");
        std::fs::write(
            &path,
            r#"
[watch]
poll_interval_ms = 100
quiet_samples = 3

[playwright]
browser = "firefox"
headless = false

[flow]
retry_invalidated = false
"#,
        )
        .unwrap();

        let config = RunnerConfig::load(&path).unwrap();
        assert_eq!(config.watch.poll_interval_ms, 100);
        assert_eq!(config.watch.quiet_samples, 3);
        assert_eq!(config.watch.settle_delay_ms, WatchConfig::default().settle_delay_ms);
        assert_eq!(config.playwright.browser, Browser::Firefox);
        assert!(!config.playwright.headless);
        assert!(!config.flow.retry_invalidated);
        assert_eq!(config.page, PageConfig::default());
    }

    #[test]
    fn test_invalid_watch_config_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("e2e.toml");
        std::fs::write(&path, "[watch]\nquiet_samples = 0\n").unwrap();
        assert!(matches!(RunnerConfig::load(&path), Err(E2eError::InvalidConfig(_))));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/e2e.toml");
        let mut config = RunnerConfig::default();
        config.page.tie_break = TieBreak::PreferNonEmpty;
        config.watch.placeholders = vec!["...".into()];
        config.save(&path).unwrap();

        assert_eq!(RunnerConfig::load(&path).unwrap(), config);
    }
}
