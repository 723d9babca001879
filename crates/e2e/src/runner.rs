//! Test runner that drives fixture cases through a render surface

use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::RunnerConfig;
use crate::error::{E2eError, E2eResult};
use crate::fixture::{FixtureCase, FixtureSuite, InputMode};
use crate::region::{RegionResolver, RenderSurface};
use crate::watcher::{Convergence, ConvergenceWatcher};

/// How a single case ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CaseOutcome {
    Passed,

    /// Output settled on a different string
    Mismatch { expected: String, actual: String },

    /// Nothing ever appeared in the output region
    NoOutput { waited_ms: u64 },

    /// Output appeared but never held still
    Unstable { waited_ms: u64, last_text: String },

    /// Typing the partial prefix produced no output at all
    PartialMissing { partial_input: String },

    RegionNotFound { message: String },

    RegionInvalidated { message: String },

    Error { message: String },
}

impl CaseOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, CaseOutcome::Passed)
    }

    fn from_error(err: &E2eError) -> Self {
        match err {
            E2eError::Timeout { elapsed_ms, last_text } if last_text.trim().is_empty() => {
                CaseOutcome::NoOutput { waited_ms: *elapsed_ms }
            }
            E2eError::Timeout { elapsed_ms, last_text } => CaseOutcome::Unstable {
                waited_ms: *elapsed_ms,
                last_text: last_text.clone(),
            },
            E2eError::RegionNotFound { .. } | E2eError::InputNotFound { .. } => {
                CaseOutcome::RegionNotFound { message: err.to_string() }
            }
            E2eError::RegionInvalidated { .. } => {
                CaseOutcome::RegionInvalidated { message: err.to_string() }
            }
            _ => CaseOutcome::Error { message: err.to_string() },
        }
    }

    fn describe(&self) -> String {
        match self {
            CaseOutcome::Passed => "passed".to_string(),
            CaseOutcome::Mismatch { expected, actual } => {
                format!("expected {:?}, got {:?}", expected, actual)
            }
            CaseOutcome::NoOutput { waited_ms } => {
                format!("no output appeared within {} ms", waited_ms)
            }
            CaseOutcome::Unstable { waited_ms, last_text } => format!(
                "output did not settle within {} ms (last seen {:?})",
                waited_ms, last_text
            ),
            CaseOutcome::PartialMissing { partial_input } => {
                format!("no output while typing {:?}", partial_input)
            }
            CaseOutcome::RegionNotFound { message }
            | CaseOutcome::RegionInvalidated { message }
            | CaseOutcome::Error { message } => message.clone(),
        }
    }
}

/// Result of running a single case
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseResult {
    pub id: String,
    pub name: String,
    pub outcome: CaseOutcome,
    pub duration_ms: u64,
    pub attempts: u32,
    pub samples: u64,
}

impl CaseResult {
    pub fn success(&self) -> bool {
        self.outcome.is_pass()
    }
}

/// Result of running one suite
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub suite: String,
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<CaseResult>,
}

/// Result of running several suites
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub suites: Vec<SuiteResult>,
}

impl RunSummary {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

enum Attempt {
    Observed(Convergence),
    PartialMissing(String),

    /// The output never moved off the previous case's text
    NoFreshOutput(u64),
}

/// Runs fixture cases against a render surface
pub struct TestRunner<S> {
    surface: S,
    resolver: RegionResolver,
    watcher: ConvergenceWatcher,
    config: RunnerConfig,
}

impl<S: RenderSurface> TestRunner<S> {
    pub fn new(surface: S, config: RunnerConfig) -> E2eResult<Self> {
        Ok(Self {
            surface,
            resolver: RegionResolver::new(config.page.tie_break),
            watcher: ConvergenceWatcher::new(config.watch.clone())?,
            config,
        })
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn watcher(&self) -> &ConvergenceWatcher {
        &self.watcher
    }

    pub fn into_surface(self) -> S {
        self.surface
    }

    /// Run every suite in the fixtures directory
    pub async fn run_all(&self) -> E2eResult<RunSummary> {
        let suites = FixtureSuite::load_all(&self.config.fixtures_dir)?;
        Ok(self.run_suites(&suites).await)
    }

    /// Run cases carrying `tag`
    pub async fn run_tagged(&self, tag: &str) -> E2eResult<RunSummary> {
        let suites: Vec<FixtureSuite> = FixtureSuite::load_all(&self.config.fixtures_dir)?
            .iter()
            .map(|s| s.filter_by_tag(tag))
            .filter(|s| !s.cases.is_empty())
            .collect();
        Ok(self.run_suites(&suites).await)
    }

    /// Run a specific case by id
    pub async fn run_case_by_id(&self, id: &str) -> E2eResult<CaseResult> {
        let suites = FixtureSuite::load_all(&self.config.fixtures_dir)?;
        let case = suites
            .iter()
            .flat_map(|s| s.cases.iter())
            .find(|c| c.id == id)
            .ok_or_else(|| E2eError::FixtureParse(format!("Case not found: {}", id)))?;

        Ok(self.run_case(case).await)
    }

    pub async fn run_suites(&self, suites: &[FixtureSuite]) -> RunSummary {
        let start = Instant::now();
        let mut summary = RunSummary::default();

        for suite in suites {
            let result = self.run_suite(suite).await;
            summary.total += result.total;
            summary.passed += result.passed;
            summary.failed += result.failed;
            summary.suites.push(result);
        }

        summary.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Run results: {} passed, {} failed ({} ms)",
            summary.passed, summary.failed, summary.duration_ms
        );
        summary
    }

    pub async fn run_suite(&self, suite: &FixtureSuite) -> SuiteResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut results = Vec::with_capacity(suite.cases.len());

        info!("Suite '{}': {} case(s)", suite.name, suite.cases.len());

        for case in &suite.cases {
            let result = self.run_case(case).await;
            if result.success() {
                info!("✓ {} ({} ms)", result.id, result.duration_ms);
            } else {
                error!("✗ {} - {}", result.id, result.outcome.describe());
            }
            results.push(result);
        }

        let passed = results.iter().filter(|r| r.success()).count();
        SuiteResult {
            suite: suite.name.clone(),
            started_at,
            total: results.len(),
            passed,
            failed: results.len() - passed,
            duration_ms: start.elapsed().as_millis() as u64,
            results,
        }
    }

    /// Run one case, re-resolving once after an invalidated region if allowed
    pub async fn run_case(&self, case: &FixtureCase) -> CaseResult {
        let start = Instant::now();
        let max_attempts = if self.config.flow.retry_invalidated { 2 } else { 1 };
        let mut attempts = 0;

        let (outcome, samples) = loop {
            attempts += 1;
            match self.attempt(case).await {
                Ok(Attempt::Observed(convergence)) => {
                    let actual = convergence.text.trim().to_string();
                    let outcome = if actual == case.expected {
                        CaseOutcome::Passed
                    } else {
                        CaseOutcome::Mismatch {
                            expected: case.expected.clone(),
                            actual,
                        }
                    };
                    break (outcome, convergence.samples);
                }
                Ok(Attempt::PartialMissing(partial_input)) => {
                    break (CaseOutcome::PartialMissing { partial_input }, 0);
                }
                Ok(Attempt::NoFreshOutput(waited_ms)) => {
                    break (CaseOutcome::NoOutput { waited_ms }, 0);
                }
                Err(e) if e.is_reresolvable() && attempts < max_attempts => {
                    warn!("{}: {}; re-resolving regions", case.id, e);
                }
                Err(e) => break (CaseOutcome::from_error(&e), 0),
            }
        };

        CaseResult {
            id: case.id.clone(),
            name: case.name.clone(),
            outcome,
            duration_ms: start.elapsed().as_millis() as u64,
            attempts,
            samples,
        }
    }

    async fn attempt(&self, case: &FixtureCase) -> E2eResult<Attempt> {
        let signature = self.config.page.style_signature.as_str();
        let input = self.resolver.resolve_input_live(&self.surface, signature).await?;
        let previous = self.resolver.resolve_live(&self.surface, signature).await?;

        self.surface.clear(&input.id).await?;
        let blank = self
            .watcher
            .await_blank(&self.surface, &previous, self.config.flow.clear_timeout())
            .await?;
        let mut stale = None;
        if !blank {
            let residue = self.surface.text(&previous.id).await?;
            warn!(
                "{}: output still shows {:?} after {} ms; ignoring it until it changes",
                case.id, residue, self.config.flow.clear_timeout_ms
            );
            stale = Some(residue);
        }

        match &case.mode {
            InputMode::Fill => {
                debug!("{}: writing {} char(s)", case.id, case.input.chars().count());
                self.surface.write(&input.id, &case.input).await?;
            }
            InputMode::Type { delay_ms, .. } => {
                let per_char = delay_ms
                    .map(std::time::Duration::from_millis)
                    .unwrap_or_else(|| self.config.flow.type_delay());

                let remainder = match case.partial_split() {
                    Some((prefix, rest)) => {
                        self.surface.type_incremental(&input.id, prefix, per_char).await?;
                        let Some(partial) = self.partial_output(signature, stale.as_deref()).await? else {
                            return Ok(Attempt::PartialMissing(prefix.to_string()));
                        };
                        // The full rendering has to replace the partial one
                        stale = (!rest.trim().is_empty()).then_some(partial);
                        rest
                    }
                    None => case.input.as_str(),
                };
                self.surface.type_incremental(&input.id, remainder, per_char).await?;
            }
        }

        let output = self.resolver.resolve_live(&self.surface, signature).await?;
        match self.watcher.observe_after(&self.surface, &output, stale.as_deref()).await {
            Ok(convergence) => Ok(Attempt::Observed(convergence)),
            Err(E2eError::Timeout { elapsed_ms, last_text })
                if stale.as_deref().is_some_and(|s| s.trim() == last_text.trim()) =>
            {
                Ok(Attempt::NoFreshOutput(elapsed_ms))
            }
            Err(e) => Err(e),
        }
    }

    /// Output rendered for a typed prefix, if anything new appeared
    async fn partial_output(&self, signature: &str, stale: Option<&str>) -> E2eResult<Option<String>> {
        let output = self.resolver.resolve_live(&self.surface, signature).await?;
        let text = match self.watcher.observe_after(&self.surface, &output, stale).await {
            Ok(convergence) => convergence.text,
            Err(E2eError::Timeout { last_text, .. }) => last_text,
            Err(e) => return Err(e),
        };

        let fresh = !text.trim().is_empty() && stale.map_or(true, |s| s.trim() != text.trim());
        Ok(fresh.then_some(text))
    }

    /// Write run results to JSON file
    pub fn write_results(&self, summary: &RunSummary) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let path = self.config.output_dir.join("test-results.json");
        let json = serde_json::to_string_pretty(summary)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}
