//! Output convergence detection
//!
//! The page re-renders its output asynchronously and debounced, sometimes
//! in several stages (blank first, then repainted). [`ConvergenceWatcher`]
//! samples the output region on a fixed cadence and resolves once the text
//! has held the same non-placeholder value for a number of consecutive
//! samples and survived a final settle window.
//!
//! ```text
//!  t0 ── poll ── poll ── poll ── ... ── quiet run reached ── settle ── re-sample
//!                                                                        │
//!                                       changed? ◄── restart run ◄───────┤
//!                                                                        ▼
//!                                                              resolve(last_text)
//! ```
//!
//! At most one session is active per region. Starting a new one cancels
//! the previous session, whose `observe` call then returns
//! [`E2eError::Superseded`] without sampling again.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::{E2eError, E2eResult};
use crate::region::{OutputHandle, RegionId, RenderSurface, Role};

/// Sampling and deadline settings for one observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Sampling cadence
    pub poll_interval_ms: u64,

    /// Consecutive identical non-placeholder samples required
    pub quiet_samples: u32,

    /// Hard deadline for the whole session
    pub overall_timeout_ms: u64,

    /// Grace period after quiescence before the confirming re-sample
    pub settle_delay_ms: u64,

    /// Texts the page shows while it has nothing to say yet
    /// (compared after trimming). Never count towards quiescence.
    pub placeholders: Vec<String>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
            quiet_samples: 2,
            overall_timeout_ms: 20_000,
            settle_delay_ms: 500,
            placeholders: Vec::new(),
        }
    }
}

impl WatchConfig {
    pub fn validate(&self) -> E2eResult<()> {
        if self.poll_interval_ms == 0 {
            return Err(E2eError::InvalidConfig("poll_interval_ms must be > 0".into()));
        }
        if self.quiet_samples == 0 {
            return Err(E2eError::InvalidConfig("quiet_samples must be > 0".into()));
        }
        if self.overall_timeout_ms < self.poll_interval_ms {
            return Err(E2eError::InvalidConfig(format!(
                "overall_timeout_ms ({}) is shorter than one poll interval ({})",
                self.overall_timeout_ms, self.poll_interval_ms
            )));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn overall_timeout(&self) -> Duration {
        Duration::from_millis(self.overall_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Whether `text` can count towards quiescence
    pub fn is_substantive(&self, text: &str) -> bool {
        let trimmed = text.trim();
        !trimmed.is_empty() && !self.placeholders.iter().any(|p| p.trim() == trimmed)
    }
}

/// Result of a converged observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Convergence {
    pub session_id: Uuid,
    pub text: String,
    pub samples: u64,
    pub settle_restarts: u32,
    pub elapsed: Duration,
}

/// State owned by a single observation. Never shared across sessions.
#[derive(Debug)]
pub struct ObservationSession {
    pub id: Uuid,
    pub target: OutputHandle,
    pub started_at: Instant,
    pub deadline: Instant,
    last_text: String,
    stable_count: u32,
    samples: u64,
    settle_restarts: u32,
    token: CancellationToken,

    /// Text left over from before the mutation. Never counts towards
    /// quiescence until a sample has shown something else.
    stale: Option<String>,
}

impl ObservationSession {
    fn new(target: OutputHandle, timeout: Duration, token: CancellationToken) -> Self {
        let started_at = Instant::now();
        Self {
            id: Uuid::new_v4(),
            target,
            started_at,
            deadline: started_at + timeout,
            last_text: String::new(),
            stable_count: 0,
            samples: 0,
            settle_restarts: 0,
            token,
            stale: None,
        }
    }

    pub fn last_text(&self) -> &str {
        &self.last_text
    }

    pub fn stable_count(&self) -> u32 {
        self.stable_count
    }

    /// Fold one sample into the current run of identical values.
    ///
    /// The sample that first shows a value opens the run, so a run of
    /// length `n` means `n` consecutive samples read the same text.
    fn record(&mut self, text: String, config: &WatchConfig) {
        self.samples += 1;
        if self.stale.as_deref().is_some_and(|s| s.trim() != text.trim()) {
            self.stale = None;
        }

        let counts = self.stale.is_none() && config.is_substantive(&text);
        if text == self.last_text {
            if counts {
                self.stable_count += 1;
            }
        } else {
            self.stable_count = u32::from(counts);
            self.last_text = text;
        }
    }

    fn is_quiescent(&self, config: &WatchConfig) -> bool {
        self.stable_count >= config.quiet_samples
    }

    fn timeout_error(&self) -> E2eError {
        E2eError::Timeout {
            elapsed_ms: self.started_at.elapsed().as_millis() as u64,
            last_text: self.last_text.clone(),
        }
    }

    fn superseded_error(&self) -> E2eError {
        E2eError::Superseded {
            region: self.target.id.to_string(),
        }
    }
}

struct ActiveSession {
    id: Uuid,
    token: CancellationToken,
}

type Registry = Arc<Mutex<HashMap<RegionId, ActiveSession>>>;

/// Deregisters a session when its observation finishes or is dropped
struct SessionGuard {
    registry: Registry,
    region: RegionId,
    id: Uuid,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut active = self.registry.lock();
        if active.get(&self.region).map(|s| s.id) == Some(self.id) {
            active.remove(&self.region);
        }
    }
}

/// Watches output regions until their text converges
#[derive(Clone)]
pub struct ConvergenceWatcher {
    config: WatchConfig,
    active: Registry,
}

impl ConvergenceWatcher {
    pub fn new(config: WatchConfig) -> E2eResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            active: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Number of sessions currently registered
    pub fn active_sessions(&self) -> usize {
        self.active.lock().len()
    }

    /// Cancel the in-flight session on `region`, if any
    pub fn cancel(&self, region: &RegionId) -> bool {
        match self.active.lock().remove(region) {
            Some(session) => {
                session.token.cancel();
                true
            }
            None => false,
        }
    }

    fn begin(&self, target: &OutputHandle, stale: Option<&str>) -> (ObservationSession, SessionGuard) {
        let token = CancellationToken::new();
        let mut session = ObservationSession::new(target.clone(), self.config.overall_timeout(), token.clone());
        session.stale = stale.filter(|s| !s.trim().is_empty()).map(str::to_string);

        let previous = self.active.lock().insert(
            target.id.clone(),
            ActiveSession {
                id: session.id,
                token,
            },
        );
        if let Some(previous) = previous {
            warn!(
                "Session {} on region {} superseded by {}",
                previous.id, target.id, session.id
            );
            previous.token.cancel();
        }

        let guard = SessionGuard {
            registry: self.active.clone(),
            region: target.id.clone(),
            id: session.id,
        };
        (session, guard)
    }

    /// Wait for the text of `target` to converge and return it
    pub async fn observe<S: RenderSurface + ?Sized>(
        &self,
        surface: &S,
        target: &OutputHandle,
    ) -> E2eResult<String> {
        self.observe_detailed(surface, target).await.map(|c| c.text)
    }

    /// Like [`observe`](Self::observe), with sampling statistics
    pub async fn observe_detailed<S: RenderSurface + ?Sized>(
        &self,
        surface: &S,
        target: &OutputHandle,
    ) -> E2eResult<Convergence> {
        self.observe_after(surface, target, None).await
    }

    /// Observe `target` without converging on `stale`, the text it showed
    /// before the mutation, until some sample has read a different value.
    ///
    /// A session that times out still showing `stale` reports it as
    /// `last_text`.
    pub async fn observe_after<S: RenderSurface + ?Sized>(
        &self,
        surface: &S,
        target: &OutputHandle,
        stale: Option<&str>,
    ) -> E2eResult<Convergence> {
        let (mut session, _guard) = self.begin(target, stale);
        debug!("Session {} observing region {}", session.id, target.id);

        let result = self.run(surface, &mut session).await;
        match &result {
            Ok(c) => debug!(
                "Session {} converged after {} sample(s) in {:?}",
                c.session_id, c.samples, c.elapsed
            ),
            Err(e) => debug!("Session {} ended: {}", session.id, e),
        }
        result
    }

    async fn run<S: RenderSurface + ?Sized>(
        &self,
        surface: &S,
        session: &mut ObservationSession,
    ) -> E2eResult<Convergence> {
        let mut text = self.sample(surface, session).await?;

        loop {
            session.record(text, &self.config);
            trace!(
                "Session {} sample #{}: run={} text={:?}",
                session.id,
                session.samples,
                session.stable_count,
                session.last_text
            );

            if session.is_quiescent(&self.config) {
                self.pause(session, self.config.settle_delay()).await?;
                let recheck = self.sample(surface, session).await?;
                if recheck == session.last_text {
                    self.revalidate(surface, session).await?;
                    return Ok(Convergence {
                        session_id: session.id,
                        text: std::mem::take(&mut session.last_text),
                        samples: session.samples + 1,
                        settle_restarts: session.settle_restarts,
                        elapsed: session.started_at.elapsed(),
                    });
                }

                debug!(
                    "Session {} output changed during settle window, restarting run",
                    session.id
                );
                session.settle_restarts += 1;
                text = recheck;
                continue;
            }

            self.pause(session, self.config.poll_interval()).await?;
            text = self.sample(surface, session).await?;
        }
    }

    /// Suspend for `duration`, bounded by the deadline and cancellation
    async fn pause(&self, session: &ObservationSession, duration: Duration) -> E2eResult<()> {
        let wake = Instant::now() + duration;
        let capped = wake.min(session.deadline);

        tokio::select! {
            biased;
            _ = session.token.cancelled() => return Err(session.superseded_error()),
            _ = sleep_until(capped) => {}
        }

        if wake > session.deadline {
            return Err(session.timeout_error());
        }
        Ok(())
    }

    /// Read the target once, bounded by the deadline and cancellation
    async fn sample<S: RenderSurface + ?Sized>(
        &self,
        surface: &S,
        session: &ObservationSession,
    ) -> E2eResult<String> {
        if session.token.is_cancelled() {
            return Err(session.superseded_error());
        }

        tokio::select! {
            biased;
            _ = session.token.cancelled() => Err(session.superseded_error()),
            _ = sleep_until(session.deadline) => Err(session.timeout_error()),
            text = surface.text(&session.target.id) => text,
        }
    }

    /// The role classifier is structural, so it is checked once, on success
    async fn revalidate<S: RenderSurface + ?Sized>(
        &self,
        surface: &S,
        session: &ObservationSession,
    ) -> E2eResult<()> {
        match surface.role(&session.target.id).await? {
            Role::Display => Ok(()),
            Role::Input => Err(E2eError::RegionInvalidated {
                region: session.target.id.to_string(),
                reason: "region now classifies as an input control".into(),
            }),
        }
    }

    /// Poll `target` until it reads blank or `timeout` elapses.
    ///
    /// Returns whether the region went blank. Used after clearing the input
    /// so a new session never starts on the previous case's output.
    pub async fn await_blank<S: RenderSurface + ?Sized>(
        &self,
        surface: &S,
        target: &OutputHandle,
        timeout: Duration,
    ) -> E2eResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            if surface.text(&target.id).await?.trim().is_empty() {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            sleep_until((now + self.config.poll_interval()).min(deadline)).await;
        }
    }
}
