//! Playwright browser automation
//!
//! A long-lived Node process runs the embedded bridge script and drives a
//! single page. Requests and replies are JSON objects, one per line, over
//! the child's stdin and stdout. Element handles are opaque keys minted by
//! the bridge, one per live DOM element.
//!
//! Lines are written by a dedicated task and replies are routed back by
//! request id, so dropping a request future mid-flight (the watcher does
//! this on deadline or supersession) never leaves a partial line on the
//! pipe or a reply for the next caller.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command as TokioCommand};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::error::{E2eError, E2eResult};
use crate::region::{Candidate, RegionId, RenderSurface, Role, StructuralMarkers};

const BRIDGE_SCRIPT: &str = include_str!("bridge.js");

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl Browser {
    fn as_str(&self) -> &'static str {
        match self {
            Browser::Chromium => "chromium",
            Browser::Firefox => "firefox",
            Browser::Webkit => "webkit",
        }
    }
}

impl std::str::FromStr for Browser {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chromium" => Ok(Browser::Chromium),
            "firefox" => Ok(Browser::Firefox),
            "webkit" => Ok(Browser::Webkit),
            other => Err(E2eError::InvalidConfig(format!("unknown browser: {}", other))),
        }
    }
}

/// Configuration for Playwright
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaywrightConfig {
    pub browser: Browser,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,

    /// Node executable used to run the bridge
    pub node_binary: PathBuf,

    /// Directory whose `node_modules` provides `playwright`
    pub working_dir: PathBuf,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            browser: Browser::Chromium,
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
            node_binary: PathBuf::from("node"),
            working_dir: PathBuf::from("."),
        }
    }
}

/// Launch parameters handed to the bridge as its first argument
#[derive(Debug, Serialize)]
struct BridgeLaunch<'a> {
    browser: &'a str,
    headless: bool,
    viewport_width: u32,
    viewport_height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum BridgeRequest {
    Goto { url: String },
    FindAll { selector: String },
    Text { handle: String },
    Role { handle: String },
    Clear { handle: String },
    Fill { handle: String, text: String },
    Type { handle: String, text: String, delay_ms: u64 },
    Close,
}

impl BridgeRequest {
    fn handle(&self) -> Option<&str> {
        match self {
            BridgeRequest::Text { handle }
            | BridgeRequest::Role { handle }
            | BridgeRequest::Clear { handle }
            | BridgeRequest::Fill { handle, .. }
            | BridgeRequest::Type { handle, .. } => Some(handle),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    id: u64,
    #[serde(flatten)]
    request: &'a BridgeRequest,
}

#[derive(Debug, Deserialize)]
struct BridgeResponse {
    id: u64,
    ok: bool,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

impl BridgeResponse {
    fn into_result(self, handle: Option<&str>) -> E2eResult<serde_json::Value> {
        if self.ok {
            return Ok(self.result.unwrap_or(serde_json::Value::Null));
        }
        let message = self.error.unwrap_or_else(|| "unknown bridge error".to_string());
        match (self.code.as_deref(), handle) {
            (Some("detached"), Some(handle)) => Err(E2eError::RegionInvalidated {
                region: handle.to_string(),
                reason: message,
            }),
            _ => Err(E2eError::Bridge(message)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BridgeElement {
    handle: String,
    markers: StructuralMarkers,
    #[serde(default)]
    text: String,
}

/// Reply slots of in-flight requests, keyed by request id
#[derive(Default)]
struct PendingTable {
    waiters: HashMap<u64, oneshot::Sender<BridgeResponse>>,

    /// Set once the bridge's stdout has closed
    closed: bool,
}

type Pending = Arc<parking_lot::Mutex<PendingTable>>;

/// Request/reply channel to the bridge process
struct BridgeChannel {
    outbox: mpsc::UnboundedSender<String>,
    pending: Pending,
    next_id: AtomicU64,
}

/// Drops the reply slot of a request that was abandoned before its reply
struct PendingSlot<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.pending.lock().waiters.remove(&self.id);
    }
}

impl BridgeChannel {
    /// Start the writer and reader tasks over the bridge's stdio
    fn spawn<W, R>(writer: W, reader: R) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (outbox, inbox) = mpsc::unbounded_channel();
        let pending: Pending = Arc::default();

        tokio::spawn(write_loop(writer, inbox));
        tokio::spawn(read_loop(reader, pending.clone()));

        Self {
            outbox,
            pending,
            next_id: AtomicU64::new(1),
        }
    }

    async fn call(&self, request: &BridgeRequest) -> E2eResult<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut line = serde_json::to_string(&Envelope { id, request })?;
        line.push('\n');

        let (tx, rx) = oneshot::channel();
        {
            let mut table = self.pending.lock();
            if table.closed {
                return Err(E2eError::Bridge("bridge exited unexpectedly".into()));
            }
            table.waiters.insert(id, tx);
        }
        let _slot = PendingSlot {
            pending: &self.pending,
            id,
        };

        self.outbox
            .send(line)
            .map_err(|_| E2eError::Bridge("bridge stdin closed".into()))?;

        let response = rx
            .await
            .map_err(|_| E2eError::Bridge("bridge exited unexpectedly".into()))?;
        response.into_result(request.handle())
    }
}

async fn write_loop<W: AsyncWrite + Unpin>(mut writer: W, mut inbox: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = inbox.recv().await {
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            warn!("Bridge write failed: {}", e);
            break;
        }
        if let Err(e) = writer.flush().await {
            warn!("Bridge flush failed: {}", e);
            break;
        }
    }
}

async fn read_loop<R: AsyncRead + Unpin>(reader: R, pending: Pending) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Bridge read failed: {}", e);
                break;
            }
        };
        let response: BridgeResponse = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(_) => {
                debug!("Ignoring non-protocol bridge output: {}", line);
                continue;
            }
        };
        let waiter = pending.lock().waiters.remove(&response.id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => debug!("Dropping reply {} for an abandoned request", response.id),
        }
    }
    // Wake every waiter with a closed channel
    let mut table = pending.lock();
    table.closed = true;
    table.waiters.clear();
}

/// [`RenderSurface`] backed by a real browser page
pub struct PlaywrightSurface {
    channel: BridgeChannel,
    child: Mutex<Child>,
    _script_dir: tempfile::TempDir,
}

impl PlaywrightSurface {
    /// Start the bridge and open `url`
    pub async fn launch(config: &PlaywrightConfig, url: &str) -> E2eResult<Self> {
        Self::check_playwright_installed()?;

        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("bridge.js");
        std::fs::write(&script_path, BRIDGE_SCRIPT)?;

        let launch = serde_json::to_string(&BridgeLaunch {
            browser: config.browser.as_str(),
            headless: config.headless,
            viewport_width: config.viewport_width,
            viewport_height: config.viewport_height,
        })?;

        debug!("Starting Playwright bridge: {}", script_path.display());

        let mut child = TokioCommand::new(&config.node_binary)
            .arg(&script_path)
            .arg(launch)
            .current_dir(&config.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                E2eError::Bridge(format!(
                    "failed to spawn {}: {}",
                    config.node_binary.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| E2eError::Bridge("bridge stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| E2eError::Bridge("bridge stdout unavailable".into()))?;

        let surface = Self {
            channel: BridgeChannel::spawn(stdin, stdout),
            child: Mutex::new(child),
            _script_dir: script_dir,
        };

        info!("Opening {} in {}", url, config.browser.as_str());
        surface
            .request(BridgeRequest::Goto { url: url.to_string() })
            .await?;
        Ok(surface)
    }

    /// Check if Playwright is installed
    fn check_playwright_installed() -> E2eResult<()> {
        let output = Command::new("npx")
            .args(["playwright", "--version"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match output {
            Ok(status) if status.success() => Ok(()),
            _ => Err(E2eError::PlaywrightNotFound),
        }
    }

    /// Navigate the page again, e.g. between suites
    pub async fn goto(&self, url: &str) -> E2eResult<()> {
        self.request(BridgeRequest::Goto { url: url.to_string() })
            .await
            .map(|_| ())
    }

    async fn request(&self, request: BridgeRequest) -> E2eResult<serde_json::Value> {
        self.channel.call(&request).await
    }

    /// Close the browser and stop the bridge process
    pub async fn shutdown(&self) -> E2eResult<()> {
        if let Err(e) = self.request(BridgeRequest::Close).await {
            warn!("Bridge close failed: {}", e);
        }

        let mut child = self.child.lock().await;
        info!("Stopping Playwright bridge (pid: {:?})", child.id());

        // Try graceful shutdown first
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = child.id() {
                if kill(Pid::from_raw(pid as i32), Signal::SIGTERM).is_ok()
                    && tokio::time::timeout(Duration::from_millis(500), child.wait())
                        .await
                        .is_ok()
                {
                    return Ok(());
                }
            }
        }

        let _ = child.kill().await;
        Ok(())
    }
}

#[async_trait]
impl RenderSurface for PlaywrightSurface {
    async fn find_all(&self, signature: &str) -> E2eResult<Vec<Candidate>> {
        let value = self
            .request(BridgeRequest::FindAll {
                selector: signature.to_string(),
            })
            .await?;
        let elements: Vec<BridgeElement> = serde_json::from_value(value)?;
        Ok(elements
            .into_iter()
            .map(|e| Candidate {
                id: RegionId(e.handle),
                markers: e.markers,
                text: e.text,
            })
            .collect())
    }

    async fn text(&self, id: &RegionId) -> E2eResult<String> {
        let value = self.request(BridgeRequest::Text { handle: id.0.clone() }).await?;
        Ok(serde_json::from_value::<Option<String>>(value)?.unwrap_or_default())
    }

    async fn role(&self, id: &RegionId) -> E2eResult<Role> {
        let value = self.request(BridgeRequest::Role { handle: id.0.clone() }).await?;
        let markers: StructuralMarkers = serde_json::from_value(value)?;
        Ok(markers.role())
    }

    async fn clear(&self, id: &RegionId) -> E2eResult<()> {
        self.request(BridgeRequest::Clear { handle: id.0.clone() })
            .await
            .map(|_| ())
    }

    async fn write(&self, id: &RegionId, text: &str) -> E2eResult<()> {
        self.request(BridgeRequest::Fill {
            handle: id.0.clone(),
            text: text.to_string(),
        })
        .await
        .map(|_| ())
    }

    async fn type_incremental(&self, id: &RegionId, text: &str, per_char: Duration) -> E2eResult<()> {
        self.request(BridgeRequest::Type {
            handle: id.0.clone(),
            text: text.to_string(),
            delay_ms: per_char.as_millis() as u64,
        })
        .await
        .map(|_| ())
    }
}
