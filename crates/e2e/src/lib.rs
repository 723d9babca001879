//! Transliteration E2E Test Framework
//!
//! This crate drives a hosted transliteration page and checks that, for a
//! given input, the output pane settles on the expected string:
//! - Tells the output pane apart from the input pane, which share one style
//! - Detects when asynchronously rendered output has stopped changing
//! - Parses declarative YAML fixture suites
//! - Controls a browser through a Playwright bridge process
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 E2E Test Runner (Rust)                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestRunner<S: RenderSurface>                               │
//! │    ├── resolve_input / resolve  -> RegionResolver           │
//! │    ├── clear, await_blank, write | type_incremental         │
//! │    ├── observe(output) -> ConvergenceWatcher                │
//! │    └── compare(actual, expected) -> CaseOutcome             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RenderSurface                                              │
//! │    ├── PlaywrightSurface  (node bridge, JSON lines)         │
//! │    └── SimulatedSurface   (tokio clock, scripted renders)   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  FixtureSuite (YAML)                                        │
//! │    └── cases: [{ id, input, expected, tags, mode }]         │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod fixture;
pub mod playwright;
pub mod region;
pub mod runner;
pub mod simulated;
pub mod watcher;

pub use config::RunnerConfig;
pub use error::{E2eError, E2eResult};
pub use fixture::{FixtureCase, FixtureSuite, InputMode};
pub use region::{Candidate, OutputHandle, RegionId, RegionResolver, RenderSurface, Role};
pub use runner::{CaseOutcome, RunSummary, TestRunner};
pub use watcher::{ConvergenceWatcher, WatchConfig};
