//! Candidate regions and output region resolution
//!
//! The page paints its input control and its output display with the same
//! class list, so a style selector alone matches both. Regions are told
//! apart by structural markers (tag, `role` attribute, editability), never
//! by their current text: an empty output is a legitimate state and looks
//! exactly like an empty input.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{E2eError, E2eResult};

/// Opaque identity of a rendered element, valid until the surface re-renders it
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegionId(pub String);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RegionId {
    fn from(s: &str) -> Self {
        RegionId(s.to_string())
    }
}

/// Structural classification of a region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Input,
    Display,
}

/// Markers the role is derived from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuralMarkers {
    /// Lowercase tag name
    pub tag: String,

    /// Value of the `role` attribute, if any
    #[serde(default)]
    pub aria_role: Option<String>,

    /// Whether the element accepts text entry (input, textarea, contenteditable)
    #[serde(default)]
    pub editable: bool,

    /// Whether a text entry control is nested inside the element
    #[serde(default)]
    pub contains_text_entry: bool,
}

impl StructuralMarkers {
    pub fn display(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            aria_role: None,
            editable: false,
            contains_text_entry: false,
        }
    }

    pub fn text_entry(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            aria_role: None,
            editable: true,
            contains_text_entry: false,
        }
    }

    pub fn with_aria_role(mut self, role: &str) -> Self {
        self.aria_role = Some(role.to_string());
        self
    }

    /// Mark the element as wrapping a text entry control
    pub fn wrapping_text_entry(mut self) -> Self {
        self.contains_text_entry = true;
        self
    }

    /// Classify the element. Text content is never consulted; a wrapper
    /// around a text entry control belongs to the input side.
    pub fn role(&self) -> Role {
        let text_entry_tag = matches!(self.tag.as_str(), "textarea" | "input");
        let interactive_role = matches!(
            self.aria_role.as_deref(),
            Some("textbox") | Some("searchbox") | Some("combobox")
        );

        if self.editable || self.contains_text_entry || text_entry_tag || interactive_role {
            Role::Input
        } else {
            Role::Display
        }
    }
}

/// A live element matched by the shared style signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: RegionId,
    pub markers: StructuralMarkers,

    /// Text snapshot taken when the candidate set was collected
    #[serde(default)]
    pub text: String,
}

impl Candidate {
    pub fn role(&self) -> Role {
        self.markers.role()
    }
}

/// The region chosen as the render target for one observation session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputHandle {
    pub id: RegionId,
    pub signature: String,
}

/// The region chosen as the text entry control
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputHandle {
    pub id: RegionId,
    pub signature: String,
}

/// Capabilities consumed from the page under test.
///
/// Reads are side-effect free. Mutations trigger the page's own debounced
/// re-render, which is what the convergence watcher observes. Any call on a
/// region that no longer exists fails with [`E2eError::RegionInvalidated`].
#[async_trait]
pub trait RenderSurface: Send + Sync {
    /// Live handles matching `signature`, in document order
    async fn find_all(&self, signature: &str) -> E2eResult<Vec<Candidate>>;

    /// Current text content of a region
    async fn text(&self, id: &RegionId) -> E2eResult<String>;

    /// Current structural role of a region
    async fn role(&self, id: &RegionId) -> E2eResult<Role>;

    async fn clear(&self, id: &RegionId) -> E2eResult<()>;

    /// Replace the content of a region in one step
    async fn write(&self, id: &RegionId, text: &str) -> E2eResult<()>;

    /// Type `text` one character at a time
    async fn type_incremental(&self, id: &RegionId, text: &str, per_char: Duration)
        -> E2eResult<()>;
}

/// How to break ties when several non-input candidates remain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// First remaining candidate in document order
    #[default]
    DocumentOrder,

    /// First remaining candidate with non-empty text, falling back to
    /// document order when all of them are empty
    PreferNonEmpty,
}

/// Picks the input and output regions out of an ambiguous candidate set.
///
/// Stateless on purpose: element identities can be replaced between
/// sessions, so callers resolve again for every session.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegionResolver {
    tie_break: TieBreak,
}

impl RegionResolver {
    pub fn new(tie_break: TieBreak) -> Self {
        Self { tie_break }
    }

    /// Select the output region from `candidates`
    pub fn resolve(&self, signature: &str, candidates: &[Candidate]) -> E2eResult<OutputHandle> {
        let displays: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| c.role() == Role::Display)
            .collect();

        let chosen = match displays.as_slice() {
            [] => {
                return Err(E2eError::RegionNotFound {
                    signature: signature.to_string(),
                    candidates: candidates.len(),
                })
            }
            [only] => *only,
            [first, ..] => match self.tie_break {
                TieBreak::DocumentOrder => *first,
                TieBreak::PreferNonEmpty => displays
                    .iter()
                    .copied()
                    .find(|c| !c.text.trim().is_empty())
                    .unwrap_or(*first),
            },
        };

        debug!(
            "Resolved output region {} ({} candidate(s), {} non-input)",
            chosen.id,
            candidates.len(),
            displays.len()
        );

        Ok(OutputHandle {
            id: chosen.id.clone(),
            signature: signature.to_string(),
        })
    }

    /// Select the text entry control from `candidates`
    pub fn resolve_input(&self, signature: &str, candidates: &[Candidate]) -> E2eResult<InputHandle> {
        candidates
            .iter()
            .find(|c| c.role() == Role::Input)
            .map(|c| InputHandle {
                id: c.id.clone(),
                signature: signature.to_string(),
            })
            .ok_or_else(|| E2eError::InputNotFound {
                signature: signature.to_string(),
                candidates: candidates.len(),
            })
    }

    /// Collect the live candidate set and resolve the output region from it
    pub async fn resolve_live<S: RenderSurface + ?Sized>(
        &self,
        surface: &S,
        signature: &str,
    ) -> E2eResult<OutputHandle> {
        let candidates = surface.find_all(signature).await?;
        self.resolve(signature, &candidates)
    }

    /// Collect the live candidate set and resolve the input control from it
    pub async fn resolve_input_live<S: RenderSurface + ?Sized>(
        &self,
        surface: &S,
        signature: &str,
    ) -> E2eResult<InputHandle> {
        let candidates = surface.find_all(signature).await?;
        self.resolve_input(signature, &candidates)
    }
}
