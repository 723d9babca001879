//! In-process render surface driven by the tokio clock
//!
//! Mimics what the hosted page does from the outside: an input control and
//! an output display share one style signature, and every mutation of the
//! input schedules a debounced re-render of the output. Renders can be
//! multi-stage (blank first, repaint later), and tests can script text
//! changes or remove elements at chosen instants.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use crate::error::{E2eError, E2eResult};
use crate::region::{Candidate, RegionId, RenderSurface, Role, StructuralMarkers};

/// Maps the current input text to the text the output should show
pub type Transform = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Word-by-word lookup transform. Unknown words pass through unchanged.
pub fn word_table(pairs: &[(&str, &str)]) -> Transform {
    let table: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    Arc::new(move |input: &str| {
        input
            .split(' ')
            .map(|w| table.get(w).cloned().unwrap_or_else(|| w.to_string()))
            .collect::<Vec<_>>()
            .join(" ")
    })
}

/// Timing of the simulated page's re-render
#[derive(Debug, Clone, Default)]
pub struct RenderBehavior {
    /// Quiet time after the last input mutation before rendering
    pub debounce: Duration,

    /// When set, the output is blanked first and repainted after this gap
    pub blank_before_repaint: Option<Duration>,
}

#[derive(Debug)]
struct SimElement {
    id: RegionId,
    signature: String,
    markers: StructuralMarkers,
    text: String,
    attached: bool,
}

struct Binding {
    transform: Transform,
    behavior: RenderBehavior,
}

#[derive(Default)]
struct State {
    elements: Vec<SimElement>,
    input: Option<RegionId>,
    output: Option<RegionId>,
    generation: u64,
    renders: u64,
    reads: u64,
}

impl State {
    fn element(&self, id: &RegionId) -> E2eResult<&SimElement> {
        self.elements
            .iter()
            .find(|e| &e.id == id && e.attached)
            .ok_or_else(|| detached(id))
    }

    fn element_mut(&mut self, id: &RegionId) -> E2eResult<&mut SimElement> {
        self.elements
            .iter_mut()
            .find(|e| &e.id == id && e.attached)
            .ok_or_else(|| detached(id))
    }
}

fn detached(id: &RegionId) -> E2eError {
    E2eError::RegionInvalidated {
        region: id.to_string(),
        reason: "element is no longer attached".into(),
    }
}

/// Scriptable [`RenderSurface`]
#[derive(Clone, Default)]
pub struct SimulatedSurface {
    state: Arc<Mutex<State>>,
    binding: Option<Arc<Binding>>,
}

impl SimulatedSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// A page with a textarea and an output div sharing `signature`,
    /// wired so the output renders `transform(input)`
    pub fn translator_page(signature: &str, transform: Transform, behavior: RenderBehavior) -> Self {
        Self::new()
            .with_element("input", signature, StructuralMarkers::text_entry("textarea"), "")
            .with_element("output", signature, StructuralMarkers::display("div"), "")
            .with_binding("input", "output", transform, behavior)
    }

    /// Append an element in document order
    pub fn with_element(self, id: &str, signature: &str, markers: StructuralMarkers, text: &str) -> Self {
        self.state.lock().elements.push(SimElement {
            id: id.into(),
            signature: signature.to_string(),
            markers,
            text: text.to_string(),
            attached: true,
        });
        self
    }

    /// Re-render `output` whenever `input` changes
    pub fn with_binding(
        mut self,
        input: &str,
        output: &str,
        transform: Transform,
        behavior: RenderBehavior,
    ) -> Self {
        {
            let mut state = self.state.lock();
            state.input = Some(input.into());
            state.output = Some(output.into());
        }
        self.binding = Some(Arc::new(Binding { transform, behavior }));
        self
    }

    pub fn set_text(&self, id: &str, text: &str) -> E2eResult<()> {
        self.state.lock().element_mut(&id.into())?.text = text.to_string();
        Ok(())
    }

    /// Set the text of `id` once `after` has elapsed
    pub fn schedule_text(&self, id: &str, after: Duration, text: &str) {
        let surface = self.clone();
        let id = id.to_string();
        let text = text.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = surface.set_text(&id, &text);
        });
    }

    /// Detach `id`; every later call on it fails as invalidated
    pub fn remove(&self, id: &str) {
        let id = RegionId::from(id);
        let mut state = self.state.lock();
        for element in state.elements.iter_mut().filter(|e| e.id == id) {
            element.attached = false;
        }
    }

    pub fn schedule_remove(&self, id: &str, after: Duration) {
        let surface = self.clone();
        let id = id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            surface.remove(&id);
        });
    }

    /// Detach `id` and attach a blank copy of it as `new_id` in its place,
    /// the way a full re-render swaps element identities
    pub fn replace_element(&self, id: &str, new_id: &str) -> E2eResult<()> {
        let old = RegionId::from(id);
        let mut state = self.state.lock();
        let position = state
            .elements
            .iter()
            .position(|e| e.id == old && e.attached)
            .ok_or_else(|| detached(&old))?;

        let replacement = {
            let element = &mut state.elements[position];
            element.attached = false;
            SimElement {
                id: new_id.into(),
                signature: element.signature.clone(),
                markers: element.markers.clone(),
                text: String::new(),
                attached: true,
            }
        };
        state.elements.insert(position + 1, replacement);

        if state.input.as_ref() == Some(&old) {
            state.input = Some(new_id.into());
        }
        if state.output.as_ref() == Some(&old) {
            state.output = Some(new_id.into());
        }
        Ok(())
    }

    pub fn schedule_replace(&self, id: &str, new_id: &str, after: Duration) {
        let surface = self.clone();
        let id = id.to_string();
        let new_id = new_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = surface.replace_element(&id, &new_id);
        });
    }

    /// Change the structural markers of `id`
    pub fn set_markers(&self, id: &str, markers: StructuralMarkers) -> E2eResult<()> {
        self.state.lock().element_mut(&id.into())?.markers = markers;
        Ok(())
    }

    /// Completed output renders
    pub fn renders(&self) -> u64 {
        self.state.lock().renders
    }

    /// Text reads served so far
    pub fn reads(&self) -> u64 {
        self.state.lock().reads
    }

    fn input_changed(&self, id: &RegionId) {
        let Some(binding) = self.binding.clone() else {
            return;
        };

        let generation = {
            let mut state = self.state.lock();
            if state.input.as_ref() != Some(id) {
                return;
            }
            state.generation += 1;
            state.generation
        };

        let surface = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(binding.behavior.debounce).await;
            surface.render(&binding, generation).await;
        });
    }

    async fn render(&self, binding: &Binding, generation: u64) {
        if let Some(gap) = binding.behavior.blank_before_repaint {
            {
                let mut state = self.state.lock();
                if state.generation != generation {
                    return;
                }
                if let Some(output) = state.output.clone() {
                    if let Ok(element) = state.element_mut(&output) {
                        element.text.clear();
                    }
                }
            }
            tokio::time::sleep(gap).await;
        }

        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        let (Some(input), Some(output)) = (state.input.clone(), state.output.clone()) else {
            return;
        };
        let Ok(source) = state.element(&input) else {
            return;
        };
        let rendered = if source.text.is_empty() {
            String::new()
        } else {
            (binding.transform)(&source.text)
        };
        if let Ok(element) = state.element_mut(&output) {
            trace!("Simulated render #{}: {:?}", generation, rendered);
            element.text = rendered;
            state.renders += 1;
        }
    }

    fn mutate_input(&self, id: &RegionId, apply: impl FnOnce(&mut String)) -> E2eResult<()> {
        {
            let mut state = self.state.lock();
            let element = state.element_mut(id)?;
            if element.markers.role() != Role::Input {
                return Err(E2eError::NotEditable { region: id.to_string() });
            }
            apply(&mut element.text);
        }
        self.input_changed(id);
        Ok(())
    }
}

#[async_trait]
impl RenderSurface for SimulatedSurface {
    async fn find_all(&self, signature: &str) -> E2eResult<Vec<Candidate>> {
        let state = self.state.lock();
        Ok(state
            .elements
            .iter()
            .filter(|e| e.attached && e.signature == signature)
            .map(|e| Candidate {
                id: e.id.clone(),
                markers: e.markers.clone(),
                text: e.text.clone(),
            })
            .collect())
    }

    async fn text(&self, id: &RegionId) -> E2eResult<String> {
        let mut state = self.state.lock();
        state.reads += 1;
        state.element(id).map(|e| e.text.clone())
    }

    async fn role(&self, id: &RegionId) -> E2eResult<Role> {
        self.state.lock().element(id).map(|e| e.markers.role())
    }

    async fn clear(&self, id: &RegionId) -> E2eResult<()> {
        self.mutate_input(id, |text| text.clear())
    }

    async fn write(&self, id: &RegionId, text: &str) -> E2eResult<()> {
        self.mutate_input(id, |current| *current = text.to_string())
    }

    async fn type_incremental(&self, id: &RegionId, text: &str, per_char: Duration) -> E2eResult<()> {
        for ch in text.chars() {
            self.mutate_input(id, |current| current.push(ch))?;
            tokio::time::sleep(per_char).await;
        }
        Ok(())
    }
}
