//! Render batches and the reusable builder that accumulates one pass.

use crate::collections::map::HashMap;
use crate::diff::ComponentDiff;
use crate::{ComponentId, EventHandlerId};

/// The complete output of one render pass, handed atomically to the batch
/// sink. Immutable once constructed; later batches assume earlier ones have
/// already been applied to the live display.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RenderBatch {
    pub component_diffs: Vec<ComponentDiff>,
    pub disposed_component_ids: Vec<ComponentId>,
    pub disposed_event_handler_ids: Vec<EventHandlerId>,
}

impl RenderBatch {
    pub fn is_empty(&self) -> bool {
        self.component_diffs.is_empty()
            && self.disposed_component_ids.is_empty()
            && self.disposed_event_handler_ids.is_empty()
    }
}

/// Accumulates diffs and disposal lists for the pass in progress.
///
/// One builder is owned by the renderer and reused for every pass: `finish`
/// drains the backing vectors into an immutable [`RenderBatch`] without giving
/// up their allocations, and the builder is only touched while the render
/// gate is held, so no further synchronization is needed.
#[derive(Default)]
pub(crate) struct RenderBatchBuilder {
    component_diffs: Vec<ComponentDiff>,
    disposed_component_ids: Vec<ComponentId>,
    disposed_event_handler_ids: Vec<EventHandlerId>,
    /// Scratch map for the attribute hash-join fallback in the diff engine.
    pub(crate) attribute_scratch: HashMap<String, usize>,
}

impl RenderBatchBuilder {
    pub(crate) fn append_diff(&mut self, diff: ComponentDiff) {
        self.component_diffs.push(diff);
    }

    pub(crate) fn record_disposed_component(&mut self, id: ComponentId) {
        self.disposed_component_ids.push(id);
    }

    pub(crate) fn dispose_event_handler(&mut self, id: EventHandlerId) {
        self.disposed_event_handler_ids.push(id);
    }

    pub(crate) fn finish(&mut self) -> RenderBatch {
        RenderBatch {
            component_diffs: self.component_diffs.drain(..).collect(),
            disposed_component_ids: self.disposed_component_ids.drain(..).collect(),
            disposed_event_handler_ids: self.disposed_event_handler_ids.drain(..).collect(),
        }
    }

    /// Discards everything accumulated so far. Used when a pass aborts so the
    /// next pass does not inherit a half-built batch.
    pub(crate) fn abandon(&mut self) {
        self.component_diffs.clear();
        self.disposed_component_ids.clear();
        self.disposed_event_handler_ids.clear();
        self.attribute_scratch.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_drains_but_keeps_builder_usable() {
        let mut builder = RenderBatchBuilder::default();
        builder.record_disposed_component(7);
        builder.dispose_event_handler(3);
        let batch = builder.finish();
        assert_eq!(batch.disposed_component_ids, vec![7]);
        assert_eq!(batch.disposed_event_handler_ids, vec![3]);

        let next = builder.finish();
        assert!(next.is_empty());
    }
}
