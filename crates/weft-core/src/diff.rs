//! Positional diff engine.
//!
//! Produces the minimal edit script transforming one frame sequence into the
//! next. Frames are matched by emission position, never by value hashing: a
//! synchronously re-rendering UI cannot afford a general tree diff, and the
//! emission order of a render function is stable enough that positional
//! matching finds the same nodes pass after pass. A mismatch in kind or
//! static shape (tag, component type, region length) at a position gives up
//! on reuse and replaces the whole subtree.

use crate::batch::RenderBatchBuilder;
use crate::frames::{AttributeFrame, RenderTreeFrame};
use crate::{ComponentId, RenderError, RendererInner};

/// One operation in an edit script. `sibling_index` addresses the display
/// position within the component's frame scope; removals do not advance it,
/// insertions do.
#[derive(Clone, Debug, PartialEq)]
pub enum RenderTreeEdit {
    InsertFrame {
        sibling_index: usize,
        frame: RenderTreeFrame,
    },
    RemoveFrame {
        sibling_index: usize,
    },
    UpdateText {
        sibling_index: usize,
        content: String,
    },
    SetAttribute {
        sibling_index: usize,
        attribute: AttributeFrame,
    },
    RemoveAttribute {
        sibling_index: usize,
        name: String,
    },
}

/// The edit script for one component within a batch.
#[derive(Clone, Debug, PartialEq)]
pub struct ComponentDiff {
    pub component_id: ComponentId,
    pub edits: Vec<RenderTreeEdit>,
}

/// Carries everything the diff functions need so they do not pass long
/// parameter lists among themselves.
pub(crate) struct DiffContext<'a> {
    renderer: &'a RendererInner,
    batch: &'a mut RenderBatchBuilder,
    component_id: ComponentId,
    edits: Vec<RenderTreeEdit>,
    sibling_index: usize,
}

impl<'a> DiffContext<'a> {
    pub(crate) fn new(
        renderer: &'a RendererInner,
        batch: &'a mut RenderBatchBuilder,
        component_id: ComponentId,
    ) -> Self {
        Self {
            renderer,
            batch,
            component_id,
            edits: Vec::new(),
            sibling_index: 0,
        }
    }

    pub(crate) fn into_edits(self) -> Vec<RenderTreeEdit> {
        self.edits
    }
}

/// Appends the edits transforming `old` into `new`. `new` is mutable because
/// the pass assigns ids into it: event handler ids on inserted or changed
/// event attributes, and component ids on newly instantiated children.
pub(crate) fn compute_diff(
    ctx: &mut DiffContext<'_>,
    old: &[RenderTreeFrame],
    new: &mut [RenderTreeFrame],
) -> Result<(), RenderError> {
    let old_len = old.len();
    let new_len = new.len();
    append_edits_for_range(ctx, old, 0, old_len, new, 0, new_len)
}

/// Emits removal edits (and disposal queue entries) for an entire frame
/// sequence. Used when a component is disposed outright.
pub(crate) fn remove_all_frames(ctx: &mut DiffContext<'_>, frames: &[RenderTreeFrame]) {
    let mut index = 0;
    while index < frames.len() {
        remove_old_frame(ctx, frames, index);
        index += frames[index].span();
    }
}

fn append_edits_for_range(
    ctx: &mut DiffContext<'_>,
    old: &[RenderTreeFrame],
    old_start: usize,
    old_end: usize,
    new: &mut [RenderTreeFrame],
    new_start: usize,
    new_end: usize,
) -> Result<(), RenderError> {
    let mut old_index = old_start;
    let mut new_index = new_start;
    while old_index < old_end && new_index < new_end {
        append_edits_for_position(ctx, old, old_index, new, new_index)?;
        old_index += old[old_index].span();
        new_index += new[new_index].span();
    }
    while new_index < new_end {
        insert_new_frame(ctx, new, new_index)?;
        new_index += new[new_index].span();
    }
    while old_index < old_end {
        remove_old_frame(ctx, old, old_index);
        old_index += old[old_index].span();
    }
    Ok(())
}

/// True when the frames at a shared position can be updated in place. A
/// region only matches when its length is unchanged; a mismatched length
/// forces whole-subtree replacement, which bounds the cost of the walk.
fn frames_match(old: &RenderTreeFrame, new: &RenderTreeFrame) -> bool {
    use RenderTreeFrame::*;
    match (old, new) {
        (Text { .. }, Text { .. }) => true,
        (Element { tag: old_tag, .. }, Element { tag: new_tag, .. }) => old_tag == new_tag,
        (
            ComponentRef {
                component_type: old_type,
                assigned_id: Some(_),
                ..
            },
            ComponentRef {
                component_type: new_type,
                ..
            },
        ) => old_type == new_type,
        (
            Region {
                subtree_length: old_len,
            },
            Region {
                subtree_length: new_len,
            },
        ) => old_len == new_len,
        _ => false,
    }
}

fn append_edits_for_position(
    ctx: &mut DiffContext<'_>,
    old: &[RenderTreeFrame],
    old_index: usize,
    new: &mut [RenderTreeFrame],
    new_index: usize,
) -> Result<(), RenderError> {
    if !frames_match(&old[old_index], &new[new_index]) {
        remove_old_frame(ctx, old, old_index);
        return insert_new_frame(ctx, new, new_index);
    }

    match &old[old_index] {
        RenderTreeFrame::Text { content } => {
            update_text(ctx, content, new, new_index);
            ctx.sibling_index += 1;
            Ok(())
        }
        RenderTreeFrame::Element { .. } => {
            update_element(ctx, old, old_index, new, new_index);
            ctx.sibling_index += 1;
            Ok(())
        }
        RenderTreeFrame::ComponentRef { .. } => {
            update_retained_component(ctx, old, old_index, new, new_index);
            ctx.sibling_index += 1;
            Ok(())
        }
        RenderTreeFrame::Region { subtree_length } => {
            let len = *subtree_length;
            append_edits_for_range(
                ctx,
                old,
                old_index + 1,
                old_index + 1 + len,
                new,
                new_index + 1,
                new_index + 1 + len,
            )
        }
    }
}

fn update_text(
    ctx: &mut DiffContext<'_>,
    old_content: &str,
    new: &mut [RenderTreeFrame],
    new_index: usize,
) {
    let RenderTreeFrame::Text { content } = &new[new_index] else {
        return;
    };
    if old_content != content.as_str() {
        ctx.edits.push(RenderTreeEdit::UpdateText {
            sibling_index: ctx.sibling_index,
            content: content.clone(),
        });
    }
}

fn update_element(
    ctx: &mut DiffContext<'_>,
    old: &[RenderTreeFrame],
    old_index: usize,
    new: &mut [RenderTreeFrame],
    new_index: usize,
) {
    let RenderTreeFrame::Element {
        attributes: old_attrs,
        ..
    } = &old[old_index]
    else {
        return;
    };
    let RenderTreeFrame::Element {
        attributes: new_attrs,
        ..
    } = &mut new[new_index]
    else {
        return;
    };
    append_attribute_edits(ctx, old_attrs, new_attrs);
}

/// A retained child keeps its component instance; its internals are not
/// diffed here. It re-accepts parameters only when the supplied list is not
/// exactly equal to the previous one, and its own render (if any) joins the
/// current pass through the render queue.
fn update_retained_component(
    ctx: &mut DiffContext<'_>,
    old: &[RenderTreeFrame],
    old_index: usize,
    new: &mut [RenderTreeFrame],
    new_index: usize,
) {
    let RenderTreeFrame::ComponentRef {
        assigned_id: Some(child_id),
        parameters: old_params,
        ..
    } = &old[old_index]
    else {
        return;
    };
    let child_id = *child_id;
    let RenderTreeFrame::ComponentRef {
        assigned_id,
        parameters: new_params,
        ..
    } = &mut new[new_index]
    else {
        return;
    };
    *assigned_id = Some(child_id);
    if new_params != old_params {
        ctx.renderer.update_child_parameters(child_id, new_params);
    }
}

fn insert_new_frame(
    ctx: &mut DiffContext<'_>,
    new: &mut [RenderTreeFrame],
    index: usize,
) -> Result<(), RenderError> {
    let region_len = match &new[index] {
        RenderTreeFrame::Region { subtree_length } => Some(*subtree_length),
        _ => None,
    };
    if let Some(len) = region_len {
        let end = index + 1 + len;
        let mut child = index + 1;
        while child < end {
            insert_new_frame(ctx, new, child)?;
            child += new[child].span();
        }
        return Ok(());
    }

    if let RenderTreeFrame::Element { attributes, .. } = &mut new[index] {
        for attribute in attributes.iter_mut() {
            initialize_attribute(ctx, attribute);
        }
    }

    let pending_child =
        if let RenderTreeFrame::ComponentRef {
            component_type,
            assigned_id,
            ..
        } = &new[index]
        {
            Some((*component_type, *assigned_id))
        } else {
            None
        };
    if let Some((component_type, pre_assigned)) = pending_child {
        let child_id = match pre_assigned {
            // The host instantiated this child up front and the frame
            // already adopted its id.
            Some(id) => id,
            None => ctx.renderer.instantiate_child(component_type, ctx.component_id)?,
        };
        if let RenderTreeFrame::ComponentRef {
            assigned_id,
            parameters,
            ..
        } = &mut new[index]
        {
            *assigned_id = Some(child_id);
            ctx.renderer.update_child_parameters(child_id, parameters);
        }
    }

    ctx.edits.push(RenderTreeEdit::InsertFrame {
        sibling_index: ctx.sibling_index,
        frame: new[index].clone(),
    });
    ctx.sibling_index += 1;
    Ok(())
}

fn remove_old_frame(ctx: &mut DiffContext<'_>, old: &[RenderTreeFrame], index: usize) {
    match &old[index] {
        RenderTreeFrame::Element { attributes, .. } => {
            for attribute in attributes {
                if let Some(id) = attribute.event_handler_id {
                    ctx.batch.dispose_event_handler(id);
                }
            }
            ctx.edits.push(RenderTreeEdit::RemoveFrame {
                sibling_index: ctx.sibling_index,
            });
        }
        RenderTreeFrame::Text { .. } => {
            ctx.edits.push(RenderTreeEdit::RemoveFrame {
                sibling_index: ctx.sibling_index,
            });
        }
        RenderTreeFrame::ComponentRef { assigned_id, .. } => {
            if let Some(id) = assigned_id {
                ctx.renderer.queue_component_disposal(*id);
            }
            ctx.edits.push(RenderTreeEdit::RemoveFrame {
                sibling_index: ctx.sibling_index,
            });
        }
        RenderTreeFrame::Region { subtree_length } => {
            let end = index + 1 + subtree_length;
            let mut child = index + 1;
            while child < end {
                remove_old_frame(ctx, old, child);
                child += old[child].span();
            }
        }
    }
}

/// Attributes are conceptually unordered, so same-name pairs are matched with
/// a positional merge fast path; once the orders diverge the remainder falls
/// back to a hash join over the scratch map in the batch builder.
fn append_attribute_edits(
    ctx: &mut DiffContext<'_>,
    old_attrs: &[AttributeFrame],
    new_attrs: &mut [AttributeFrame],
) {
    let mut index = 0;
    let shared = old_attrs.len().min(new_attrs.len());
    while index < shared && old_attrs[index].name == new_attrs[index].name {
        append_attribute_pair(ctx, &old_attrs[index], &mut new_attrs[index]);
        index += 1;
    }
    if index < old_attrs.len() || index < new_attrs.len() {
        append_attribute_edits_slow(ctx, &old_attrs[index..], &mut new_attrs[index..]);
    }
}

fn append_attribute_edits_slow(
    ctx: &mut DiffContext<'_>,
    old_attrs: &[AttributeFrame],
    new_attrs: &mut [AttributeFrame],
) {
    debug_assert!(ctx.batch.attribute_scratch.is_empty());
    for (position, attribute) in new_attrs.iter().enumerate() {
        ctx.batch
            .attribute_scratch
            .insert(attribute.name.clone(), position);
    }

    let mut matched = vec![false; new_attrs.len()];
    for old_attr in old_attrs {
        match ctx.batch.attribute_scratch.get(old_attr.name.as_str()).copied() {
            Some(position) => {
                matched[position] = true;
                append_attribute_pair(ctx, old_attr, &mut new_attrs[position]);
            }
            None => {
                if let Some(id) = old_attr.event_handler_id {
                    ctx.batch.dispose_event_handler(id);
                }
                ctx.edits.push(RenderTreeEdit::RemoveAttribute {
                    sibling_index: ctx.sibling_index,
                    name: old_attr.name.clone(),
                });
            }
        }
    }
    ctx.batch.attribute_scratch.clear();

    for (position, seen) in matched.iter().copied().enumerate() {
        if !seen {
            initialize_attribute_at(ctx, new_attrs, position);
        }
    }
}

fn initialize_attribute_at(
    ctx: &mut DiffContext<'_>,
    new_attrs: &mut [AttributeFrame],
    position: usize,
) {
    initialize_attribute(ctx, &mut new_attrs[position]);
    ctx.edits.push(RenderTreeEdit::SetAttribute {
        sibling_index: ctx.sibling_index,
        attribute: new_attrs[position].clone(),
    });
}

fn append_attribute_pair(
    ctx: &mut DiffContext<'_>,
    old: &AttributeFrame,
    new: &mut AttributeFrame,
) {
    if old.value == new.value {
        // Unchanged value: the old handler id stays valid, so carry it over
        // instead of disposing and re-registering.
        new.event_handler_id = old.event_handler_id;
        return;
    }
    if let Some(id) = old.event_handler_id {
        ctx.batch.dispose_event_handler(id);
    }
    initialize_attribute(ctx, new);
    ctx.edits.push(RenderTreeEdit::SetAttribute {
        sibling_index: ctx.sibling_index,
        attribute: new.clone(),
    });
}

fn initialize_attribute(ctx: &mut DiffContext<'_>, attribute: &mut AttributeFrame) {
    attribute.event_handler_id = if attribute.is_event_binding() {
        Some(ctx.renderer.assign_event_handler_id())
    } else {
        None
    };
}
