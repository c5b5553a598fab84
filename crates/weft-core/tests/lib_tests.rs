use std::cell::{Cell, RefCell};
use std::rc::Rc;

use weft_testing::{
    attr, component_ref, component_ref_with, element, region, text, TestHost,
};

use weft_core::{
    AttributeFrame, Component, DispatchError, EventArgs, EventHandlerId, EventTarget,
    FrameBuffer, RenderBatch, RenderError, RenderHandle, RenderTreeEdit, RenderTreeFrame,
    Teardown, TeardownError,
};

fn first_element_handler_id(batch: &RenderBatch) -> Option<EventHandlerId> {
    for diff in &batch.component_diffs {
        for edit in &diff.edits {
            let frame = match edit {
                RenderTreeEdit::InsertFrame { frame, .. } => frame,
                _ => continue,
            };
            if let RenderTreeFrame::Element { attributes, .. } = frame {
                if let Some(id) = attributes.iter().find_map(|a| a.event_handler_id) {
                    return Some(id);
                }
            }
        }
    }
    None
}

#[test]
fn first_render_inserts_all_frames() {
    let host = TestHost::new();
    let (id, _script) = host.attach_scripted(vec![
        element("div", vec![attr("class", "panel")]),
        text("A"),
    ]);
    host.renderer.render_component(id).unwrap();

    let batch = host.last_batch().unwrap();
    assert_eq!(batch.component_diffs.len(), 1);
    let diff = &batch.component_diffs[0];
    assert_eq!(diff.component_id, id);
    assert_eq!(
        diff.edits,
        vec![
            RenderTreeEdit::InsertFrame {
                sibling_index: 0,
                frame: element("div", vec![attr("class", "panel")]),
            },
            RenderTreeEdit::InsertFrame {
                sibling_index: 1,
                frame: text("A"),
            },
        ]
    );
    assert!(batch.disposed_component_ids.is_empty());
    assert!(batch.disposed_event_handler_ids.is_empty());
}

#[test]
fn identical_rerender_diffs_to_empty_script() {
    let host = TestHost::new();
    let (id, _script) = host.attach_scripted(vec![
        element("div", vec![attr("class", "panel")]),
        text("A"),
    ]);
    host.renderer.render_component(id).unwrap();
    host.renderer.render_component(id).unwrap();

    assert_eq!(host.batch_count(), 2);
    let batch = host.last_batch().unwrap();
    assert_eq!(batch.component_diffs.len(), 1);
    assert!(batch.component_diffs[0].edits.is_empty());
}

#[test]
fn text_change_is_one_update_edit() {
    let host = TestHost::new();
    let (id, script) = host.attach_scripted(vec![element("div", vec![]), text("A")]);
    host.renderer.render_component(id).unwrap();

    script.set_frames(vec![element("div", vec![]), text("B")]);
    host.renderer.render_component(id).unwrap();

    let batch = host.last_batch().unwrap();
    assert_eq!(
        batch.component_diffs[0].edits,
        vec![RenderTreeEdit::UpdateText {
            sibling_index: 1,
            content: "B".to_owned(),
        }]
    );
}

#[test]
fn dropped_trailing_text_is_one_remove_edit() {
    let host = TestHost::new();
    let (id, script) = host.attach_scripted(vec![element("div", vec![]), text("A")]);
    host.renderer.render_component(id).unwrap();

    script.set_frames(vec![element("div", vec![])]);
    host.renderer.render_component(id).unwrap();

    let batch = host.last_batch().unwrap();
    assert_eq!(
        batch.component_diffs[0].edits,
        vec![RenderTreeEdit::RemoveFrame { sibling_index: 1 }]
    );
}

#[test]
fn length_delta_yields_exactly_that_many_edits() {
    let host = TestHost::new();
    let (id, script) = host.attach_scripted(vec![text("a")]);
    host.renderer.render_component(id).unwrap();

    script.set_frames(vec![text("a"), text("b"), text("c")]);
    host.renderer.render_component(id).unwrap();
    let grown = host.last_batch().unwrap();
    assert_eq!(
        grown.component_diffs[0].edits,
        vec![
            RenderTreeEdit::InsertFrame {
                sibling_index: 1,
                frame: text("b"),
            },
            RenderTreeEdit::InsertFrame {
                sibling_index: 2,
                frame: text("c"),
            },
        ]
    );

    script.set_frames(vec![text("a")]);
    host.renderer.render_component(id).unwrap();
    let shrunk = host.last_batch().unwrap();
    assert_eq!(
        shrunk.component_diffs[0].edits,
        vec![
            RenderTreeEdit::RemoveFrame { sibling_index: 1 },
            RenderTreeEdit::RemoveFrame { sibling_index: 1 },
        ]
    );
}

struct ReentrantProbe {
    handle: Option<RenderHandle>,
    observed: Rc<RefCell<Option<RenderError>>>,
}

impl Component for ReentrantProbe {
    fn attach(&mut self, handle: RenderHandle) {
        self.handle = Some(handle);
    }

    fn render(&mut self, output: &mut FrameBuffer) {
        if let Some(handle) = &self.handle {
            if let Err(error) = handle.render() {
                *self.observed.borrow_mut() = Some(error);
            }
        }
        output.text("ok");
    }
}

#[test]
fn render_request_from_render_function_is_rejected() {
    let host = TestHost::new();
    let observed = Rc::new(RefCell::new(None));
    let id = host.renderer.attach_root(Box::new(ReentrantProbe {
        handle: None,
        observed: Rc::clone(&observed),
    }));

    // The outer pass itself completes; only the nested request fails.
    host.renderer.render_component(id).unwrap();

    assert_eq!(*observed.borrow(), Some(RenderError::ReentrantRender));
    assert!(!host.renderer.is_rendering());
    assert_eq!(host.batch_count(), 1);

    // The gate reopened: a fresh render works.
    host.renderer.render_component(id).unwrap();
    assert_eq!(host.batch_count(), 2);
}

#[test]
fn child_components_instantiate_and_render_in_the_same_pass() {
    let host = TestHost::new();
    let child_script = host.register_scripted("child");
    child_script.set_frames(vec![component_ref("grandchild")]);
    let grandchild_script = host.register_scripted("grandchild");
    grandchild_script.set_frames(vec![text("leaf")]);

    let (root_id, _root_script) = host.attach_scripted(vec![component_ref("child")]);
    host.renderer.render_component(root_id).unwrap();

    let batch = host.last_batch().unwrap();
    let rendered: Vec<_> = batch
        .component_diffs
        .iter()
        .map(|diff| diff.component_id)
        .collect();
    assert_eq!(rendered, vec![1, 2, 3]);
    assert!(batch.disposed_component_ids.is_empty());

    // The inserted frame adopted the child's assigned id.
    let RenderTreeEdit::InsertFrame { frame, .. } = &batch.component_diffs[0].edits[0] else {
        panic!("expected an insert edit");
    };
    let RenderTreeFrame::ComponentRef { assigned_id, .. } = frame else {
        panic!("expected a component reference frame");
    };
    assert_eq!(*assigned_id, Some(2));
}

#[test]
fn removing_a_component_ref_disposes_the_whole_subtree() {
    let host = TestHost::new();
    let child_script = host.register_scripted("child");
    child_script.set_frames(vec![component_ref("grandchild")]);
    let grandchild_script = host.register_scripted("grandchild");
    grandchild_script.set_frames(vec![text("leaf")]);

    let (root_id, root_script) = host.attach_scripted(vec![component_ref("child")]);
    host.renderer.render_component(root_id).unwrap();

    root_script.set_frames(vec![]);
    host.renderer.render_component(root_id).unwrap();

    let batch = host.last_batch().unwrap();
    assert_eq!(batch.disposed_component_ids, vec![2, 3]);
    assert_eq!(
        batch.component_diffs[0].edits,
        vec![RenderTreeEdit::RemoveFrame { sibling_index: 0 }]
    );

    // The registry held only weak handles; with the tree's ownership gone the
    // states are unreachable.
    assert_eq!(
        host.renderer.render_component(2),
        Err(RenderError::UnknownComponent { id: 2 })
    );
    assert_eq!(
        host.renderer.render_component(3),
        Err(RenderError::UnknownComponent { id: 3 })
    );
}

struct ClickCounter {
    clicks: Rc<Cell<usize>>,
    seen_handlers: Rc<RefCell<Vec<EventHandlerId>>>,
}

impl Component for ClickCounter {
    fn render(&mut self, output: &mut FrameBuffer) {
        output.element("button", vec![AttributeFrame::new("onclick", "go")]);
        output.text(format!("clicks: {}", self.clicks.get()));
    }

    fn event_target(&mut self) -> Option<&mut dyn EventTarget> {
        Some(self)
    }
}

impl EventTarget for ClickCounter {
    fn handle_event(&mut self, handler_id: EventHandlerId, args: &EventArgs) {
        let step = args.payload::<usize>().copied().unwrap_or(1);
        self.clicks.set(self.clicks.get() + step);
        self.seen_handlers.borrow_mut().push(handler_id);
    }
}

#[test]
fn event_dispatch_reaches_the_handler_and_rerenders() {
    let host = TestHost::new();
    let clicks = Rc::new(Cell::new(0));
    let seen = Rc::new(RefCell::new(Vec::new()));
    let id = host.renderer.attach_root(Box::new(ClickCounter {
        clicks: Rc::clone(&clicks),
        seen_handlers: Rc::clone(&seen),
    }));
    host.renderer.render_component(id).unwrap();
    let handler_id = first_element_handler_id(&host.last_batch().unwrap()).unwrap();

    host.renderer
        .dispatch_event(id, 0, EventArgs::new("onclick", 2_usize))
        .unwrap();

    assert_eq!(clicks.get(), 2);
    assert_eq!(seen.borrow().clone(), vec![handler_id]);
    // The target re-rendered in a follow-up pass.
    let batch = host.last_batch().unwrap();
    assert_eq!(
        batch.component_diffs[0].edits,
        vec![RenderTreeEdit::UpdateText {
            sibling_index: 1,
            content: "clicks: 2".to_owned(),
        }]
    );
}

#[test]
fn dispatch_against_missing_handler_is_unsupported() {
    let host = TestHost::new();
    let clicks = Rc::new(Cell::new(0));
    let id = host.renderer.attach_root(Box::new(ClickCounter {
        clicks,
        seen_handlers: Rc::new(RefCell::new(Vec::new())),
    }));
    host.renderer.render_component(id).unwrap();

    // A text frame has no attributes at all.
    assert_eq!(
        host.renderer
            .dispatch_event(id, 1, EventArgs::new("onclick", ())),
        Err(DispatchError::UnsupportedEventTarget { id, frame_index: 1 })
    );
    // The element exists but has no such event attribute.
    assert_eq!(
        host.renderer
            .dispatch_event(id, 0, EventArgs::new("onkeydown", ())),
        Err(DispatchError::UnsupportedEventTarget { id, frame_index: 0 })
    );
    assert_eq!(
        host.renderer
            .dispatch_event(99, 0, EventArgs::new("onclick", ())),
        Err(DispatchError::UnknownComponent { id: 99 })
    );
}

#[test]
fn dispatch_against_attribute_without_handler_id_is_unsupported() {
    let host = TestHost::new();
    // "class" is not an event binding, so no handler id is ever assigned.
    let (id, _script) =
        host.attach_scripted(vec![element("div", vec![attr("class", "panel")])]);
    host.renderer.render_component(id).unwrap();

    assert_eq!(
        host.renderer
            .dispatch_event(id, 0, EventArgs::new("class", ())),
        Err(DispatchError::UnsupportedEventTarget { id, frame_index: 0 })
    );
}

#[test]
fn unchanged_event_attribute_keeps_its_handler_id() {
    let host = TestHost::new();
    let (id, script) = host.attach_scripted(vec![element(
        "button",
        vec![attr("onclick", "save")],
    )]);
    host.renderer.render_component(id).unwrap();
    let original = first_element_handler_id(&host.last_batch().unwrap()).unwrap();

    host.renderer.render_component(id).unwrap();
    let retained = host.last_batch().unwrap();
    assert!(retained.component_diffs[0].edits.is_empty());
    assert!(retained.disposed_event_handler_ids.is_empty());

    script.set_frames(vec![element("button", vec![attr("onclick", "other")])]);
    host.renderer.render_component(id).unwrap();
    let replaced = host.last_batch().unwrap();
    assert_eq!(replaced.disposed_event_handler_ids, vec![original]);
    let RenderTreeEdit::SetAttribute { attribute, .. } = &replaced.component_diffs[0].edits[0]
    else {
        panic!("expected a set-attribute edit");
    };
    assert_eq!(attribute.name, "onclick");
    assert_ne!(attribute.event_handler_id, Some(original));
    assert!(attribute.event_handler_id.is_some());
}

#[test]
fn cascading_change_replays_captured_direct_parameters() {
    let host = TestHost::new();
    let child_script = host.register_scripted("child");
    child_script.set_frames(vec![text("leaf")]);

    let theme = host.renderer.create_cascading_source("theme", "light");
    host.renderer.provide_cascading(None, &theme).unwrap();

    let (root_id, _root_script) = host.attach_scripted(vec![component_ref_with(
        "child",
        vec![attr("label", "save")],
    )]);
    host.renderer.render_component(root_id).unwrap();

    assert_eq!(
        child_script.last_parameters().unwrap(),
        vec![attr("label", "save"), attr("theme", "light")]
    );
    assert_eq!(child_script.parameter_history().len(), 1);

    // Re-render the parent so its buffers are overwritten; equal parameters
    // must not be re-supplied.
    host.renderer.render_component(root_id).unwrap();
    assert_eq!(child_script.parameter_history().len(), 1);

    let batches_before = host.batch_count();
    theme.set("dark");
    assert_eq!(
        child_script.last_parameters().unwrap(),
        vec![attr("label", "save"), attr("theme", "dark")]
    );
    assert_eq!(host.batch_count(), batches_before + 1);

    // Setting the same value again notifies nobody.
    theme.set("dark");
    assert_eq!(child_script.parameter_history().len(), 2);
    assert_eq!(host.batch_count(), batches_before + 1);
}

#[test]
fn retained_child_reaccepts_parameters_only_on_change() {
    let host = TestHost::new();
    let child_script = host.register_scripted("child");
    child_script.set_frames(vec![text("leaf")]);

    let (root_id, root_script) = host.attach_scripted(vec![component_ref_with(
        "child",
        vec![attr("label", "a")],
    )]);
    host.renderer.render_component(root_id).unwrap();
    assert_eq!(child_script.parameter_history().len(), 1);

    root_script.set_frames(vec![component_ref_with("child", vec![attr("label", "b")])]);
    host.renderer.render_component(root_id).unwrap();
    assert_eq!(child_script.parameter_history().len(), 2);
    assert_eq!(
        child_script.last_parameters().unwrap(),
        vec![attr("label", "b")]
    );

    host.renderer.render_component(root_id).unwrap();
    assert_eq!(child_script.parameter_history().len(), 2);
}

#[test]
fn pre_instantiated_child_is_adopted_not_recreated() {
    let host = TestHost::new();
    let child_script = host.register_scripted("child");
    child_script.set_frames(vec![text("leaf")]);

    let (root_id, root_script) = host.attach_scripted(vec![]);
    host.renderer.render_component(root_id).unwrap();

    let child_id = host.renderer.instantiate_child(root_id, "child").unwrap();
    root_script.set_frames(vec![RenderTreeFrame::ComponentRef {
        component_type: "child",
        assigned_id: Some(child_id),
        parameters: vec![],
    }]);
    host.renderer.render_component(root_id).unwrap();

    let batch = host.last_batch().unwrap();
    let rendered: Vec<_> = batch
        .component_diffs
        .iter()
        .map(|diff| diff.component_id)
        .collect();
    assert_eq!(rendered, vec![root_id, child_id]);

    assert_eq!(
        host.renderer.instantiate_child(99, "child"),
        Err(RenderError::UnknownComponent { id: 99 })
    );
}

#[test]
fn matched_region_recurses_in_the_shared_sibling_scope() {
    let host = TestHost::new();
    let (id, script) = host.attach_scripted(vec![
        region(2),
        text("a"),
        text("b"),
        text("tail"),
    ]);
    host.renderer.render_component(id).unwrap();

    script.set_frames(vec![region(2), text("a"), text("B"), text("tail")]);
    host.renderer.render_component(id).unwrap();

    let batch = host.last_batch().unwrap();
    assert_eq!(
        batch.component_diffs[0].edits,
        vec![RenderTreeEdit::UpdateText {
            sibling_index: 1,
            content: "B".to_owned(),
        }]
    );
}

#[test]
fn mismatched_region_length_replaces_the_whole_subtree() {
    let host = TestHost::new();
    let (id, script) = host.attach_scripted(vec![
        region(2),
        text("a"),
        text("b"),
        text("tail"),
    ]);
    host.renderer.render_component(id).unwrap();

    script.set_frames(vec![region(1), text("c"), text("tail")]);
    host.renderer.render_component(id).unwrap();

    let batch = host.last_batch().unwrap();
    assert_eq!(
        batch.component_diffs[0].edits,
        vec![
            RenderTreeEdit::RemoveFrame { sibling_index: 0 },
            RenderTreeEdit::RemoveFrame { sibling_index: 0 },
            RenderTreeEdit::InsertFrame {
                sibling_index: 0,
                frame: text("c"),
            },
        ]
    );
}

struct FailingTeardown;

impl Component for FailingTeardown {
    fn render(&mut self, output: &mut FrameBuffer) {
        output.text("doomed");
    }

    fn teardown(&mut self) -> Option<&mut dyn Teardown> {
        Some(self)
    }
}

impl Teardown for FailingTeardown {
    fn dispose(&mut self) -> Result<(), TeardownError> {
        Err("cleanup exploded".into())
    }
}

#[test]
fn failing_disposal_hooks_are_isolated_per_component() {
    let host = TestHost::new();
    host.register("doomed", || Box::new(FailingTeardown));

    let (root_id, root_script) =
        host.attach_scripted(vec![component_ref("doomed"), component_ref("doomed")]);
    host.renderer.render_component(root_id).unwrap();

    root_script.set_frames(vec![]);
    host.renderer.render_component(root_id).unwrap();

    // Both children disposed despite both hooks failing, and the batch
    // completed.
    let batch = host.last_batch().unwrap();
    assert_eq!(batch.disposed_component_ids, vec![2, 3]);
    assert_eq!(
        host.disposal_failures(),
        vec![
            (2, "cleanup exploded".to_owned()),
            (3, "cleanup exploded".to_owned()),
        ]
    );
}

#[test]
fn detach_root_emits_a_disposal_batch() {
    let host = TestHost::new();
    let child_script = host.register_scripted("child");
    child_script.set_frames(vec![text("leaf")]);
    let (root_id, _script) = host.attach_scripted(vec![component_ref("child")]);
    host.renderer.render_component(root_id).unwrap();

    assert_eq!(
        host.renderer.detach_root(2),
        Err(RenderError::NotARoot { id: 2 })
    );

    host.renderer.detach_root(root_id).unwrap();
    let batch = host.last_batch().unwrap();
    assert_eq!(batch.disposed_component_ids, vec![root_id, 2]);
    assert_eq!(
        batch.component_diffs[0].edits,
        vec![RenderTreeEdit::RemoveFrame { sibling_index: 0 }]
    );

    assert_eq!(
        host.renderer.detach_root(root_id),
        Err(RenderError::UnknownComponent { id: root_id })
    );
}

#[test]
fn unknown_component_type_aborts_the_pass() {
    let host = TestHost::new();
    let (id, script) = host.attach_scripted(vec![component_ref("unregistered")]);

    assert_eq!(
        host.renderer.render_component(id),
        Err(RenderError::UnknownComponentType {
            component_type: "unregistered",
        })
    );
    assert!(!host.renderer.is_rendering());
    assert_eq!(host.batch_count(), 0);

    // The renderer survives the aborted pass.
    script.set_frames(vec![text("recovered")]);
    host.renderer.render_component(id).unwrap();
    assert_eq!(host.batch_count(), 1);
}

#[test]
fn set_direct_parameters_triggers_a_render() {
    let host = TestHost::new();
    let (id, script) = host.attach_scripted(vec![text("a")]);

    host.renderer
        .set_direct_parameters(id, &[attr("count", 3.0)])
        .unwrap();

    assert_eq!(script.last_parameters().unwrap(), vec![attr("count", 3.0)]);
    assert_eq!(host.batch_count(), 1);
    assert_eq!(
        host.renderer.set_direct_parameters(99, &[]),
        Err(RenderError::UnknownComponent { id: 99 })
    );
}

#[test]
fn batches_arrive_in_production_order() {
    let host = TestHost::new();
    let (id, script) = host.attach_scripted(vec![text("one")]);
    host.renderer.render_component(id).unwrap();
    script.set_frames(vec![text("two")]);
    host.renderer.render_component(id).unwrap();
    script.set_frames(vec![text("three")]);
    host.renderer.render_component(id).unwrap();

    let batches = host.batches();
    assert_eq!(batches.len(), 3);
    assert_eq!(
        batches[1].component_diffs[0].edits,
        vec![RenderTreeEdit::UpdateText {
            sibling_index: 0,
            content: "two".to_owned(),
        }]
    );
    assert_eq!(
        batches[2].component_diffs[0].edits,
        vec![RenderTreeEdit::UpdateText {
            sibling_index: 0,
            content: "three".to_owned(),
        }]
    );
}
