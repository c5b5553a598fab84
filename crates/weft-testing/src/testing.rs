//! Test doubles for driving a renderer: a recording sink, scripted
//! components whose output is controlled by the test, a closure-backed
//! component factory, a collecting error handler, and a `TestHost` that
//! wires them all together.

use std::cell::RefCell;
use std::rc::Rc;

use weft_core::collections::map::HashMap;
use weft_core::{
    AttributeFrame, AttributeValue, BatchSink, Component, ComponentFactory, ComponentId,
    ComponentType, ErrorHandler, FrameBuffer, ParameterView, RenderBatch, RenderError,
    RenderTreeFrame, Renderer, RendererOptions,
};

/// Collects every batch the renderer produces, in production order.
#[derive(Clone, Default)]
pub struct RecordingSink {
    batches: Rc<RefCell<Vec<RenderBatch>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<RenderBatch> {
        self.batches.borrow().clone()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.borrow().len()
    }

    pub fn last_batch(&self) -> Option<RenderBatch> {
        self.batches.borrow().last().cloned()
    }
}

impl BatchSink for RecordingSink {
    fn apply(&self, batch: RenderBatch) {
        self.batches.borrow_mut().push(batch);
    }
}

/// Records the isolated failures a renderer reports instead of logging them.
#[derive(Default)]
pub struct CollectingErrorHandler {
    disposal_failures: RefCell<Vec<(ComponentId, String)>>,
    render_failures: RefCell<Vec<RenderError>>,
}

impl CollectingErrorHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disposal_failures(&self) -> Vec<(ComponentId, String)> {
        self.disposal_failures.borrow().clone()
    }

    pub fn render_failures(&self) -> Vec<RenderError> {
        self.render_failures.borrow().clone()
    }
}

impl ErrorHandler for CollectingErrorHandler {
    fn disposal_failure(&self, component_id: ComponentId, error: &(dyn std::error::Error + 'static)) {
        self.disposal_failures
            .borrow_mut()
            .push((component_id, error.to_string()));
    }

    fn render_failure(&self, error: &RenderError) {
        self.render_failures.borrow_mut().push(error.clone());
    }
}

/// A component whose frame output is scripted by the test and whose accepted
/// parameter sets are recorded. Clones share the same script, so a factory
/// registration can hand out instances that one [`FrameScript`] controls.
#[derive(Clone)]
pub struct ScriptedComponent {
    frames: Rc<RefCell<Vec<RenderTreeFrame>>>,
    parameters: Rc<RefCell<Vec<Vec<AttributeFrame>>>>,
}

/// Control surface over scripted component instances.
#[derive(Clone)]
pub struct FrameScript {
    frames: Rc<RefCell<Vec<RenderTreeFrame>>>,
    parameters: Rc<RefCell<Vec<Vec<AttributeFrame>>>>,
}

pub fn scripted() -> (ScriptedComponent, FrameScript) {
    let frames = Rc::new(RefCell::new(Vec::new()));
    let parameters = Rc::new(RefCell::new(Vec::new()));
    (
        ScriptedComponent {
            frames: Rc::clone(&frames),
            parameters: Rc::clone(&parameters),
        },
        FrameScript { frames, parameters },
    )
}

impl FrameScript {
    /// Replaces the frames every sharing instance emits on its next render.
    pub fn set_frames(&self, frames: Vec<RenderTreeFrame>) {
        *self.frames.borrow_mut() = frames;
    }

    /// Every parameter set accepted so far, oldest first.
    pub fn parameter_history(&self) -> Vec<Vec<AttributeFrame>> {
        self.parameters.borrow().clone()
    }

    pub fn last_parameters(&self) -> Option<Vec<AttributeFrame>> {
        self.parameters.borrow().last().cloned()
    }
}

impl Component for ScriptedComponent {
    fn set_parameters(&mut self, parameters: ParameterView<'_>) {
        self.parameters
            .borrow_mut()
            .push(parameters.iter().cloned().collect());
    }

    fn render(&mut self, output: &mut FrameBuffer) {
        for frame in self.frames.borrow().iter() {
            output.append(frame.clone());
        }
    }
}

/// Closure-backed component factory.
#[derive(Default)]
pub struct ScriptedFactory {
    builders: RefCell<HashMap<ComponentType, Box<dyn Fn() -> Box<dyn Component>>>>,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        component_type: ComponentType,
        build: impl Fn() -> Box<dyn Component> + 'static,
    ) {
        self.builders
            .borrow_mut()
            .insert(component_type, Box::new(build));
    }
}

impl ComponentFactory for ScriptedFactory {
    fn instantiate(&self, component_type: ComponentType) -> Option<Box<dyn Component>> {
        self.builders.borrow().get(component_type).map(|build| build())
    }
}

/// A renderer wired to recording doubles.
pub struct TestHost {
    pub renderer: Renderer,
    sink: RecordingSink,
    factory: Rc<ScriptedFactory>,
    errors: Rc<CollectingErrorHandler>,
}

impl TestHost {
    pub fn new() -> Self {
        let sink = RecordingSink::new();
        let factory = Rc::new(ScriptedFactory::new());
        let errors = Rc::new(CollectingErrorHandler::new());
        let renderer = Renderer::with_options(
            factory.clone(),
            Rc::new(sink.clone()),
            errors.clone(),
            RendererOptions::default(),
        );
        Self {
            renderer,
            sink,
            factory,
            errors,
        }
    }

    pub fn register(
        &self,
        component_type: ComponentType,
        build: impl Fn() -> Box<dyn Component> + 'static,
    ) {
        self.factory.register(component_type, build);
    }

    /// Registers a scripted component type; every instance the factory
    /// produces shares the returned script.
    pub fn register_scripted(&self, component_type: ComponentType) -> FrameScript {
        let (component, script) = scripted();
        self.factory
            .register(component_type, move || Box::new(component.clone()));
        script
    }

    /// Attaches a scripted root with the given initial frames.
    pub fn attach_scripted(&self, frames: Vec<RenderTreeFrame>) -> (ComponentId, FrameScript) {
        let (component, script) = scripted();
        script.set_frames(frames);
        let id = self.renderer.attach_root(Box::new(component));
        (id, script)
    }

    pub fn batches(&self) -> Vec<RenderBatch> {
        self.sink.batches()
    }

    pub fn batch_count(&self) -> usize {
        self.sink.batch_count()
    }

    pub fn last_batch(&self) -> Option<RenderBatch> {
        self.sink.last_batch()
    }

    pub fn disposal_failures(&self) -> Vec<(ComponentId, String)> {
        self.errors.disposal_failures()
    }

    pub fn render_failures(&self) -> Vec<RenderError> {
        self.errors.render_failures()
    }
}

impl Default for TestHost {
    fn default() -> Self {
        Self::new()
    }
}

pub fn element(tag: &str, attributes: Vec<AttributeFrame>) -> RenderTreeFrame {
    RenderTreeFrame::Element {
        tag: tag.to_owned(),
        attributes,
    }
}

pub fn text(content: &str) -> RenderTreeFrame {
    RenderTreeFrame::Text {
        content: content.to_owned(),
    }
}

pub fn component_ref(component_type: ComponentType) -> RenderTreeFrame {
    component_ref_with(component_type, Vec::new())
}

pub fn component_ref_with(
    component_type: ComponentType,
    parameters: Vec<AttributeFrame>,
) -> RenderTreeFrame {
    RenderTreeFrame::ComponentRef {
        component_type,
        assigned_id: None,
        parameters,
    }
}

pub fn region(subtree_length: usize) -> RenderTreeFrame {
    RenderTreeFrame::Region { subtree_length }
}

pub fn attr(name: &str, value: impl Into<AttributeValue>) -> AttributeFrame {
    AttributeFrame::new(name, value)
}
