#![doc = r"Incremental rendering core for the Weft component framework.

Tracks a tree of stateful components, computes minimal edit scripts between
successive renders of each component's output, and assembles those edits into
atomic batches for a display layer to apply. The core is synchronous and
single-threaded per renderer; independent renderers share no state."]

pub mod batch;
pub mod cascade;
pub mod collections;
pub mod diff;
pub mod frames;
mod registry;

pub use batch::RenderBatch;
pub use cascade::CascadingSource;
pub use diff::{ComponentDiff, RenderTreeEdit};
pub use frames::{
    AttributeFrame, AttributeValue, FrameBuffer, ParameterSnapshot, ParameterView,
    RenderTreeFrame,
};

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, error, trace};

use crate::batch::RenderBatchBuilder;
use crate::cascade::SubscriptionHandle;
use crate::collections::map::{HashMap, HashSet};
use crate::diff::DiffContext;
use crate::registry::WeakRegistry;

/// Unique within one renderer, monotonically assigned, never reused while
/// that renderer lives. 64-bit by default; narrow only if an external
/// protocol demands it.
pub type ComponentId = u64;
pub type EventHandlerId = u64;
/// Key a [`ComponentFactory`] instantiates components from.
pub type ComponentType = &'static str;
/// Error raised by a component's own cleanup hook.
pub type TeardownError = Box<dyn std::error::Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// A render was requested while a pass was already in progress. Render
    /// functions must not trigger further renders; failing fast here surfaces
    /// the bug instead of queuing into a potential infinite loop.
    ReentrantRender,
    UnknownComponent { id: ComponentId },
    UnknownComponentType { component_type: ComponentType },
    NotARoot { id: ComponentId },
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::ReentrantRender => {
                write!(f, "render requested while a render pass is in progress")
            }
            RenderError::UnknownComponent { id } => {
                write!(f, "component {id} is not registered with this renderer")
            }
            RenderError::UnknownComponentType { component_type } => {
                write!(f, "no factory registration for component type {component_type:?}")
            }
            RenderError::NotARoot { id } => {
                write!(f, "component {id} is not an attached root")
            }
        }
    }
}

impl std::error::Error for RenderError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The target id is gone; this legitimately happens when an event fires
    /// concurrently with disposal, and the caller should drop the event.
    UnknownComponent { id: ComponentId },
    UnsupportedEventTarget { id: ComponentId, frame_index: usize },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::UnknownComponent { id } => {
                write!(f, "component {id} is not registered with this renderer")
            }
            DispatchError::UnsupportedEventTarget { id, frame_index } => {
                write!(f, "component {id} has no event handler at frame {frame_index}")
            }
        }
    }
}

impl std::error::Error for DispatchError {}

/// Arguments for an inbound event. `name` selects the event attribute on the
/// targeted frame (for example `"onclick"`); the payload is marshaled by the
/// host and opaque to this core.
pub struct EventArgs {
    pub name: String,
    payload: Box<dyn Any>,
}

impl EventArgs {
    pub fn new(name: impl Into<String>, payload: impl Any) -> Self {
        Self {
            name: name.into(),
            payload: Box::new(payload),
        }
    }

    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref()
    }
}

/// A unit of UI. The renderer never owns component instances beyond the
/// state record that binds them into the tree; everything else is reached
/// through this trait and its optional capabilities.
pub trait Component: 'static {
    /// Called once when the component is bound into a renderer. The handle
    /// lets the component request its own re-render later.
    fn attach(&mut self, handle: RenderHandle) {
        let _ = handle;
    }

    /// Accepts a new set of named parameters (direct and cascading merged).
    fn set_parameters(&mut self, parameters: ParameterView<'_>) {
        let _ = parameters;
    }

    /// Writes the component's current output into an already-cleared buffer.
    /// Must have no externally observable side effects other than the frames
    /// it emits; in particular it must not trigger renders.
    fn render(&mut self, output: &mut FrameBuffer);

    /// Capability query: can this component receive events?
    fn event_target(&mut self) -> Option<&mut dyn EventTarget> {
        None
    }

    /// Capability query: does this component need cleanup at disposal?
    fn teardown(&mut self) -> Option<&mut dyn Teardown> {
        None
    }
}

pub trait EventTarget {
    fn handle_event(&mut self, handler_id: EventHandlerId, args: &EventArgs);
}

pub trait Teardown {
    fn dispose(&mut self) -> Result<(), TeardownError>;
}

/// Instantiates components referenced from frames by type key.
pub trait ComponentFactory {
    fn instantiate(&self, component_type: ComponentType) -> Option<Box<dyn Component>>;
}

/// Receives each finished batch, exactly once per completed pass and in
/// production order. Later batches assume earlier ones have been applied.
pub trait BatchSink {
    fn apply(&self, batch: RenderBatch);
}

/// Error-reporting collaborator. Failures local to one component are routed
/// here so the rest of the pass can complete.
pub trait ErrorHandler {
    fn disposal_failure(&self, component_id: ComponentId, error: &(dyn std::error::Error + 'static));
    fn render_failure(&self, error: &RenderError);
}

/// Default [`ErrorHandler`] that reports through `tracing`.
#[derive(Debug, Default)]
pub struct TracingErrorHandler;

impl ErrorHandler for TracingErrorHandler {
    fn disposal_failure(&self, component_id: ComponentId, error: &(dyn std::error::Error + 'static)) {
        error!(component_id, %error, "component disposal hook failed");
    }

    fn render_failure(&self, error: &RenderError) {
        error!(%error, "render pass failed");
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RendererOptions {
    /// Starting point for the identity registry's adaptive cull threshold.
    pub initial_cull_threshold: usize,
}

impl Default for RendererOptions {
    fn default() -> Self {
        Self {
            initial_cull_threshold: 128,
        }
    }
}

/// Handed to a component at attach time; the component's way of requesting
/// its own re-render from outside a pass.
#[derive(Clone)]
pub struct RenderHandle {
    renderer: Weak<RendererInner>,
    component_id: ComponentId,
}

impl RenderHandle {
    pub fn component_id(&self) -> ComponentId {
        self.component_id
    }

    /// Renders this component now. Subject to the same reentrancy gate as
    /// [`Renderer::render_component`]; calling it from inside a render
    /// function fails with [`RenderError::ReentrantRender`]. A handle whose
    /// renderer is gone is a no-op.
    pub fn render(&self) -> Result<(), RenderError> {
        match self.renderer.upgrade() {
            Some(renderer) => renderer.render_component(self.component_id),
            None => Ok(()),
        }
    }
}

/// Binds one component instance into the tree.
///
/// Strong ownership runs parent to child through `children`, starting at the
/// renderer's roots map; the identity registry only ever holds weak handles.
/// A state is additionally kept alive by in-flight queue entries while a
/// pass is running.
pub(crate) struct ComponentStateInner {
    id: ComponentId,
    component_type: Option<ComponentType>,
    parent: Option<Weak<ComponentStateInner>>,
    component: RefCell<Box<dyn Component>>,
    frame_current: RefCell<FrameBuffer>,
    frame_previous: RefCell<FrameBuffer>,
    children: RefCell<HashMap<ComponentId, Rc<ComponentStateInner>>>,
    provided_cascades: RefCell<Vec<CascadingSource>>,
    cascading_subscriptions: RefCell<Vec<SubscriptionHandle>>,
    last_direct_parameters: RefCell<Option<ParameterSnapshot>>,
    disposed: Cell<bool>,
}

impl ComponentStateInner {
    /// Re-renders this component into the batch: swaps the frame buffers,
    /// invokes the render function into the cleared current buffer, and
    /// appends the diff against the previous buffer. A disposed state is a
    /// silent no-op so that entries queued before an ancestor disposed them
    /// cannot crash the batch.
    fn render_into_batch(
        &self,
        renderer: &RendererInner,
        builder: &mut RenderBatchBuilder,
    ) -> Result<(), RenderError> {
        if self.disposed.get() {
            return Ok(());
        }
        debug!(component_id = self.id, "rendering component");
        {
            let mut current = self.frame_current.borrow_mut();
            let mut previous = self.frame_previous.borrow_mut();
            mem::swap(&mut *current, &mut *previous);
            current.clear();
            self.component.borrow_mut().render(&mut current);
        }

        let previous = self.frame_previous.borrow();
        let mut current = self.frame_current.borrow_mut();
        let mut ctx = DiffContext::new(renderer, builder, self.id);
        diff::compute_diff(&mut ctx, previous.frames(), current.frames_mut())?;
        let edits = ctx.into_edits();
        builder.append_diff(ComponentDiff {
            component_id: self.id,
            edits,
        });
        Ok(())
    }

    /// Marks the state disposed, tears down cascading subscriptions, emits a
    /// removal diff for everything currently displayed, and records the id in
    /// the batch. A failing cleanup hook is reported and does not stop the
    /// rest of the disposal list.
    fn dispose_into_batch(&self, renderer: &RendererInner, builder: &mut RenderBatchBuilder) {
        if self.disposed.replace(true) {
            return;
        }
        debug!(
            component_id = self.id,
            component_type = self.component_type.unwrap_or("<root>"),
            "disposing component"
        );
        self.cascading_subscriptions.borrow_mut().clear();

        {
            let current = self.frame_current.borrow();
            let mut ctx = DiffContext::new(renderer, builder, self.id);
            diff::remove_all_frames(&mut ctx, current.frames());
            let edits = ctx.into_edits();
            builder.append_diff(ComponentDiff {
                component_id: self.id,
                edits,
            });
        }
        builder.record_disposed_component(self.id);

        {
            let mut component = self.component.borrow_mut();
            if let Some(hook) = component.teardown() {
                if let Err(failure) = hook.dispose() {
                    renderer
                        .error_handler
                        .disposal_failure(self.id, failure.as_ref());
                }
            }
        }

        // The removal diff above queued every referenced child for disposal;
        // the queue holds them strongly until they are processed.
        self.children.borrow_mut().clear();
    }

    fn set_direct_parameters(&self, renderer: &RendererInner, parameters: &[AttributeFrame]) {
        if self.disposed.get() {
            return;
        }
        *self.last_direct_parameters.borrow_mut() = Some(ParameterSnapshot::capture(parameters));
        self.accept_parameters(renderer);
    }

    /// Replays the captured direct parameters merged with the current
    /// cascading values. The snapshot exists precisely for this call: the
    /// parent's buffers may have been overwritten since the parameters were
    /// originally supplied.
    pub(crate) fn notify_cascading_value_changed(&self, renderer: &RendererInner) {
        if self.disposed.get() {
            return;
        }
        self.accept_parameters(renderer);
    }

    fn accept_parameters(&self, renderer: &RendererInner) {
        let merged = self.merged_parameters();
        self.component
            .borrow_mut()
            .set_parameters(ParameterView::new(&merged));
        if let Some(state) = renderer.registry.get(self.id) {
            renderer.enqueue_render(state);
        }
    }

    fn merged_parameters(&self) -> Vec<AttributeFrame> {
        let mut entries = self
            .last_direct_parameters
            .borrow()
            .as_ref()
            .map(|snapshot| snapshot.entries().to_vec())
            .unwrap_or_default();
        for subscription in self.cascading_subscriptions.borrow().iter() {
            if let Some((name, value)) = subscription.current() {
                match entries.iter_mut().find(|entry| entry.name == name) {
                    Some(entry) => entry.value = value,
                    None => entries.push(AttributeFrame::new(name, value)),
                }
            }
        }
        entries
    }

    fn dispatch_event(
        &self,
        renderer: &RendererInner,
        frame_index: usize,
        args: &EventArgs,
    ) -> Result<(), DispatchError> {
        if self.disposed.get() {
            return Err(DispatchError::UnknownComponent { id: self.id });
        }
        let resolved = {
            let current = self.frame_current.borrow();
            resolve_event_handler(current.frames(), frame_index, &args.name)
        };
        let Some(handler_id) = resolved else {
            return Err(DispatchError::UnsupportedEventTarget {
                id: self.id,
                frame_index,
            });
        };
        if !renderer.live_event_handlers.borrow().contains(&handler_id) {
            return Err(DispatchError::UnsupportedEventTarget {
                id: self.id,
                frame_index,
            });
        }

        let mut component = self.component.borrow_mut();
        let Some(target) = component.event_target() else {
            return Err(DispatchError::UnsupportedEventTarget {
                id: self.id,
                frame_index,
            });
        };
        target.handle_event(handler_id, args);
        Ok(())
    }
}

fn resolve_event_handler(
    frames: &[RenderTreeFrame],
    frame_index: usize,
    event: &str,
) -> Option<EventHandlerId> {
    match frames.get(frame_index)? {
        RenderTreeFrame::Element { attributes, .. } => attributes
            .iter()
            .find(|attribute| attribute.name == event)
            .and_then(|attribute| attribute.event_handler_id),
        _ => None,
    }
}

/// Closes the reentrancy gate on every exit path out of a pass.
struct RenderGate<'a>(&'a AtomicBool);

impl Drop for RenderGate<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub(crate) struct RendererInner {
    weak_self: Weak<RendererInner>,
    factory: Rc<dyn ComponentFactory>,
    sink: Rc<dyn BatchSink>,
    error_handler: Rc<dyn ErrorHandler>,
    registry: WeakRegistry<ComponentStateInner>,
    roots: RefCell<HashMap<ComponentId, Rc<ComponentStateInner>>>,
    root_cascades: RefCell<Vec<CascadingSource>>,
    batch: RefCell<RenderBatchBuilder>,
    render_queue: RefCell<VecDeque<Rc<ComponentStateInner>>>,
    disposal_queue: RefCell<VecDeque<Rc<ComponentStateInner>>>,
    live_event_handlers: RefCell<HashSet<EventHandlerId>>,
    next_component_id: Cell<ComponentId>,
    next_event_handler_id: Cell<EventHandlerId>,
    rendering: AtomicBool,
}

impl RendererInner {
    fn create_state(
        &self,
        component: Box<dyn Component>,
        component_type: Option<ComponentType>,
        parent: Option<&Rc<ComponentStateInner>>,
    ) -> Rc<ComponentStateInner> {
        let id = self.next_component_id.get();
        self.next_component_id.set(id + 1);
        trace!(
            component_id = id,
            component_type = component_type.unwrap_or("<root>"),
            "initializing component"
        );
        let state = Rc::new(ComponentStateInner {
            id,
            component_type,
            parent: parent.map(Rc::downgrade),
            component: RefCell::new(component),
            frame_current: RefCell::new(FrameBuffer::new()),
            frame_previous: RefCell::new(FrameBuffer::new()),
            children: RefCell::new(HashMap::default()),
            provided_cascades: RefCell::new(Vec::new()),
            cascading_subscriptions: RefCell::new(Vec::new()),
            last_direct_parameters: RefCell::new(None),
            disposed: Cell::new(false),
        });
        self.collect_cascading_subscriptions(parent, &state);
        self.registry.insert(id, Rc::downgrade(&state));
        let handle = RenderHandle {
            renderer: self.weak_self.clone(),
            component_id: id,
        };
        state.component.borrow_mut().attach(handle);
        state
    }

    /// Subscribes a freshly constructed state to every cascading value in
    /// scope: nearest ancestor wins per name, renderer-level sources last.
    fn collect_cascading_subscriptions(
        &self,
        parent: Option<&Rc<ComponentStateInner>>,
        state: &Rc<ComponentStateInner>,
    ) {
        let mut seen: HashSet<String> = HashSet::default();
        let mut handles = Vec::new();
        let mut cursor = parent.cloned();
        while let Some(ancestor) = cursor {
            for source in ancestor.provided_cascades.borrow().iter() {
                if seen.insert(source.name().to_owned()) {
                    handles.push(source.subscribe(state));
                }
            }
            cursor = ancestor.parent.as_ref().and_then(Weak::upgrade);
        }
        for source in self.root_cascades.borrow().iter() {
            if seen.insert(source.name().to_owned()) {
                handles.push(source.subscribe(state));
            }
        }
        *state.cascading_subscriptions.borrow_mut() = handles;
    }

    pub(crate) fn instantiate_child(
        &self,
        component_type: ComponentType,
        parent_id: ComponentId,
    ) -> Result<ComponentId, RenderError> {
        let Some(parent) = self.registry.get(parent_id) else {
            return Err(RenderError::UnknownComponent { id: parent_id });
        };
        let Some(component) = self.factory.instantiate(component_type) else {
            return Err(RenderError::UnknownComponentType { component_type });
        };
        let state = self.create_state(component, Some(component_type), Some(&parent));
        let id = state.id;
        parent.children.borrow_mut().insert(id, state);
        Ok(id)
    }

    pub(crate) fn update_child_parameters(&self, id: ComponentId, parameters: &[AttributeFrame]) {
        if let Some(state) = self.registry.get(id) {
            state.set_direct_parameters(self, parameters);
        }
    }

    pub(crate) fn queue_component_disposal(&self, id: ComponentId) {
        if let Some(state) = self.registry.get(id) {
            self.disposal_queue.borrow_mut().push_back(state);
        }
    }

    pub(crate) fn assign_event_handler_id(&self) -> EventHandlerId {
        let id = self.next_event_handler_id.get();
        self.next_event_handler_id.set(id + 1);
        self.live_event_handlers.borrow_mut().insert(id);
        id
    }

    fn enqueue_render(&self, state: Rc<ComponentStateInner>) {
        self.render_queue.borrow_mut().push_back(state);
    }

    fn render_component(&self, id: ComponentId) -> Result<(), RenderError> {
        let Some(state) = self.registry.get(id) else {
            return Err(RenderError::UnknownComponent { id });
        };
        // Reject before enqueueing: a render function that requests a render
        // must not leave an entry behind for the in-progress pass to drain,
        // or the pass would re-render it and loop forever.
        if self.rendering.load(Ordering::Acquire) {
            return Err(RenderError::ReentrantRender);
        }
        self.enqueue_render(state);
        self.process_render_queue()
    }

    /// Runs one pass: drains the (possibly expanding) render queue into the
    /// shared batch builder, then hands the finished batch to the sink. The
    /// gate is an atomic test-and-set; a second entry while it is held is the
    /// reentrancy programming error and aborts only the offending request.
    fn process_render_queue(&self) -> Result<(), RenderError> {
        if self.rendering.swap(true, Ordering::Acquire) {
            return Err(RenderError::ReentrantRender);
        }
        let gate = RenderGate(&self.rendering);

        if self.render_queue.borrow().is_empty() && self.disposal_queue.borrow().is_empty() {
            return Ok(());
        }

        let mut builder = self.batch.borrow_mut();
        match self.drain_queues(&mut builder) {
            Ok(()) => {
                let finished = builder.finish();
                drop(builder);
                {
                    let mut live = self.live_event_handlers.borrow_mut();
                    for id in &finished.disposed_event_handler_ids {
                        live.remove(id);
                    }
                }
                self.sink.apply(finished);
                drop(gate);
                Ok(())
            }
            Err(failure) => {
                builder.abandon();
                self.render_queue.borrow_mut().clear();
                self.disposal_queue.borrow_mut().clear();
                Err(failure)
            }
        }
    }

    fn drain_queues(&self, builder: &mut RenderBatchBuilder) -> Result<(), RenderError> {
        // Disposal may be the only pending work (detach of a root).
        self.process_disposal_queue(builder);
        loop {
            let next = self.render_queue.borrow_mut().pop_front();
            let Some(state) = next else {
                break;
            };
            state.render_into_batch(self, builder)?;
            // Disposals detected by this render join the same batch, and may
            // themselves enqueue further work.
            self.process_disposal_queue(builder);
        }
        Ok(())
    }

    fn process_disposal_queue(&self, builder: &mut RenderBatchBuilder) {
        loop {
            let next = self.disposal_queue.borrow_mut().pop_front();
            let Some(state) = next else {
                break;
            };
            state.dispose_into_batch(self, builder);
            if let Some(parent) = state.parent.as_ref().and_then(Weak::upgrade) {
                parent.children.borrow_mut().remove(&state.id);
            }
        }
    }

    /// Flush for entry points whose own error type cannot carry a render
    /// failure (event dispatch, cascading updates). Failures go to the
    /// error-reporting collaborator.
    pub(crate) fn flush_external(&self) {
        if let Err(failure) = self.process_render_queue() {
            self.error_handler.render_failure(&failure);
        }
    }
}

/// Owns the identity registry and batch builder; the orchestrator the host
/// talks to.
pub struct Renderer {
    inner: Rc<RendererInner>,
}

impl Renderer {
    pub fn new(factory: Rc<dyn ComponentFactory>, sink: Rc<dyn BatchSink>) -> Self {
        Self::with_options(
            factory,
            sink,
            Rc::new(TracingErrorHandler),
            RendererOptions::default(),
        )
    }

    pub fn with_options(
        factory: Rc<dyn ComponentFactory>,
        sink: Rc<dyn BatchSink>,
        error_handler: Rc<dyn ErrorHandler>,
        options: RendererOptions,
    ) -> Self {
        let inner = Rc::new_cyclic(|weak_self| RendererInner {
            weak_self: weak_self.clone(),
            factory,
            sink,
            error_handler,
            registry: WeakRegistry::new(options.initial_cull_threshold),
            roots: RefCell::new(HashMap::default()),
            root_cascades: RefCell::new(Vec::new()),
            batch: RefCell::new(RenderBatchBuilder::default()),
            render_queue: RefCell::new(VecDeque::new()),
            disposal_queue: RefCell::new(VecDeque::new()),
            live_event_handlers: RefCell::new(HashSet::default()),
            next_component_id: Cell::new(1),
            next_event_handler_id: Cell::new(1),
            rendering: AtomicBool::new(false),
        });
        Self { inner }
    }

    /// Binds an externally supplied component as a root and returns its id.
    /// The root is strongly owned by the renderer until [`Self::detach_root`].
    /// Nothing renders until the host asks.
    pub fn attach_root(&self, component: Box<dyn Component>) -> ComponentId {
        let state = self.inner.create_state(component, None, None);
        let id = state.id;
        self.inner.roots.borrow_mut().insert(id, state);
        id
    }

    /// Disposes a root and its whole subtree, producing a batch: the sink is
    /// not otherwise told to remove a root's output.
    pub fn detach_root(&self, id: ComponentId) -> Result<(), RenderError> {
        let removed = self.inner.roots.borrow_mut().remove(&id);
        match removed {
            Some(state) => {
                self.inner.disposal_queue.borrow_mut().push_back(state);
                self.inner.process_render_queue()
            }
            None => {
                if self.inner.registry.get(id).is_some() {
                    Err(RenderError::NotARoot { id })
                } else {
                    Err(RenderError::UnknownComponent { id })
                }
            }
        }
    }

    /// Renders the component now, producing exactly one batch for the pass.
    pub fn render_component(&self, id: ComponentId) -> Result<(), RenderError> {
        self.inner.render_component(id)
    }

    /// Supplies direct parameters to a component, triggering its render.
    pub fn set_direct_parameters(
        &self,
        id: ComponentId,
        parameters: &[AttributeFrame],
    ) -> Result<(), RenderError> {
        let Some(state) = self.inner.registry.get(id) else {
            return Err(RenderError::UnknownComponent { id });
        };
        state.set_direct_parameters(&self.inner, parameters);
        self.inner.process_render_queue()
    }

    /// Pre-instantiates a child so a parent's frame can adopt the id. Most
    /// hosts never call this: children referenced from frames are
    /// instantiated lazily by the diff pass.
    pub fn instantiate_child(
        &self,
        parent_id: ComponentId,
        component_type: ComponentType,
    ) -> Result<ComponentId, RenderError> {
        self.inner.instantiate_child(component_type, parent_id)
    }

    /// Routes an inbound event to the component's handler, then re-renders
    /// the target.
    pub fn dispatch_event(
        &self,
        id: ComponentId,
        frame_index: usize,
        args: EventArgs,
    ) -> Result<(), DispatchError> {
        let Some(state) = self.inner.registry.get(id) else {
            return Err(DispatchError::UnknownComponent { id });
        };
        debug!(component_id = id, event = %args.name, "dispatching event");
        state.dispatch_event(&self.inner, frame_index, &args)?;
        self.inner.enqueue_render(state);
        self.inner.flush_external();
        Ok(())
    }

    pub fn create_cascading_source(
        &self,
        name: impl Into<String>,
        initial: impl Into<AttributeValue>,
    ) -> CascadingSource {
        CascadingSource::new(name, initial.into(), self.inner.weak_self.clone())
    }

    /// Makes a source available to descendants. `None` scopes it to the whole
    /// renderer; `Some(id)` to the subtree below that component. Only states
    /// constructed afterwards subscribe.
    pub fn provide_cascading(
        &self,
        target: Option<ComponentId>,
        source: &CascadingSource,
    ) -> Result<(), RenderError> {
        match target {
            None => {
                self.inner.root_cascades.borrow_mut().push(source.clone());
                Ok(())
            }
            Some(id) => {
                let Some(state) = self.inner.registry.get(id) else {
                    return Err(RenderError::UnknownComponent { id });
                };
                state.provided_cascades.borrow_mut().push(source.clone());
                Ok(())
            }
        }
    }

    /// True while a pass is in progress.
    pub fn is_rendering(&self) -> bool {
        self.inner.rendering.load(Ordering::Relaxed)
    }
}
