//! Cascading values.
//!
//! A cascading value is supplied by an ancestor (or by the renderer itself)
//! and implicitly available to every descendant without explicit parameter
//! passing. Descendants subscribe when their state is constructed and the
//! subscription is torn down at disposal. A change notification never hands
//! out borrowed parameter data: the subscriber replays its captured direct
//! parameter snapshot merged with the current cascading values, because the
//! original direct parameters may alias a parent buffer that has since been
//! overwritten.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::frames::AttributeValue;
use crate::{ComponentStateInner, RendererInner};

/// A named value owned by one supplier and observed by any number of
/// descendant components.
#[derive(Clone)]
pub struct CascadingSource {
    inner: Rc<CascadingSourceInner>,
}

pub(crate) struct CascadingSourceInner {
    name: String,
    value: RefCell<AttributeValue>,
    renderer: Weak<RendererInner>,
    subscribers: RefCell<Vec<SubscriberEntry>>,
    next_subscription_id: Cell<u64>,
}

struct SubscriberEntry {
    id: u64,
    state: Weak<ComponentStateInner>,
}

impl CascadingSource {
    pub(crate) fn new(
        name: impl Into<String>,
        initial: AttributeValue,
        renderer: Weak<RendererInner>,
    ) -> Self {
        Self {
            inner: Rc::new(CascadingSourceInner {
                name: name.into(),
                value: RefCell::new(initial),
                renderer,
                subscribers: RefCell::new(Vec::new()),
                next_subscription_id: Cell::new(1),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn value(&self) -> AttributeValue {
        self.inner.value.borrow().clone()
    }

    /// Updates the value and notifies live subscribers. Each subscriber
    /// replays its parameters and is queued for re-render; the resulting
    /// renders are flushed as a single pass. Setting an identical value is a
    /// no-op.
    pub fn set(&self, value: impl Into<AttributeValue>) {
        let value = value.into();
        if *self.inner.value.borrow() == value {
            return;
        }
        *self.inner.value.borrow_mut() = value;

        let subscribers: Vec<Rc<ComponentStateInner>> = {
            let mut entries = self.inner.subscribers.borrow_mut();
            entries.retain(|entry| entry.state.strong_count() > 0);
            entries
                .iter()
                .filter_map(|entry| entry.state.upgrade())
                .collect()
        };
        let Some(renderer) = self.inner.renderer.upgrade() else {
            return;
        };
        for state in subscribers {
            state.notify_cascading_value_changed(&renderer);
        }
        renderer.flush_external();
    }

    pub(crate) fn subscribe(&self, state: &Rc<ComponentStateInner>) -> SubscriptionHandle {
        let id = self.inner.next_subscription_id.get();
        self.inner.next_subscription_id.set(id + 1);
        self.inner.subscribers.borrow_mut().push(SubscriberEntry {
            id,
            state: Rc::downgrade(state),
        });
        SubscriptionHandle {
            source: Rc::downgrade(&self.inner),
            subscription_id: id,
        }
    }
}

/// Held by a `ComponentState` for each cascading value in scope. Dropping
/// the handle unsubscribes, so disposal tears subscriptions down by clearing
/// the owning vector.
pub(crate) struct SubscriptionHandle {
    source: Weak<CascadingSourceInner>,
    subscription_id: u64,
}

impl SubscriptionHandle {
    /// Current `(name, value)` of the subscribed source, copied out so no
    /// borrow crosses a render boundary. `None` once the supplier is gone.
    pub(crate) fn current(&self) -> Option<(String, AttributeValue)> {
        let source = self.source.upgrade()?;
        let value = source.value.borrow().clone();
        Some((source.name.clone(), value))
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(source) = self.source.upgrade() {
            source
                .subscribers
                .borrow_mut()
                .retain(|entry| entry.id != self.subscription_id);
        }
    }
}
