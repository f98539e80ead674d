//! State Controllers
//!
//! A `Controller<T, M>` owns the live value behind one registered state
//! token. `T` is the stored value type and `M` is the message type accepted
//! by writes; for plain containers the two coincide and the reducer is the
//! identity function.
//!
//! # How Publication Works
//!
//! 1. `accept` folds an incoming message into the next value with the
//!    controller's reducer, then hands it to `publish`.
//! 2. `publish` compares the candidate against the current value and stops
//!    if they are equal, so subscribers never see a no-op notification.
//! 3. On a real change the value is swapped in, the linked meta channel is
//!    flipped back to `Ok` if it was pending or errored, and subscribers
//!    are notified in the order they subscribed.
//!
//! Subscriber lists are snapshotted before invocation, so a callback may
//! freely dispatch back into the store, subscribe, or unsubscribe without
//! tripping over an active borrow.

use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use crate::store::meta::Meta;
use crate::store::query::StateListener;
use crate::store::registry::Store;

static NEXT_SUBSCRIBER_ID: AtomicU64 = AtomicU64::new(0);

/// Identifies one subscriber of one controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub(crate) fn next() -> Self {
        SubscriberId(NEXT_SUBSCRIBER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

pub(crate) enum SubscriberKind<T> {
    /// A plain callback handed to `Store::subscribe`.
    Callback(Rc<dyn Fn(&T)>),
    /// A tracked reactive computation. Held weakly so dropping the
    /// computation's owner is enough to retire it.
    Listener(Weak<dyn StateListener>),
}

impl<T> Clone for SubscriberKind<T> {
    fn clone(&self) -> Self {
        match self {
            SubscriberKind::Callback(f) => SubscriberKind::Callback(f.clone()),
            SubscriberKind::Listener(l) => SubscriberKind::Listener(l.clone()),
        }
    }
}

struct SubscriberEntry<T> {
    id: SubscriberId,
    kind: SubscriberKind<T>,
}

impl<T> Clone for SubscriberEntry<T> {
    fn clone(&self) -> Self {
        SubscriberEntry {
            id: self.id,
            kind: self.kind.clone(),
        }
    }
}

/// The link from a base controller to its meta channel. Erased behind
/// closures so a meta controller never needs a meta channel of its own.
pub(crate) struct MetaLink<M> {
    publish: Rc<dyn Fn(&Store, Meta<M>)>,
    is_ok: Rc<dyn Fn() -> bool>,
}

pub struct Controller<T, M> {
    value: RefCell<T>,
    reduce: Rc<dyn Fn(&M, &T) -> T>,
    subscribers: RefCell<Vec<SubscriberEntry<T>>>,
    meta: RefCell<Option<MetaLink<M>>>,
}

impl<T, M> Controller<T, M>
where
    T: Clone + PartialEq + 'static,
    M: Clone + PartialEq + 'static,
{
    pub(crate) fn new(initial: T, reduce: Rc<dyn Fn(&M, &T) -> T>) -> Self {
        Controller {
            value: RefCell::new(initial),
            reduce,
            subscribers: RefCell::new(Vec::new()),
            meta: RefCell::new(None),
        }
    }

    pub fn current(&self) -> T {
        self.value.borrow().clone()
    }

    /// Fold `message` into the current value through the reducer and
    /// publish the result.
    pub(crate) fn accept(&self, store: &Store, message: M) {
        let next = {
            let current = self.value.borrow();
            (self.reduce)(&message, &current)
        };
        self.publish(store, next);
    }

    /// Publish `next` directly, bypassing the reducer. Equal values are
    /// dropped without notifying anyone.
    pub(crate) fn publish(&self, store: &Store, next: T) {
        if *self.value.borrow() == next {
            trace!("publication skipped, value unchanged");
            return;
        }
        *self.value.borrow_mut() = next.clone();
        self.settle_meta(store);

        let snapshot: Vec<SubscriberEntry<T>> = self.subscribers.borrow().clone();
        let mut dead = Vec::new();
        for entry in snapshot {
            match entry.kind {
                SubscriberKind::Callback(callback) => callback(&next),
                SubscriberKind::Listener(listener) => match listener.upgrade() {
                    Some(listener) => listener.update(store),
                    None => dead.push(entry.id),
                },
            }
        }
        if !dead.is_empty() {
            let mut subscribers = self.subscribers.borrow_mut();
            subscribers.retain(|entry| !dead.contains(&entry.id));
        }
    }

    /// A fresh value means any pending or errored meta state is stale.
    fn settle_meta(&self, store: &Store) {
        let (publish, is_ok) = match &*self.meta.borrow() {
            Some(link) => (link.publish.clone(), link.is_ok.clone()),
            None => return,
        };
        if !is_ok() {
            publish(store, Meta::Ok);
        }
    }

    pub(crate) fn attach_meta(&self, meta: Rc<Controller<Meta<M>, Meta<M>>>) {
        let target = meta.clone();
        let peek = meta;
        *self.meta.borrow_mut() = Some(MetaLink {
            publish: Rc::new(move |store, state| target.publish(store, state)),
            is_ok: Rc::new(move || peek.current().is_ok()),
        });
    }

    fn add_subscriber(&self, id: SubscriberId, kind: SubscriberKind<T>) {
        let mut subscribers = self.subscribers.borrow_mut();
        if let Some(existing) = subscribers.iter_mut().find(|entry| entry.id == id) {
            existing.kind = kind;
        } else {
            subscribers.push(SubscriberEntry { id, kind });
        }
    }

    #[cfg(test)]
    pub(crate) fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().len()
    }
}

/// Typed read-side of a controller, as seen through a registry entry.
pub(crate) trait ReadAccess<V> {
    fn read(&self) -> V;
    fn subscribe_callback(&self, id: SubscriberId, callback: Rc<dyn Fn(&V)>);
    fn subscribe_listener(&self, id: SubscriberId, listener: Weak<dyn StateListener>);
    fn remove_subscriber(&self, id: SubscriberId);
}

impl<T, M> ReadAccess<T> for Controller<T, M>
where
    T: Clone + PartialEq + 'static,
    M: Clone + PartialEq + 'static,
{
    fn read(&self) -> T {
        self.current()
    }

    fn subscribe_callback(&self, id: SubscriberId, callback: Rc<dyn Fn(&T)>) {
        self.add_subscriber(id, SubscriberKind::Callback(callback));
    }

    fn subscribe_listener(&self, id: SubscriberId, listener: Weak<dyn StateListener>) {
        self.add_subscriber(id, SubscriberKind::Listener(listener));
    }

    fn remove_subscriber(&self, id: SubscriberId) {
        self.subscribers
            .borrow_mut()
            .retain(|entry| entry.id != id);
    }
}

/// Untyped view of a controller, enough to detach subscribers and recover
/// the concrete type behind an `Rc<dyn Any>`.
pub(crate) trait AnyController {
    fn as_any_rc(self: Rc<Self>) -> Rc<dyn Any>;
    fn drop_subscriber(&self, id: SubscriberId);
}

impl<T, M> AnyController for Controller<T, M>
where
    T: Clone + PartialEq + 'static,
    M: Clone + PartialEq + 'static,
{
    fn as_any_rc(self: Rc<Self>) -> Rc<dyn Any> {
        self
    }

    fn drop_subscriber(&self, id: SubscriberId) {
        ReadAccess::remove_subscriber(self, id);
    }
}

/// One registered state token: the controller plus the typed read handle
/// used by `GetState` and `Store::subscribe`. Lives in a private module;
/// it surfaces only through the sealed registration trait.
pub struct RegistryEntry {
    read: Box<dyn Any>,
    controller: Rc<dyn AnyController>,
}

impl RegistryEntry {
    pub(crate) fn new<T, M>(controller: Rc<Controller<T, M>>) -> Self
    where
        T: Clone + PartialEq + 'static,
        M: Clone + PartialEq + 'static,
    {
        let read: Rc<dyn ReadAccess<T>> = controller.clone();
        RegistryEntry {
            read: Box::new(read),
            controller,
        }
    }

    /// The typed read handle. Panics if `V` does not match the registered
    /// value type, which indicates two tokens sharing an id with different
    /// types.
    pub(crate) fn read_access<V: 'static>(&self) -> Rc<dyn ReadAccess<V>> {
        self.read
            .downcast_ref::<Rc<dyn ReadAccess<V>>>()
            .unwrap_or_else(|| {
                panic!(
                    "state registered under this key holds a different value type than {}",
                    std::any::type_name::<V>()
                )
            })
            .clone()
    }

    /// Recover the concrete controller. Same panic policy as
    /// [`RegistryEntry::read_access`].
    pub(crate) fn typed<T, M>(&self) -> Rc<Controller<T, M>>
    where
        T: Clone + PartialEq + 'static,
        M: Clone + PartialEq + 'static,
    {
        self.controller
            .clone()
            .as_any_rc()
            .downcast::<Controller<T, M>>()
            .unwrap_or_else(|_| {
                panic!(
                    "state registered under this key is not a Controller<{}, {}>",
                    std::any::type_name::<T>(),
                    std::any::type_name::<M>()
                )
            })
    }

    pub(crate) fn erased(&self) -> Rc<dyn AnyController> {
        self.controller.clone()
    }
}
