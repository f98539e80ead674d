//! Reactive Queries
//!
//! Everything reactive in the store runs through one protocol, owned by
//! [`TrackerCore`].
//!
//! # How Tracking Works
//!
//! 1. Before a computation runs, its edges from the previous run are
//!    severed: every controller it was subscribed to forgets it.
//! 2. The computation runs against a [`GetState`] that carries a tracking
//!    frame. Each distinct token read through it subscribes the
//!    computation to that token's controller and records the edge.
//! 3. The fresh edges replace the old set.
//!
//! Because step 1 always precedes step 2, a dependency that a run no
//! longer reads (a branch not taken this time) stops triggering the
//! computation. Subscriptions into controllers are weak; dropping the last
//! strong handle to a computation retires it on the next publication.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;
use tracing::debug;

use crate::store::controller::{AnyController, Controller, SubscriberId};
use crate::store::error::StoreError;
use crate::store::meta::Meta;
use crate::store::registry::Store;
use crate::store::token::{Container, DerivedValue, State, TokenKey, WritableState};

/// A computation that reruns when one of its tracked dependencies changes.
pub(crate) trait StateListener {
    fn update(self: Rc<Self>, store: &Store);
}

struct TrackFrame {
    id: SubscriberId,
    listener: Weak<dyn StateListener>,
    seen: HashSet<TokenKey>,
    edges: SmallVec<[Weak<dyn AnyController>; 4]>,
}

/// Read access to a store, optionally recording dependencies.
pub struct GetState<'a> {
    store: &'a Store,
    frame: Option<TrackFrame>,
}

impl<'a> GetState<'a> {
    pub(crate) fn untracked(store: &'a Store) -> Self {
        GetState { store, frame: None }
    }

    /// Current value of `token`. Inside a tracked run the read also
    /// subscribes the running computation to the token.
    pub fn get<S: State>(&mut self, token: &S) -> S::Value {
        let key = token.key(self.store);
        let entry = self.store.entry_for(token);
        let read = entry.read_access::<S::Value>();
        if let Some(frame) = self.frame.as_mut() {
            if frame.seen.insert(key) {
                read.subscribe_listener(frame.id, frame.listener.clone());
                frame.edges.push(Rc::downgrade(&entry.erased()));
            }
        }
        read.read()
    }

    pub(crate) fn store(&self) -> &'a Store {
        self.store
    }
}

/// Shared tracking state of one reactive computation.
pub(crate) struct TrackerCore {
    id: SubscriberId,
    edges: RefCell<SmallVec<[Weak<dyn AnyController>; 4]>>,
    disposed: Cell<bool>,
}

impl TrackerCore {
    pub(crate) fn new() -> Self {
        TrackerCore {
            id: SubscriberId::next(),
            edges: RefCell::new(SmallVec::new()),
            disposed: Cell::new(false),
        }
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.get()
    }

    /// Sever the edges and stop reacting. Safe to call more than once.
    pub(crate) fn dispose(&self) {
        self.disposed.set(true);
        self.clear_edges();
    }

    fn clear_edges(&self) {
        let edges = std::mem::take(&mut *self.edges.borrow_mut());
        for edge in edges {
            if let Some(controller) = edge.upgrade() {
                controller.drop_subscriber(self.id);
            }
        }
    }

    /// Run `body` with dependency tracking, replacing the edge set.
    pub(crate) fn run<R>(
        &self,
        store: &Store,
        listener: &Rc<dyn StateListener>,
        body: impl FnOnce(&mut GetState<'_>) -> R,
    ) -> R {
        self.clear_edges();
        let mut get = GetState {
            store,
            frame: Some(TrackFrame {
                id: self.id,
                listener: Rc::downgrade(listener),
                seen: HashSet::new(),
                edges: SmallVec::new(),
            }),
        };
        let result = body(&mut get);
        if let Some(frame) = get.frame.take() {
            *self.edges.borrow_mut() = frame.edges;
        }
        result
    }
}

/// Drives a derived value: reruns the derivation and republishes.
pub(crate) struct DerivedQuery<T: Clone + PartialEq + 'static> {
    core: TrackerCore,
    token: DerivedValue<T>,
    slot: RefCell<Weak<Controller<T, T>>>,
}

impl<T: Clone + PartialEq + 'static> DerivedQuery<T> {
    /// Build the query and compute the initial value in one tracked run.
    pub(crate) fn initialize(store: &Store, token: DerivedValue<T>) -> (Rc<Self>, T) {
        let query = Rc::new(DerivedQuery {
            core: TrackerCore::new(),
            token,
            slot: RefCell::new(Weak::new()),
        });
        let listener: Rc<dyn StateListener> = query.clone();
        let derivation = query.token.derivation();
        let initial = query.core.run(store, &listener, |get| derivation(get));
        (query, initial)
    }

    pub(crate) fn bind(&self, controller: &Rc<Controller<T, T>>) {
        *self.slot.borrow_mut() = Rc::downgrade(controller);
    }
}

impl<T: Clone + PartialEq + 'static> StateListener for DerivedQuery<T> {
    fn update(self: Rc<Self>, store: &Store) {
        if self.core.is_disposed() {
            return;
        }
        let listener: Rc<dyn StateListener> = self.clone();
        let derivation = self.token.derivation();
        let next = self.core.run(store, &listener, |get| derivation(get));
        if let Some(controller) = self.slot.borrow().upgrade() {
            controller.publish(store, next);
        }
    }
}

/// Drives a container's reactive query. Failures land on the meta channel
/// while the container keeps its last good value.
pub(crate) struct ContainerQuery<T, M>
where
    T: Clone + PartialEq + 'static,
    M: Clone + PartialEq + 'static,
{
    core: TrackerCore,
    token: Container<T, M>,
}

impl<T, M> ContainerQuery<T, M>
where
    T: Clone + PartialEq + 'static,
    M: Clone + PartialEq + 'static,
{
    pub(crate) fn new(token: Container<T, M>) -> Rc<Self> {
        Rc::new(ContainerQuery {
            core: TrackerCore::new(),
            token,
        })
    }
}

impl<T, M> StateListener for ContainerQuery<T, M>
where
    T: Clone + PartialEq + 'static,
    M: Clone + PartialEq + 'static,
{
    fn update(self: Rc<Self>, store: &Store) {
        if self.core.is_disposed() {
            return;
        }
        let Some(query) = self.token.query() else {
            return;
        };
        let controller = self.token.controller(store);
        let current = controller.current();
        let listener: Rc<dyn StateListener> = self.clone();
        match self.core.run(store, &listener, |get| query(get, &current)) {
            Ok(message) => controller.accept(store, message),
            Err(reason) => {
                debug!(state = %self.token.describe(), %reason, "container query failed");
                store.publish_meta(
                    &self.token.meta(),
                    Meta::Error {
                        message: None,
                        reason,
                    },
                );
            }
        }
    }
}

pub(crate) struct EffectBody {
    core: Rc<TrackerCore>,
    body: Box<dyn Fn(&mut GetState<'_>)>,
}

impl EffectBody {
    pub(crate) fn new(body: impl Fn(&mut GetState<'_>) + 'static) -> Rc<Self> {
        Rc::new(EffectBody {
            core: Rc::new(TrackerCore::new()),
            body: Box::new(body),
        })
    }

    pub(crate) fn core(&self) -> Rc<TrackerCore> {
        self.core.clone()
    }
}

impl StateListener for EffectBody {
    fn update(self: Rc<Self>, store: &Store) {
        if self.core.is_disposed() {
            return;
        }
        let listener: Rc<dyn StateListener> = self.clone();
        self.core.run(store, &listener, |get| (self.body)(get));
    }
}

/// Handle to a registered effect. The effect keeps running until
/// `unsubscribe` is called, even if the handle is dropped.
pub struct EffectHandle {
    core: Rc<TrackerCore>,
}

impl EffectHandle {
    pub(crate) fn new(core: Rc<TrackerCore>) -> Self {
        EffectHandle { core }
    }

    pub fn unsubscribe(&self) {
        self.core.dispose();
    }
}

/// Handle to a registered command. Same lifecycle as [`EffectHandle`].
pub struct CommandHandle {
    core: Rc<TrackerCore>,
}

impl CommandHandle {
    pub(crate) fn new(core: Rc<TrackerCore>) -> Self {
        CommandHandle { core }
    }

    pub fn unsubscribe(&self) {
        self.core.dispose();
    }
}

pub(crate) struct CommandBody<Msg> {
    core: Rc<TrackerCore>,
    query: Box<dyn Fn(&mut GetState<'_>) -> Msg>,
    handler: Box<dyn Fn(&Store, Msg)>,
}

impl<Msg: 'static> CommandBody<Msg> {
    pub(crate) fn new(
        query: impl Fn(&mut GetState<'_>) -> Msg + 'static,
        handler: impl Fn(&Store, Msg) + 'static,
    ) -> Rc<Self> {
        Rc::new(CommandBody {
            core: Rc::new(TrackerCore::new()),
            query: Box::new(query),
            handler: Box::new(handler),
        })
    }

    pub(crate) fn core(&self) -> Rc<TrackerCore> {
        self.core.clone()
    }
}

impl<Msg: 'static> StateListener for CommandBody<Msg> {
    fn update(self: Rc<Self>, store: &Store) {
        if self.core.is_disposed() {
            return;
        }
        let listener: Rc<dyn StateListener> = self.clone();
        let message = self.core.run(store, &listener, |get| (self.query)(get));
        (self.handler)(store, message);
    }
}

/// A producer that reads tracked dependencies and writes values back into
/// the store, typically bridging an asynchronous source.
pub trait Provider {
    fn provide(&self, actions: &mut ProviderActions<'_, '_>);
}

/// The capabilities handed to a [`Provider`] run.
pub struct ProviderActions<'s, 'g> {
    get: &'g mut GetState<'s>,
}

impl<'s, 'g> ProviderActions<'s, 'g> {
    /// Tracked read; the provider reruns when this token changes.
    pub fn get<S: State>(&mut self, token: &S) -> S::Value {
        self.get.get(token)
    }

    /// Publish `value` directly onto writable state.
    pub fn set<S: WritableState>(&mut self, token: &S, value: S::Value) {
        token.publish_value(self.get.store(), value);
    }
}

pub(crate) struct ProviderBody {
    core: TrackerCore,
    provider: Box<dyn Provider>,
}

impl ProviderBody {
    pub(crate) fn new(provider: impl Provider + 'static) -> Rc<Self> {
        Rc::new(ProviderBody {
            core: TrackerCore::new(),
            provider: Box::new(provider),
        })
    }
}

impl StateListener for ProviderBody {
    fn update(self: Rc<Self>, store: &Store) {
        if self.core.is_disposed() {
            return;
        }
        let listener: Rc<dyn StateListener> = self.clone();
        self.core.run(store, &listener, |get| {
            let mut actions = ProviderActions { get };
            self.provider.provide(&mut actions);
        });
    }
}

/// Intercepts write messages for one container.
pub trait Writer<T, M = T>
where
    T: Clone + PartialEq + 'static,
    M: Clone + PartialEq + 'static,
{
    /// Apply `message`. Returning an error publishes it on the meta
    /// channel together with the rejected message.
    fn write(&self, message: M, actions: &mut WriterActions<'_, T, M>) -> Result<(), StoreError>;
}

/// The capabilities handed to a [`Writer`] run. Reads here are untracked;
/// writers rerun on incoming messages, not on state changes.
pub struct WriterActions<'a, T, M>
where
    T: Clone + PartialEq + 'static,
    M: Clone + PartialEq + 'static,
{
    store: &'a Store,
    token: &'a Container<T, M>,
    controller: Rc<Controller<T, M>>,
}

impl<'a, T, M> WriterActions<'a, T, M>
where
    T: Clone + PartialEq + 'static,
    M: Clone + PartialEq + 'static,
{
    pub(crate) fn new(
        store: &'a Store,
        token: &'a Container<T, M>,
        controller: Rc<Controller<T, M>>,
    ) -> Self {
        WriterActions {
            store,
            token,
            controller,
        }
    }

    pub fn get<S: State>(&self, token: &S) -> S::Value {
        self.store.get(token)
    }

    pub fn current(&self) -> T {
        self.controller.current()
    }

    /// Run the message through the container's reducer and publish.
    pub fn accept(&self, message: M) {
        self.controller.accept(self.store, message);
    }

    /// Publish a final value directly, bypassing the reducer.
    pub fn ok(&self, value: T) {
        self.controller.publish(self.store, value);
    }

    /// Mark the carried message as in flight.
    pub fn pending(&self, message: M) {
        self.store
            .publish_meta(&self.token.meta(), Meta::Pending(message));
    }

    /// Report a failure without returning from the writer.
    pub fn error(&self, message: Option<M>, reason: StoreError) {
        self.store
            .publish_meta(&self.token.meta(), Meta::Error { message, reason });
    }
}
