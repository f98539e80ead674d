//! The Store
//!
//! A `Store` maps state tokens to live values and fans updates out to
//! subscribers. It is single threaded and cheap to clone; clones share the
//! same state.
//!
//! # How Registration Works
//!
//! 1. The first access to a token resolves its key. Tokens with an `id`
//!    resolve to one canonical key per store; anonymous tokens use their
//!    own key.
//! 2. If the key is unknown, the token builds its registry entry (the
//!    controller plus typed read access) and the store records it.
//! 3. The token's `after_register` hook then runs any initial reactive
//!    work, such as a container query's first evaluation. Registration is
//!    reentrant, so that work may register further tokens.

use std::any::Any;
use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use crate::store::controller::{AnyController, RegistryEntry, SubscriberId};
use crate::store::message::{MessageKind, StoreMessage};
use crate::store::meta::Meta;
use crate::store::query::{
    CommandBody, CommandHandle, EffectBody, EffectHandle, GetState, Provider, ProviderBody,
    StateListener, Writer, WriterActions,
};
use crate::store::token::{Container, MetaToken, Register, State, TokenKey};

struct StoreInner {
    registry: RefCell<HashMap<TokenKey, Rc<RegistryEntry>>>,
    id_keys: RefCell<HashMap<String, TokenKey>>,
    meta_keys: RefCell<HashMap<TokenKey, TokenKey>>,
    writers: RefCell<HashMap<TokenKey, Box<dyn Any>>>,
    /// Effects, commands, and providers registered against this store.
    /// Controllers hold them weakly; the store holds them alive.
    keepalive: RefCell<Vec<Rc<dyn StateListener>>>,
}

pub struct Store {
    inner: Rc<StoreInner>,
}

impl Clone for Store {
    fn clone(&self) -> Self {
        Store {
            inner: self.inner.clone(),
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Store::new()
    }
}

impl Store {
    pub fn new() -> Self {
        Store {
            inner: Rc::new(StoreInner {
                registry: RefCell::new(HashMap::new()),
                id_keys: RefCell::new(HashMap::new()),
                meta_keys: RefCell::new(HashMap::new()),
                writers: RefCell::new(HashMap::new()),
                keepalive: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Current value of `token`, registering it on first access.
    pub fn get<S: State>(&self, token: &S) -> S::Value {
        self.entry_for(token).read_access::<S::Value>().read()
    }

    /// Subscribe to `token`. The callback fires immediately with the
    /// current value, then again after every change, until the returned
    /// subscription is cancelled.
    pub fn subscribe<S: State>(
        &self,
        token: &S,
        callback: impl Fn(&S::Value) + 'static,
    ) -> Subscription {
        let entry = self.entry_for(token);
        let read = entry.read_access::<S::Value>();
        let callback: Rc<dyn Fn(&S::Value)> = Rc::new(callback);
        callback(&read.read());
        let id = SubscriberId::next();
        read.subscribe_callback(id, callback);
        Subscription {
            id,
            controller: Rc::downgrade(&entry.erased()),
        }
    }

    /// Apply a [`StoreMessage`]. Synchronous and reentrant.
    pub fn dispatch(&self, message: StoreMessage) {
        trace!(kind = message.kind_name(), "dispatching message");
        match message.kind {
            MessageKind::Write(apply) | MessageKind::Reset(apply) => apply(self),
            MessageKind::Use(evaluate) => {
                let next = evaluate(self);
                self.dispatch(next);
            }
            MessageKind::Run(effect) => effect(),
            MessageKind::Batch(messages) => {
                for message in messages {
                    self.dispatch(message);
                }
            }
        }
    }

    /// Register an effect: runs now and again whenever a tracked
    /// dependency changes.
    pub fn use_effect(&self, body: impl Fn(&mut GetState<'_>) + 'static) -> EffectHandle {
        let effect = EffectBody::new(body);
        let handle = EffectHandle::new(effect.core());
        self.inner.keepalive.borrow_mut().push(effect.clone());
        effect.update(self);
        handle
    }

    /// Register a provider: runs now and again whenever a dependency it
    /// read through `actions.get` changes.
    pub fn use_provider(&self, provider: impl Provider + 'static) {
        let body = ProviderBody::new(provider);
        self.inner.keepalive.borrow_mut().push(body.clone());
        body.update(self);
    }

    /// Register a command: `query` is tracked, and every run hands its
    /// result to `handler`, including the first.
    pub fn use_command<Msg: 'static>(
        &self,
        query: impl Fn(&mut GetState<'_>) -> Msg + 'static,
        handler: impl Fn(&Store, Msg) + 'static,
    ) -> CommandHandle {
        let command = CommandBody::new(query, handler);
        let handle = CommandHandle::new(command.core());
        self.inner.keepalive.borrow_mut().push(command.clone());
        command.update(self);
        handle
    }

    /// Install a writer for `container`. Subsequent `write` messages go
    /// through it instead of the reducer.
    pub fn use_writer<T, M>(&self, container: &Container<T, M>, writer: impl Writer<T, M> + 'static)
    where
        T: Clone + PartialEq + 'static,
        M: Clone + PartialEq + 'static,
    {
        self.entry_for(container);
        let key = container.key(self);
        let shared: Rc<dyn Writer<T, M>> = Rc::new(writer);
        self.inner.writers.borrow_mut().insert(key, Box::new(shared));
    }

    /// Keep a reactive computation alive for the life of this store.
    /// Controllers only hold listeners weakly.
    pub(crate) fn retain_listener(&self, listener: Rc<dyn StateListener>) {
        self.inner.keepalive.borrow_mut().push(listener);
    }

    pub(crate) fn entry_for<S: State>(&self, token: &S) -> Rc<RegistryEntry> {
        let key = token.key(self);
        if let Some(entry) = self.inner.registry.borrow().get(&key) {
            return entry.clone();
        }
        let entry = Rc::new(token.create_entry(self));
        {
            let mut registry = self.inner.registry.borrow_mut();
            match registry.entry(key) {
                // A recursive registration during create_entry won.
                Entry::Occupied(existing) => return existing.get().clone(),
                Entry::Vacant(slot) => {
                    slot.insert(entry.clone());
                }
            }
        }
        debug!(state = %token.describe(), "registered state");
        token.after_register(self);
        entry
    }

    /// Drop the registration for `token`, along with its meta channel and
    /// any installed writer. Used for short-lived anonymous tokens, such
    /// as list item index cells, whose values die with their owner.
    pub(crate) fn evict<S: State>(&self, token: &S) {
        let key = token.key(self);
        self.inner.registry.borrow_mut().remove(&key);
        let meta = self.inner.meta_keys.borrow_mut().remove(&key);
        if let Some(meta) = meta {
            self.inner.registry.borrow_mut().remove(&meta);
        }
        self.inner.writers.borrow_mut().remove(&key);
    }

    #[cfg(test)]
    pub(crate) fn registered_count(&self) -> usize {
        self.inner.registry.borrow().len()
    }

    pub(crate) fn canonical_key(&self, id: &str, fallback: TokenKey) -> TokenKey {
        *self
            .inner
            .id_keys
            .borrow_mut()
            .entry(id.to_string())
            .or_insert(fallback)
    }

    pub(crate) fn meta_key(&self, base: TokenKey) -> TokenKey {
        *self
            .inner
            .meta_keys
            .borrow_mut()
            .entry(base)
            .or_insert_with(TokenKey::next)
    }

    pub(crate) fn publish_meta<M>(&self, token: &MetaToken<M>, meta: Meta<M>)
    where
        M: Clone + PartialEq + 'static,
    {
        self.entry_for(token)
            .typed::<Meta<M>, Meta<M>>()
            .publish(self, meta);
    }

    pub(crate) fn apply_write<T, M>(&self, token: &Container<T, M>, message: M)
    where
        T: Clone + PartialEq + 'static,
        M: Clone + PartialEq + 'static,
    {
        let controller = token.controller(self);
        let key = token.key(self);
        let writer = self
            .inner
            .writers
            .borrow()
            .get(&key)
            .and_then(|slot| slot.downcast_ref::<Rc<dyn Writer<T, M>>>())
            .cloned();
        match writer {
            Some(writer) => {
                let mut actions = WriterActions::new(self, token, controller);
                if let Err(reason) = writer.write(message.clone(), &mut actions) {
                    debug!(state = %token.describe(), %reason, "writer rejected message");
                    self.publish_meta(
                        &token.meta(),
                        Meta::Error {
                            message: Some(message),
                            reason,
                        },
                    );
                }
            }
            None => controller.accept(self, message),
        }
    }

    pub(crate) fn apply_reset<T, M>(&self, token: &Container<T, M>)
    where
        T: Clone + PartialEq + 'static,
        M: Clone + PartialEq + 'static,
    {
        let controller = token.controller(self);
        controller.publish(self, token.initial().clone());
    }
}

/// Handle to one `Store::subscribe` registration.
pub struct Subscription {
    id: SubscriberId,
    controller: Weak<dyn AnyController>,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if let Some(controller) = self.controller.upgrade() {
            controller.drop_subscriber(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::error::StoreError;
    use crate::store::message::{batch, reset, run, use_rule, write, Rule};
    use crate::store::token::derived;
    use std::cell::RefCell as StdRefCell;

    fn collect<T: Clone + 'static>() -> (Rc<StdRefCell<Vec<T>>>, impl Fn(&T) + 'static) {
        let seen: Rc<StdRefCell<Vec<T>>> = Rc::new(StdRefCell::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |value: &T| sink.borrow_mut().push(value.clone()))
    }

    #[test]
    fn subscribe_fires_immediately_then_on_changes() {
        let store = Store::new();
        let counter = Container::new(0);
        let (seen, sink) = collect();
        store.subscribe(&counter, sink);

        store.dispatch(write(&counter, 1));
        store.dispatch(write(&counter, 1));
        store.dispatch(write(&counter, 2));

        assert_eq!(*seen.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn unsubscribing_leaves_other_subscribers_untouched() {
        let store = Store::new();
        let counter = Container::new(0);
        let (first_seen, first_sink) = collect();
        let (second_seen, second_sink) = collect();
        let first = store.subscribe(&counter, first_sink);
        store.subscribe(&counter, second_sink);

        first.unsubscribe();
        store.dispatch(write(&counter, 27));

        assert_eq!(*first_seen.borrow(), vec![0]);
        assert_eq!(*second_seen.borrow(), vec![0, 27]);
    }

    #[test]
    fn reset_restores_the_initial_value() {
        let store = Store::new();
        let counter = Container::new(41);
        store.dispatch(write(&counter, 3));
        store.dispatch(reset(&counter));
        assert_eq!(store.get(&counter), 41);
    }

    #[test]
    fn batch_applies_in_order() {
        let store = Store::new();
        let log: Container<Vec<i32>, i32> =
            Container::with_reducer(Vec::new(), |message: &i32, current: &Vec<i32>| {
                let mut next = current.clone();
                next.push(*message);
                next
            })
            .build();

        store.dispatch(batch(vec![
            write(&log, 1),
            write(&log, 2),
            write(&log, 3),
        ]));
        assert_eq!(store.get(&log), vec![1, 2, 3]);
    }

    #[test]
    fn rules_read_state_and_produce_messages() {
        let store = Store::new();
        let counter = Container::new(10);
        let step = counter.clone();
        let add = Rule::new(move |get, amount: i32| {
            let current = get.get(&step);
            write(&step, current + amount)
        });

        store.dispatch(use_rule(&add, 5));
        assert_eq!(store.get(&counter), 15);
    }

    #[test]
    fn run_messages_execute_side_effects() {
        let store = Store::new();
        let fired = Rc::new(StdRefCell::new(false));
        let flag = fired.clone();
        store.dispatch(run(move || *flag.borrow_mut() = true));
        assert!(*fired.borrow());
    }

    #[test]
    fn derived_values_follow_their_dependencies() {
        let store = Store::new();
        let first = Container::new("peach".to_string());
        let second = Container::new("cobbler".to_string());
        let (a, b) = (first.clone(), second.clone());
        let combined = derived(move |get| format!("{} {}", get.get(&a), get.get(&b)));

        let (seen, sink) = collect();
        store.subscribe(&combined, sink);
        store.dispatch(write(&second, "pie".to_string()));

        assert_eq!(*seen.borrow(), vec!["peach cobbler", "peach pie"]);
    }

    #[test]
    fn conditional_dependencies_are_retracked_each_run() {
        let store = Store::new();
        let gate = Container::new(true);
        let left = Container::new(1);
        let right = Container::new(100);
        let runs = Rc::new(StdRefCell::new(0));

        let (g, l, r, counter) = (gate.clone(), left.clone(), right.clone(), runs.clone());
        let picked = derived(move |get| {
            *counter.borrow_mut() += 1;
            if get.get(&g) {
                get.get(&l)
            } else {
                get.get(&r)
            }
        });
        store.subscribe(&picked, |_| {});
        assert_eq!(*runs.borrow(), 1);

        // While the gate is open only `left` matters.
        store.dispatch(write(&right, 200));
        assert_eq!(*runs.borrow(), 1);

        store.dispatch(write(&gate, false));
        assert_eq!(*runs.borrow(), 2);
        assert_eq!(store.get(&picked), 200);

        // And now `left` is the silent branch.
        store.dispatch(write(&left, 2));
        assert_eq!(*runs.borrow(), 2);
    }

    #[test]
    fn container_queries_recompute_from_their_dependencies() {
        let store = Store::new();
        let base = Container::new(2);
        let dependency = base.clone();
        let doubled: Container<i32> = Container::builder(0)
            .query(move |get, _current: &i32| Ok(get.get(&dependency) * 2))
            .build();

        assert_eq!(store.get(&doubled), 4);
        assert_eq!(store.get(&doubled.meta()), Meta::Ok);

        store.dispatch(write(&base, 5));
        assert_eq!(store.get(&doubled), 10);
    }

    #[test]
    fn a_failing_container_query_keeps_the_value_and_reports_through_meta() {
        let store = Store::new();
        let denominator = Container::new(0);
        let divisor = denominator.clone();
        let ratio: Container<i32> = Container::builder(1)
            .query(move |get, _current: &i32| {
                let divisor = get.get(&divisor);
                if divisor == 0 {
                    Err(StoreError::computation("division by zero"))
                } else {
                    Ok(100 / divisor)
                }
            })
            .build();

        // The first run fails: the declared initial value stays in place
        // and the failure lands on the meta channel.
        assert_eq!(store.get(&ratio), 1);
        assert_eq!(
            store.get(&ratio.meta()),
            Meta::Error {
                message: None,
                reason: StoreError::computation("division by zero"),
            }
        );

        // The query stayed subscribed; a good dependency value recovers.
        store.dispatch(write(&denominator, 4));
        assert_eq!(store.get(&ratio), 25);
        assert_eq!(store.get(&ratio.meta()), Meta::Ok);
    }

    #[test]
    fn writers_intercept_messages() {
        struct Doubler;
        impl Writer<i32> for Doubler {
            fn write(
                &self,
                message: i32,
                actions: &mut WriterActions<'_, i32, i32>,
            ) -> Result<(), StoreError> {
                if message < 0 {
                    return Err(StoreError::rejected("negative"));
                }
                actions.ok(message * 2);
                Ok(())
            }
        }

        let store = Store::new();
        let amount = Container::new(0);
        store.use_writer(&amount, Doubler);

        store.dispatch(write(&amount, 4));
        assert_eq!(store.get(&amount), 8);

        store.dispatch(write(&amount, -1));
        assert_eq!(store.get(&amount), 8);
        assert_eq!(
            store.get(&amount.meta()),
            Meta::Error {
                message: Some(-1),
                reason: StoreError::rejected("negative"),
            }
        );

        // A successful write settles the meta channel.
        store.dispatch(write(&amount, 5));
        assert_eq!(store.get(&amount.meta()), Meta::Ok);
    }

    #[test]
    fn effects_rerun_on_tracked_changes_until_unsubscribed() {
        let store = Store::new();
        let word = Container::new("hello".to_string());
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let sink = seen.clone();
        let token = word.clone();
        let handle = store.use_effect(move |get| {
            sink.borrow_mut().push(get.get(&token));
        });

        store.dispatch(write(&word, "goodbye".to_string()));
        handle.unsubscribe();
        store.dispatch(write(&word, "again".to_string()));

        assert_eq!(*seen.borrow(), vec!["hello", "goodbye"]);
    }

    #[test]
    fn commands_hand_query_results_to_their_handler() {
        let store = Store::new();
        let query_token = Container::new("first".to_string());
        let seen = Rc::new(StdRefCell::new(Vec::new()));
        let sink = seen.clone();
        let token = query_token.clone();
        store.use_command(
            move |get| get.get(&token),
            move |_store, message: String| sink.borrow_mut().push(message),
        );

        store.dispatch(write(&query_token, "second".to_string()));
        assert_eq!(*seen.borrow(), vec!["first", "second"]);
    }
}
