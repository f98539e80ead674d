//! State Tokens
//!
//! Tokens are lightweight, cloneable descriptions of state. Nothing is
//! allocated in a store until a token is first read, subscribed to, or
//! written through that store; the same token can be used against any
//! number of stores, each holding its own value.
//!
//! # Token Kinds
//!
//! - [`Container`]: writable root state with an initial value, an optional
//!   reducer, and an optional reactive query that recomputes the value
//!   when its dependencies change.
//! - [`DerivedValue`]: read-only state computed from other tokens.
//! - [`MetaToken`]: the status channel of another token, obtained through
//!   `.meta()`.
//!
//! Tokens built with an `id` share one value per store: every token
//! carrying the same id resolves to the same registration. The declared
//! value types must match across such tokens; a mismatch panics at the
//! first conflicting access.

use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::store::controller::{Controller, RegistryEntry};
use crate::store::error::StoreError;
use crate::store::meta::Meta;
use crate::store::query::{ContainerQuery, DerivedQuery, GetState, StateListener};
use crate::store::registry::Store;

static NEXT_TOKEN_KEY: AtomicU64 = AtomicU64::new(0);

/// Identifies one registration within a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TokenKey(u64);

impl TokenKey {
    pub(crate) fn next() -> Self {
        TokenKey(NEXT_TOKEN_KEY.fetch_add(1, Ordering::Relaxed))
    }
}

mod registration {
    use crate::store::controller::RegistryEntry;
    use crate::store::registry::Store;

    use super::TokenKey;

    /// Registration hooks the store drives on first access. The trait is
    /// not nameable outside the crate, which seals [`State`](super::State)
    /// against downstream implementations.
    pub trait Register {
        /// The registration key of this token within `store`.
        fn key(&self, store: &Store) -> TokenKey;

        /// Build the registry entry on first access.
        fn create_entry(&self, store: &Store) -> RegistryEntry;

        /// Runs once, after the entry is in the registry.
        fn after_register(&self, _store: &Store) {}
    }
}

pub(crate) use registration::Register;

/// Anything that names a piece of state a store can hold. Sealed: the
/// token kinds in this module are the only implementations.
pub trait State: Register {
    type Value: Clone + PartialEq + 'static;

    /// Human-readable name for logs.
    fn describe(&self) -> String;
}

/// State a provider can write directly: plain containers and meta tokens.
pub trait WritableState: State {
    fn publish_value(&self, store: &Store, value: Self::Value);
}

pub(crate) type ReduceFn<T, M> = dyn Fn(&M, &T) -> T;
pub(crate) type ContainerQueryFn<T, M> = dyn Fn(&mut GetState<'_>, &T) -> Result<M, StoreError>;

struct ContainerInner<T, M> {
    key: TokenKey,
    id: Option<String>,
    name: Option<String>,
    initial: T,
    reduce: Rc<ReduceFn<T, M>>,
    query: Option<Rc<ContainerQueryFn<T, M>>>,
}

/// Writable root state.
pub struct Container<T, M = T> {
    inner: Rc<ContainerInner<T, M>>,
}

impl<T, M> Clone for Container<T, M> {
    fn clone(&self) -> Self {
        Container {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Container<T, T>
where
    T: Clone + PartialEq + 'static,
{
    /// A plain container whose messages replace its value.
    pub fn new(initial: T) -> Self {
        Container::builder(initial).build()
    }

    pub fn builder(initial: T) -> ContainerBuilder<T, T> {
        ContainerBuilder {
            id: None,
            name: None,
            initial,
            reduce: Rc::new(|message: &T, _current: &T| message.clone()),
            query: None,
        }
    }
}

impl<T, M> Container<T, M>
where
    T: Clone + PartialEq + 'static,
    M: Clone + PartialEq + 'static,
{
    /// A container whose messages are folded into the value by `reduce`.
    pub fn with_reducer(initial: T, reduce: impl Fn(&M, &T) -> T + 'static) -> ContainerBuilder<T, M> {
        ContainerBuilder {
            id: None,
            name: None,
            initial,
            reduce: Rc::new(reduce),
            query: None,
        }
    }

    /// The status channel of this container.
    pub fn meta(&self) -> MetaToken<M> {
        MetaToken {
            base: Rc::new(self.clone()),
        }
    }

    pub(crate) fn initial(&self) -> &T {
        &self.inner.initial
    }

    pub(crate) fn controller(&self, store: &Store) -> Rc<Controller<T, M>> {
        store.entry_for(self).typed::<T, M>()
    }
}

impl<T, M> Register for Container<T, M>
where
    T: Clone + PartialEq + 'static,
    M: Clone + PartialEq + 'static,
{
    fn key(&self, store: &Store) -> TokenKey {
        match &self.inner.id {
            Some(id) => store.canonical_key(id, self.inner.key),
            None => self.inner.key,
        }
    }

    fn create_entry(&self, _store: &Store) -> RegistryEntry {
        let controller = Rc::new(Controller::new(
            self.inner.initial.clone(),
            self.inner.reduce.clone(),
        ));
        RegistryEntry::new(controller)
    }

    fn after_register(&self, store: &Store) {
        if self.inner.query.is_some() {
            let query = ContainerQuery::new(self.clone());
            store.retain_listener(query.clone());
            query.update(store);
        }
    }
}

impl<T, M> State for Container<T, M>
where
    T: Clone + PartialEq + 'static,
    M: Clone + PartialEq + 'static,
{
    type Value = T;

    fn describe(&self) -> String {
        match (&self.inner.name, &self.inner.id) {
            (Some(name), _) => name.clone(),
            (None, Some(id)) => format!("container[{id}]"),
            (None, None) => format!("container-{:?}", self.inner.key),
        }
    }
}

impl<T> WritableState for Container<T, T>
where
    T: Clone + PartialEq + 'static,
{
    fn publish_value(&self, store: &Store, value: T) {
        self.controller(store).publish(store, value);
    }
}

impl<T, M> Container<T, M>
where
    T: Clone + PartialEq + 'static,
    M: Clone + PartialEq + 'static,
{
    pub(crate) fn query(&self) -> Option<Rc<ContainerQueryFn<T, M>>> {
        self.inner.query.clone()
    }
}

/// Builder for [`Container`] tokens.
pub struct ContainerBuilder<T, M = T> {
    id: Option<String>,
    name: Option<String>,
    initial: T,
    reduce: Rc<ReduceFn<T, M>>,
    query: Option<Rc<ContainerQueryFn<T, M>>>,
}

impl<T, M> ContainerBuilder<T, M>
where
    T: Clone + PartialEq + 'static,
    M: Clone + PartialEq + 'static,
{
    /// Share one value per store among all tokens carrying this id.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Name used in logs.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Recompute this container's message whenever a dependency read
    /// inside `query` changes. Errors land on the meta channel.
    pub fn query(
        mut self,
        query: impl Fn(&mut GetState<'_>, &T) -> Result<M, StoreError> + 'static,
    ) -> Self {
        self.query = Some(Rc::new(query));
        self
    }

    pub fn build(self) -> Container<T, M> {
        Container {
            inner: Rc::new(ContainerInner {
                key: TokenKey::next(),
                id: self.id,
                name: self.name,
                initial: self.initial,
                reduce: self.reduce,
                query: self.query,
            }),
        }
    }
}

struct DerivedInner<T> {
    key: TokenKey,
    name: Option<String>,
    derivation: Rc<dyn Fn(&mut GetState<'_>) -> T>,
}

/// Read-only state computed from other tokens.
pub struct DerivedValue<T> {
    inner: Rc<DerivedInner<T>>,
}

impl<T> Clone for DerivedValue<T> {
    fn clone(&self) -> Self {
        DerivedValue {
            inner: self.inner.clone(),
        }
    }
}

/// Declare a derived value. Dependencies are re-tracked on every run, so
/// conditional reads subscribe only to what the latest run touched.
pub fn derived<T>(derivation: impl Fn(&mut GetState<'_>) -> T + 'static) -> DerivedValue<T>
where
    T: Clone + PartialEq + 'static,
{
    DerivedValue {
        inner: Rc::new(DerivedInner {
            key: TokenKey::next(),
            name: None,
            derivation: Rc::new(derivation),
        }),
    }
}

impl<T> DerivedValue<T>
where
    T: Clone + PartialEq + 'static,
{
    pub fn named(name: impl Into<String>, derivation: impl Fn(&mut GetState<'_>) -> T + 'static) -> Self {
        DerivedValue {
            inner: Rc::new(DerivedInner {
                key: TokenKey::next(),
                name: Some(name.into()),
                derivation: Rc::new(derivation),
            }),
        }
    }

    pub fn meta(&self) -> MetaToken<T> {
        MetaToken {
            base: Rc::new(self.clone()),
        }
    }

    pub(crate) fn derivation(&self) -> Rc<dyn Fn(&mut GetState<'_>) -> T> {
        self.inner.derivation.clone()
    }

    pub(crate) fn controller(&self, store: &Store) -> Rc<Controller<T, T>> {
        store.entry_for(self).typed::<T, T>()
    }
}

impl<T> Register for DerivedValue<T>
where
    T: Clone + PartialEq + 'static,
{
    fn key(&self, _store: &Store) -> TokenKey {
        self.inner.key
    }

    fn create_entry(&self, store: &Store) -> RegistryEntry {
        let (query, initial) = DerivedQuery::initialize(store, self.clone());
        let controller = Rc::new(Controller::new(
            initial,
            Rc::new(|message: &T, _current: &T| message.clone()),
        ));
        query.bind(&controller);
        store.retain_listener(query);
        RegistryEntry::new(controller)
    }
}

impl<T> State for DerivedValue<T>
where
    T: Clone + PartialEq + 'static,
{
    type Value = T;

    fn describe(&self) -> String {
        match &self.inner.name {
            Some(name) => name.clone(),
            None => format!("derived-{:?}", self.inner.key),
        }
    }
}

/// Links a meta controller back to its base token.
pub(crate) trait MetaBase<M> {
    fn base_key(&self, store: &Store) -> TokenKey;
    fn attach(&self, store: &Store, meta: Rc<Controller<Meta<M>, Meta<M>>>);
    fn describe_base(&self) -> String;
}

impl<T, M> MetaBase<M> for Container<T, M>
where
    T: Clone + PartialEq + 'static,
    M: Clone + PartialEq + 'static,
{
    fn base_key(&self, store: &Store) -> TokenKey {
        self.key(store)
    }

    fn attach(&self, store: &Store, meta: Rc<Controller<Meta<M>, Meta<M>>>) {
        self.controller(store).attach_meta(meta);
    }

    fn describe_base(&self) -> String {
        self.describe()
    }
}

impl<T> MetaBase<T> for DerivedValue<T>
where
    T: Clone + PartialEq + 'static,
{
    fn base_key(&self, store: &Store) -> TokenKey {
        self.key(store)
    }

    fn attach(&self, store: &Store, meta: Rc<Controller<Meta<T>, Meta<T>>>) {
        self.controller(store).attach_meta(meta);
    }

    fn describe_base(&self) -> String {
        self.describe()
    }
}

/// The status channel of another token. See [`Meta`].
pub struct MetaToken<M> {
    base: Rc<dyn MetaBase<M>>,
}

impl<M> Clone for MetaToken<M> {
    fn clone(&self) -> Self {
        MetaToken {
            base: self.base.clone(),
        }
    }
}

impl<M> Register for MetaToken<M>
where
    M: Clone + PartialEq + 'static,
{
    fn key(&self, store: &Store) -> TokenKey {
        let base = self.base.base_key(store);
        store.meta_key(base)
    }

    fn create_entry(&self, _store: &Store) -> RegistryEntry {
        let controller = Rc::new(Controller::<Meta<M>, Meta<M>>::new(
            Meta::Ok,
            Rc::new(|message: &Meta<M>, _current: &Meta<M>| message.clone()),
        ));
        RegistryEntry::new(controller)
    }

    fn after_register(&self, store: &Store) {
        let controller = store.entry_for(self).typed::<Meta<M>, Meta<M>>();
        self.base.attach(store, controller);
    }
}

impl<M> State for MetaToken<M>
where
    M: Clone + PartialEq + 'static,
{
    type Value = Meta<M>;

    fn describe(&self) -> String {
        format!("meta({})", self.base.describe_base())
    }
}

impl<M> WritableState for MetaToken<M>
where
    M: Clone + PartialEq + 'static,
{
    fn publish_value(&self, store: &Store, value: Meta<M>) {
        store.entry_for(self).typed::<Meta<M>, Meta<M>>().publish(store, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_containers_replace_their_value() {
        let store = Store::new();
        let counter = Container::new(0);
        assert_eq!(store.get(&counter), 0);
        counter.controller(&store).accept(&store, 41);
        assert_eq!(store.get(&counter), 41);
    }

    #[test]
    fn tokens_sharing_an_id_share_a_value() {
        let store = Store::new();
        let first: Container<i32> = Container::builder(1).id("shared").build();
        let second: Container<i32> = Container::builder(99).id("shared").build();

        assert_eq!(store.get(&first), 1);
        // Registered first, so its initial value wins.
        assert_eq!(store.get(&second), 1);

        first.controller(&store).accept(&store, 5);
        assert_eq!(store.get(&second), 5);
    }

    #[test]
    fn distinct_stores_hold_distinct_values() {
        let token = Container::new("a".to_string());
        let one = Store::new();
        let two = Store::new();
        token.controller(&one).accept(&one, "b".to_string());
        assert_eq!(one.get(&token), "b");
        assert_eq!(two.get(&token), "a");
    }

    #[test]
    fn meta_starts_ok_and_settles_after_publication() {
        let store = Store::new();
        let token = Container::new(0);
        assert_eq!(store.get(&token.meta()), Meta::Ok);

        store.entry_for(&token.meta());
        token
            .meta()
            .publish_value(&store, Meta::Pending(10));
        assert_eq!(store.get(&token.meta()), Meta::Pending(10));

        token.controller(&store).accept(&store, 10);
        assert_eq!(store.get(&token.meta()), Meta::Ok);
    }

    #[test]
    fn describe_prefers_name_over_id() {
        let token: Container<i32> = Container::builder(0).id("x").name("count").build();
        assert_eq!(token.describe(), "count");
        let token: Container<i32> = Container::builder(0).id("x").build();
        assert_eq!(token.describe(), "container[x]");
    }
}
