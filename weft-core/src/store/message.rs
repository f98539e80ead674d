//! Store Messages
//!
//! All mutation flows through `Store::dispatch(message)`. A message is one
//! of five kinds:
//!
//! 1. `write`: deliver a message to a container, through its writer when
//!    one is installed, otherwise through its reducer.
//! 2. `reset`: restore a container's declared initial value.
//! 3. `use`: evaluate a [`Rule`] against current state and dispatch the
//!    message it produces.
//! 4. `run`: execute an arbitrary side effect.
//! 5. `batch`: dispatch a sequence of messages in order.
//!
//! Dispatch is synchronous and reentrant: a subscriber notified mid-flight
//! may itself dispatch.

use std::fmt;
use std::rc::Rc;

use crate::store::query::GetState;
use crate::store::registry::Store;
use crate::store::token::Container;

pub(crate) enum MessageKind {
    Write(Box<dyn FnOnce(&Store)>),
    Reset(Box<dyn FnOnce(&Store)>),
    Use(Box<dyn FnOnce(&Store) -> StoreMessage>),
    Run(Box<dyn FnOnce()>),
    Batch(Vec<StoreMessage>),
}

/// An instruction for a store. Build one with [`write`], [`reset`],
/// [`use_rule`], [`run`], or [`batch`].
pub struct StoreMessage {
    pub(crate) kind: MessageKind,
}

impl StoreMessage {
    pub(crate) fn kind_name(&self) -> &'static str {
        match self.kind {
            MessageKind::Write(_) => "write",
            MessageKind::Reset(_) => "reset",
            MessageKind::Use(_) => "use",
            MessageKind::Run(_) => "run",
            MessageKind::Batch(_) => "batch",
        }
    }
}

impl fmt::Debug for StoreMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreMessage")
            .field("kind", &self.kind_name())
            .finish()
    }
}

/// Deliver `message` to `container`.
pub fn write<T, M>(container: &Container<T, M>, message: M) -> StoreMessage
where
    T: Clone + PartialEq + 'static,
    M: Clone + PartialEq + 'static,
{
    let token = container.clone();
    StoreMessage {
        kind: MessageKind::Write(Box::new(move |store: &Store| {
            store.apply_write(&token, message);
        })),
    }
}

/// Restore `container` to its declared initial value. The initial value is
/// published as-is; the reducer is not consulted.
pub fn reset<T, M>(container: &Container<T, M>) -> StoreMessage
where
    T: Clone + PartialEq + 'static,
    M: Clone + PartialEq + 'static,
{
    let token = container.clone();
    StoreMessage {
        kind: MessageKind::Reset(Box::new(move |store: &Store| {
            store.apply_reset(&token);
        })),
    }
}

/// Evaluate `rule` against current state and dispatch its result.
pub fn use_rule<I: 'static>(rule: &Rule<I>, input: I) -> StoreMessage {
    let definition = rule.definition.clone();
    StoreMessage {
        kind: MessageKind::Use(Box::new(move |store: &Store| {
            let mut get = GetState::untracked(store);
            definition(&mut get, input)
        })),
    }
}

/// Execute an arbitrary side effect during dispatch.
pub fn run(effect: impl FnOnce() + 'static) -> StoreMessage {
    StoreMessage {
        kind: MessageKind::Run(Box::new(effect)),
    }
}

/// Dispatch `messages` in order.
pub fn batch(messages: Vec<StoreMessage>) -> StoreMessage {
    StoreMessage {
        kind: MessageKind::Batch(messages),
    }
}

/// A reusable recipe that turns an input plus current state into a store
/// message. Reads inside the definition are untracked; rules fire only
/// when dispatched.
pub struct Rule<I> {
    definition: Rc<dyn Fn(&mut GetState<'_>, I) -> StoreMessage>,
}

impl<I> Clone for Rule<I> {
    fn clone(&self) -> Self {
        Rule {
            definition: self.definition.clone(),
        }
    }
}

impl<I> Rule<I> {
    pub fn new(definition: impl Fn(&mut GetState<'_>, I) -> StoreMessage + 'static) -> Self {
        Rule {
            definition: Rc::new(definition),
        }
    }
}
