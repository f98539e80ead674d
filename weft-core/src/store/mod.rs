//! Reactive State Store
//!
//! Fine-grained reactive state with explicit dependency tracking. State is
//! named by cloneable tokens ([`Container`], [`DerivedValue`],
//! [`MetaToken`]); a [`Store`] lazily materializes a value per token and
//! propagates changes to exactly the computations that read it.
//!
//! All mutation is a [`StoreMessage`] handed to [`Store::dispatch`].

mod controller;
mod error;
mod message;
mod meta;
mod query;
mod registry;
mod token;

pub use error::StoreError;
pub use message::{batch, reset, run, use_rule, write, Rule, StoreMessage};
pub use meta::Meta;
pub use query::{
    CommandHandle, EffectHandle, GetState, Provider, ProviderActions, Writer, WriterActions,
};
pub use registry::{Store, Subscription};
pub use token::{
    derived, Container, ContainerBuilder, DerivedValue, MetaToken, State, TokenKey, WritableState,
};

pub(crate) use query::{StateListener, TrackerCore};
