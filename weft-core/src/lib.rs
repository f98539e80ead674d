//! # Weft Core
//!
//! Core runtime for Weft, a reactive UI toolkit. Two layers cooperate:
//!
//! - **store**: fine-grained reactive state. Cloneable tokens name state;
//!   a [`Store`](store::Store) materializes values lazily, tracks which
//!   computation read which token, and propagates each change to exactly
//!   the computations that depend on it.
//! - **vdom**: view descriptions mounted into an in-memory document
//!   ([`dom::Dom`]). Reactive parts of a view bind directly to the tokens
//!   they read, so a state change touches the affected text node,
//!   attribute, subtree, or list item and nothing else.
//!
//! ```rust,ignore
//! use weft_core::dom::Dom;
//! use weft_core::store::{write, Container, Store};
//! use weft_core::vdom::{reactive_text, render_to_dom, virtual_element, ElementConfig};
//!
//! let clicks = Container::new(0);
//! let store = Store::new();
//! let dom = Dom::new();
//! let body = dom.create_element("body");
//!
//! let counter = clicks.clone();
//! let view = virtual_element(
//!     "button",
//!     ElementConfig::new().on("click", {
//!         let clicks = clicks.clone();
//!         move |_event| write(&clicks, 1)
//!     }),
//!     vec![reactive_text(move |get| format!("Clicks: {}", get.get(&counter)))],
//! );
//!
//! render_to_dom(&store, &dom, body, view);
//! dom.fire_event(dom.children(body)[0], "click", "");
//! assert_eq!(dom.to_html(body), "<body><button>Clicks: 1</button></body>");
//! ```

pub mod dom;
pub mod store;
pub mod vdom;
