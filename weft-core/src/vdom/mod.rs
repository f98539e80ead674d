//! Virtual View Layer
//!
//! View descriptions ([`VirtualNode`]) are mounted into a document with
//! [`render_to_dom`] and kept current by reactive bindings; whole-view
//! reconciliation happens through [`RenderResult::update`].

mod list;
mod node;
mod patch;
mod render;

pub use list::{list_view, list_view_with_index};
pub use node::{
    reactive_text, stateful_node, stateful_node_keyed, virtual_element, virtual_text,
    ElementConfig, VirtualNode,
};
pub use render::{render_to_dom, RenderResult};
