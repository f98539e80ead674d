//! Virtual Nodes
//!
//! A [`VirtualNode`] describes one node of the view: plain text, text
//! driven by reactive state, an element with attributes and children, a
//! subtree regenerated from state, or a keyed list. Descriptions are inert
//! until mounted; mounting fills in document handles and reactive
//! bindings, and patching transfers them to the next description.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::dom::{Event, NodeHandle};
use crate::store::{GetState, StoreMessage};
use crate::vdom::list::{ListControl, ListDriver};
use crate::vdom::render::{AttributeBinding, PropertyBinding, ReactiveTextBinding, StatefulNodeBinding};

pub(crate) type TextGenerator = Rc<dyn Fn(&mut GetState<'_>) -> String>;
pub(crate) type AttributeGenerator = Rc<dyn Fn(&mut GetState<'_>) -> Option<String>>;
pub(crate) type PropertyGenerator = Rc<dyn Fn(&mut GetState<'_>) -> String>;
pub(crate) type ViewGenerator = Rc<dyn Fn(&mut GetState<'_>) -> VirtualNode>;
pub(crate) type EventHandler = Rc<dyn Fn(&Event) -> StoreMessage>;

/// One node of a view description.
pub enum VirtualNode {
    Text(TextNode),
    ReactiveText(ReactiveTextNode),
    Element(ElementNode),
    Stateful(StatefulNode),
    List(ListNode),
}

pub struct TextNode {
    pub(crate) value: String,
    pub(crate) node: Option<NodeHandle>,
}

pub struct ReactiveTextNode {
    pub(crate) generator: TextGenerator,
    pub(crate) node: Option<NodeHandle>,
    pub(crate) binding: Option<Rc<ReactiveTextBinding>>,
}

pub struct ElementNode {
    pub(crate) tag: String,
    pub(crate) config: ElementConfig,
    pub(crate) children: Vec<VirtualNode>,
    pub(crate) node: Option<NodeHandle>,
}

pub struct StatefulNode {
    pub(crate) generator: ViewGenerator,
    pub(crate) key: Option<String>,
    pub(crate) binding: Option<Rc<StatefulNodeBinding>>,
}

pub struct ListNode {
    pub(crate) driver: Rc<dyn ListDriver>,
    pub(crate) anchor: Option<NodeHandle>,
    pub(crate) binding: Option<Rc<dyn ListControl>>,
}

/// Static text.
pub fn virtual_text(value: impl Into<String>) -> VirtualNode {
    VirtualNode::Text(TextNode {
        value: value.into(),
        node: None,
    })
}

/// Text recomputed whenever a tracked dependency changes.
pub fn reactive_text(generator: impl Fn(&mut GetState<'_>) -> String + 'static) -> VirtualNode {
    VirtualNode::ReactiveText(ReactiveTextNode {
        generator: Rc::new(generator),
        node: None,
        binding: None,
    })
}

/// An element with the given configuration and children.
pub fn virtual_element(
    tag: impl Into<String>,
    config: ElementConfig,
    children: Vec<VirtualNode>,
) -> VirtualNode {
    VirtualNode::Element(ElementNode {
        tag: tag.into(),
        config,
        children,
        node: None,
    })
}

/// A subtree regenerated from state. The generator reruns when a tracked
/// dependency changes and the fresh description is patched in place.
pub fn stateful_node(generator: impl Fn(&mut GetState<'_>) -> VirtualNode + 'static) -> VirtualNode {
    VirtualNode::Stateful(StatefulNode {
        generator: Rc::new(generator),
        key: None,
        binding: None,
    })
}

/// A [`stateful_node`] carrying a reconciliation key.
pub fn stateful_node_keyed(
    key: impl Into<String>,
    generator: impl Fn(&mut GetState<'_>) -> VirtualNode + 'static,
) -> VirtualNode {
    VirtualNode::Stateful(StatefulNode {
        generator: Rc::new(generator),
        key: Some(key.into()),
        binding: None,
    })
}

pub(crate) struct StatefulAttribute {
    pub(crate) generator: AttributeGenerator,
    pub(crate) binding: RefCell<Option<Rc<AttributeBinding>>>,
}

pub(crate) struct StatefulProperty {
    pub(crate) generator: PropertyGenerator,
    pub(crate) binding: RefCell<Option<Rc<PropertyBinding>>>,
}

/// Attributes, properties, and event handlers of one element.
#[derive(Default)]
pub struct ElementConfig {
    pub(crate) key: Option<String>,
    pub(crate) attributes: IndexMap<String, String>,
    pub(crate) properties: IndexMap<String, String>,
    pub(crate) stateful_attributes: IndexMap<String, StatefulAttribute>,
    pub(crate) stateful_properties: IndexMap<String, StatefulProperty>,
    pub(crate) events: IndexMap<String, EventHandler>,
}

impl ElementConfig {
    pub fn new() -> Self {
        ElementConfig::default()
    }

    /// Reconciliation key used when siblings are reordered.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// An attribute recomputed from state. Returning `None` removes it.
    pub fn stateful_attribute(
        mut self,
        name: impl Into<String>,
        generator: impl Fn(&mut GetState<'_>) -> Option<String> + 'static,
    ) -> Self {
        self.stateful_attributes.insert(
            name.into(),
            StatefulAttribute {
                generator: Rc::new(generator),
                binding: RefCell::new(None),
            },
        );
        self
    }

    /// A property recomputed from state.
    pub fn stateful_property(
        mut self,
        name: impl Into<String>,
        generator: impl Fn(&mut GetState<'_>) -> String + 'static,
    ) -> Self {
        self.stateful_properties.insert(
            name.into(),
            StatefulProperty {
                generator: Rc::new(generator),
                binding: RefCell::new(None),
            },
        );
        self
    }

    /// Dispatch the handler's message when `event` fires on this element.
    pub fn on(
        mut self,
        event: impl Into<String>,
        handler: impl Fn(&Event) -> StoreMessage + 'static,
    ) -> Self {
        self.events.insert(event.into(), Rc::new(handler));
        self
    }
}

impl VirtualNode {
    /// The reconciliation key, for nodes that can carry one.
    pub(crate) fn node_key(&self) -> Option<&str> {
        match self {
            VirtualNode::Element(element) => element.config.key.as_deref(),
            VirtualNode::Stateful(stateful) => stateful.key.as_deref(),
            _ => None,
        }
    }

    /// The first document node of this mounted description, used as an
    /// insertion reference. A list's first node is its first item, or its
    /// anchor when empty.
    pub(crate) fn first_handle(&self) -> Option<NodeHandle> {
        match self {
            VirtualNode::Text(text) => text.node,
            VirtualNode::ReactiveText(text) => text.node,
            VirtualNode::Element(element) => element.node,
            VirtualNode::Stateful(stateful) => stateful
                .binding
                .as_ref()
                .and_then(|binding| binding.first_handle()),
            VirtualNode::List(list) => list
                .binding
                .as_ref()
                .and_then(|binding| binding.first_node())
                .or(list.anchor),
        }
    }

    pub(crate) fn kind_name(&self) -> &'static str {
        match self {
            VirtualNode::Text(_) => "text",
            VirtualNode::ReactiveText(_) => "reactive-text",
            VirtualNode::Element(_) => "element",
            VirtualNode::Stateful(_) => "stateful",
            VirtualNode::List(_) => "list",
        }
    }
}
