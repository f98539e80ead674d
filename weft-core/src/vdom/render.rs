//! Mounting
//!
//! Turns view descriptions into document nodes and wires up the reactive
//! bindings that keep them current.
//!
//! # How Mounting Works
//!
//! 1. Every insertion goes through [`create_before`], which places the new
//!    node under a parent, before an optional reference sibling. Lists and
//!    stateful subtrees need that reference to land in the right spot when
//!    they regenerate.
//! 2. Reactive parts (reactive text, stateful attributes and properties,
//!    stateful subtrees, lists) each get a binding: a tracked computation
//!    that reruns its generator and applies the result to the document.
//! 3. Event handlers are bridged to the store: the handler produces a
//!    [`StoreMessage`](crate::store::StoreMessage) and the bridge
//!    dispatches it.
//!
//! Removal is symmetric: [`remove_node`] disposes every binding in the
//! subtree before detaching it, so no orphaned computation keeps firing
//! against freed document nodes.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::debug;

use crate::dom::{Dom, Event, NodeHandle};
use crate::store::{StateListener, Store, TrackerCore};
use crate::vdom::node::{
    AttributeGenerator, ElementNode, ListNode, PropertyGenerator, ReactiveTextNode, StatefulNode,
    TextGenerator, TextNode, ViewGenerator, VirtualNode,
};
use crate::vdom::patch::patch;

/// Mount `vnode` under `parent`, before `reference` when given. Returns
/// the mounted description, with document handles and bindings filled in.
pub(crate) fn create_before(
    store: &Store,
    dom: &Dom,
    parent: NodeHandle,
    vnode: VirtualNode,
    reference: Option<NodeHandle>,
) -> VirtualNode {
    match vnode {
        VirtualNode::Text(text) => {
            let node = dom.create_text_node(text.value.clone());
            dom.insert_before(parent, node, reference);
            VirtualNode::Text(TextNode {
                value: text.value,
                node: Some(node),
            })
        }
        VirtualNode::ReactiveText(text) => {
            let node = dom.create_text_node("");
            dom.insert_before(parent, node, reference);
            let binding = ReactiveTextBinding::mount(store, dom, node, text.generator.clone());
            VirtualNode::ReactiveText(ReactiveTextNode {
                generator: text.generator,
                node: Some(node),
                binding: Some(binding),
            })
        }
        VirtualNode::Element(element) => {
            let node = dom.create_element(element.tag.clone());
            for (name, value) in &element.config.attributes {
                dom.set_attribute(node, name, value);
            }
            for (name, value) in &element.config.properties {
                dom.set_property(node, name, value);
            }
            for (name, stateful) in &element.config.stateful_attributes {
                let binding =
                    AttributeBinding::mount(store, dom, node, name, stateful.generator.clone());
                *stateful.binding.borrow_mut() = Some(binding);
            }
            for (name, stateful) in &element.config.stateful_properties {
                let binding =
                    PropertyBinding::mount(store, dom, node, name, stateful.generator.clone());
                *stateful.binding.borrow_mut() = Some(binding);
            }
            for (name, handler) in &element.config.events {
                add_event_bridge(store, dom, node, name, handler.clone());
            }
            let children = element
                .children
                .into_iter()
                .map(|child| create_before(store, dom, node, child, None))
                .collect();
            dom.insert_before(parent, node, reference);
            VirtualNode::Element(ElementNode {
                tag: element.tag,
                config: element.config,
                children,
                node: Some(node),
            })
        }
        VirtualNode::Stateful(stateful) => {
            let binding = StatefulNodeBinding::mount(
                store,
                dom,
                parent,
                reference,
                stateful.generator.clone(),
            );
            VirtualNode::Stateful(StatefulNode {
                generator: stateful.generator,
                key: stateful.key,
                binding: Some(binding),
            })
        }
        VirtualNode::List(list) => {
            let anchor = dom.create_comment();
            dom.insert_before(parent, anchor, reference);
            let binding = list.driver.mount(store, dom, anchor);
            VirtualNode::List(ListNode {
                driver: list.driver,
                anchor: Some(anchor),
                binding: Some(binding),
            })
        }
    }
}

pub(crate) fn add_event_bridge(
    store: &Store,
    dom: &Dom,
    node: NodeHandle,
    event: &str,
    handler: Rc<dyn Fn(&Event) -> crate::store::StoreMessage>,
) {
    let store = store.clone();
    dom.add_listener(
        node,
        event,
        Rc::new(move |event: &Event| {
            store.dispatch(handler(event));
        }),
    );
}

/// Dispose every binding in `node` without touching the document. Used
/// when an ancestor's removal is about to free the whole subtree.
pub(crate) fn dispose_bindings(store: &Store, node: &VirtualNode) {
    match node {
        VirtualNode::Text(_) => {}
        VirtualNode::ReactiveText(text) => {
            if let Some(binding) = &text.binding {
                binding.dispose();
            }
        }
        VirtualNode::Element(element) => {
            for stateful in element.config.stateful_attributes.values() {
                if let Some(binding) = stateful.binding.borrow_mut().take() {
                    binding.dispose();
                }
            }
            for stateful in element.config.stateful_properties.values() {
                if let Some(binding) = stateful.binding.borrow_mut().take() {
                    binding.dispose();
                }
            }
            for child in &element.children {
                dispose_bindings(store, child);
            }
        }
        VirtualNode::Stateful(stateful) => {
            if let Some(binding) = &stateful.binding {
                binding.dispose(store);
            }
        }
        VirtualNode::List(list) => {
            if let Some(binding) = &list.binding {
                binding.dispose(store);
            }
        }
    }
}

/// Dispose `node`'s bindings and detach it from the document.
pub(crate) fn remove_node(store: &Store, dom: &Dom, parent: NodeHandle, node: VirtualNode) {
    match node {
        VirtualNode::List(list) => {
            if let Some(binding) = &list.binding {
                binding.remove_from(store, dom, parent);
            }
        }
        VirtualNode::Stateful(stateful) => {
            if let Some(binding) = &stateful.binding {
                binding.remove_from(store, dom, parent);
            }
        }
        other => {
            let handle = other.first_handle();
            dispose_bindings(store, &other);
            if let Some(handle) = handle {
                dom.remove_child(parent, handle);
            }
        }
    }
}

pub(crate) struct ReactiveTextBinding {
    core: TrackerCore,
    dom: Dom,
    node: NodeHandle,
    generator: TextGenerator,
}

impl ReactiveTextBinding {
    fn mount(store: &Store, dom: &Dom, node: NodeHandle, generator: TextGenerator) -> Rc<Self> {
        let binding = Rc::new(ReactiveTextBinding {
            core: TrackerCore::new(),
            dom: dom.clone(),
            node,
            generator,
        });
        binding.clone().update(store);
        binding
    }

    pub(crate) fn dispose(&self) {
        self.core.dispose();
    }
}

impl StateListener for ReactiveTextBinding {
    fn update(self: Rc<Self>, store: &Store) {
        if self.core.is_disposed() {
            return;
        }
        let listener: Rc<dyn StateListener> = self.clone();
        let value = self.core.run(store, &listener, |get| (self.generator)(get));
        self.dom.set_text(self.node, &value);
    }
}

pub(crate) struct AttributeBinding {
    core: TrackerCore,
    dom: Dom,
    element: NodeHandle,
    name: String,
    generator: AttributeGenerator,
}

impl AttributeBinding {
    pub(crate) fn mount(
        store: &Store,
        dom: &Dom,
        element: NodeHandle,
        name: &str,
        generator: AttributeGenerator,
    ) -> Rc<Self> {
        let binding = Rc::new(AttributeBinding {
            core: TrackerCore::new(),
            dom: dom.clone(),
            element,
            name: name.to_string(),
            generator,
        });
        binding.clone().update(store);
        binding
    }

    pub(crate) fn dispose(&self) {
        self.core.dispose();
    }
}

impl StateListener for AttributeBinding {
    fn update(self: Rc<Self>, store: &Store) {
        if self.core.is_disposed() {
            return;
        }
        let listener: Rc<dyn StateListener> = self.clone();
        let value = self.core.run(store, &listener, |get| (self.generator)(get));
        match value {
            Some(value) => self.dom.set_attribute(self.element, &self.name, &value),
            None => self.dom.remove_attribute(self.element, &self.name),
        }
    }
}

pub(crate) struct PropertyBinding {
    core: TrackerCore,
    dom: Dom,
    element: NodeHandle,
    name: String,
    generator: PropertyGenerator,
}

impl PropertyBinding {
    pub(crate) fn mount(
        store: &Store,
        dom: &Dom,
        element: NodeHandle,
        name: &str,
        generator: PropertyGenerator,
    ) -> Rc<Self> {
        let binding = Rc::new(PropertyBinding {
            core: TrackerCore::new(),
            dom: dom.clone(),
            element,
            name: name.to_string(),
            generator,
        });
        binding.clone().update(store);
        binding
    }

    pub(crate) fn dispose(&self) {
        self.core.dispose();
    }
}

impl StateListener for PropertyBinding {
    fn update(self: Rc<Self>, store: &Store) {
        if self.core.is_disposed() {
            return;
        }
        let listener: Rc<dyn StateListener> = self.clone();
        let value = self.core.run(store, &listener, |get| (self.generator)(get));
        self.dom.set_property(self.element, &self.name, &value);
    }
}

/// Binding behind a stateful subtree. The first run mounts the generated
/// view; later runs patch the previous view in place.
pub(crate) struct StatefulNodeBinding {
    core: TrackerCore,
    dom: Dom,
    generator: ViewGenerator,
    current: RefCell<Option<VirtualNode>>,
    parent: Cell<NodeHandle>,
    reference: Cell<Option<NodeHandle>>,
}

impl StatefulNodeBinding {
    fn mount(
        store: &Store,
        dom: &Dom,
        parent: NodeHandle,
        reference: Option<NodeHandle>,
        generator: ViewGenerator,
    ) -> Rc<Self> {
        let binding = Rc::new(StatefulNodeBinding {
            core: TrackerCore::new(),
            dom: dom.clone(),
            generator,
            current: RefCell::new(None),
            parent: Cell::new(parent),
            reference: Cell::new(reference),
        });
        binding.clone().update(store);
        binding
    }

    pub(crate) fn first_handle(&self) -> Option<NodeHandle> {
        self.current
            .borrow()
            .as_ref()
            .and_then(|node| node.first_handle())
    }

    pub(crate) fn dispose(&self, store: &Store) {
        self.core.dispose();
        if let Some(content) = self.current.borrow_mut().take() {
            dispose_bindings(store, &content);
        }
    }

    pub(crate) fn remove_from(&self, store: &Store, dom: &Dom, parent: NodeHandle) {
        self.core.dispose();
        if let Some(content) = self.current.borrow_mut().take() {
            remove_node(store, dom, parent, content);
        }
    }
}

impl StateListener for StatefulNodeBinding {
    fn update(self: Rc<Self>, store: &Store) {
        if self.core.is_disposed() {
            return;
        }
        let listener: Rc<dyn StateListener> = self.clone();
        let view = self.core.run(store, &listener, |get| (self.generator)(get));
        let previous = self.current.borrow_mut().take();
        let next = match previous {
            Some(previous) => patch(store, &self.dom, previous, view),
            None => create_before(
                store,
                &self.dom,
                self.parent.get(),
                view,
                self.reference.get(),
            ),
        };
        *self.current.borrow_mut() = Some(next);
    }
}

/// A mounted view. The bindings keeping the view current live inside this
/// value: dropping it leaves the document contents in place but stops
/// reactive updates. Call [`RenderResult::unmount`] to tear the view down.
pub struct RenderResult {
    store: Store,
    dom: Dom,
    container: NodeHandle,
    rendered: Option<VirtualNode>,
}

/// Mount `view` as the last child of `container`.
pub fn render_to_dom(
    store: &Store,
    dom: &Dom,
    container: NodeHandle,
    view: VirtualNode,
) -> RenderResult {
    debug!(?container, kind = view.kind_name(), "mounting view");
    let rendered = create_before(store, dom, container, view, None);
    RenderResult {
        store: store.clone(),
        dom: dom.clone(),
        container,
        rendered: Some(rendered),
    }
}

impl RenderResult {
    /// First document node of the mounted view.
    pub fn root(&self) -> Option<NodeHandle> {
        self.rendered.as_ref().and_then(|node| node.first_handle())
    }

    /// Reconcile the mounted view against a new description.
    pub fn update(&mut self, view: VirtualNode) {
        let previous = self
            .rendered
            .take()
            .unwrap_or_else(|| panic!("view was already unmounted"));
        let next = patch(&self.store, &self.dom, previous, view);
        self.rendered = Some(next);
    }

    /// Dispose all bindings and remove the view from the document.
    pub fn unmount(mut self) {
        if let Some(rendered) = self.rendered.take() {
            remove_node(&self.store, &self.dom, self.container, rendered);
        }
    }
}
