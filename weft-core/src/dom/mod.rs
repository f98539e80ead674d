//! Document Model
//!
//! An in-memory document tree with the handful of operations the renderer
//! needs: node creation, attribute and property updates, child insertion
//! and removal, and event listeners. Nodes live in an arena and are
//! addressed by [`NodeHandle`].
//!
//! Every mutation is appended to an edit log ([`DomEdit`]), so tests can
//! assert not just on the final tree but on exactly which operations were
//! performed. Reads and no-op writes (setting an attribute to its current
//! value) leave no trace in the log.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use tracing::trace;

/// Addresses one node in a [`Dom`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeHandle(usize);

/// A dispatched document event.
#[derive(Debug, Clone)]
pub struct Event {
    pub name: String,
    pub target: NodeHandle,
    /// Payload carried by the event, such as an input's text.
    pub value: String,
}

/// One recorded mutation of the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomEdit {
    CreateElement { node: NodeHandle, tag: String },
    CreateText { node: NodeHandle },
    CreateComment { node: NodeHandle },
    SetAttribute { node: NodeHandle, name: String, value: String },
    RemoveAttribute { node: NodeHandle, name: String },
    SetProperty { node: NodeHandle, name: String, value: String },
    SetText { node: NodeHandle, value: String },
    AddListener { node: NodeHandle, event: String },
    RemoveListener { node: NodeHandle, event: String },
    InsertBefore { parent: NodeHandle, node: NodeHandle },
    RemoveChild { parent: NodeHandle, node: NodeHandle },
}

type Listener = Rc<dyn Fn(&Event)>;

enum NodeKind {
    Element {
        tag: String,
        attributes: IndexMap<String, String>,
        properties: IndexMap<String, String>,
        listeners: Vec<(String, Listener)>,
        children: Vec<NodeHandle>,
    },
    Text {
        value: String,
    },
    Comment,
}

struct DomNode {
    parent: Option<NodeHandle>,
    kind: NodeKind,
}

struct DomInner {
    nodes: Vec<Option<DomNode>>,
    edits: Vec<DomEdit>,
}

/// The document arena. Cheap to clone; clones share the same tree.
pub struct Dom {
    inner: Rc<RefCell<DomInner>>,
}

impl Clone for Dom {
    fn clone(&self) -> Self {
        Dom {
            inner: self.inner.clone(),
        }
    }
}

impl Default for Dom {
    fn default() -> Self {
        Dom::new()
    }
}

impl Dom {
    pub fn new() -> Self {
        Dom {
            inner: Rc::new(RefCell::new(DomInner {
                nodes: Vec::new(),
                edits: Vec::new(),
            })),
        }
    }

    fn allocate(&self, node: DomNode) -> NodeHandle {
        let mut inner = self.inner.borrow_mut();
        let handle = NodeHandle(inner.nodes.len());
        inner.nodes.push(Some(node));
        handle
    }

    pub fn create_element(&self, tag: impl Into<String>) -> NodeHandle {
        let tag = tag.into();
        let handle = self.allocate(DomNode {
            parent: None,
            kind: NodeKind::Element {
                tag: tag.clone(),
                attributes: IndexMap::new(),
                properties: IndexMap::new(),
                listeners: Vec::new(),
                children: Vec::new(),
            },
        });
        self.inner
            .borrow_mut()
            .edits
            .push(DomEdit::CreateElement { node: handle, tag });
        handle
    }

    pub fn create_text_node(&self, value: impl Into<String>) -> NodeHandle {
        let handle = self.allocate(DomNode {
            parent: None,
            kind: NodeKind::Text {
                value: value.into(),
            },
        });
        self.inner
            .borrow_mut()
            .edits
            .push(DomEdit::CreateText { node: handle });
        handle
    }

    pub fn create_comment(&self) -> NodeHandle {
        let handle = self.allocate(DomNode {
            parent: None,
            kind: NodeKind::Comment,
        });
        self.inner
            .borrow_mut()
            .edits
            .push(DomEdit::CreateComment { node: handle });
        handle
    }

    pub fn exists(&self, node: NodeHandle) -> bool {
        self.inner
            .borrow()
            .nodes
            .get(node.0)
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    pub fn set_attribute(&self, node: NodeHandle, name: &str, value: &str) {
        let mut inner = self.inner.borrow_mut();
        if let NodeKind::Element { attributes, .. } = &mut inner.node_mut(node).kind {
            if attributes.get(name).map(String::as_str) == Some(value) {
                return;
            }
            attributes.insert(name.to_string(), value.to_string());
        } else {
            return;
        }
        inner.edits.push(DomEdit::SetAttribute {
            node,
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    pub fn remove_attribute(&self, node: NodeHandle, name: &str) {
        let mut inner = self.inner.borrow_mut();
        if let NodeKind::Element { attributes, .. } = &mut inner.node_mut(node).kind {
            if attributes.shift_remove(name).is_none() {
                return;
            }
        } else {
            return;
        }
        inner.edits.push(DomEdit::RemoveAttribute {
            node,
            name: name.to_string(),
        });
    }

    pub fn attribute(&self, node: NodeHandle, name: &str) -> Option<String> {
        match &self.inner.borrow().node(node).kind {
            NodeKind::Element { attributes, .. } => attributes.get(name).cloned(),
            _ => None,
        }
    }

    pub fn set_property(&self, node: NodeHandle, name: &str, value: &str) {
        let mut inner = self.inner.borrow_mut();
        if let NodeKind::Element { properties, .. } = &mut inner.node_mut(node).kind {
            if properties.get(name).map(String::as_str) == Some(value) {
                return;
            }
            properties.insert(name.to_string(), value.to_string());
        } else {
            return;
        }
        inner.edits.push(DomEdit::SetProperty {
            node,
            name: name.to_string(),
            value: value.to_string(),
        });
    }

    pub fn property(&self, node: NodeHandle, name: &str) -> Option<String> {
        match &self.inner.borrow().node(node).kind {
            NodeKind::Element { properties, .. } => properties.get(name).cloned(),
            _ => None,
        }
    }

    pub fn set_text(&self, node: NodeHandle, value: &str) {
        let mut inner = self.inner.borrow_mut();
        if let NodeKind::Text { value: current } = &mut inner.node_mut(node).kind {
            if current == value {
                return;
            }
            *current = value.to_string();
        } else {
            return;
        }
        inner.edits.push(DomEdit::SetText {
            node,
            value: value.to_string(),
        });
    }

    pub fn text(&self, node: NodeHandle) -> Option<String> {
        match &self.inner.borrow().node(node).kind {
            NodeKind::Text { value } => Some(value.clone()),
            _ => None,
        }
    }

    pub fn tag(&self, node: NodeHandle) -> Option<String> {
        match &self.inner.borrow().node(node).kind {
            NodeKind::Element { tag, .. } => Some(tag.clone()),
            _ => None,
        }
    }

    pub fn add_listener(&self, node: NodeHandle, event: &str, listener: Listener) {
        let mut inner = self.inner.borrow_mut();
        if let NodeKind::Element { listeners, .. } = &mut inner.node_mut(node).kind {
            listeners.push((event.to_string(), listener));
        } else {
            return;
        }
        inner.edits.push(DomEdit::AddListener {
            node,
            event: event.to_string(),
        });
    }

    /// Remove every listener registered under `event` on `node`.
    pub fn remove_listener(&self, node: NodeHandle, event: &str) {
        let mut inner = self.inner.borrow_mut();
        if let NodeKind::Element { listeners, .. } = &mut inner.node_mut(node).kind {
            let before = listeners.len();
            listeners.retain(|(name, _)| name != event);
            if listeners.len() == before {
                return;
            }
        } else {
            return;
        }
        inner.edits.push(DomEdit::RemoveListener {
            node,
            event: event.to_string(),
        });
    }

    pub fn has_listener(&self, node: NodeHandle, event: &str) -> bool {
        match &self.inner.borrow().node(node).kind {
            NodeKind::Element { listeners, .. } => {
                listeners.iter().any(|(name, _)| name == event)
            }
            _ => false,
        }
    }

    /// Insert `node` under `parent`, before `reference` when given and
    /// still present, otherwise at the end. A node with a current parent
    /// is moved, not duplicated.
    pub fn insert_before(
        &self,
        parent: NodeHandle,
        node: NodeHandle,
        reference: Option<NodeHandle>,
    ) {
        let mut inner = self.inner.borrow_mut();
        let old_parent = inner.node(node).parent;
        if let Some(old_parent) = old_parent {
            inner.detach(old_parent, node);
        }
        inner.node_mut(node).parent = Some(parent);
        if let NodeKind::Element { children, .. } = &mut inner.node_mut(parent).kind {
            let position = reference
                .and_then(|reference| children.iter().position(|child| *child == reference))
                .unwrap_or(children.len());
            children.insert(position, node);
        } else {
            panic!("insert_before target is not an element");
        }
        inner.edits.push(DomEdit::InsertBefore { parent, node });
        trace!(?parent, ?node, "inserted node");
    }

    /// Detach `node` from `parent` and free its whole subtree.
    pub fn remove_child(&self, parent: NodeHandle, node: NodeHandle) {
        let mut inner = self.inner.borrow_mut();
        inner.detach(parent, node);
        inner.free_subtree(node);
        inner.edits.push(DomEdit::RemoveChild { parent, node });
        trace!(?parent, ?node, "removed node");
    }

    pub fn parent_node(&self, node: NodeHandle) -> Option<NodeHandle> {
        self.inner.borrow().node(node).parent
    }

    pub fn children(&self, node: NodeHandle) -> Vec<NodeHandle> {
        match &self.inner.borrow().node(node).kind {
            NodeKind::Element { children, .. } => children.clone(),
            _ => Vec::new(),
        }
    }

    /// Invoke the listeners registered for `event` on `target`. Listeners
    /// run after internal borrows are released, so they may freely mutate
    /// the document.
    pub fn fire_event(&self, target: NodeHandle, event: &str, value: &str) {
        let matching: Vec<Listener> = match &self.inner.borrow().node(target).kind {
            NodeKind::Element { listeners, .. } => listeners
                .iter()
                .filter(|(name, _)| name == event)
                .map(|(_, listener)| listener.clone())
                .collect(),
            _ => Vec::new(),
        };
        let event = Event {
            name: event.to_string(),
            target,
            value: value.to_string(),
        };
        for listener in matching {
            listener(&event);
        }
    }

    pub fn edits(&self) -> Vec<DomEdit> {
        self.inner.borrow().edits.clone()
    }

    pub fn edit_count(&self) -> usize {
        self.inner.borrow().edits.len()
    }

    pub fn clear_edits(&self) {
        self.inner.borrow_mut().edits.clear();
    }

    /// Serialize the subtree rooted at `node` as HTML. Properties and
    /// listeners are invisible here, as they would be in a browser.
    pub fn to_html(&self, node: NodeHandle) -> String {
        let inner = self.inner.borrow();
        let mut out = String::new();
        inner.write_html(node, &mut out);
        out
    }
}

impl DomInner {
    fn node(&self, handle: NodeHandle) -> &DomNode {
        self.nodes[handle.0]
            .as_ref()
            .unwrap_or_else(|| panic!("node {handle:?} has been freed"))
    }

    fn node_mut(&mut self, handle: NodeHandle) -> &mut DomNode {
        self.nodes[handle.0]
            .as_mut()
            .unwrap_or_else(|| panic!("node {handle:?} has been freed"))
    }

    fn detach(&mut self, parent: NodeHandle, node: NodeHandle) {
        if let NodeKind::Element { children, .. } = &mut self.node_mut(parent).kind {
            children.retain(|child| *child != node);
        }
        self.node_mut(node).parent = None;
    }

    fn free_subtree(&mut self, node: NodeHandle) {
        let children = match &self.node(node).kind {
            NodeKind::Element { children, .. } => children.clone(),
            _ => Vec::new(),
        };
        for child in children {
            self.free_subtree(child);
        }
        self.nodes[node.0] = None;
    }

    fn write_html(&self, handle: NodeHandle, out: &mut String) {
        match &self.node(handle).kind {
            NodeKind::Text { value } => out.push_str(value),
            NodeKind::Comment => out.push_str("<!---->"),
            NodeKind::Element {
                tag,
                attributes,
                children,
                ..
            } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in attributes {
                    out.push(' ');
                    out.push_str(name);
                    out.push_str("=\"");
                    out.push_str(value);
                    out.push('"');
                }
                out.push('>');
                for child in children {
                    self.write_html(*child, out);
                }
                out.push_str("</");
                out.push_str(tag);
                out.push('>');
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn builds_and_serializes_a_tree() {
        let dom = Dom::new();
        let root = dom.create_element("div");
        dom.set_attribute(root, "class", "wrapper");
        let heading = dom.create_element("h1");
        let label = dom.create_text_node("Hello");
        dom.insert_before(heading, label, None);
        dom.insert_before(root, heading, None);

        assert_eq!(dom.to_html(root), "<div class=\"wrapper\"><h1>Hello</h1></div>");
    }

    #[test]
    fn insert_before_positions_and_moves() {
        let dom = Dom::new();
        let root = dom.create_element("ul");
        let a = dom.create_element("li");
        let b = dom.create_element("li");
        let c = dom.create_element("li");
        dom.insert_before(root, a, None);
        dom.insert_before(root, c, None);
        dom.insert_before(root, b, Some(c));
        assert_eq!(dom.children(root), vec![a, b, c]);

        // Moving an attached node relocates it.
        dom.insert_before(root, c, Some(a));
        assert_eq!(dom.children(root), vec![c, a, b]);
        assert_eq!(dom.parent_node(c), Some(root));
    }

    #[test]
    fn removing_a_child_frees_the_subtree() {
        let dom = Dom::new();
        let root = dom.create_element("div");
        let section = dom.create_element("section");
        let text = dom.create_text_node("gone");
        dom.insert_before(section, text, None);
        dom.insert_before(root, section, None);

        dom.remove_child(root, section);
        assert!(!dom.exists(section));
        assert!(!dom.exists(text));
        assert_eq!(dom.to_html(root), "<div></div>");
    }

    #[test]
    fn no_op_writes_leave_no_edits() {
        let dom = Dom::new();
        let root = dom.create_element("div");
        dom.set_attribute(root, "class", "on");
        dom.clear_edits();

        dom.set_attribute(root, "class", "on");
        dom.remove_attribute(root, "missing");
        let text = dom.create_text_node("same");
        dom.clear_edits();
        dom.set_text(text, "same");

        assert_eq!(dom.edit_count(), 0);
    }

    #[test]
    fn listeners_fire_with_the_event_payload() {
        let dom = Dom::new();
        let button = dom.create_element("button");
        let clicks = Rc::new(Cell::new(0));
        let count = clicks.clone();
        dom.add_listener(
            button,
            "click",
            Rc::new(move |event: &Event| {
                assert_eq!(event.name, "click");
                count.set(count.get() + 1);
            }),
        );

        dom.fire_event(button, "click", "");
        dom.fire_event(button, "keydown", "");
        assert_eq!(clicks.get(), 1);

        dom.remove_listener(button, "click");
        dom.fire_event(button, "click", "");
        assert_eq!(clicks.get(), 1);
    }

    #[test]
    fn the_edit_log_records_mutations_in_order() {
        let dom = Dom::new();
        let root = dom.create_element("p");
        let text = dom.create_text_node("hi");
        dom.insert_before(root, text, None);
        dom.set_text(text, "bye");

        assert_eq!(
            dom.edits(),
            vec![
                DomEdit::CreateElement { node: root, tag: "p".to_string() },
                DomEdit::CreateText { node: text },
                DomEdit::InsertBefore { parent: root, node: text },
                DomEdit::SetText { node: text, value: "bye".to_string() },
            ]
        );
    }
}
