//! Patching
//!
//! Reconciles a mounted view against a new description, reusing document
//! nodes and bindings wherever the shape matches.
//!
//! # Patch Rules
//!
//! 1. A kind mismatch, or an element with a different tag, replaces the
//!    node: the new description mounts before the old node, then the old
//!    subtree is removed with its bindings disposed.
//! 2. Matching text updates in place when the content differs.
//! 3. Matching reactive text, stateful subtrees, and lists transfer their
//!    binding unchanged; the generator does not rerun just because the
//!    surrounding view was rebuilt.
//! 4. Matching elements diff attributes and properties key by key, mount
//!    and dispose stateful attributes as they appear and vanish, diff
//!    event listeners by event name, and reconcile children, except when
//!    the element carries an `innerHTML` property.
//!
//! # Child Reconciliation
//!
//! Children are matched from both ends first, which resolves the common
//! cases (append, prepend, truncate) without consulting keys at all. The
//! remaining middle section is resolved through a key map: keyed children
//! move with their document nodes and bindings intact, unkeyed children
//! patch positionally, and leftovers are removed. When the same key
//! appears twice, the first occurrence wins and later ones get fresh
//! nodes.

use std::collections::{HashMap, HashSet};

use tracing::{debug, trace};

use crate::dom::{Dom, NodeHandle};
use crate::store::Store;
use crate::vdom::node::{ElementNode, TextNode, VirtualNode};
use crate::vdom::render::{add_event_bridge, create_before, remove_node, AttributeBinding, PropertyBinding};

/// Reconcile mounted `old` against description `new`. Returns the mounted
/// result.
pub(crate) fn patch(store: &Store, dom: &Dom, old: VirtualNode, new: VirtualNode) -> VirtualNode {
    match (old, new) {
        (VirtualNode::Text(old_text), VirtualNode::Text(new_text)) => {
            let node = old_text.node;
            if let Some(handle) = node {
                if old_text.value != new_text.value {
                    dom.set_text(handle, &new_text.value);
                }
            }
            VirtualNode::Text(TextNode {
                value: new_text.value,
                node,
            })
        }
        // Rule 3: the live binding carries on; the new generator is
        // discarded along with the rest of the stale description.
        (old @ VirtualNode::ReactiveText(_), VirtualNode::ReactiveText(_)) => old,
        (old @ VirtualNode::Stateful(_), VirtualNode::Stateful(_)) => old,
        (old @ VirtualNode::List(_), VirtualNode::List(_)) => old,
        (VirtualNode::Element(old_element), VirtualNode::Element(new_element))
            if old_element.tag == new_element.tag =>
        {
            patch_element(store, dom, old_element, new_element)
        }
        (old, new) => replace(store, dom, old, new),
    }
}

fn replace(store: &Store, dom: &Dom, old: VirtualNode, new: VirtualNode) -> VirtualNode {
    debug!(from = old.kind_name(), to = new.kind_name(), "replacing node");
    let reference = old.first_handle();
    let parent = reference
        .and_then(|handle| dom.parent_node(handle))
        .unwrap_or_else(|| panic!("cannot replace a node that is not in the document"));
    let created = create_before(store, dom, parent, new, reference);
    remove_node(store, dom, parent, old);
    created
}

fn patch_element(store: &Store, dom: &Dom, old: ElementNode, new: ElementNode) -> VirtualNode {
    let node = old
        .node
        .unwrap_or_else(|| panic!("cannot patch an element that was never mounted"));
    let mut old_config = old.config;
    let ElementNode {
        tag,
        config: mut new_config,
        children: new_children,
        ..
    } = new;

    for (name, value) in &new_config.attributes {
        if old_config.attributes.get(name) != Some(value) {
            dom.set_attribute(node, name, value);
        }
    }
    for name in old_config.attributes.keys() {
        if !new_config.attributes.contains_key(name) {
            dom.remove_attribute(node, name);
        }
    }

    for (name, value) in &new_config.properties {
        if old_config.properties.get(name) != Some(value) {
            dom.set_property(node, name, value);
        }
    }
    for name in old_config.properties.keys() {
        if !new_config.properties.contains_key(name) {
            dom.set_property(node, name, "");
        }
    }

    // Stateful attributes keep their mounted binding (and with it the old
    // generator) when the name survives.
    for (name, stateful) in &new_config.stateful_attributes {
        match old_config.stateful_attributes.get(name) {
            Some(existing) => {
                *stateful.binding.borrow_mut() = existing.binding.borrow_mut().take();
            }
            None => {
                let binding =
                    AttributeBinding::mount(store, dom, node, name, stateful.generator.clone());
                *stateful.binding.borrow_mut() = Some(binding);
            }
        }
    }
    for (name, stateful) in &old_config.stateful_attributes {
        if !new_config.stateful_attributes.contains_key(name) {
            if let Some(binding) = stateful.binding.borrow_mut().take() {
                binding.dispose();
            }
            dom.remove_attribute(node, name);
        }
    }

    for (name, stateful) in &new_config.stateful_properties {
        match old_config.stateful_properties.get(name) {
            Some(existing) => {
                *stateful.binding.borrow_mut() = existing.binding.borrow_mut().take();
            }
            None => {
                let binding =
                    PropertyBinding::mount(store, dom, node, name, stateful.generator.clone());
                *stateful.binding.borrow_mut() = Some(binding);
            }
        }
    }
    for (name, stateful) in &old_config.stateful_properties {
        if !new_config.stateful_properties.contains_key(name) {
            if let Some(binding) = stateful.binding.borrow_mut().take() {
                binding.dispose();
            }
            dom.set_property(node, name, "");
        }
    }

    // Listeners diff by event name only; a retained event keeps the
    // handler it was mounted with.
    for (name, handler) in &new_config.events {
        if !old_config.events.contains_key(name) {
            add_event_bridge(store, dom, node, name, handler.clone());
        }
    }
    let mut retained = Vec::new();
    for (name, handler) in old_config.events.drain(..) {
        if new_config.events.contains_key(&name) {
            retained.push((name, handler));
        } else {
            dom.remove_listener(node, &name);
        }
    }
    for (name, handler) in retained {
        new_config.events.insert(name, handler);
    }

    // Raw HTML takes over the content: the incoming child descriptions
    // are discarded and the mounted children carry over, so a later patch
    // without the property resumes reconciling from them.
    let children = if new_config.properties.contains_key("innerHTML") {
        old.children
    } else {
        patch_children(store, dom, node, old.children, new_children)
    };

    VirtualNode::Element(ElementNode {
        tag,
        config: new_config,
        children,
        node: Some(node),
    })
}

fn child_key(slot: &Option<VirtualNode>) -> Option<String> {
    slot.as_ref()
        .and_then(|child| child.node_key())
        .map(str::to_string)
}

/// Insertion reference for children appended after the tail-matched
/// section: the first document node of the child just past the tail, or
/// none when the tail reaches the end.
fn trailing_reference(out: &[Option<VirtualNode>], new_tail: isize) -> Option<NodeHandle> {
    let next = (new_tail + 1) as usize;
    out.get(next)
        .and_then(|slot| slot.as_ref())
        .and_then(|child| child.first_handle())
}

fn patch_children(
    store: &Store,
    dom: &Dom,
    parent: NodeHandle,
    old_children: Vec<VirtualNode>,
    new_children: Vec<VirtualNode>,
) -> Vec<VirtualNode> {
    let mut old: Vec<Option<VirtualNode>> = old_children.into_iter().map(Some).collect();
    let old_keys: Vec<Option<String>> = old.iter().map(child_key).collect();
    let mut out: Vec<Option<VirtualNode>> = new_children.into_iter().map(Some).collect();

    let mut old_head: isize = 0;
    let mut old_tail: isize = old.len() as isize - 1;
    let mut new_head: isize = 0;
    let mut new_tail: isize = out.len() as isize - 1;

    // Matching keys from the head in, then the tail in. Two unkeyed
    // children count as a match.
    while new_head <= new_tail && old_head <= old_tail {
        if old_keys[old_head as usize] != child_key(&out[new_head as usize]) {
            break;
        }
        let old_child = old[old_head as usize].take().expect("head child present");
        let new_child = out[new_head as usize].take().expect("head child present");
        out[new_head as usize] = Some(patch(store, dom, old_child, new_child));
        old_head += 1;
        new_head += 1;
    }
    while new_head <= new_tail && old_head <= old_tail {
        if old_keys[old_tail as usize] != child_key(&out[new_tail as usize]) {
            break;
        }
        let old_child = old[old_tail as usize].take().expect("tail child present");
        let new_child = out[new_tail as usize].take().expect("tail child present");
        out[new_tail as usize] = Some(patch(store, dom, old_child, new_child));
        old_tail -= 1;
        new_tail -= 1;
    }

    if old_head > old_tail {
        // Only insertions remain.
        let reference = trailing_reference(&out, new_tail);
        for index in new_head..=new_tail {
            let child = out[index as usize].take().expect("new child present");
            out[index as usize] = Some(create_before(store, dom, parent, child, reference));
        }
    } else if new_head > new_tail {
        // Only removals remain.
        for index in old_head..=old_tail {
            if let Some(child) = old[index as usize].take() {
                remove_node(store, dom, parent, child);
            }
        }
    } else {
        trace!(
            old = (old_tail - old_head + 1),
            new = (new_tail - new_head + 1),
            "reconciling keyed middle section"
        );
        let mut keyed: HashMap<String, usize> = HashMap::new();
        for index in (old_head as usize)..=(old_tail as usize) {
            if let Some(key) = &old_keys[index] {
                keyed.entry(key.clone()).or_insert(index);
            }
        }
        let mut consumed: HashSet<String> = HashSet::new();

        while new_head <= new_tail {
            let old_in_range = old_head <= old_tail;
            let old_key = if old_in_range {
                old_keys[old_head as usize].clone()
            } else {
                None
            };
            let new_key = child_key(&out[new_head as usize]);
            let reference = if old_in_range {
                old[old_head as usize]
                    .as_ref()
                    .and_then(|child| child.first_handle())
            } else {
                trailing_reference(&out, new_tail)
            };

            // Old children already reused through the key map are spent.
            let already_used = old_key
                .as_ref()
                .map_or(false, |key| consumed.contains(key));
            if old_in_range && already_used {
                old_head += 1;
                continue;
            }

            match new_key {
                None => {
                    // Unkeyed children patch positionally against unkeyed
                    // old children.
                    if old_key.is_none() {
                        if old_in_range {
                            let old_child =
                                old[old_head as usize].take().expect("old child present");
                            let new_child =
                                out[new_head as usize].take().expect("new child present");
                            out[new_head as usize] =
                                Some(patch(store, dom, old_child, new_child));
                        } else {
                            let new_child =
                                out[new_head as usize].take().expect("new child present");
                            out[new_head as usize] =
                                Some(create_before(store, dom, parent, new_child, reference));
                        }
                        new_head += 1;
                    }
                    old_head += 1;
                }
                Some(key) => {
                    // A matching key at the cursor patches in place. Only
                    // when the cursor does not match may the lookahead
                    // skip it, so the first of two equal-keyed old
                    // children is the one an incoming key binds to.
                    if old_in_range && old_key.as_deref() == Some(key.as_str()) {
                        let old_child = old[old_head as usize].take().expect("old child present");
                        let new_child = out[new_head as usize].take().expect("new child present");
                        out[new_head as usize] = Some(patch(store, dom, old_child, new_child));
                        consumed.insert(key);
                        old_head += 1;
                    } else if old_in_range
                        && old_keys
                            .get((old_head + 1) as usize)
                            .map_or(false, |successor| successor.as_deref() == Some(key.as_str()))
                    {
                        // The next old child carries the incoming key; the
                        // incoming child claims it next round.
                        if old_key.is_none() {
                            if let Some(child) = old[old_head as usize].take() {
                                remove_node(store, dom, parent, child);
                            }
                        }
                        old_head += 1;
                        continue;
                    } else {
                        match keyed.get(&key).copied() {
                            Some(index) if old[index].is_some() => {
                                // A known key out of position: move its
                                // document node, never recreate it.
                                let moved = old[index].take().expect("keyed child present");
                                if let Some(handle) = moved.first_handle() {
                                    dom.insert_before(parent, handle, reference);
                                }
                                let new_child =
                                    out[new_head as usize].take().expect("new child present");
                                out[new_head as usize] =
                                    Some(patch(store, dom, moved, new_child));
                                consumed.insert(key);
                            }
                            _ => {
                                let new_child =
                                    out[new_head as usize].take().expect("new child present");
                                out[new_head as usize] =
                                    Some(create_before(store, dom, parent, new_child, reference));
                            }
                        }
                    }
                    new_head += 1;
                }
            }
        }

        // Anything still occupying an old slot was not reused.
        for slot in old.iter_mut() {
            if let Some(child) = slot.take() {
                remove_node(store, dom, parent, child);
            }
        }
    }

    out.into_iter()
        .map(|slot| slot.expect("every child slot is filled after reconciliation"))
        .collect()
}
