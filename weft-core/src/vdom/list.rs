//! List Views
//!
//! A list view renders one subtree per item of a reactive query. Items are
//! their own keys, so the data must be cheap to clone, comparable, and
//! hashable.
//!
//! # How Reconciliation Works
//!
//! 1. The item query runs tracked; any change to a dependency reruns it.
//! 2. The fresh item sequence is matched against the previous one with the
//!    same two-ended strategy used for keyed element children: heads and
//!    tails first, then a key map for the middle.
//! 3. A matched item keeps its document subtree and bindings untouched.
//!    When the optional index container is in play and the item landed at
//!    a new position, the new index is written into that container, so
//!    only the item's own index-dependent parts update.
//! 4. Unmatched new items mount fresh; unmatched old items are removed
//!    with their bindings disposed.
//!
//! The whole list lives before a comment node that serves as its anchor,
//! keeping insertions positioned even when the list is empty.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::rc::Rc;

use tracing::trace;

use crate::dom::{Dom, NodeHandle};
use crate::store::{write, Container, GetState, StateListener, Store, TrackerCore};
use crate::vdom::node::{ListNode, VirtualNode};
use crate::vdom::render::{create_before, dispose_bindings, remove_node};

pub(crate) type ItemQuery<I> = Rc<dyn Fn(&mut GetState<'_>) -> Vec<I>>;
pub(crate) type ItemTemplate<I> = Rc<dyn Fn(&I, Option<&Container<usize>>) -> VirtualNode>;

/// A list view over `query`, rendering each item with `template`.
pub fn list_view<I>(
    query: impl Fn(&mut GetState<'_>) -> Vec<I> + 'static,
    template: impl Fn(&I) -> VirtualNode + 'static,
) -> VirtualNode
where
    I: Clone + Eq + Hash + 'static,
{
    build(
        Rc::new(query),
        Rc::new(move |item: &I, _index: Option<&Container<usize>>| template(item)),
        false,
    )
}

/// Like [`list_view`], but the template also receives a container holding
/// the item's current position. Reordering writes the new position into
/// that container instead of re-rendering the item.
pub fn list_view_with_index<I>(
    query: impl Fn(&mut GetState<'_>) -> Vec<I> + 'static,
    template: impl Fn(&I, &Container<usize>) -> VirtualNode + 'static,
) -> VirtualNode
where
    I: Clone + Eq + Hash + 'static,
{
    build(
        Rc::new(query),
        Rc::new(move |item: &I, index: Option<&Container<usize>>| {
            let index = index.unwrap_or_else(|| panic!("indexed list item without an index container"));
            template(item, index)
        }),
        true,
    )
}

fn build<I>(query: ItemQuery<I>, template: ItemTemplate<I>, indexed: bool) -> VirtualNode
where
    I: Clone + Eq + Hash + 'static,
{
    VirtualNode::List(ListNode {
        driver: Rc::new(TypedListDriver {
            query,
            template,
            indexed,
        }),
        anchor: None,
        binding: None,
    })
}

/// Type-erased entry point used when a list description is mounted.
pub(crate) trait ListDriver {
    fn mount(&self, store: &Store, dom: &Dom, anchor: NodeHandle) -> Rc<dyn ListControl>;
}

/// Operations the renderer needs from a mounted list, independent of the
/// item type.
pub(crate) trait ListControl {
    /// Document node of the first item, when any item exists.
    fn first_node(&self) -> Option<NodeHandle>;
    /// Dispose item bindings without touching the document.
    fn dispose(&self, store: &Store);
    /// Dispose bindings and remove every item plus the anchor.
    fn remove_from(&self, store: &Store, dom: &Dom, parent: NodeHandle);
}

struct TypedListDriver<I> {
    query: ItemQuery<I>,
    template: ItemTemplate<I>,
    indexed: bool,
}

impl<I> ListDriver for TypedListDriver<I>
where
    I: Clone + Eq + Hash + 'static,
{
    fn mount(&self, store: &Store, dom: &Dom, anchor: NodeHandle) -> Rc<dyn ListControl> {
        let binding = Rc::new(ListBinding {
            core: TrackerCore::new(),
            dom: dom.clone(),
            anchor,
            query: self.query.clone(),
            template: self.template.clone(),
            indexed: self.indexed,
            items: RefCell::new(Vec::new()),
        });
        binding.clone().update(store);
        binding
    }
}

struct ListItem<I> {
    key: I,
    position: usize,
    index_state: Option<Container<usize>>,
    rendered: Option<VirtualNode>,
}

impl<I> ListItem<I> {
    fn first_node(&self) -> Option<NodeHandle> {
        self.rendered.as_ref().and_then(|node| node.first_handle())
    }
}

struct ListBinding<I> {
    core: TrackerCore,
    dom: Dom,
    anchor: NodeHandle,
    query: ItemQuery<I>,
    template: ItemTemplate<I>,
    indexed: bool,
    items: RefCell<Vec<ListItem<I>>>,
}

impl<I> ListBinding<I>
where
    I: Clone + Eq + Hash + 'static,
{
    fn parent(&self) -> NodeHandle {
        self.dom
            .parent_node(self.anchor)
            .unwrap_or_else(|| panic!("list anchor is not in the document"))
    }

    fn mount_item(&self, store: &Store, item: &mut ListItem<I>, reference: Option<NodeHandle>) {
        if self.indexed && item.index_state.is_none() {
            item.index_state = Some(Container::new(item.position));
        }
        let view = (self.template)(&item.key, item.index_state.as_ref());
        let reference = reference.or(Some(self.anchor));
        item.rendered = Some(create_before(store, &self.dom, self.parent(), view, reference));
    }

    /// Merge a matched old item into its new slot. The document subtree
    /// transfers as-is; a changed position flows through the index
    /// container.
    fn merge_item(&self, store: &Store, old: ListItem<I>, new: &mut ListItem<I>) {
        new.rendered = old.rendered;
        new.index_state = old.index_state;
        if old.position != new.position {
            if let Some(index) = &new.index_state {
                store.dispatch(write(index, new.position));
            }
        }
    }

    fn remove_item(&self, store: &Store, mut item: ListItem<I>) {
        if let Some(rendered) = item.rendered.take() {
            remove_node(store, &self.dom, self.parent(), rendered);
        }
        if let Some(index) = item.index_state.take() {
            store.evict(&index);
        }
    }

    fn reconcile(&self, store: &Store, data: Vec<I>) {
        let previous = std::mem::take(&mut *self.items.borrow_mut());
        let mut old: Vec<Option<ListItem<I>>> = previous.into_iter().map(Some).collect();
        let old_keys: Vec<I> = old
            .iter()
            .map(|slot| slot.as_ref().map(|item| item.key.clone()).expect("fresh slot"))
            .collect();
        let mut out: Vec<Option<ListItem<I>>> = data
            .into_iter()
            .enumerate()
            .map(|(position, key)| {
                Some(ListItem {
                    key,
                    position,
                    index_state: None,
                    rendered: None,
                })
            })
            .collect();

        let mut old_head: isize = 0;
        let mut old_tail: isize = old.len() as isize - 1;
        let mut new_head: isize = 0;
        let mut new_tail: isize = out.len() as isize - 1;

        while new_head <= new_tail && old_head <= old_tail {
            if old_keys[old_head as usize] != out[new_head as usize].as_ref().expect("new item").key {
                break;
            }
            let old_item = old[old_head as usize].take().expect("head item present");
            let slot = out[new_head as usize].as_mut().expect("head item present");
            self.merge_item(store, old_item, slot);
            old_head += 1;
            new_head += 1;
        }
        while new_head <= new_tail && old_head <= old_tail {
            if old_keys[old_tail as usize] != out[new_tail as usize].as_ref().expect("new item").key {
                break;
            }
            let old_item = old[old_tail as usize].take().expect("tail item present");
            let slot = out[new_tail as usize].as_mut().expect("tail item present");
            self.merge_item(store, old_item, slot);
            old_tail -= 1;
            new_tail -= 1;
        }

        if old_head > old_tail {
            let reference = self.trailing_reference(&out, new_tail);
            for index in new_head..=new_tail {
                let slot = out[index as usize].as_mut().expect("new item present");
                self.mount_item(store, slot, reference);
            }
        } else if new_head > new_tail {
            for index in old_head..=old_tail {
                if let Some(item) = old[index as usize].take() {
                    self.remove_item(store, item);
                }
            }
        } else {
            trace!("reconciling keyed list middle section");
            let mut keyed: HashMap<I, usize> = HashMap::new();
            for index in (old_head as usize)..=(old_tail as usize) {
                keyed.entry(old_keys[index].clone()).or_insert(index);
            }
            let mut consumed: HashSet<I> = HashSet::new();

            while new_head <= new_tail {
                let old_in_range = old_head <= old_tail;
                let new_key = out[new_head as usize].as_ref().expect("new item").key.clone();
                let reference = if old_in_range {
                    old[old_head as usize]
                        .as_ref()
                        .and_then(|item| item.first_node())
                } else {
                    self.trailing_reference(&out, new_tail)
                };

                if old_in_range {
                    let old_key = &old_keys[old_head as usize];
                    if consumed.contains(old_key) {
                        old_head += 1;
                        continue;
                    }
                    // A match at the cursor merges in place before the
                    // lookahead may skip it, so the first of two equal
                    // items is the one that keeps its rendering.
                    if *old_key == new_key {
                        let old_item = old[old_head as usize].take().expect("old item present");
                        let slot = out[new_head as usize].as_mut().expect("new item present");
                        self.merge_item(store, old_item, slot);
                        consumed.insert(new_key);
                        old_head += 1;
                        new_head += 1;
                        continue;
                    }
                    let successor_matches = old_keys
                        .get((old_head + 1) as usize)
                        .map_or(false, |key| *key == new_key);
                    if successor_matches {
                        old_head += 1;
                        continue;
                    }
                }

                match keyed.get(&new_key).copied() {
                    Some(index) if old[index].is_some() => {
                        // A displaced item: move its document nodes in
                        // front of the current position.
                        let moved = old[index].take().expect("keyed item present");
                        if let Some(handle) = moved.first_node() {
                            self.dom.insert_before(self.parent(), handle, reference);
                        }
                        let slot = out[new_head as usize].as_mut().expect("new item present");
                        self.merge_item(store, moved, slot);
                        consumed.insert(new_key);
                    }
                    _ => {
                        let slot = out[new_head as usize].as_mut().expect("new item present");
                        self.mount_item(store, slot, reference);
                    }
                }
                new_head += 1;
            }

            for slot in old.iter_mut() {
                if let Some(item) = slot.take() {
                    self.remove_item(store, item);
                }
            }
        }

        *self.items.borrow_mut() = out
            .into_iter()
            .map(|slot| slot.expect("every item slot is filled after reconciliation"))
            .collect();
    }

    fn trailing_reference(&self, out: &[Option<ListItem<I>>], new_tail: isize) -> Option<NodeHandle> {
        let next = (new_tail + 1) as usize;
        out.get(next)
            .and_then(|slot| slot.as_ref())
            .and_then(|item| item.first_node())
            .or(Some(self.anchor))
    }
}

impl<I> StateListener for ListBinding<I>
where
    I: Clone + Eq + Hash + 'static,
{
    fn update(self: Rc<Self>, store: &Store) {
        if self.core.is_disposed() {
            return;
        }
        let listener: Rc<dyn StateListener> = self.clone();
        let query = self.query.clone();
        let data = self.core.run(store, &listener, |get| query(get));
        self.reconcile(store, data);
    }
}

impl<I> ListControl for ListBinding<I>
where
    I: Clone + Eq + Hash + 'static,
{
    fn first_node(&self) -> Option<NodeHandle> {
        self.items
            .borrow()
            .first()
            .and_then(|item| item.first_node())
    }

    fn dispose(&self, store: &Store) {
        self.core.dispose();
        let items = std::mem::take(&mut *self.items.borrow_mut());
        for mut item in items {
            if let Some(rendered) = item.rendered.take() {
                dispose_bindings(store, &rendered);
            }
            if let Some(index) = item.index_state.take() {
                store.evict(&index);
            }
        }
    }

    fn remove_from(&self, store: &Store, dom: &Dom, parent: NodeHandle) {
        self.core.dispose();
        let items = std::mem::take(&mut *self.items.borrow_mut());
        for mut item in items {
            if let Some(rendered) = item.rendered.take() {
                remove_node(store, dom, parent, rendered);
            }
            if let Some(index) = item.index_state.take() {
                store.evict(&index);
            }
        }
        dom.remove_child(parent, self.anchor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vdom::node::{reactive_text, virtual_element, ElementConfig};

    fn indexed_names_list(names: &Container<Vec<String>>) -> VirtualNode {
        let names = names.clone();
        list_view_with_index(
            move |get| get.get(&names),
            |name: &String, index: &Container<usize>| {
                let name = name.clone();
                let index = index.clone();
                virtual_element(
                    "li",
                    ElementConfig::new(),
                    vec![reactive_text(move |get| {
                        format!("{}:{}", get.get(&index), name)
                    })],
                )
            },
        )
    }

    #[test]
    fn removed_items_release_their_index_containers() {
        let store = Store::new();
        let dom = Dom::new();
        let body = dom.create_element("body");
        let names = Container::new(vec![
            "a".to_string(),
            "b".to_string(),
            "c".to_string(),
        ]);

        let mounted = create_before(&store, &dom, body, indexed_names_list(&names), None);
        let populated = store.registered_count();

        store.dispatch(write(&names, vec!["a".to_string(), "c".to_string()]));
        assert_eq!(store.registered_count(), populated - 1);

        // Reordering keeps every index container registered.
        store.dispatch(write(&names, vec!["c".to_string(), "a".to_string()]));
        assert_eq!(store.registered_count(), populated - 1);

        remove_node(&store, &dom, body, mounted);
        assert_eq!(store.registered_count(), populated - 3);
    }
}
