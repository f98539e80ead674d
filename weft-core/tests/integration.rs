//! End-to-end tests: store, view, and document working together.

use std::rc::Rc;

use weft_core::dom::Dom;
use weft_core::store::{
    write, Container, Meta, Provider, ProviderActions, Store, StoreError, Writer, WriterActions,
};
use weft_core::vdom::{
    list_view, list_view_with_index, reactive_text, render_to_dom, stateful_node,
    stateful_node_keyed, virtual_element, virtual_text, ElementConfig,
};

#[test]
fn counter_clicks_flow_from_event_to_text() {
    let store = Store::new();
    let dom = Dom::new();
    let body = dom.create_element("body");
    let clicks: Container<i32, ()> =
        Container::with_reducer(0, |_message: &(), current: &i32| current + 1).build();

    let view = {
        let on_click = clicks.clone();
        let label = clicks.clone();
        virtual_element(
            "button",
            ElementConfig::new().on("click", move |_event| write(&on_click, ())),
            vec![reactive_text(move |get| {
                format!("Clicks: {}", get.get(&label))
            })],
        )
    };
    let result = render_to_dom(&store, &dom, body, view);
    let button = result.root().expect("button mounted");
    assert_eq!(dom.to_html(body), "<body><button>Clicks: 0</button></body>");

    for _ in 0..3 {
        dom.fire_event(button, "click", "");
    }
    assert_eq!(dom.to_html(body), "<body><button>Clicks: 3</button></body>");
}

#[test]
fn input_events_carry_their_payload_into_state() {
    let store = Store::new();
    let dom = Dom::new();
    let body = dom.create_element("body");
    let name = Container::new(String::new());

    let view = {
        let on_input = name.clone();
        let greeting = name.clone();
        virtual_element(
            "div",
            ElementConfig::new(),
            vec![
                virtual_element(
                    "input",
                    ElementConfig::new().on("input", move |event| {
                        write(&on_input, event.value.clone())
                    }),
                    vec![],
                ),
                virtual_element(
                    "p",
                    ElementConfig::new(),
                    vec![reactive_text(move |get| {
                        format!("Hello, {}!", get.get(&greeting))
                    })],
                ),
            ],
        )
    };
    let result = render_to_dom(&store, &dom, body, view);
    let root = result.root().expect("div mounted");
    let input = dom.children(root)[0];

    dom.fire_event(input, "input", "Cool Dude");
    assert_eq!(
        dom.to_html(body),
        "<body><div><input></input><p>Hello, Cool Dude!</p></div></body>"
    );
}

#[test]
fn providers_drive_the_meta_handshake() {
    struct SessionProvider {
        key: Container<String>,
        data: Container<String>,
    }
    impl Provider for SessionProvider {
        fn provide(&self, actions: &mut ProviderActions<'_, '_>) {
            let key = actions.get(&self.key);
            actions.set(&self.data.meta(), Meta::Pending(key));
        }
    }

    let store = Store::new();
    let key = Container::new("alpha".to_string());
    let data = Container::new(String::new());
    store.use_provider(SessionProvider {
        key: key.clone(),
        data: data.clone(),
    });

    assert_eq!(
        store.get(&data.meta()),
        Meta::Pending("alpha".to_string())
    );

    // The deferred fetch lands; a fresh value settles the meta channel.
    store.dispatch(write(&data, "payload-for-alpha".to_string()));
    assert_eq!(store.get(&data.meta()), Meta::Ok);
    assert_eq!(store.get(&data), "payload-for-alpha");

    // A new key reruns the provider: pending again, stale value retained.
    store.dispatch(write(&key, "beta".to_string()));
    assert_eq!(store.get(&data.meta()), Meta::Pending("beta".to_string()));
    assert_eq!(store.get(&data), "payload-for-alpha");
}

#[test]
fn writers_report_pending_then_ok() {
    struct SlowSave;
    impl Writer<String> for SlowSave {
        fn write(
            &self,
            message: String,
            actions: &mut WriterActions<'_, String, String>,
        ) -> Result<(), StoreError> {
            if message.is_empty() {
                return Err(StoreError::rejected("empty submission"));
            }
            actions.pending(message.clone());
            // The save completes later; nothing is published yet.
            Ok(())
        }
    }

    let store = Store::new();
    let draft = Container::new("initial".to_string());
    store.use_writer(&draft, SlowSave);

    store.dispatch(write(&draft, "submitted".to_string()));
    assert_eq!(
        store.get(&draft.meta()),
        Meta::Pending("submitted".to_string())
    );
    assert_eq!(store.get(&draft), "initial");

    store.dispatch(write(&draft, String::new()));
    assert_eq!(
        store.get(&draft.meta()),
        Meta::Error {
            message: Some(String::new()),
            reason: StoreError::rejected("empty submission"),
        }
    );
}

#[test]
fn keyed_children_reorder_by_moving_their_nodes() {
    let store = Store::new();
    let dom = Dom::new();
    let body = dom.create_element("body");

    let item = |key: &str, label: &str| {
        virtual_element(
            "li",
            ElementConfig::new().key(key),
            vec![virtual_text(label)],
        )
    };
    let list = |order: &[(&str, &str)]| {
        virtual_element(
            "ul",
            ElementConfig::new(),
            order.iter().map(|(key, label)| item(key, label)).collect(),
        )
    };

    let mut result = render_to_dom(
        &store,
        &dom,
        body,
        list(&[("a", "Apple"), ("b", "Banana"), ("c", "Cherry")]),
    );
    let ul = result.root().expect("list mounted");
    let before = dom.children(ul);

    result.update(list(&[("c", "Cherry"), ("b", "Banana"), ("a", "Apple")]));
    assert_eq!(
        dom.to_html(ul),
        "<ul><li>Cherry</li><li>Banana</li><li>Apple</li></ul>"
    );

    // Reordering moved the same document nodes; nothing was recreated.
    let after = dom.children(ul);
    assert_eq!(after, vec![before[2], before[1], before[0]]);
}

#[test]
fn updating_with_an_identical_view_touches_nothing() {
    let store = Store::new();
    let dom = Dom::new();
    let body = dom.create_element("body");
    let count = Container::new(5);

    let view = |count: &Container<i32>| {
        let count = count.clone();
        virtual_element(
            "section",
            ElementConfig::new()
                .attribute("class", "panel")
                .on("click", {
                    let count = count.clone();
                    move |_event| write(&count, 0)
                }),
            vec![
                virtual_text("Total: "),
                reactive_text(move |get| get.get(&count).to_string()),
            ],
        )
    };

    let mut result = render_to_dom(&store, &dom, body, view(&count));
    dom.clear_edits();

    result.update(view(&count));
    assert_eq!(dom.edits(), vec![]);
    assert_eq!(
        dom.to_html(body),
        "<body><section class=\"panel\">Total: 5</section></body>"
    );
}

#[test]
fn stateful_nodes_patch_in_place_and_replace_on_shape_change() {
    let store = Store::new();
    let dom = Dom::new();
    let body = dom.create_element("body");
    let mode = Container::new("full".to_string());

    let view = {
        let mode = mode.clone();
        stateful_node(move |get| match get.get(&mode).as_str() {
            "full" => virtual_element(
                "article",
                ElementConfig::new(),
                vec![virtual_text("everything")],
            ),
            "brief" => virtual_element(
                "article",
                ElementConfig::new(),
                vec![virtual_text("summary")],
            ),
            _ => virtual_text("nothing to show"),
        })
    };
    let result = render_to_dom(&store, &dom, body, view);
    let article = result.root().expect("article mounted");
    assert_eq!(dom.to_html(body), "<body><article>everything</article></body>");

    // Same shape: the article node is patched, not replaced.
    store.dispatch(write(&mode, "brief".to_string()));
    assert_eq!(dom.to_html(body), "<body><article>summary</article></body>");
    assert_eq!(result.root(), Some(article));

    // Different shape: the article is replaced by a text node.
    store.dispatch(write(&mode, "empty".to_string()));
    assert_eq!(dom.to_html(body), "<body>nothing to show</body>");
    assert!(!dom.exists(article));
}

#[test]
fn keyed_stateful_nodes_move_instead_of_regenerating() {
    let store = Store::new();
    let dom = Dom::new();
    let body = dom.create_element("body");
    let first = Container::new("one".to_string());
    let second = Container::new("two".to_string());

    let panel = |key: &'static str, source: &Container<String>| {
        let source = source.clone();
        stateful_node_keyed(key, move |get| {
            virtual_element(
                "section",
                ElementConfig::new(),
                vec![virtual_text(get.get(&source))],
            )
        })
    };

    let mut result = render_to_dom(
        &store,
        &dom,
        body,
        virtual_element(
            "div",
            ElementConfig::new(),
            vec![panel("first", &first), panel("second", &second)],
        ),
    );
    let div = result.root().expect("div mounted");
    assert_eq!(
        dom.to_html(div),
        "<div><section>one</section><section>two</section></div>"
    );
    let before = dom.children(div);

    result.update(virtual_element(
        "div",
        ElementConfig::new(),
        vec![panel("second", &second), panel("first", &first)],
    ));
    assert_eq!(
        dom.to_html(div),
        "<div><section>two</section><section>one</section></div>"
    );
    assert_eq!(dom.children(div), vec![before[1], before[0]]);

    // The moved subtree kept its binding: state still flows into it.
    store.dispatch(write(&second, "TWO".to_string()));
    assert_eq!(
        dom.to_html(div),
        "<div><section>TWO</section><section>one</section></div>"
    );
}

#[test]
fn stateful_attributes_appear_and_vanish_with_state() {
    let store = Store::new();
    let dom = Dom::new();
    let body = dom.create_element("body");
    let active = Container::new(false);

    let view = {
        let active = active.clone();
        virtual_element(
            "nav",
            ElementConfig::new().stateful_attribute("class", move |get| {
                get.get(&active).then(|| "active".to_string())
            }),
            vec![],
        )
    };
    let _mounted = render_to_dom(&store, &dom, body, view);
    assert_eq!(dom.to_html(body), "<body><nav></nav></body>");

    store.dispatch(write(&active, true));
    assert_eq!(dom.to_html(body), "<body><nav class=\"active\"></nav></body>");

    store.dispatch(write(&active, false));
    assert_eq!(dom.to_html(body), "<body><nav></nav></body>");
}

#[test]
fn list_items_keep_their_nodes_and_learn_their_new_index() {
    let store = Store::new();
    let dom = Dom::new();
    let body = dom.create_element("body");
    let names = Container::new(vec![
        "ant".to_string(),
        "bee".to_string(),
        "cricket".to_string(),
    ]);

    let view = {
        let names = names.clone();
        virtual_element(
            "ol",
            ElementConfig::new(),
            vec![list_view_with_index(
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
            )],
        )
    };
    let result = render_to_dom(&store, &dom, body, view);
    let ol = result.root().expect("list mounted");
    assert_eq!(
        dom.to_html(ol),
        "<ol><li>0:ant</li><li>1:bee</li><li>2:cricket</li><!----></ol>"
    );
    let before = dom.children(ol);

    store.dispatch(write(
        &names,
        vec![
            "cricket".to_string(),
            "ant".to_string(),
            "bee".to_string(),
        ],
    ));
    assert_eq!(
        dom.to_html(ol),
        "<ol><li>0:cricket</li><li>1:ant</li><li>2:bee</li><!----></ol>"
    );

    // Rotation moved existing nodes; the index containers absorbed the
    // position changes.
    let after = dom.children(ol);
    assert_eq!(after, vec![before[2], before[0], before[1], before[3]]);
}

#[test]
fn removing_an_item_disposes_it_and_leaves_the_rest() {
    let store = Store::new();
    let dom = Dom::new();
    let body = dom.create_element("body");
    let names = Container::new(vec!["one".to_string(), "two".to_string(), "three".to_string()]);

    let view = {
        let names = names.clone();
        virtual_element(
            "ul",
            ElementConfig::new(),
            vec![list_view_with_index(
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
            )],
        )
    };
    let result = render_to_dom(&store, &dom, body, view);
    let ul = result.root().expect("list mounted");
    let before = dom.children(ul);

    store.dispatch(write(
        &names,
        vec!["one".to_string(), "three".to_string()],
    ));
    assert_eq!(dom.to_html(ul), "<ul><li>0:one</li><li>1:three</li><!----></ul>");
    assert!(!dom.exists(before[1]));
    let after = dom.children(ul);
    assert_eq!(after, vec![before[0], before[2], before[3]]);
}

#[test]
fn duplicate_list_items_keep_the_first_subtree_and_drop_the_extra() {
    let store = Store::new();
    let dom = Dom::new();
    let body = dom.create_element("body");
    let words = Container::new(vec![
        "solo".to_string(),
        "dup".to_string(),
        "dup".to_string(),
    ]);

    let view = {
        let words = words.clone();
        virtual_element(
            "ul",
            ElementConfig::new(),
            vec![list_view(
                move |get| get.get(&words),
                |word: &String| {
                    virtual_element("li", ElementConfig::new(), vec![virtual_text(word.clone())])
                },
            )],
        )
    };
    let result = render_to_dom(&store, &dom, body, view);
    let ul = result.root().expect("list mounted");
    assert_eq!(
        dom.to_html(ul),
        "<ul><li>solo</li><li>dup</li><li>dup</li><!----></ul>"
    );
    let before = dom.children(ul);

    store.dispatch(write(&words, vec!["dup".to_string(), "solo".to_string()]));
    assert_eq!(dom.to_html(ul), "<ul><li>dup</li><li>solo</li><!----></ul>");
    // The first of the equal items kept its nodes; the extra one is gone.
    assert_eq!(dom.children(ul), vec![before[1], before[0], before[3]]);
    assert!(!dom.exists(before[2]));
}

#[test]
fn unmounting_stops_every_reactive_binding() {
    let store = Store::new();
    let dom = Dom::new();
    let body = dom.create_element("body");
    let word = Container::new("before".to_string());

    let view = {
        let word = word.clone();
        virtual_element(
            "p",
            ElementConfig::new(),
            vec![reactive_text(move |get| get.get(&word))],
        )
    };
    let result = render_to_dom(&store, &dom, body, view);
    assert_eq!(dom.to_html(body), "<body><p>before</p></body>");

    result.unmount();
    assert_eq!(dom.to_html(body), "<body></body>");

    let edits = dom.edit_count();
    store.dispatch(write(&word, "after".to_string()));
    assert_eq!(dom.edit_count(), edits);
}

#[test]
fn shared_state_reaches_views_on_separate_stores_independently() {
    let temperature = Container::new(20);
    let make_view = || {
        let temperature = temperature.clone();
        reactive_text(move |get| format!("{} degrees", get.get(&temperature)))
    };

    let warm = Store::new();
    let cold = Store::new();
    let dom = Dom::new();
    let left = dom.create_element("div");
    let right = dom.create_element("div");
    let _left_mounted = render_to_dom(&warm, &dom, left, make_view());
    let _right_mounted = render_to_dom(&cold, &dom, right, make_view());

    warm.dispatch(write(&temperature, 31));
    assert_eq!(dom.to_html(left), "<div>31 degrees</div>");
    assert_eq!(dom.to_html(right), "<div>20 degrees</div>");
}

#[test]
fn effects_observe_view_driven_dispatches() {
    let store = Store::new();
    let dom = Dom::new();
    let body = dom.create_element("body");
    let clicks: Container<i32, ()> =
        Container::with_reducer(0, |_message: &(), current: &i32| current + 1).build();

    let observed = Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = observed.clone();
    let watched = clicks.clone();
    store.use_effect(move |get| {
        sink.borrow_mut().push(get.get(&watched));
    });

    let on_click = clicks.clone();
    let view = virtual_element(
        "button",
        ElementConfig::new().on("click", move |_event| write(&on_click, ())),
        vec![virtual_text("go")],
    );
    let result = render_to_dom(&store, &dom, body, view);
    let button = result.root().expect("button mounted");

    dom.fire_event(button, "click", "");
    dom.fire_event(button, "click", "");
    assert_eq!(*observed.borrow(), vec![0, 1, 2]);
}
