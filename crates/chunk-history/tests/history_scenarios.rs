#![forbid(unsafe_code)]

//! End-to-end scenarios for synchronous history use.
//!
//! Run:
//!   cargo test -p chunk-history --test history_scenarios

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use chunk_history::{
    CHILDREN_FIELD, Decomposed, FnRule, History, HistoryConfig, HistoryError, RuleSet,
    TransformRule,
};
use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

fn state() -> Value {
    json!({
        "id": 0,
        "name": "root",
        "children": [
            {"id": 1, "name": "a", "children": []},
            {"id": 2, "name": "b", "children": []},
            {"id": 3, "name": "c", "children": [
                {"id": 4, "name": "d", "children": []},
                {"id": 5, "name": "e", "children": []},
            ]},
        ],
    })
}

fn renamed(name: &str) -> Value {
    let mut next = state();
    next["name"] = json!(name);
    next
}

// ============================================================================
// Basics
// ============================================================================

#[test]
fn push_then_get_round_trips() {
    let history = History::new();
    history.push_sync(state()).unwrap();
    assert_eq!(history.get().unwrap(), Some(state()));
}

#[test]
fn initial_state_is_readable() {
    let history = History::builder().initial_state(state()).build().unwrap();
    assert_eq!(history.get().unwrap(), Some(state()));
    assert_eq!(history.len(), 1);
}

#[test]
fn undo_redo_flags_follow_the_cursor() {
    let history = History::new();
    assert!(!history.has_undo());
    assert!(!history.has_redo());

    history.push_sync(state()).unwrap();
    assert!(!history.has_undo());
    assert!(!history.has_redo());

    history.push_sync(state()).unwrap();
    assert!(history.has_undo());
    assert!(!history.has_redo());

    history.undo();
    assert!(!history.has_undo());
    assert!(history.has_redo());

    history.redo();
    assert!(history.has_undo());
    assert!(!history.has_redo());
}

#[test]
fn undo_walks_back_through_names() {
    let history = History::new();
    history.push_sync(state()).unwrap();
    history.push_sync(renamed("x")).unwrap();
    history.push_sync(renamed("y")).unwrap();

    let name = |v: Option<Value>| v.map(|v| v["name"].clone());
    assert_eq!(name(history.get().unwrap()), Some(json!("y")));
    assert_eq!(name(history.undo().get().unwrap()), Some(json!("x")));
    assert_eq!(name(history.undo().get().unwrap()), Some(json!("root")));
}

#[test]
fn redundant_moves_are_noops() {
    let history = History::new();
    history.push_sync(state()).unwrap();
    history.push_sync(renamed("x")).unwrap();
    history.push_sync(renamed("y")).unwrap();

    history.undo().undo().undo().undo().undo();
    assert_eq!(history.get().unwrap(), Some(state()));
    assert!(!history.has_undo());

    history.redo().redo().redo().redo().redo();
    assert_eq!(history.get().unwrap(), Some(renamed("y")));
    assert!(!history.has_redo());
}

#[test]
fn new_push_discards_redo() {
    let history = History::new();
    history.push_sync(renamed("a")).unwrap();
    history.push_sync(renamed("b")).unwrap();
    history.push_sync(renamed("c")).unwrap();
    history.undo().undo();
    history.push_sync(renamed("d")).unwrap();

    assert!(!history.has_redo());
    assert_eq!(history.len(), 2);
    assert_eq!(history.undo().get().unwrap(), Some(renamed("a")));
    assert_eq!(history.redo().get().unwrap(), Some(renamed("d")));
}

// ============================================================================
// Eviction
// ============================================================================

#[test]
fn max_length_bounds_undo() {
    let history = History::builder().max_length(5).build().unwrap();
    for i in 0..10 {
        history.push_sync(renamed(&i.to_string())).unwrap();
    }
    assert!(history.has_undo());
    assert!(!history.has_redo());
    assert_eq!(history.len(), 5);

    for _ in 0..5 {
        history.undo();
    }
    assert!(!history.has_undo());
    assert!(history.has_redo());
    assert_eq!(history.get().unwrap(), Some(renamed("5")));

    let stats = history.stats();
    assert_eq!(stats.slots, 10);
    assert_eq!(stats.tombstones, 5);
    assert_eq!(stats.evictions, 5);
}

#[test]
fn config_from_json_applies() {
    let config = HistoryConfig::from_json_str(r#"{"max_length": 2}"#).unwrap();
    let history = History::with_config(config).unwrap();
    for i in 0..4 {
        history.push_sync(json!(i)).unwrap();
    }
    assert_eq!(history.len(), 2);
    assert_eq!(history.undo().undo().get().unwrap(), Some(json!(2)));
}

// ============================================================================
// Callbacks
// ============================================================================

#[test]
fn on_change_sees_every_commit_and_read() {
    let seen: Rc<RefCell<Vec<Option<Value>>>> = Rc::default();
    let log = Rc::clone(&seen);
    let history = History::builder()
        .on_change(move |state: Option<&Value>| log.borrow_mut().push(state.cloned()))
        .build()
        .unwrap();

    history.get().unwrap();
    history.push_sync(state()).unwrap();
    history.undo().get().unwrap();

    assert_eq!(*seen.borrow(), vec![None, Some(state()), Some(state())]);
}

#[test]
fn initial_state_is_silent() {
    let calls = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&calls);
    let _history = History::builder()
        .initial_state(state())
        .on_change(move |_: Option<&Value>| *counter.borrow_mut() += 1)
        .build()
        .unwrap();
    assert_eq!(*calls.borrow(), 0);
}

// ============================================================================
// Storage modes
// ============================================================================

#[test]
fn raw_mode_keeps_independent_copies() {
    let history = History::builder().use_chunks(false).build().unwrap();
    history.push_sync(state()).unwrap();
    history.push_sync(renamed("other")).unwrap();
    assert_eq!(history.get().unwrap(), Some(renamed("other")));
    assert_eq!(history.undo().get().unwrap(), Some(state()));
    assert_eq!(history.stats().chunks.chunks, 0);
}

#[test]
fn unchanged_subtrees_are_stored_once() {
    let history = History::new();
    history.push_sync(state()).unwrap();
    let after_first = history.stats().chunks;
    history.push_sync(renamed("x")).unwrap();
    let after_second = history.stats().chunks;

    // Only the root chunk changed.
    assert_eq!(after_second.chunks, after_first.chunks + 1);
    assert!(after_second.dedup_hits > after_first.dedup_hits);
}

#[test]
fn deeply_nested_state_reads_back() {
    let deep = (0..200).fold(json!("leaf"), |inner, _| json!([inner]));
    let history = History::new();
    history.push_sync(deep.clone()).unwrap();
    assert_eq!(history.get().unwrap(), Some(deep));
}

#[test]
fn floats_survive_chunked_storage() {
    let values = [1.0715660391465826e-75, 0.1 + 0.2, -7.0e-310, 2.5e300];
    let history = History::new();
    history
        .push_sync(json!({"values": values, "children": [{"w": 0.30000000000000004}]}))
        .unwrap();

    let back = history.get().unwrap().unwrap();
    for (i, x) in values.iter().enumerate() {
        assert_eq!(back["values"][i].as_f64(), Some(*x));
    }
    assert_eq!(back["children"][0]["w"].as_f64(), Some(0.1 + 0.2));
}

#[test]
fn pick_index_shares_sibling_records() {
    let history = History::new();
    history.push_sync(state()).unwrap();
    let before = history.current_record().unwrap();

    let mut next = state();
    next["children"][2]["children"][0]["name"] = json!("d2");
    history.push_sync_with_pick(next.clone(), 2).unwrap();
    let after = history.current_record().unwrap();

    let (old, new) = (before.children().unwrap(), after.children().unwrap());
    assert!(Arc::ptr_eq(&old[0], &new[0]));
    assert!(Arc::ptr_eq(&old[1], &new[1]));
    assert!(!Arc::ptr_eq(&old[2], &new[2]));
    assert_eq!(history.get().unwrap(), Some(next));
    assert_eq!(history.undo().get().unwrap(), Some(state()));
}

#[test]
fn bad_pick_index_is_rejected() {
    let history = History::new();
    history.push_sync(state()).unwrap();
    let err = history.push_sync_with_pick(state(), 3).unwrap_err();
    assert_eq!(err, HistoryError::InvalidPickIndex { index: 3, len: 3 });
    assert_eq!(history.len(), 1);
}

// ============================================================================
// Custom rules
// ============================================================================

fn take_field(node: &Value, field: &str) -> (Map<String, Value>, Option<Value>) {
    let mut rest = node.as_object().cloned().unwrap_or_default();
    let taken = rest.remove(field);
    (rest, taken)
}

fn image_rule() -> FnRule {
    FnRule::new(
        |node| node["type"] == "image",
        |node| {
            let (meta, image) = take_field(node, "image");
            Decomposed::leaf(vec![Value::Object(meta), image.unwrap_or(Value::Null)])
        },
        |parts| {
            let mut chunks = parts.chunks.into_iter();
            let mut node = chunks.next().unwrap_or(Value::Null);
            if let (Some(map), Some(image)) = (node.as_object_mut(), chunks.next()) {
                map.insert("image".into(), image);
            }
            node
        },
    )
    .with_name("image")
}

/// Containers keep their elements as children and an optional `data` field
/// in a chunk of its own.
fn container_rule() -> FnRule {
    FnRule::new(
        |node| node["type"] == "container",
        |node| {
            let (rest, elements) = take_field(node, "elements");
            let (meta, data) = take_field(&Value::Object(rest), "data");
            let mut chunks = vec![Value::Object(meta)];
            chunks.extend(data);
            let children = elements.and_then(|e| e.as_array().cloned());
            Decomposed::new(chunks, children)
        },
        |parts| {
            let mut chunks = parts.chunks.into_iter();
            let mut node = chunks.next().unwrap_or(Value::Null);
            if let Some(map) = node.as_object_mut() {
                if let Some(data) = chunks.next() {
                    map.insert("data".into(), data);
                }
                if let Some(children) = parts.children {
                    map.insert("elements".into(), Value::Array(children));
                }
            }
            node
        },
    )
    .with_name("container")
}

#[test]
fn custom_rules_round_trip() {
    let scene = json!({
        "type": "container",
        "elements": [
            {"type": "image", "left": 100, "top": 100, "image": "foo"},
            {"type": "image", "left": 200, "top": 200, "image": "bar"},
            {"type": "image", "left": 300, "top": 300, "image": "baz"},
        ],
    });
    let history = History::builder()
        .rule(image_rule())
        .rule(container_rule())
        .build()
        .unwrap();
    history.push_sync(scene.clone()).unwrap();
    assert_eq!(history.get().unwrap(), Some(scene));

    let record = history.current_record().unwrap();
    assert_eq!(record.children().unwrap().len(), 3);
    assert_eq!(record.children().unwrap()[0].hashes().len(), 2);
}

#[test]
fn custom_rule_with_missing_and_null_data() {
    // The root has no `data` at all, the child has an explicit null and no
    // elements.
    let scene = json!({
        "type": "container",
        "elements": [{"type": "container", "data": null}],
    });
    let rules: RuleSet = [Box::new(container_rule()) as Box<dyn TransformRule>]
        .into_iter()
        .collect();
    let history = History::builder().rules(rules).build().unwrap();
    history.push_sync(scene.clone()).unwrap();
    assert_eq!(history.get().unwrap(), Some(scene));
}

#[test]
fn default_rule_splits_children_field() {
    let history = History::new();
    history.push_sync(state()).unwrap();
    let record = history.current_record().unwrap();
    assert_eq!(record.children().unwrap().len(), 3);
    assert_eq!(record.node_count(), 6);
    assert_eq!(CHILDREN_FIELD, "children");
}

// ============================================================================
// Typed states and cyclic structure
// ============================================================================

/// A parent/child graph with back-references, stored as an arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Graph {
    nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Node {
    name: String,
    parent: Option<usize>,
    children: Vec<usize>,
}

#[test]
fn arena_encoded_cycles_round_trip() {
    let graph = Graph {
        nodes: vec![
            Node {
                name: "foo".into(),
                parent: None,
                children: vec![1],
            },
            Node {
                name: "boo".into(),
                parent: Some(0),
                children: vec![],
            },
        ],
    };

    let history: History<Graph> = History::new();
    history.push_sync(graph.clone()).unwrap();
    let restored = history.get().unwrap().unwrap();
    assert_eq!(restored, graph);

    let child = &restored.nodes[restored.nodes[0].children[0]];
    assert_eq!(child.name, "boo");
    assert_eq!(restored.nodes[child.parent.unwrap()].name, "foo");
}

#[test]
fn typed_history_undoes() {
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        value: u32,
    }

    let history: History<Counter> = History::builder()
        .initial_state(Counter { value: 0 })
        .build()
        .unwrap();
    history.push_sync(Counter { value: 1 }).unwrap();
    assert_eq!(history.undo().get().unwrap(), Some(Counter { value: 0 }));
}
