#![forbid(unsafe_code)]

//! Property tests for [`History`] invariants.
//!
//! Validates:
//! - Arbitrary JSON trees, floats included, survive a push/get round-trip.
//! - Random push/undo/redo sequences agree with a plain vector model.
//! - Visible length never exceeds `max_length`.
//! - Re-pushing an identical state adds no chunks.
//! - Chunked and raw storage are observably identical.

use proptest::prelude::*;
use serde_json::{Map, Number, Value, json};

use chunk_history::History;

// ============================================================================
// Strategy helpers
// ============================================================================

/// Arbitrary JSON, finite floats included.
fn json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        any::<f64>().prop_filter_map("finite", |x| Number::from_f64(x).map(Value::Number)),
        "[a-z]{0,8}".prop_map(Value::String),
    ];
    leaf.prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

/// A node with a `children` array, so the default rule recurses.
fn tree_strategy() -> impl Strategy<Value = Value> {
    let leaf = (any::<u8>(), "[a-z]{0,4}").prop_map(|(id, name)| json!({"id": id, "name": name}));
    leaf.prop_recursive(3, 32, 4, |inner| {
        (any::<u8>(), prop::collection::vec(inner, 0..4))
            .prop_map(|(id, children)| json!({"id": id, "children": children}))
    })
}

#[derive(Debug, Clone)]
enum Op {
    Push(i64),
    Undo,
    Redo,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => any::<i64>().prop_map(Op::Push),
        2 => Just(Op::Undo),
        2 => Just(Op::Redo),
    ]
}

/// Reference model: a vector, a cursor, and the oldest reachable index.
#[derive(Debug, Default)]
struct Model {
    states: Vec<i64>,
    cursor: Option<usize>,
    floor: usize,
}

impl Model {
    fn push(&mut self, value: i64, max_length: usize) {
        let next = self.cursor.map_or(0, |c| c + 1);
        self.states.truncate(next);
        self.states.push(value);
        self.cursor = Some(next);
        self.floor = self.floor.max((next + 1).saturating_sub(max_length));
    }

    fn undo(&mut self) {
        match self.cursor {
            Some(c) if c > self.floor => self.cursor = Some(c - 1),
            _ => {}
        }
    }

    fn redo(&mut self) {
        match self.cursor {
            Some(c) if c + 1 < self.states.len() => self.cursor = Some(c + 1),
            _ => {}
        }
    }

    fn current(&self) -> Option<i64> {
        self.cursor.map(|c| self.states[c])
    }
}

// ============================================================================
// Invariant 1: Lossless round-trip
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn arbitrary_json_round_trips(value in json_strategy()) {
        let history = History::new();
        history.push_sync(value.clone()).unwrap();
        prop_assert_eq!(history.get().unwrap(), Some(value));
    }

    #[test]
    fn floats_round_trip(xs in prop::collection::vec(any::<f64>(), 1..32)) {
        let finite: Vec<f64> = xs.into_iter().filter(|x| x.is_finite()).collect();
        let history = History::new();
        history.push_sync(json!({"xs": finite})).unwrap();
        let back = history.get().unwrap().unwrap();
        for (i, x) in finite.iter().enumerate() {
            prop_assert_eq!(back["xs"][i].as_f64(), Some(*x));
        }
    }

    #[test]
    fn trees_round_trip_through_undo(a in tree_strategy(), b in tree_strategy()) {
        let history = History::new();
        history.push_sync(a.clone()).unwrap();
        history.push_sync(b.clone()).unwrap();
        prop_assert_eq!(history.get().unwrap(), Some(b));
        prop_assert_eq!(history.undo().get().unwrap(), Some(a));
    }
}

// ============================================================================
// Invariant 2: Cursor semantics match the model
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn operations_match_model(
        ops in prop::collection::vec(op_strategy(), 1..60),
        max_length in 1usize..8,
    ) {
        let history = History::builder().max_length(max_length).build().unwrap();
        let mut model = Model::default();

        for op in &ops {
            match op {
                Op::Push(v) => {
                    history.push_sync(json!(v)).unwrap();
                    model.push(*v, max_length);
                }
                Op::Undo => {
                    history.undo();
                    model.undo();
                }
                Op::Redo => {
                    history.redo();
                    model.redo();
                }
            }
            prop_assert_eq!(history.get().unwrap(), model.current().map(|v| json!(v)));
            prop_assert!(history.len() <= max_length);
        }
    }
}

// ============================================================================
// Invariant 3: Content addressing deduplicates
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn identical_push_adds_no_chunks(tree in tree_strategy(), repeats in 1usize..5) {
        let history = History::new();
        history.push_sync(tree.clone()).unwrap();
        let chunks = history.stats().chunks.chunks;
        for _ in 0..repeats {
            history.push_sync(tree.clone()).unwrap();
        }
        prop_assert_eq!(history.stats().chunks.chunks, chunks);
        prop_assert_eq!(history.stats().commits, 1 + repeats as u64);
    }

    #[test]
    fn raw_and_chunked_agree(
        states in prop::collection::vec(tree_strategy(), 1..6),
        undos in 0usize..6,
    ) {
        let chunked = History::new();
        let raw = History::builder().use_chunks(false).build().unwrap();
        for state in &states {
            chunked.push_sync(state.clone()).unwrap();
            raw.push_sync(state.clone()).unwrap();
        }
        for _ in 0..undos {
            chunked.undo();
            raw.undo();
        }
        prop_assert_eq!(chunked.get().unwrap(), raw.get().unwrap());
        prop_assert_eq!(chunked.has_redo(), raw.has_redo());
    }
}
