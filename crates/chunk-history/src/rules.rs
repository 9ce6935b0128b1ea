#![forbid(unsafe_code)]

//! Transform rules: how a state node splits into chunks and children.
//!
//! A rule is three capabilities over a [`Value`] node:
//!
//! - [`matches`](TransformRule::matches): does this rule handle the node?
//! - [`decompose`](TransformRule::decompose): split the node into chunk
//!   values (stored by content hash) and an optional list of child nodes
//!   (decomposed recursively).
//! - [`recompose`](TransformRule::recompose): the inverse, given decoded
//!   chunks and already-recomposed children.
//!
//! Rules in a [`RuleSet`] are tried in registration order and the first match
//! wins. When nothing matches, [`DefaultRule`] applies.
//!
//! # Choosing chunk boundaries
//!
//! Anything that changes rarely but is large (an embedded image, a long text
//! body) belongs in its own chunk: unchanged chunks are stored once no matter
//! how many history entries reference them. Children should be split out
//! rather than kept inside a chunk, otherwise every edit to a child re-encodes
//! the parent too.
//!
//! ```
//! use chunk_history::{Decomposed, FnRule};
//! use serde_json::{Value, json};
//!
//! // Keep an image's pixel data in a chunk of its own.
//! let image_rule = FnRule::new(
//!     |node: &Value| node["type"] == "image",
//!     |node: &Value| {
//!         let mut meta = node.clone();
//!         let data = meta
//!             .as_object_mut()
//!             .and_then(|m| m.remove("data"))
//!             .unwrap_or(Value::Null);
//!         Decomposed::leaf(vec![meta, data])
//!     },
//!     |parts: Decomposed| {
//!         let mut chunks = parts.chunks.into_iter();
//!         let mut node = chunks.next().unwrap_or(Value::Null);
//!         if let (Some(map), Some(data)) = (node.as_object_mut(), chunks.next()) {
//!             map.insert("data".into(), data);
//!         }
//!         node
//!     },
//! );
//! # let _ = image_rule;
//! ```

use std::fmt;

use serde_json::{Map, Value};

use crate::error::HistoryError;

/// Field the [`DefaultRule`] treats as a node's child list.
pub const CHILDREN_FIELD: &str = "children";

/// The split form of one node: chunk values plus optional children.
///
/// `children: None` and `children: Some(vec![])` are distinct and both
/// survive a round-trip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decomposed {
    pub chunks: Vec<Value>,
    pub children: Option<Vec<Value>>,
}

impl Decomposed {
    #[must_use]
    pub fn new(chunks: Vec<Value>, children: Option<Vec<Value>>) -> Self {
        Self { chunks, children }
    }

    /// A node with no child list.
    #[must_use]
    pub fn leaf(chunks: Vec<Value>) -> Self {
        Self {
            chunks,
            children: None,
        }
    }
}

/// One way of splitting and rebuilding a family of nodes.
pub trait TransformRule {
    fn matches(&self, node: &Value) -> bool;

    fn decompose(&self, node: &Value) -> Decomposed;

    fn recompose(&self, parts: Decomposed) -> Value;

    /// Name used in logs.
    fn name(&self) -> &str {
        "anonymous"
    }
}

/// Which rule decomposed a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleIndex {
    /// Position in the [`RuleSet`].
    Custom(usize),
    /// No registered rule matched.
    Default,
}

impl fmt::Display for RuleIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Custom(i) => write!(f, "rule#{i}"),
            Self::Default => f.write_str("default"),
        }
    }
}

fn split_children(node: &Value) -> Option<(&Map<String, Value>, &Vec<Value>)> {
    let map = node.as_object()?;
    let children = map.get(CHILDREN_FIELD)?.as_array()?;
    Some((map, children))
}

/// Fallback rule: one chunk per node, `children` split out when it is an array.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRule;

impl TransformRule for DefaultRule {
    fn matches(&self, _node: &Value) -> bool {
        true
    }

    fn decompose(&self, node: &Value) -> Decomposed {
        if let Some((map, children)) = split_children(node) {
            let own: Map<String, Value> = map
                .iter()
                .filter(|(key, _)| key.as_str() != CHILDREN_FIELD)
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            return Decomposed::new(vec![Value::Object(own)], Some(children.clone()));
        }
        Decomposed::leaf(vec![node.clone()])
    }

    fn recompose(&self, parts: Decomposed) -> Value {
        let chunk = parts.chunks.into_iter().next().unwrap_or(Value::Null);
        let Some(children) = parts.children else {
            return chunk;
        };
        let mut map = match chunk {
            Value::Object(map) => map,
            // A non-object chunk cannot carry fields; children win.
            _ => Map::new(),
        };
        map.insert(CHILDREN_FIELD.to_string(), Value::Array(children));
        Value::Object(map)
    }

    fn name(&self) -> &str {
        "default"
    }
}

type MatchFn = Box<dyn Fn(&Value) -> bool>;
type DecomposeFn = Box<dyn Fn(&Value) -> Decomposed>;
type RecomposeFn = Box<dyn Fn(Decomposed) -> Value>;

/// A rule assembled from closures.
pub struct FnRule {
    name: String,
    matches: MatchFn,
    decompose: DecomposeFn,
    recompose: RecomposeFn,
}

impl FnRule {
    pub fn new(
        matches: impl Fn(&Value) -> bool + 'static,
        decompose: impl Fn(&Value) -> Decomposed + 'static,
        recompose: impl Fn(Decomposed) -> Value + 'static,
    ) -> Self {
        Self {
            name: "fn".to_string(),
            matches: Box::new(matches),
            decompose: Box::new(decompose),
            recompose: Box::new(recompose),
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl fmt::Debug for FnRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnRule").field("name", &self.name).finish()
    }
}

impl TransformRule for FnRule {
    fn matches(&self, node: &Value) -> bool {
        (self.matches)(node)
    }

    fn decompose(&self, node: &Value) -> Decomposed {
        (self.decompose)(node)
    }

    fn recompose(&self, parts: Decomposed) -> Value {
        (self.recompose)(parts)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Ordered rule list with the default rule as fallback.
#[derive(Default)]
pub struct RuleSet {
    rules: Vec<Box<dyn TransformRule>>,
    fallback: DefaultRule,
}

impl fmt::Debug for RuleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(|r| r.name()))
            .finish()
    }
}

impl RuleSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, rule: impl TransformRule + 'static) {
        self.rules.push(Box::new(rule));
    }

    pub fn push_boxed(&mut self, rule: Box<dyn TransformRule>) {
        self.rules.push(rule);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First registered rule that matches `node`, else the default.
    pub fn select(&self, node: &Value) -> (RuleIndex, &dyn TransformRule) {
        match self.rules.iter().position(|rule| rule.matches(node)) {
            Some(i) => (RuleIndex::Custom(i), &*self.rules[i]),
            None => (RuleIndex::Default, &self.fallback),
        }
    }

    /// Resolve a stored index back to its rule.
    pub fn resolve(&self, index: RuleIndex) -> Result<&dyn TransformRule, HistoryError> {
        match index {
            RuleIndex::Custom(i) => self
                .rules
                .get(i)
                .map(|rule| &**rule)
                .ok_or(HistoryError::UnknownRule { index: i }),
            RuleIndex::Default => Ok(&self.fallback),
        }
    }
}

impl FromIterator<Box<dyn TransformRule>> for RuleSet {
    fn from_iter<I: IntoIterator<Item = Box<dyn TransformRule>>>(iter: I) -> Self {
        Self {
            rules: iter.into_iter().collect(),
            fallback: DefaultRule,
        }
    }
}
