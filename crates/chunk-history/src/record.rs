#![forbid(unsafe_code)]

//! Record trees: the reference-only form of one state snapshot.
//!
//! A [`Record`] mirrors the shape of the state it was decomposed from, but
//! holds only chunk keys. Child records sit behind [`Arc`], so a snapshot
//! that changed a single child shares every other child record (and through
//! it, every chunk below) with the snapshot before it.
//!
//! ```text
//! push(s1)                          push(s2, pick = 1)
//! ┌────────────────────┐            ┌────────────────────┐
//! │ root  [k0]         │            │ root  [k0]         │
//! │ ├─ a  [k1] ◄───────┼────────────┼─ a   (shared Arc)  │
//! │ ├─ b  [k2]         │            │ ├─ b' [k5]  (new)  │
//! │ └─ c  [k3] ◄───────┼────────────┼─ c   (shared Arc)  │
//! └────────────────────┘            └────────────────────┘
//! ```

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::chunk_store::ChunkStore;
use crate::codec;
use crate::error::HistoryError;
use crate::hash::ChunkKey;
use crate::rules::{Decomposed, RuleIndex, RuleSet};

/// One decomposed node. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    hashes: Vec<ChunkKey>,
    rule: RuleIndex,
    children: Option<Vec<Arc<Record>>>,
}

impl Record {
    /// Chunk keys in the order the rule produced them.
    #[must_use]
    pub fn hashes(&self) -> &[ChunkKey] {
        &self.hashes
    }

    #[must_use]
    pub fn rule(&self) -> RuleIndex {
        self.rule
    }

    #[must_use]
    pub fn children(&self) -> Option<&[Arc<Record>]> {
        self.children.as_deref()
    }

    /// Records in this subtree, including `self`.
    #[must_use]
    pub fn node_count(&self) -> usize {
        1 + self
            .children
            .iter()
            .flatten()
            .map(|child| child.node_count())
            .sum::<usize>()
    }
}

/// Builds records from state, writing chunks as it goes.
pub(crate) struct Decomposer<'a> {
    rules: &'a RuleSet,
    store: &'a mut ChunkStore,
}

impl<'a> Decomposer<'a> {
    pub(crate) fn new(rules: &'a RuleSet, store: &'a mut ChunkStore) -> Self {
        Self { rules, store }
    }

    /// Decompose `node`, reusing `prev`'s children where `pick` allows.
    ///
    /// With `pick = Some(i)` only child `i` is decomposed afresh; the other
    /// child records are shared with `prev`. If `prev` has no children or a
    /// different number of them, every child is decomposed.
    pub(crate) fn decompose(
        &mut self,
        node: &Value,
        prev: Option<&Record>,
        pick: Option<usize>,
    ) -> Result<Record, HistoryError> {
        let (rule_index, rule) = self.rules.select(node);
        let Decomposed { chunks, children } = rule.decompose(node);

        if let Some(index) = pick {
            let len = children.as_ref().map_or(0, Vec::len);
            if index >= len {
                return Err(HistoryError::InvalidPickIndex { index, len });
            }
        }

        let hashes = chunks
            .iter()
            .map(|chunk| -> Result<ChunkKey, HistoryError> {
                Ok(self.store.put_payload(codec::encode(chunk)?))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let children = match (children, pick, prev.and_then(|p| p.children.as_ref())) {
            (None, _, _) => None,
            (Some(nodes), Some(index), Some(prev_children))
                if prev_children.len() == nodes.len() =>
            {
                let mut reused = prev_children.clone();
                reused[index] = Arc::new(self.decompose(&nodes[index], None, None)?);
                Some(reused)
            }
            (Some(nodes), pick, prev_children) => {
                if let (Some(index), Some(prev_children)) = (pick, prev_children) {
                    debug!(
                        index,
                        prev = prev_children.len(),
                        next = nodes.len(),
                        "child count changed; pick ignored"
                    );
                }
                Some(
                    nodes
                        .iter()
                        .map(|child| self.decompose(child, None, None).map(Arc::new))
                        .collect::<Result<Vec<_>, _>>()?,
                )
            }
        };

        Ok(Record {
            hashes,
            rule: rule_index,
            children,
        })
    }
}

/// Rebuild the state a record was decomposed from.
pub(crate) fn recompose(
    record: &Record,
    rules: &RuleSet,
    store: &ChunkStore,
) -> Result<Value, HistoryError> {
    let chunks = record
        .hashes
        .iter()
        .map(|key| -> Result<Value, HistoryError> { Ok(codec::decode(store.get(*key)?)?) })
        .collect::<Result<Vec<_>, _>>()?;

    let children = record
        .children
        .as_ref()
        .map(|children| {
            children
                .iter()
                .map(|child| recompose(child, rules, store))
                .collect::<Result<Vec<_>, _>>()
        })
        .transpose()?;

    let rule = rules.resolve(record.rule)?;

    Ok(rule.recompose(Decomposed { chunks, children }))
}
