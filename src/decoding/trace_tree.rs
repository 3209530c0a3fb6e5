//! Call-tree reconstruction from flat trace records.
//!
//! Traces arrive flat, each carrying a brace-wrapped `trace_address` path
//! (`"{}"` is the root, `"{0,2}"` the third child of the first child). They
//! are rebuilt into an index-addressed arena (no shared mutable nesting),
//! and two passes run in a fixed order:
//!
//! 1. delegatecall promotion: a leaf `delegatecall` is pure context
//!    forwarding; its `from` is copied onto the parent as
//!    `delegate_address` and the child is blanked. Parents are marked so a
//!    second pass is a no-op.
//! 2. delegate-chain pruning: a parent whose sole live child is a
//!    `delegatecall` is replaced by that child, repeated until no such
//!    parent remains.
//!
//! Promotion must run first: it needs the pre-pruned shape to tell context
//! forwarding apart from structural chains.

use alloy::primitives::{Address, B256};
use thiserror::Error;

use crate::types::raw::RawTrace;
use crate::types::trace::Trace;

#[derive(Debug, Error)]
pub enum TraceTreeError {
    #[error("invalid trace address '{0}'")]
    InvalidPath(String),
}

/// Parse `"{}"` or `"{0,2,13}"` into an integer path.
pub fn parse_trace_address(raw: &str) -> Result<Vec<u32>, TraceTreeError> {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| TraceTreeError::InvalidPath(raw.to_string()))?;
    if inner.is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<u32>()
                .map_err(|_| TraceTreeError::InvalidPath(raw.to_string()))
        })
        .collect()
}

#[derive(Debug, Default)]
struct Node {
    trace: Option<RawTrace>,
    delegate_address: Option<Address>,
    promoted: bool,
    children: Vec<Option<usize>>,
}

/// Arena-backed call tree for one transaction.
#[derive(Debug)]
pub struct TraceTree {
    nodes: Vec<Node>,
    root: usize,
}

impl TraceTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![Node::default()],
            root: 0,
        }
    }

    fn new_node(&mut self) -> usize {
        self.nodes.push(Node::default());
        self.nodes.len() - 1
    }

    fn child_at(&mut self, parent: usize, index: u32) -> usize {
        let index = index as usize;
        if self.nodes[parent].children.len() <= index {
            self.nodes[parent].children.resize(index + 1, None);
        }
        if let Some(existing) = self.nodes[parent].children[index] {
            return existing;
        }
        let child = self.new_node();
        self.nodes[parent].children[index] = Some(child);
        child
    }

    /// Insert a trace at its path, creating placeholder nodes for gaps.
    pub fn insert(&mut self, path: &[u32], trace: RawTrace) {
        let mut node = self.root;
        for step in path {
            node = self.child_at(node, *step);
        }
        self.nodes[node].trace = Some(trace);
    }

    fn is_live(&self, idx: usize) -> bool {
        self.nodes[idx].trace.is_some()
            || self.nodes[idx]
                .children
                .iter()
                .flatten()
                .any(|&child| self.is_live(child))
    }

    fn live_children(&self, idx: usize) -> Vec<(usize, usize)> {
        self.nodes[idx]
            .children
            .iter()
            .enumerate()
            .filter_map(|(slot, child)| child.map(|c| (slot, c)))
            .filter(|&(_, c)| self.is_live(c))
            .collect()
    }

    fn is_delegatecall(&self, idx: usize) -> bool {
        self.nodes[idx]
            .trace
            .as_ref()
            .is_some_and(|t| t.call_type.as_deref() == Some("delegatecall"))
    }

    /// Pass 1: promote leaf delegatecalls into their parent. Idempotent:
    /// promoted parents are marked and blanked children no longer match.
    pub fn promote_delegatecalls(&mut self) {
        let mut stack = vec![self.root];
        while let Some(parent) = stack.pop() {
            let children = self.live_children(parent);
            for &(_, child) in &children {
                stack.push(child);
            }

            if self.nodes[parent].trace.is_none() || self.nodes[parent].promoted {
                continue;
            }
            let leaf_delegate = children.iter().find(|&&(_, child)| {
                self.is_delegatecall(child) && self.live_children(child).is_empty()
            });
            if let Some(&(_, child)) = leaf_delegate {
                let from = self.nodes[child].trace.as_ref().and_then(|t| t.from);
                self.nodes[parent].delegate_address = from;
                self.nodes[parent].promoted = true;
                self.nodes[child].trace = None;
            }
        }
    }

    /// Pass 2: collapse sole-delegatecall chains, to fixpoint.
    pub fn prune_delegate_chains(&mut self) {
        self.root = self.prune_node(self.root);
    }

    fn prune_node(&mut self, mut idx: usize) -> usize {
        loop {
            let live = self.live_children(idx);
            match live.as_slice() {
                [(_, only)] if self.is_delegatecall(*only) => idx = *only,
                _ => break,
            }
        }
        for (slot, child) in self.live_children(idx) {
            let replacement = self.prune_node(child);
            self.nodes[idx].children[slot] = Some(replacement);
        }
        idx
    }

    /// Emit the processed tree as flat trace records with recomputed paths
    /// (`trace_address` positions reflect the pruned shape).
    pub fn flatten(&self, block_hash: B256, block_timestamp: u64) -> Vec<Trace> {
        let mut out = Vec::new();
        self.flatten_node(self.root, &mut Vec::new(), block_hash, block_timestamp, &mut out);
        out
    }

    fn flatten_node(
        &self,
        idx: usize,
        path: &mut Vec<u32>,
        block_hash: B256,
        block_timestamp: u64,
        out: &mut Vec<Trace>,
    ) {
        let live = self.live_children(idx);
        if let Some(raw) = &self.nodes[idx].trace {
            out.push(Trace {
                trace_id: Trace::make_trace_id(&raw.transaction_hash, path),
                from_address: raw.from,
                to_address: raw.to,
                value: raw.value,
                input: raw.input.clone(),
                output: raw.output.clone(),
                trace_type: raw.trace_type.clone(),
                call_type: raw.call_type.clone(),
                delegate_address: self.nodes[idx].delegate_address,
                gas: raw.gas.to::<u64>(),
                gas_used: raw.gas_used.to::<u64>(),
                subtraces: live.len() as u32,
                trace_address: path.clone(),
                error: raw.error.clone(),
                status: raw.status,
                block_number: 0,
                block_hash,
                block_timestamp,
                transaction_index: raw.transaction_index.to::<u64>() as u32,
                transaction_hash: raw.transaction_hash,
                reorg: false,
            });
        }
        for (slot, child) in live {
            path.push(slot as u32);
            self.flatten_node(child, path, block_hash, block_timestamp, out);
            path.pop();
        }
    }
}

impl Default for TraceTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Rebuild, promote, prune and flatten one transaction's traces.
/// `block_number` is stamped by the caller, which knows the fetch context.
pub fn process_transaction_traces(
    raw_traces: Vec<RawTrace>,
    block_number: u64,
    block_hash: B256,
    block_timestamp: u64,
) -> Result<Vec<Trace>, TraceTreeError> {
    let mut tree = TraceTree::new();
    for raw in raw_traces {
        let path = parse_trace_address(&raw.trace_address)?;
        tree.insert(&path, raw);
    }
    tree.promote_delegatecalls();
    tree.prune_delegate_chains();
    let mut traces = tree.flatten(block_hash, block_timestamp);
    for trace in &mut traces {
        trace.block_number = block_number;
    }
    Ok(traces)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Bytes, U256, U64};

    fn raw(call_type: Option<&str>, from: u8, trace_address: &str) -> RawTrace {
        RawTrace {
            transaction_hash: B256::repeat_byte(0xaa),
            transaction_index: U64::from(0),
            from: Some(Address::repeat_byte(from)),
            to: Some(Address::repeat_byte(from.wrapping_add(1))),
            value: U256::ZERO,
            input: Bytes::new(),
            output: Bytes::new(),
            trace_type: "call".to_string(),
            call_type: call_type.map(str::to_string),
            gas: U64::from(100_000u64),
            gas_used: U64::from(50_000u64),
            subtraces: U64::from(0),
            trace_address: trace_address.to_string(),
            error: None,
            status: 1,
        }
    }

    fn build(traces: Vec<RawTrace>) -> TraceTree {
        let mut tree = TraceTree::new();
        for t in traces {
            let path = parse_trace_address(&t.trace_address).unwrap();
            tree.insert(&path, t);
        }
        tree
    }

    #[test]
    fn parses_trace_addresses() {
        assert_eq!(parse_trace_address("{}").unwrap(), Vec::<u32>::new());
        assert_eq!(parse_trace_address("{0,2}").unwrap(), vec![0, 2]);
        assert_eq!(parse_trace_address("{13}").unwrap(), vec![13]);
        assert!(parse_trace_address("0,2").is_err());
        assert!(parse_trace_address("{a}").is_err());
    }

    #[test]
    fn sparse_insertion_fills_gaps_with_placeholders() {
        let tree = build(vec![raw(Some("call"), 1, "{}"), raw(Some("call"), 2, "{2}")]);
        let traces = tree.flatten(B256::ZERO, 0);
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[1].trace_address, vec![2]);
    }

    #[test]
    fn leaf_delegatecall_is_promoted_into_parent() {
        let mut tree = build(vec![
            raw(Some("call"), 1, "{}"),
            raw(Some("delegatecall"), 7, "{0}"),
            raw(Some("call"), 3, "{1}"),
        ]);
        tree.promote_delegatecalls();
        tree.prune_delegate_chains();
        let traces = tree.flatten(B256::ZERO, 0);

        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0].trace_address, Vec::<u32>::new());
        assert_eq!(traces[0].delegate_address, Some(Address::repeat_byte(7)));
        assert_eq!(traces[1].trace_address, vec![1]);
    }

    #[test]
    fn promotion_is_idempotent() {
        let mut tree = build(vec![
            raw(Some("call"), 1, "{}"),
            raw(Some("delegatecall"), 7, "{0}"),
        ]);
        tree.promote_delegatecalls();
        let first = tree.flatten(B256::ZERO, 0);
        tree.promote_delegatecalls();
        let second = tree.flatten(B256::ZERO, 0);

        assert_eq!(first.len(), second.len());
        assert_eq!(first[0].delegate_address, second[0].delegate_address);
        assert_eq!(
            first.iter().map(|t| t.trace_id.clone()).collect::<Vec<_>>(),
            second.iter().map(|t| t.trace_id.clone()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn sole_delegatecall_chain_collapses_to_deepest_call() {
        // Root call, then a normal call whose sole descendants are three
        // nested delegatecalls, with the real work at the bottom.
        let mut tree = build(vec![
            raw(Some("call"), 1, "{}"),
            raw(Some("call"), 2, "{0}"),
            raw(Some("delegatecall"), 3, "{0,0}"),
            raw(Some("delegatecall"), 4, "{0,0,0}"),
            raw(Some("delegatecall"), 5, "{0,0,0,0}"),
            raw(Some("call"), 6, "{0,0,0,0,0}"),
        ]);
        tree.promote_delegatecalls();
        tree.prune_delegate_chains();
        let traces = tree.flatten(B256::ZERO, 0);

        // Chain collapsed: the deepest delegatecall takes the normal call's
        // place directly under the root; the real call hangs beneath it.
        assert_eq!(traces.len(), 3);
        assert_eq!(traces[0].trace_address, Vec::<u32>::new());
        assert_eq!(traces[1].trace_address, vec![0]);
        assert_eq!(traces[1].from_address, Some(Address::repeat_byte(5)));
        assert_eq!(traces[2].trace_address, vec![0, 0]);
        assert_eq!(traces[2].from_address, Some(Address::repeat_byte(6)));
    }

    #[test]
    fn subtraces_reflect_pruned_shape() {
        let mut tree = build(vec![
            raw(Some("call"), 1, "{}"),
            raw(Some("call"), 2, "{0}"),
            raw(Some("call"), 3, "{1}"),
        ]);
        tree.promote_delegatecalls();
        tree.prune_delegate_chains();
        let traces = tree.flatten(B256::ZERO, 0);
        assert_eq!(traces[0].subtraces, 2);
        assert_eq!(traces[1].subtraces, 0);
    }

    #[test]
    fn process_stamps_block_context_and_trace_ids() {
        let traces = process_transaction_traces(
            vec![raw(Some("call"), 1, "{}"), raw(Some("call"), 2, "{0}")],
            42,
            B256::repeat_byte(0xbb),
            1_700_000_000,
        )
        .unwrap();
        assert_eq!(traces[0].block_number, 42);
        assert_eq!(traces[0].block_timestamp, 1_700_000_000);
        assert_eq!(traces[0].trace_id, format!("{}", B256::repeat_byte(0xaa)));
        assert_eq!(traces[1].trace_id, format!("{}-0", B256::repeat_byte(0xaa)));
    }
}
