//! Switch recovery.
//!
//! Usecode has no switch instruction; a switch statement compiles to a run of
//! independent `if (x == v)` tests on the same variable, optionally followed by
//! an else for the default arm. Runs of two or more such tests are rewritten into
//! a [`SwitchNode`]. The replaced conditionals are kept inside the switch so the
//! binary and disassembly emitters can still walk the original instructions.

use tracing::debug;

use crate::node::*;
use crate::types::DataType;

fn chain_key(node: &Node) -> Option<&DataType> {
    let NodeKind::If(IfNode { kind: IfKind::If, cond: Some(cond), open: false, .. }) = &node.kind else {
        return None;
    };
    let NodeKind::BinOp { op: BinOp::Eq, lhs, .. } = &cond.kind else {
        return None;
    };
    match &lhs.kind {
        NodeKind::Push(d) if d.is_slot() => Some(d),
        _ => None,
    }
}

fn is_else(node: &Node) -> bool {
    matches!(&node.kind, NodeKind::If(IfNode { kind: IfKind::Else, open: false, .. }))
}

/// Builds the switch for `chain`, which must be non-empty and made of nodes accepted
/// by [`chain_key`], plus an optional trailing else.
fn build_switch(chain: Vec<Node>, default: Option<Node>) -> Node {
    let offset = chain[0].offset;
    let mut discriminant = None;
    let mut cases = Vec::with_capacity(chain.len() + 1);

    for node in &chain {
        let NodeKind::If(IfNode { cond: Some(cond), body, .. }) = &node.kind else {
            continue;
        };
        let NodeKind::BinOp { lhs, rhs, .. } = &cond.kind else {
            continue;
        };
        discriminant.get_or_insert_with(|| lhs.clone());
        cases.push(Case { offset: node.offset, value: Some(rhs.clone()), body: body.clone() });
    }

    let mut originals = chain;
    if let Some(node) = default {
        if let NodeKind::If(IfNode { body, .. }) = &node.kind {
            cases.push(Case { offset: node.offset, value: None, body: body.clone() });
        }
        originals.push(node);
    }

    let discriminant = discriminant.unwrap_or_else(|| Box::new(Node::new(offset, NodeKind::Push(DataType::Word(0)))));
    Node::new(offset, NodeKind::Switch(SwitchNode { discriminant, cases, originals }))
}

/// Rewrites every maximal chain of two or more equality tests on the same
/// variable in `body` into a switch. Only the given sequence is scanned, not the
/// bodies nested inside it.
pub fn collapse_switches(body: Vec<Node>) -> Vec<Node> {
    let mut out = Vec::with_capacity(body.len());
    let mut rest = body.into_iter().peekable();

    while let Some(node) = rest.next() {
        let Some(key) = chain_key(&node).cloned() else {
            out.push(node);
            continue;
        };

        let mut chain = vec![node];
        while rest.peek().and_then(chain_key) == Some(&key) {
            if let Some(next) = rest.next() {
                chain.push(next);
            }
        }

        if chain.len() < 2 {
            out.extend(chain);
            continue;
        }

        let default = if rest.peek().is_some_and(is_else) { rest.next() } else { None };
        let node = build_switch(chain, default);
        if let NodeKind::Switch(s) = &node.kind {
            debug!(offset = node.offset, cases = s.cases.len(), "collapsed switch");
        }
        out.push(node);
    }
    out
}
