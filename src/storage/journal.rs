//! Undo journal for the open write transaction.
//!
//! Every mutation records its inverse. Rolling back replays the inverses in
//! reverse order, which restores the arena, its indexes and the id counter.

use crate::model::{Node, NodeId, Values};
use crate::tx::TxId;

use super::StoreStats;

#[derive(Debug, Clone)]
pub(crate) enum UndoOp {
    Created(NodeId),
    Removed(Box<Node>),
    PropertyChanged {
        id: NodeId,
        key: String,
        old: Option<Values>,
    },
}

#[derive(Debug)]
pub(crate) struct Journal {
    pub tx: TxId,
    pub next_id_at_begin: u64,
    pub ops: Vec<UndoOp>,
    pub stats: StoreStats,
}

impl Journal {
    pub fn new(tx: TxId, next_id_at_begin: u64) -> Self {
        Self { tx, next_id_at_begin, ops: Vec::new(), stats: StoreStats::default() }
    }

    pub fn record(&mut self, op: UndoOp) {
        match &op {
            UndoOp::Created(_) => self.stats.nodes_created += 1,
            UndoOp::Removed(_) => self.stats.nodes_removed += 1,
            UndoOp::PropertyChanged { .. } => self.stats.properties_set += 1,
        }
        self.ops.push(op);
    }
}
