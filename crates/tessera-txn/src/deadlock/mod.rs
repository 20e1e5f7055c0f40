//! Deadlock detection using wait-for graph analysis.
//!
//! The graph is owned by the lock ledger and mutated under the ledger's
//! mutex, so it carries no locking of its own. Every time a lock request has
//! to wait, the ledger records waiter → holder edges and asks the graph for a
//! cycle reachable from the waiter.
//!
//! ```text
//! T1 waits for T2:  T1 -> T2
//! T2 waits for T1:  T2 -> T1   (cycle = deadlock)
//! ```
//!
//! # Victim Selection
//!
//! The transaction in the cycle with the lowest abort cost is chosen:
//! younger transactions holding fewer locks go first. Ties are broken
//! towards the higher (younger) transaction id so the choice is stable.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Instant;

use tessera_common::types::TxnId;

/// A node in the wait-for graph representing a transaction.
#[derive(Debug, Clone)]
pub struct WfgNode {
    /// Transaction ID.
    pub txn_id: TxnId,
    /// When this transaction was registered.
    pub start_time: Instant,
    /// Number of locks held when it last had to wait.
    pub locks_held: usize,
}

impl WfgNode {
    /// Creates a node starting now.
    pub fn new(txn_id: TxnId) -> Self {
        Self {
            txn_id,
            start_time: Instant::now(),
            locks_held: 0,
        }
    }

    /// Creates a node with all fields specified.
    pub fn with_details(txn_id: TxnId, start_time: Instant, locks_held: usize) -> Self {
        Self {
            txn_id,
            start_time,
            locks_held,
        }
    }

    /// Cost of aborting this transaction. Higher is less desirable.
    pub fn abort_cost(&self) -> u128 {
        self.start_time.elapsed().as_millis() + self.locks_held as u128 * 100
    }
}

/// A detected deadlock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadlockInfo {
    /// Transactions forming the cycle, in wait order.
    pub cycle: Vec<TxnId>,
    /// The transaction chosen to fail.
    pub victim: TxnId,
}

/// The wait-for graph.
#[derive(Default)]
pub struct WaitForGraph {
    nodes: HashMap<TxnId, WfgNode>,
    /// waiter -> holders it waits for
    edges: HashMap<TxnId, HashSet<TxnId>>,
    checks: u64,
}

impl WaitForGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a transaction if it is not already known.
    pub fn add_txn(&mut self, txn_id: TxnId) {
        self.nodes
            .entry(txn_id)
            .or_insert_with(|| WfgNode::new(txn_id));
    }

    /// Registers or replaces a transaction node.
    pub fn add_txn_with_details(&mut self, node: WfgNode) {
        self.nodes.insert(node.txn_id, node);
    }

    /// Removes a transaction and every edge touching it.
    pub fn remove_txn(&mut self, txn_id: TxnId) {
        self.nodes.remove(&txn_id);
        self.edges.remove(&txn_id);
        self.edges.retain(|_, holders| {
            holders.remove(&txn_id);
            !holders.is_empty()
        });
    }

    /// Replaces the set of holders a waiter is blocked on.
    pub fn set_waits(&mut self, waiter: TxnId, holders: &[TxnId], locks_held: usize) {
        self.add_txn(waiter);
        if let Some(node) = self.nodes.get_mut(&waiter) {
            node.locks_held = locks_held;
        }
        for holder in holders {
            self.add_txn(*holder);
        }
        if holders.is_empty() {
            self.edges.remove(&waiter);
        } else {
            self.edges.insert(waiter, holders.iter().copied().collect());
        }
    }

    /// Adds a single wait-for edge.
    pub fn add_wait(&mut self, waiter: TxnId, holder: TxnId) {
        self.add_txn(waiter);
        self.add_txn(holder);
        self.edges.entry(waiter).or_default().insert(holder);
    }

    /// Clears all waits for a transaction.
    pub fn clear_waits(&mut self, waiter: TxnId) {
        self.edges.remove(&waiter);
    }

    /// Looks for a cycle reachable from `start`.
    pub fn detect_deadlock(&mut self, start: TxnId) -> Option<DeadlockInfo> {
        self.checks += 1;

        let mut visited = HashSet::new();
        let mut path = Vec::new();
        if !self.dfs_find_cycle(start, &mut visited, &mut path) {
            return None;
        }

        // The last element closes the cycle; it appears once more earlier on.
        let closing = *path.last()?;
        let first = path.iter().position(|t| *t == closing)?;
        let cycle = path[first..path.len() - 1].to_vec();
        let victim = self.select_victim(&cycle)?;

        Some(DeadlockInfo { cycle, victim })
    }

    fn dfs_find_cycle(
        &self,
        current: TxnId,
        visited: &mut HashSet<TxnId>,
        path: &mut Vec<TxnId>,
    ) -> bool {
        if path.contains(&current) {
            path.push(current);
            return true;
        }
        if !visited.insert(current) {
            return false;
        }

        path.push(current);
        if let Some(holders) = self.edges.get(&current) {
            let mut ordered: Vec<TxnId> = holders.iter().copied().collect();
            ordered.sort();
            for holder in ordered {
                if self.dfs_find_cycle(holder, visited, path) {
                    return true;
                }
            }
        }
        path.pop();
        false
    }

    fn select_victim(&self, cycle: &[TxnId]) -> Option<TxnId> {
        cycle
            .iter()
            .copied()
            .min_by(|a, b| {
                let cost_a = self.nodes.get(a).map_or(0, WfgNode::abort_cost);
                let cost_b = self.nodes.get(b).map_or(0, WfgNode::abort_cost);
                cost_a.cmp(&cost_b).then_with(|| b.cmp(a))
            })
    }

    /// Returns the holders a transaction waits for.
    pub fn get_waits(&self, waiter: TxnId) -> Vec<TxnId> {
        let mut waits: Vec<TxnId> = self
            .edges
            .get(&waiter)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        waits.sort();
        waits
    }

    /// Returns true if the transaction is waiting.
    pub fn is_waiting(&self, txn_id: TxnId) -> bool {
        self.edges.contains_key(&txn_id)
    }

    /// Number of registered transactions.
    pub fn txn_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of wait edges.
    pub fn edge_count(&self) -> usize {
        self.edges.values().map(HashSet::len).sum()
    }

    /// Number of cycle checks performed.
    pub fn checks(&self) -> u64 {
        self.checks
    }
}

impl fmt::Debug for WaitForGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitForGraph")
            .field("txn_count", &self.txn_count())
            .field("edge_count", &self.edge_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn txn(n: u64) -> TxnId {
        TxnId::new(n)
    }

    #[test]
    fn test_abort_cost_grows_with_locks() {
        let now = Instant::now();
        let light = WfgNode::with_details(txn(1), now, 0);
        let heavy = WfgNode::with_details(txn(2), now, 5);
        assert!(heavy.abort_cost() > light.abort_cost());
    }

    #[test]
    fn test_add_remove() {
        let mut wfg = WaitForGraph::new();
        wfg.add_txn(txn(1));
        wfg.add_txn(txn(2));
        assert_eq!(wfg.txn_count(), 2);

        wfg.add_wait(txn(1), txn(2));
        assert_eq!(wfg.edge_count(), 1);
        assert!(wfg.is_waiting(txn(1)));

        wfg.remove_txn(txn(2));
        assert_eq!(wfg.edge_count(), 0);
        assert_eq!(wfg.txn_count(), 1);
    }

    #[test]
    fn test_no_deadlock() {
        let mut wfg = WaitForGraph::new();
        wfg.add_wait(txn(1), txn(2));
        wfg.add_wait(txn(2), txn(3));

        assert!(wfg.detect_deadlock(txn(1)).is_none());
        assert!(wfg.detect_deadlock(txn(2)).is_none());
        assert_eq!(wfg.checks(), 2);
    }

    #[test]
    fn test_two_way_cycle() {
        let mut wfg = WaitForGraph::new();
        wfg.add_wait(txn(1), txn(2));
        wfg.add_wait(txn(2), txn(1));

        let info = wfg.detect_deadlock(txn(1)).unwrap();
        assert_eq!(info.cycle, vec![txn(1), txn(2)]);
        assert!(info.victim == txn(1) || info.victim == txn(2));
    }

    #[test]
    fn test_three_way_cycle() {
        let mut wfg = WaitForGraph::new();
        wfg.add_wait(txn(1), txn(2));
        wfg.add_wait(txn(2), txn(3));
        wfg.add_wait(txn(3), txn(1));

        let info = wfg.detect_deadlock(txn(2)).unwrap();
        assert_eq!(info.cycle.len(), 3);
    }

    #[test]
    fn test_cycle_not_through_start() {
        let mut wfg = WaitForGraph::new();
        wfg.add_wait(txn(1), txn(2));
        wfg.add_wait(txn(2), txn(3));
        wfg.add_wait(txn(3), txn(2));

        let info = wfg.detect_deadlock(txn(1)).unwrap();
        assert_eq!(info.cycle, vec![txn(2), txn(3)]);
        assert_ne!(info.victim, txn(1));
    }

    #[test]
    fn test_victim_holds_fewest_locks() {
        let mut wfg = WaitForGraph::new();
        let started = Instant::now() - Duration::from_secs(1);
        wfg.add_txn_with_details(WfgNode::with_details(txn(1), started, 10));
        wfg.add_txn_with_details(WfgNode::with_details(txn(2), started, 0));
        wfg.add_wait(txn(1), txn(2));
        wfg.add_wait(txn(2), txn(1));

        assert_eq!(wfg.detect_deadlock(txn(1)).unwrap().victim, txn(2));
    }

    #[test]
    fn test_set_waits_replaces_edges() {
        let mut wfg = WaitForGraph::new();
        wfg.set_waits(txn(1), &[txn(2), txn(3)], 4);
        assert_eq!(wfg.get_waits(txn(1)), vec![txn(2), txn(3)]);

        wfg.set_waits(txn(1), &[txn(3)], 4);
        assert_eq!(wfg.get_waits(txn(1)), vec![txn(3)]);

        wfg.set_waits(txn(1), &[], 4);
        assert!(!wfg.is_waiting(txn(1)));
    }
}
