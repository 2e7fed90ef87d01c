//! Optional rank reordering driven by the communication graph.
//!
//! The weight between two ranks is the volume they exchange across the
//! heavy transposes. The graph is gathered on rank 0, handed to a pluggable
//! partitioner that splits it into one part per compute node, and the
//! resulting permutation becomes a new communicator that co-locates heavily
//! communicating ranks. A partitioner failure falls back to the identity
//! permutation: reordering is an optimization, never a requirement.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use itertools::Itertools;
use mpi::datatype::PartitionMut;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;
use mpi::Count;

/// Why a partitioning attempt was rejected.
#[derive(Debug)]
pub struct PartitionError(
    /// Human-readable reason.
    pub String,
);

impl std::fmt::Display for PartitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "graph partitioning failed: {}", self.0)
    }
}

impl std::error::Error for PartitionError {}

/// External graph partitioner seam.
///
/// The graph is in CSR form: the neighbours of vertex `v` are
/// `adj[xadj[v]..xadj[v + 1]]` with edge weights in the same positions of
/// `weights`. The returned part of each vertex must respect the exact part
/// sizes `round(targets[p] * n)`.
pub trait GraphPartitioner {
    /// Split `n = xadj.len() - 1` vertices into `n_parts` parts.
    fn partition(
        &self,
        xadj: &[usize],
        adj: &[usize],
        weights: &[i64],
        n_parts: usize,
        targets: &[f64],
    ) -> Result<Vec<usize>, PartitionError>;
}

/// Built-in partitioner: capacity-constrained greedy growth.
///
/// Vertices are visited by decreasing total edge weight; each goes to the
/// part with the strongest ties among those with remaining capacity.
#[derive(Debug, Default)]
pub struct GreedyPartitioner;

impl GraphPartitioner for GreedyPartitioner {
    fn partition(
        &self,
        xadj: &[usize],
        adj: &[usize],
        weights: &[i64],
        n_parts: usize,
        targets: &[f64],
    ) -> Result<Vec<usize>, PartitionError> {
        let n = xadj.len() - 1;
        if n_parts < 2 {
            return Err(PartitionError("a single part is no partition".into()));
        }
        let mut capacity: Vec<usize> = targets
            .iter()
            .map(|&t| (t * n as f64).round() as usize)
            .collect();
        if capacity.iter().sum::<usize>() != n {
            return Err(PartitionError(format!(
                "part sizes {:?} do not cover {} vertices",
                capacity, n
            )));
        }

        let mut total_weight: Vec<(usize, i64)> = (0..n)
            .map(|v| (v, weights[xadj[v]..xadj[v + 1]].iter().sum::<i64>()))
            .collect();
        total_weight.sort_by_key(|&(v, w)| (std::cmp::Reverse(w), v));

        let mut part = vec![usize::MAX; n];
        for &(v, _) in total_weight.iter() {
            let mut ties = vec![0i64; n_parts];
            for e in xadj[v]..xadj[v + 1] {
                let u = adj[e];
                if part[u] != usize::MAX {
                    ties[part[u]] += weights[e];
                }
            }
            let mut best = usize::MAX;
            for p in 0..n_parts {
                if capacity[p] == 0 {
                    continue;
                }
                if best == usize::MAX
                    || ties[p] > ties[best]
                    || (ties[p] == ties[best] && capacity[p] > capacity[best])
                {
                    best = p;
                }
            }
            if best == usize::MAX {
                return Err(PartitionError("ran out of capacity".into()));
            }
            part[v] = best;
            capacity[best] -= 1;
        }
        Ok(part)
    }
}

/// Number of compute nodes and per-node process counts, detected from the
/// processor names.
fn detect_nodes(comm: &SimpleCommunicator) -> (usize, Vec<usize>) {
    let name = mpi::environment::processor_name().unwrap_or_else(|_| String::from("unknown"));
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    let key = hasher.finish() as i64;

    let size = comm.size() as usize;
    let mut keys = vec![0i64; size];
    comm.all_gather_into(&key, &mut keys[..]);

    let mut nodes: Vec<(i64, usize)> = Vec::new();
    for k in keys {
        match nodes.iter_mut().find(|(nk, _)| *nk == k) {
            Some((_, c)) => *c += 1,
            None => nodes.push((k, 1)),
        }
    }
    let sizes: Vec<usize> = nodes.iter().map(|&(_, c)| c).collect();
    (sizes.len(), sizes)
}

/// Build the reordered communicator from the accumulated exchange volumes.
///
/// `weights[r]` is the volume this rank exchanges with rank `r`. Returns
/// `None` when reordering cannot help (a single node, or a partitioner
/// failure, both reported with a warning).
pub fn build_reordered_comm(
    comm: &SimpleCommunicator,
    weights: &[i64],
    partitioner: &dyn GraphPartitioner,
) -> Option<SimpleCommunicator> {
    let size = comm.size() as usize;
    let rank = comm.rank();

    let (n_nodes, node_sizes) = detect_nodes(comm);
    if n_nodes < 2 {
        if rank == 0 {
            eprintln!("poisfft: only one compute node detected, keeping the rank order");
        }
        return None;
    }
    let targets: Vec<f64> = node_sizes.iter().map(|&s| s as f64 / size as f64).collect();

    // my neighbour list
    let mut neighbours: Vec<i32> = Vec::new();
    let mut my_weights: Vec<i64> = Vec::new();
    for (r, &w) in weights.iter().enumerate() {
        if w > 0 && r != rank as usize {
            neighbours.push(r as i32);
            my_weights.push(w);
        }
    }

    // gather the CSR graph on rank 0
    let n_mine = neighbours.len() as Count;
    let root = comm.process_at_rank(0);
    let mut order: Vec<i32> = (0..size as i32).collect();
    if rank == 0 {
        let mut counts = vec![0 as Count; size];
        root.gather_into_root(&n_mine, &mut counts[..]);
        let displs = counts
            .iter()
            .scan(0, |acc, &c| {
                let d = *acc;
                *acc += c;
                Some(d)
            })
            .collect_vec();
        let total: Count = counts.iter().sum();

        let mut adj = vec![0i32; total as usize];
        let mut adjw = vec![0i64; total as usize];
        {
            let mut part = PartitionMut::new(&mut adj[..], &counts[..], &displs[..]);
            root.gather_varcount_into_root(&neighbours[..], &mut part);
        }
        {
            let mut part = PartitionMut::new(&mut adjw[..], &counts[..], &displs[..]);
            root.gather_varcount_into_root(&my_weights[..], &mut part);
        }

        let xadj: Vec<usize> = std::iter::once(0)
            .chain(displs.iter().zip(counts.iter()).map(|(&d, &c)| (d + c) as usize))
            .collect();
        let adj_usize: Vec<usize> = adj.iter().map(|&a| a as usize).collect();

        match partitioner.partition(&xadj, &adj_usize, &adjw, n_nodes, &targets) {
            Ok(part) => {
                // old ranks grouped by part become the new rank order
                let mut grouped: Vec<i32> = Vec::with_capacity(size);
                for p in 0..n_nodes {
                    for (v, &pv) in part.iter().enumerate() {
                        if pv == p {
                            grouped.push(v as i32);
                        }
                    }
                }
                order = grouped;
            }
            Err(err) => {
                eprintln!(
                    "poisfft: {}; keeping the rank order",
                    err
                );
            }
        }
    } else {
        root.gather_into(&n_mine);
        root.gather_varcount_into(&neighbours[..]);
        root.gather_varcount_into(&my_weights[..]);
    }

    root.broadcast_into(&mut order[..]);
    if order.iter().enumerate().all(|(i, &r)| i as i32 == r) {
        return None;
    }

    let group = comm.group();
    let new_group = group.include(&order[..]);
    comm.split_by_subgroup_collective(&new_group)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_greedy_partitioner_balance() {
        // 4 vertices, heavy edges 0-1 and 2-3
        let xadj = vec![0usize, 1, 2, 3, 4];
        let adj = vec![1usize, 0, 3, 2];
        let weights = vec![10i64, 10, 10, 10];
        let part = GreedyPartitioner
            .partition(&xadj, &adj, &weights, 2, &[0.5, 0.5])
            .unwrap();
        assert_eq!(part.len(), 4);
        assert_eq!(part[0], part[1]);
        assert_eq!(part[2], part[3]);
        assert_ne!(part[0], part[2]);
    }

    #[test]
    fn test_greedy_partitioner_rejects_bad_targets() {
        let xadj = vec![0usize, 0, 0, 0];
        assert!(GreedyPartitioner
            .partition(&xadj, &[], &[], 2, &[0.9, 0.9])
            .is_err());
        assert!(GreedyPartitioner
            .partition(&xadj, &[], &[], 1, &[1.0])
            .is_err());
    }
}
