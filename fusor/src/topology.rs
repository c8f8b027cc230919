use crate::types::Rank;

/// Describes the worker set from this worker's perspective.
///
/// Ranks are assigned node-major: node 0 holds ranks `0..n0`, node 1 the
/// next `n1`, and so on. `local_comm_ranks` lists, for each intra-node
/// index, the global rank of that peer.
#[derive(Debug, Clone)]
pub struct WorkerTopology {
    /// This worker's global rank.
    pub rank: Rank,
    /// Total number of workers.
    pub world_size: usize,
    /// This worker's index within its node.
    pub local_rank: Rank,
    /// Number of workers on this node.
    pub local_size: usize,
    /// Total number of nodes.
    pub num_nodes: usize,
    /// True iff every node has the same number of workers.
    pub is_homogeneous: bool,
    /// Global rank of each intra-node peer, ordered by local rank.
    pub local_comm_ranks: Vec<Rank>,
}

impl WorkerTopology {
    /// Build the topology for `rank` from a per-node worker-count table.
    ///
    /// Panics if the table is empty or `rank` is out of range; callers
    /// construct this once at bootstrap from coordinator-provided counts.
    pub fn from_node_sizes(node_sizes: &[usize], rank: Rank) -> Self {
        assert!(!node_sizes.is_empty(), "at least one node required");
        let world_size: usize = node_sizes.iter().sum();
        assert!(rank < world_size, "rank {rank} out of range {world_size}");

        let mut first = 0;
        let mut node = 0;
        for (i, &n) in node_sizes.iter().enumerate() {
            if rank < first + n {
                node = i;
                break;
            }
            first += n;
        }

        let local_size = node_sizes[node];
        let local_rank = rank - first;
        let is_homogeneous = node_sizes.iter().all(|&n| n == node_sizes[0]);

        Self {
            rank,
            world_size,
            local_rank,
            local_size,
            num_nodes: node_sizes.len(),
            is_homogeneous,
            local_comm_ranks: (first..first + local_size).collect(),
        }
    }

    /// True for single-worker deployments.
    pub fn is_single_worker(&self) -> bool {
        self.world_size == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn homogeneous_two_by_two() {
        let t = WorkerTopology::from_node_sizes(&[2, 2], 3);
        assert_eq!(t.world_size, 4);
        assert_eq!(t.local_rank, 1);
        assert_eq!(t.local_size, 2);
        assert_eq!(t.num_nodes, 2);
        assert!(t.is_homogeneous);
        assert_eq!(t.local_comm_ranks, vec![2, 3]);
    }

    #[test]
    fn heterogeneous_cluster() {
        let t = WorkerTopology::from_node_sizes(&[2, 1], 2);
        assert!(!t.is_homogeneous);
        assert_eq!(t.local_rank, 0);
        assert_eq!(t.local_size, 1);
        assert_eq!(t.local_comm_ranks, vec![2]);
    }

    #[test]
    fn single_worker() {
        let t = WorkerTopology::from_node_sizes(&[1], 0);
        assert!(t.is_single_worker());
        assert!(t.is_homogeneous);
        assert_eq!(t.local_comm_ranks, vec![0]);
    }
}
