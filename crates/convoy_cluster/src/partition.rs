//! Process topology: worker groups, group leaders and the root.
//!
//! A [`Partition`] splits `world_size` processes into worker groups. Each
//! group's first member is its leader; the leaders together form the
//! leaders channel over which the root (rank 0) fans out evaluations. The
//! root always leads a group.
//!
//! The partition is immutable after construction and is shared read-only
//! between processes.

use convoy_core::OptimError;

/// How processes are distributed when the group count does not divide the
/// world size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemainderPolicy {
    /// Contiguous blocks; the first `world_size % groups` groups get one
    /// extra member
    #[default]
    FrontLoaded,
    /// Rank `r` joins group `floor(r * groups / world_size)`
    Proportional,
}

/// One process's place in the partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessView {
    /// Rank in the world
    pub rank: usize,
    /// Worker group id
    pub group: usize,
    /// Rank within the worker group (0 for the leader)
    pub rank_in_group: usize,
    /// Number of processes in the worker group
    pub group_size: usize,
    /// World rank of the group's leader
    pub leader: usize,
    /// Rank on the leaders channel; `None` for non-leaders
    pub rank_among_leaders: Option<usize>,
}

impl ProcessView {
    /// Whether this process leads its group.
    pub fn is_leader(&self) -> bool {
        self.rank_in_group == 0
    }

    /// Whether this process is the root (world rank 0).
    pub fn is_root(&self) -> bool {
        self.rank == 0
    }

    /// The process this one answers to: the root for group leaders, the
    /// group leader for workers, nobody for the root.
    pub fn superior(&self) -> Option<usize> {
        if self.is_root() {
            None
        } else if self.is_leader() {
            Some(0)
        } else {
            Some(self.leader)
        }
    }
}

/// Assignment of processes to worker groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    world_size: usize,
    groups: Vec<Vec<usize>>,
    group_of: Vec<usize>,
    rank_in_group: Vec<usize>,
}

impl Partition {
    /// Split `world_size` processes into `n_groups` contiguous groups of
    /// near-equal size, extra members going to the first groups.
    ///
    /// # Errors
    ///
    /// `OptimError::InvalidTopology` if `n_groups` is zero or exceeds
    /// `world_size`.
    pub fn create(world_size: usize, n_groups: usize) -> Result<Self, OptimError> {
        Self::create_with_policy(world_size, n_groups, RemainderPolicy::FrontLoaded)
    }

    /// Like [`Partition::create`] with an explicit remainder policy.
    pub fn create_with_policy(
        world_size: usize,
        n_groups: usize,
        policy: RemainderPolicy,
    ) -> Result<Self, OptimError> {
        if world_size == 0 {
            return Err(OptimError::InvalidTopology(
                "world must contain at least one process".to_string(),
            ));
        }
        if n_groups == 0 {
            return Err(OptimError::InvalidTopology(
                "number of worker groups must be positive".to_string(),
            ));
        }
        if n_groups > world_size {
            return Err(OptimError::InvalidTopology(format!(
                "{} worker groups requested but only {} processes available",
                n_groups, world_size
            )));
        }

        let mut groups = vec![Vec::new(); n_groups];
        match policy {
            RemainderPolicy::FrontLoaded => {
                let base = world_size / n_groups;
                let extra = world_size % n_groups;
                let mut rank = 0;
                for (g, members) in groups.iter_mut().enumerate() {
                    let size = base + usize::from(g < extra);
                    members.extend(rank..rank + size);
                    rank += size;
                }
            }
            RemainderPolicy::Proportional => {
                for rank in 0..world_size {
                    groups[rank * n_groups / world_size].push(rank);
                }
            }
        }
        Ok(Self::from_groups(world_size, groups))
    }

    /// Build a partition from explicit membership lists. The first member
    /// listed for each group is its leader.
    ///
    /// # Errors
    ///
    /// `OptimError::InvalidTopology` if there are no groups, a group is
    /// empty, a rank is listed twice or is missing, or the root (rank 0) is
    /// not the leader of its group.
    pub fn create_custom(groups: &[Vec<usize>]) -> Result<Self, OptimError> {
        if groups.is_empty() {
            return Err(OptimError::InvalidTopology(
                "custom partition has no groups".to_string(),
            ));
        }
        if let Some(g) = groups.iter().position(|members| members.is_empty()) {
            return Err(OptimError::InvalidTopology(format!(
                "worker group {} is empty",
                g
            )));
        }

        let world_size: usize = groups.iter().map(Vec::len).sum();
        let mut seen = vec![false; world_size];
        for members in groups {
            for &rank in members {
                if rank >= world_size {
                    return Err(OptimError::InvalidTopology(format!(
                        "rank {} is outside a world of {} processes",
                        rank, world_size
                    )));
                }
                if seen[rank] {
                    return Err(OptimError::InvalidTopology(format!(
                        "rank {} is assigned to more than one worker group",
                        rank
                    )));
                }
                seen[rank] = true;
            }
        }
        if !groups.iter().any(|members| members[0] == 0) {
            return Err(OptimError::InvalidTopology(
                "rank 0 must lead its worker group".to_string(),
            ));
        }

        Ok(Self::from_groups(world_size, groups.to_vec()))
    }

    fn from_groups(world_size: usize, groups: Vec<Vec<usize>>) -> Self {
        let mut group_of = vec![0; world_size];
        let mut rank_in_group = vec![0; world_size];
        for (g, members) in groups.iter().enumerate() {
            for (i, &rank) in members.iter().enumerate() {
                group_of[rank] = g;
                rank_in_group[rank] = i;
            }
        }
        Self {
            world_size,
            groups,
            group_of,
            rank_in_group,
        }
    }

    /// Number of processes.
    pub fn world_size(&self) -> usize {
        self.world_size
    }

    /// Number of worker groups.
    pub fn n_groups(&self) -> usize {
        self.groups.len()
    }

    /// Members of group `group`, leader first.
    pub fn members(&self, group: usize) -> &[usize] {
        &self.groups[group]
    }

    /// Group sizes in group order.
    pub fn group_sizes(&self) -> Vec<usize> {
        self.groups.iter().map(Vec::len).collect()
    }

    /// World rank of the leader of `group`.
    pub fn leader(&self, group: usize) -> usize {
        self.groups[group][0]
    }

    /// Leader ranks in group order; position is the rank on the leaders
    /// channel.
    pub fn leaders(&self) -> Vec<usize> {
        self.groups.iter().map(|members| members[0]).collect()
    }

    /// Group id of the root.
    pub fn root_group(&self) -> usize {
        self.group_of[0]
    }

    /// View of the partition from `rank`.
    ///
    /// # Panics
    ///
    /// Panics if `rank >= world_size`.
    pub fn view(&self, rank: usize) -> ProcessView {
        let group = self.group_of[rank];
        let rank_in_group = self.rank_in_group[rank];
        ProcessView {
            rank,
            group,
            rank_in_group,
            group_size: self.groups[group].len(),
            leader: self.groups[group][0],
            rank_among_leaders: (rank_in_group == 0).then_some(group),
        }
    }

    /// One line per process describing its assignment.
    pub fn describe(&self) -> String {
        let n_groups = self.n_groups();
        let mut out = String::new();
        for rank in 0..self.world_size {
            let view = self.view(rank);
            let leaders = match view.rank_among_leaders {
                Some(r) => format!("rank {:4} of {:4} among group leaders", r, n_groups),
                None => "not a group leader".to_string(),
            };
            out.push_str(&format!(
                "Proc {:4} of {:4} is in worker group {:4} of {:4}, has rank {:4} of {:4} in its group, {}.\n",
                rank,
                self.world_size,
                view.group,
                n_groups,
                view.rank_in_group,
                view.group_size,
                leaders
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_front_loaded_remainder() {
        let p = Partition::create(7, 3).unwrap();
        assert_eq!(p.group_sizes(), vec![3, 2, 2]);
        assert_eq!(p.members(0), &[0, 1, 2]);
        assert_eq!(p.members(1), &[3, 4]);
        assert_eq!(p.members(2), &[5, 6]);
        assert_eq!(p.leaders(), vec![0, 3, 5]);
    }

    #[test]
    fn test_proportional_remainder() {
        let p = Partition::create_with_policy(7, 3, RemainderPolicy::Proportional).unwrap();
        // floor(r * 3 / 7): 0,0,0,1,1,2,2
        assert_eq!(p.group_sizes(), vec![3, 2, 2]);
        let p = Partition::create_with_policy(5, 3, RemainderPolicy::Proportional).unwrap();
        // floor(r * 3 / 5): 0,0,1,1,2
        assert_eq!(p.group_sizes(), vec![2, 2, 1]);
    }

    #[test]
    fn test_invalid_group_counts() {
        assert!(matches!(
            Partition::create(4, 0),
            Err(OptimError::InvalidTopology(_))
        ));
        assert!(matches!(
            Partition::create(4, 5),
            Err(OptimError::InvalidTopology(_))
        ));
        assert!(matches!(
            Partition::create(0, 1),
            Err(OptimError::InvalidTopology(_))
        ));
    }

    #[test]
    fn test_views() {
        let p = Partition::create(5, 2).unwrap();
        let root = p.view(0);
        assert!(root.is_root() && root.is_leader());
        assert_eq!(root.superior(), None);
        assert_eq!(root.rank_among_leaders, Some(0));

        let leader = p.view(3);
        assert!(leader.is_leader());
        assert_eq!(leader.group, 1);
        assert_eq!(leader.superior(), Some(0));
        assert_eq!(leader.rank_among_leaders, Some(1));

        let worker = p.view(4);
        assert!(!worker.is_leader());
        assert_eq!(worker.rank_in_group, 1);
        assert_eq!(worker.superior(), Some(3));
        assert_eq!(worker.rank_among_leaders, None);
    }

    #[test]
    fn test_custom_partition() {
        let p = Partition::create_custom(&[vec![0, 3], vec![2, 1]]).unwrap();
        assert_eq!(p.world_size(), 4);
        assert_eq!(p.leaders(), vec![0, 2]);
        assert_eq!(p.view(1).group, 1);
        assert_eq!(p.view(1).rank_in_group, 1);
    }

    #[test]
    fn test_custom_partition_violations() {
        let cases: Vec<Vec<Vec<usize>>> = vec![
            vec![],
            vec![vec![0], vec![]],
            vec![vec![0, 1], vec![1]],
            vec![vec![0, 5]],
            vec![vec![1, 0]],
        ];
        for groups in cases {
            assert!(
                matches!(
                    Partition::create_custom(&groups),
                    Err(OptimError::InvalidTopology(_))
                ),
                "expected rejection of {:?}",
                groups
            );
        }
    }

    #[test]
    fn test_describe_lists_every_process() {
        let p = Partition::create(3, 2).unwrap();
        let text = p.describe();
        assert_eq!(text.lines().count(), 3);
        assert!(text.contains("not a group leader"));
        assert!(text.lines().all(|line| line.starts_with("Proc") && line.ends_with('.')));
        assert!(text.ends_with(".\n"));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn topology() -> impl Strategy<Value = (usize, usize)> {
            (1usize..64).prop_flat_map(|world| (Just(world), 1..=world))
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(500))]

            #[test]
            fn test_every_process_in_exactly_one_group((world, groups) in topology()) {
                for policy in [RemainderPolicy::FrontLoaded, RemainderPolicy::Proportional] {
                    let p = Partition::create_with_policy(world, groups, policy).unwrap();
                    prop_assert_eq!(p.n_groups(), groups);

                    let mut count = vec![0usize; world];
                    for g in 0..groups {
                        for &rank in p.members(g) {
                            count[rank] += 1;
                            prop_assert_eq!(p.view(rank).group, g);
                        }
                    }
                    prop_assert!(count.iter().all(|&c| c == 1));
                }
            }

            #[test]
            fn test_one_leader_per_group_and_balanced_sizes((world, groups) in topology()) {
                for policy in [RemainderPolicy::FrontLoaded, RemainderPolicy::Proportional] {
                    let p = Partition::create_with_policy(world, groups, policy).unwrap();
                    for g in 0..groups {
                        let leaders = p.members(g).iter().filter(|&&r| p.view(r).is_leader()).count();
                        prop_assert_eq!(leaders, 1);
                    }
                    let sizes = p.group_sizes();
                    let max = *sizes.iter().max().unwrap();
                    let min = *sizes.iter().min().unwrap();
                    prop_assert!(max - min <= 1);
                    prop_assert!(p.view(0).is_leader());
                }
            }
        }
    }
}
