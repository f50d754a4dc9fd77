//! Partition selection for a category.

use crate::config::PartitionConfig;
use crate::util::types::Category;

/// Chooses which partition should own a task when several can serve it.
///
/// The registry is the ordered partition list from configuration, so lookups
/// cost O(partitions) regardless of how many workers exist.
#[derive(Debug, Clone)]
pub struct LoadBalancer {
    partitions: Vec<PartitionConfig>,
}

impl LoadBalancer {
    /// Build from the partition registry, in declaration order.
    #[must_use]
    pub const fn new(partitions: Vec<PartitionConfig>) -> Self {
        Self { partitions }
    }

    /// Registry entries.
    #[must_use]
    pub fn partitions(&self) -> &[PartitionConfig] {
        &self.partitions
    }

    /// Look up a partition by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PartitionConfig> {
        self.partitions.iter().find(|p| p.name == name)
    }

    /// Partitions able to serve `category`, least loaded first.
    ///
    /// `load` reports the active-worker count of a partition. Equal loads keep
    /// declaration order, so the result is deterministic.
    pub fn rank<F>(&self, category: Category, load: F) -> Vec<&PartitionConfig>
    where
        F: Fn(&str) -> usize,
    {
        let mut ranked: Vec<(usize, &PartitionConfig)> = self
            .partitions
            .iter()
            .filter(|p| p.serves(category))
            .map(|p| (load(&p.name), p))
            .collect();
        // stable: ties stay in declaration order
        ranked.sort_by_key(|(count, _)| *count);
        ranked.into_iter().map(|(_, p)| p).collect()
    }

    /// The least-loaded partition for `category`.
    pub fn pick<F>(&self, category: Category, load: F) -> Option<&PartitionConfig>
    where
        F: Fn(&str) -> usize,
    {
        self.rank(category, load).into_iter().next()
    }
}
