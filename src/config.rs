/// Tuning knobs for tree structure and rebalancing.
///
/// Rebalancing thresholds are configuration rather than constants; the
/// balance invariant must hold for any sane combination, which the property
/// tests exercise.
#[derive(Debug, Clone)]
pub struct TreeOptions {
    /// Hard cap on entries per leaf node. `None` lets the node byte capacity
    /// govern.
    pub max_leaf_entries: Option<usize>,
    /// Hard cap on children per branch node. `None` lets the node byte
    /// capacity govern.
    pub max_branch_entries: Option<usize>,
    /// A non-root node whose fill drops below this percentage of its bound
    /// (entry cap, or byte capacity when uncapped) is merged or refilled
    /// from a sibling.
    pub min_fill_percent: u8,
    /// Target fill percentage for leaves produced by bulk load.
    pub bulk_fill_percent: u8,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            max_leaf_entries: None,
            max_branch_entries: None,
            min_fill_percent: 25,
            bulk_fill_percent: 90,
        }
    }
}

impl TreeOptions {
    /// Small fixed fanout, useful for exercising splits and merges with few
    /// elements.
    pub fn small(leaf_entries: usize, branch_entries: usize) -> Self {
        Self {
            max_leaf_entries: Some(leaf_entries),
            max_branch_entries: Some(branch_entries),
            ..Self::default()
        }
    }

    /// Minimum entries a non-root node may hold before rebalancing kicks in.
    pub fn min_entries(&self, cap: Option<usize>) -> usize {
        match cap {
            Some(max) => ((max * self.min_fill_percent as usize) / 100).max(1),
            None => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn min_entries_scales_with_cap() {
        let opts = TreeOptions::default();
        assert_eq!(opts.min_entries(Some(8)), 2);
        assert_eq!(opts.min_entries(Some(100)), 25);
        // Never drops to zero: an empty non-root node is always underfull.
        assert_eq!(opts.min_entries(Some(2)), 1);
    }
}
