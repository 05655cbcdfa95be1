use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Add;

/// Distance between two milestone indices.
pub type MilestoneIndexDelta = u32;

/// Sequence number of a milestone. Indices only ever grow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MilestoneIndex(pub u32);

impl MilestoneIndex {
    pub const ZERO: MilestoneIndex = MilestoneIndex(0);

    pub const fn new(index: u32) -> Self {
        MilestoneIndex(index)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Number of milestones from `self` up to `later`.
    ///
    /// Returns zero if `later` is not ahead of `self`.
    pub fn delta_to(self, later: MilestoneIndex) -> MilestoneIndexDelta {
        later.0.saturating_sub(self.0)
    }
}

impl Add<MilestoneIndexDelta> for MilestoneIndex {
    type Output = MilestoneIndex;

    fn add(self, rhs: MilestoneIndexDelta) -> Self::Output {
        MilestoneIndex(self.0.saturating_add(rhs))
    }
}

impl From<u32> for MilestoneIndex {
    fn from(index: u32) -> Self {
        MilestoneIndex(index)
    }
}

impl fmt::Display for MilestoneIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_to_later_index() {
        assert_eq!(MilestoneIndex(100).delta_to(MilestoneIndex(150)), 50);
        assert_eq!(MilestoneIndex(7).delta_to(MilestoneIndex(7)), 0);
    }

    #[test]
    fn test_delta_to_earlier_index_is_zero() {
        assert_eq!(MilestoneIndex(150).delta_to(MilestoneIndex(100)), 0);
    }

    #[test]
    fn test_add_saturates() {
        assert_eq!(MilestoneIndex(10) + 5, MilestoneIndex(15));
        assert_eq!(MilestoneIndex(u32::MAX - 1) + 5, MilestoneIndex(u32::MAX));
    }

    #[test]
    fn test_ordering_follows_index() {
        let mut indices = vec![MilestoneIndex(10), MilestoneIndex(2), MilestoneIndex(7)];
        indices.sort();
        assert_eq!(indices, vec![MilestoneIndex(2), MilestoneIndex(7), MilestoneIndex(10)]);
        assert!(MilestoneIndex::ZERO.is_zero());
    }
}
