//! Relation containers between entities.
//!
//! Relations are plain sets of identifiers; storage backends keep them
//! symmetric (contacts) or dual-indexed (memberships).

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{GroupId, UserId};

/// Contacts of one user.
pub type ContactSet = HashSet<UserId>;

/// Members of one group.
pub type MemberSet = HashSet<UserId>;

/// Groups one user belongs to.
pub type GroupSet = HashSet<GroupId>;

/// Closed time interval `[from, to]` over message creation times.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MsgRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl MsgRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    pub fn is_valid(&self) -> bool {
        self.from <= self.to
    }

    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        self.from <= time && time <= self.to
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    #[test]
    fn range_bounds_are_inclusive() {
        let start = Utc::now();
        let end = start + Duration::seconds(10);
        let range = MsgRange::new(start, end);

        assert!(range.is_valid());
        assert!(range.contains(start));
        assert!(range.contains(end));
        assert!(!range.contains(end + Duration::nanoseconds(1)));
        assert!(!range.contains(start - Duration::nanoseconds(1)));
    }

    #[test]
    fn inverted_range_is_invalid() {
        let now = Utc::now();
        let range = MsgRange::new(now, now - Duration::seconds(1));
        assert!(!range.is_valid());
        assert!(!range.contains(now));
    }
}
