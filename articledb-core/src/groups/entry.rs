use serde::{Deserialize, Serialize};

/// Descriptive state of a group. Replicated last-writer-wins by `timestamp`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupEntryNrt {
    pub description: String,
    pub status: u8,
    /// Unix seconds of the change; required to order updates.
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupPairNrt {
    pub group: String,
    pub entry: GroupEntryNrt,
}

/// Result of a last-writer-wins update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NrtUpdate {
    pub previous: Option<GroupEntryNrt>,
    pub applied: bool,
}

/// Live numbering state of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GroupEntryRtp {
    pub count: i64,
    pub low: i64,
    pub high: i64,
}

impl GroupEntryRtp {
    /// Allocates the next article number.
    pub fn increment(&mut self) -> i64 {
        let next = self.high + 1;
        self.high = next;
        self.count += 1;
        if self.low == 0 {
            self.low = next;
        }
        next
    }

    /// Gives back `number`. Only boundary numbers move the watermarks; an
    /// interior number just lowers `count`, so the span may overstate the
    /// live set afterwards.
    pub fn rollback(&mut self, number: i64) {
        self.count = (self.count - 1).max(0);
        if self.count < 1 {
            self.low = 0;
            self.high = 0;
        } else if number == self.high {
            self.high -= 1;
        } else if number == self.low {
            self.low += 1;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holds_span(entry: &GroupEntryRtp) -> bool {
        entry.count == 0 || entry.high - entry.low + 1 >= entry.count
    }

    #[test]
    fn test_increment_hands_out_distinct_numbers() {
        let mut entry = GroupEntryRtp::default();
        let numbers: Vec<i64> = (0..5).map(|_| entry.increment()).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
        assert_eq!(
            entry,
            GroupEntryRtp {
                count: 5,
                low: 1,
                high: 5
            }
        );
    }

    #[test]
    fn test_rollback_of_latest_restores_prior_state() {
        let mut entry = GroupEntryRtp::default();
        entry.increment();
        entry.increment();
        let before = entry;

        let number = entry.increment();
        entry.rollback(number);
        assert_eq!(entry, before);
    }

    #[test]
    fn test_rollback_of_sole_number_resets() {
        let mut entry = GroupEntryRtp::default();
        let number = entry.increment();
        entry.rollback(number);
        assert_eq!(entry, GroupEntryRtp::default());
        assert!(entry.is_empty());
    }

    #[test]
    fn test_rollback_of_low_moves_low() {
        let mut entry = GroupEntryRtp::default();
        for _ in 0..3 {
            entry.increment();
        }
        entry.rollback(1);
        assert_eq!(
            entry,
            GroupEntryRtp {
                count: 2,
                low: 2,
                high: 3
            }
        );
    }

    #[test]
    fn test_interior_rollback_keeps_watermarks() {
        let mut entry = GroupEntryRtp::default();
        for _ in 0..3 {
            entry.increment();
        }
        entry.rollback(2);
        assert_eq!(
            entry,
            GroupEntryRtp {
                count: 2,
                low: 1,
                high: 3
            }
        );
    }

    #[test]
    fn test_rollback_on_empty_entry_stays_empty() {
        let mut entry = GroupEntryRtp::default();
        entry.rollback(7);
        assert_eq!(entry, GroupEntryRtp::default());
    }

    #[test]
    fn test_span_covers_count_under_mixed_operations() {
        let mut entry = GroupEntryRtp::default();
        let mut issued = Vec::new();
        // Deterministic mix: roll back every third allocation, alternating
        // between the newest and the oldest outstanding number.
        for step in 0..60 {
            issued.push(entry.increment());
            if step % 3 == 2 {
                let number = if step % 2 == 0 {
                    issued.pop()
                } else if issued.is_empty() {
                    None
                } else {
                    Some(issued.remove(0))
                };
                if let Some(number) = number {
                    entry.rollback(number);
                }
            }
            assert!(holds_span(&entry), "span violated at step {}: {:?}", step, entry);
        }
    }
}
