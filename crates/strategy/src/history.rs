//! Fixed-capacity compound history with overwrite-on-wrap.

use vault_engine_core::CompoundRecord;

#[derive(Debug, Clone)]
pub struct CompoundHistory {
    records: Vec<CompoundRecord>,
    capacity: usize,
    /// Next write slot.
    cursor: usize,
}

impl CompoundHistory {
    /// A zero capacity is bumped to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
            cursor: 0,
        }
    }

    pub fn push(&mut self, record: CompoundRecord) {
        if self.records.len() < self.capacity {
            self.records.push(record);
        } else {
            self.records[self.cursor] = record;
        }
        self.cursor = (self.cursor + 1) % self.capacity;
    }

    /// Up to `n` most recent records, newest first.
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<CompoundRecord> {
        let count = n.min(self.records.len());
        (0..count)
            .map(|i| {
                let idx = (self.cursor + self.capacity - 1 - i) % self.capacity;
                self.records[idx].clone()
            })
            .collect()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&CompoundRecord> {
        if self.records.is_empty() {
            return None;
        }
        let idx = (self.cursor + self.capacity - 1) % self.capacity;
        self.records.get(idx)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use vault_engine_core::Principal;

    fn record(n: u128) -> CompoundRecord {
        CompoundRecord {
            timestamp: Utc.timestamp_opt(1_700_000_000 + n as i64, 0).unwrap(),
            harvested: n,
            compounded: n,
            bounty_paid: 0,
            caller: Principal::new("keeper"),
        }
    }

    fn harvested(records: &[CompoundRecord]) -> Vec<u128> {
        records.iter().map(|r| r.harvested).collect()
    }

    #[test]
    fn test_empty() {
        let history = CompoundHistory::new(3);
        assert!(history.is_empty());
        assert!(history.recent(10).is_empty());
        assert!(history.latest().is_none());
    }

    #[test]
    fn test_recent_before_wrap() {
        let mut history = CompoundHistory::new(5);
        for n in 1..=3 {
            history.push(record(n));
        }
        assert_eq!(harvested(&history.recent(10)), vec![3, 2, 1]);
        assert_eq!(harvested(&history.recent(2)), vec![3, 2]);
        assert_eq!(history.latest().map(|r| r.harvested), Some(3));
    }

    #[test]
    fn test_wraparound_discards_oldest() {
        let mut history = CompoundHistory::new(3);
        for n in 1..=5 {
            history.push(record(n));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.capacity(), 3);
        assert_eq!(harvested(&history.recent(3)), vec![5, 4, 3]);
        assert_eq!(history.latest().map(|r| r.harvested), Some(5));
    }

    #[test]
    fn test_full_capacity_after_many_writes() {
        let mut history = CompoundHistory::new(100);
        for n in 1..=250 {
            history.push(record(n));
        }
        let recent = history.recent(100);
        assert_eq!(recent.len(), 100);
        let expected: Vec<u128> = (151..=250).rev().collect();
        assert_eq!(harvested(&recent), expected);
    }

    #[test]
    fn test_zero_capacity_bumped() {
        let mut history = CompoundHistory::new(0);
        history.push(record(1));
        history.push(record(2));
        assert_eq!(history.capacity(), 1);
        assert_eq!(harvested(&history.recent(5)), vec![2]);
    }
}
