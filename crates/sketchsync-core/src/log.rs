//! Edit log: the ordered, append/truncate-only history of a document

use crate::error::{Error, Result};
use crate::stroke::Stroke;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::ops::Deref;
use std::sync::Arc;

/// Immutable view of an edit log at one point in time.
///
/// Snapshots share storage with the log they were taken from. The log
/// copies on its next mutation if a snapshot is still alive, so a snapshot
/// never observes later edits and can never be used to rewrite history.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogSnapshot(Arc<Vec<Stroke>>);

impl LogSnapshot {
    pub fn new(records: Vec<Stroke>) -> Self {
        Self(Arc::new(records))
    }

    pub fn to_vec(&self) -> Vec<Stroke> {
        self.0.as_ref().clone()
    }
}

impl Deref for LogSnapshot {
    type Target = [Stroke];

    fn deref(&self) -> &[Stroke] {
        &self.0
    }
}

impl From<Vec<Stroke>> for LogSnapshot {
    fn from(records: Vec<Stroke>) -> Self {
        Self::new(records)
    }
}

impl Serialize for LogSnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.iter())
    }
}

impl<'de> Deserialize<'de> for LogSnapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Vec::<Stroke>::deserialize(deserializer).map(Self::new)
    }
}

/// Ordered sequence of edit records
#[derive(Debug, Clone, Default)]
pub struct EditLog {
    records: Arc<Vec<Stroke>>,
}

impl EditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Append a record to the tail
    pub fn append(&mut self, record: Stroke) -> Result<()> {
        record.validate()?;
        Arc::make_mut(&mut self.records).push(record);
        Ok(())
    }

    /// Remove the last `count` records, returned most recent first
    pub fn truncate_tail(&mut self, count: usize) -> Result<Vec<Stroke>> {
        let len = self.records.len();
        if count > len {
            return Err(Error::Underflow {
                requested: count,
                len,
            });
        }

        let records = Arc::make_mut(&mut self.records);
        let mut removed = records.split_off(len - count);
        removed.reverse();
        Ok(removed)
    }

    /// Reinsert records at `position`, keeping their given order
    pub fn append_many(&mut self, records: Vec<Stroke>, position: usize) -> Result<()> {
        let len = self.records.len();
        if position > len {
            return Err(Error::Underflow {
                requested: position,
                len,
            });
        }

        for record in &records {
            record.validate()?;
        }

        let current = Arc::make_mut(&mut self.records);
        let tail = current.split_off(position);
        current.extend(records);
        current.extend(tail);
        Ok(())
    }

    /// Immutable copy of the current sequence
    pub fn snapshot(&self) -> LogSnapshot {
        LogSnapshot(self.records.clone())
    }

    /// Drop every record
    pub fn clear(&mut self) {
        self.records = Arc::new(Vec::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stroke::Point;

    fn stroke(color: &str, x: f64) -> Stroke {
        Stroke::new(color, vec![Point(x, x)]).unwrap()
    }

    #[test]
    fn test_append_and_snapshot() {
        let mut log = EditLog::new();
        log.append(stroke("red", 1.0)).unwrap();
        log.append(stroke("blue", 2.0)).unwrap();

        let snap = log.snapshot();
        assert_eq!(snap.len(), 2);
        assert_eq!(snap[0].color(), "red");
        assert_eq!(snap[1].color(), "blue");
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_edits() {
        let mut log = EditLog::new();
        log.append(stroke("red", 1.0)).unwrap();

        let before = log.snapshot();
        log.append(stroke("blue", 2.0)).unwrap();
        log.truncate_tail(2).unwrap();

        assert_eq!(before.len(), 1);
        assert_eq!(before[0].color(), "red");
        assert!(log.is_empty());
    }

    #[test]
    fn test_truncate_returns_most_recent_first() {
        let mut log = EditLog::new();
        for (i, color) in ["#aaa", "#bbb", "#ccc"].iter().enumerate() {
            log.append(stroke(color, i as f64)).unwrap();
        }

        let removed = log.truncate_tail(2).unwrap();
        let colors: Vec<_> = removed.iter().map(|s| s.color()).collect();
        assert_eq!(colors, vec!["#ccc", "#bbb"]);
        assert_eq!(log.len(), 1);
        assert_eq!(log.snapshot()[0].color(), "#aaa");
    }

    #[test]
    fn test_truncate_underflow() {
        let mut log = EditLog::new();
        log.append(stroke("red", 1.0)).unwrap();

        let err = log.truncate_tail(2).unwrap_err();
        assert_eq!(err, Error::Underflow { requested: 2, len: 1 });
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_append_many_restores_order() {
        let mut log = EditLog::new();
        for (i, color) in ["#aaa", "#bbb", "#ccc"].iter().enumerate() {
            log.append(stroke(color, i as f64)).unwrap();
        }
        let original = log.snapshot();

        let mut removed = log.truncate_tail(2).unwrap();
        removed.reverse();
        log.append_many(removed, 1).unwrap();

        assert_eq!(log.snapshot(), original);
    }

    #[test]
    fn test_append_rejects_invalid_record() {
        let mut log = EditLog::new();
        let bad: Stroke = serde_json::from_str(r#"{"color":"red","points":[]}"#).unwrap();

        assert!(matches!(log.append(bad), Err(Error::InvalidRecord(_))));
        assert!(log.is_empty());
    }

    #[test]
    fn test_snapshot_serializes_as_sequence() {
        let mut log = EditLog::new();
        log.append(stroke("red", 1.0)).unwrap();

        let json = serde_json::to_string(&log.snapshot()).unwrap();
        let back: LogSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, log.snapshot());
    }
}
