//! Append-only action log.

use serde::{Deserialize, Serialize};

use crate::value::{ValueMap, format_map};

/// One completed action. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub seq: u64,
    pub concept: String,
    pub action: String,
    pub inputs: ValueMap,
    pub outputs: ValueMap,
    pub timestamp: u64,
    /// External submit this record belongs to (its triggering window).
    pub trigger: u64,
    /// Cascade pass that produced it; 0 for the external call.
    pub depth: usize,
    /// Sync rule whose then-pattern produced it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
}

impl ActionRecord {
    pub fn is_external(&self) -> bool {
        self.cause.is_none()
    }

    /// `#3 Concept:Counter.increment({}) -> {}`
    pub fn summary(&self) -> String {
        let mut line = format!(
            "#{} {}.{}({})",
            self.seq,
            self.concept,
            self.action,
            format_map(&self.inputs).trim_matches(|c| c == '{' || c == '}')
        );
        if !self.outputs.is_empty() {
            line.push_str(" -> ");
            line.push_str(&format_map(&self.outputs));
        }
        if let Some(cause) = &self.cause {
            line.push_str(&format!("  [via {cause}]"));
        }
        line
    }
}

/// Record fields supplied by the dispatcher; the log assigns `seq`.
pub struct PendingRecord {
    pub concept: String,
    pub action: String,
    pub inputs: ValueMap,
    pub outputs: ValueMap,
    pub timestamp: u64,
    pub trigger: u64,
    pub depth: usize,
    pub cause: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LogFilter {
    pub concept: Option<String>,
    pub action: Option<String>,
    pub trigger: Option<u64>,
}

impl LogFilter {
    pub fn matches(&self, record: &ActionRecord) -> bool {
        self.concept.as_ref().is_none_or(|c| *c == record.concept)
            && self.action.as_ref().is_none_or(|a| *a == record.action)
            && self.trigger.is_none_or(|t| t == record.trigger)
    }
}

/// Sequence numbers start at 1 and are strictly increasing. Triggers are
/// processed one at a time, so the records of one trigger are contiguous.
#[derive(Debug, Default)]
pub struct ActionLog {
    records: Vec<ActionRecord>,
}

impl ActionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, pending: PendingRecord) -> &ActionRecord {
        let seq = self.last_seq() + 1;
        self.records.push(ActionRecord {
            seq,
            concept: pending.concept,
            action: pending.action,
            inputs: pending.inputs,
            outputs: pending.outputs,
            timestamp: pending.timestamp,
            trigger: pending.trigger,
            depth: pending.depth,
            cause: pending.cause,
        });
        &self.records[self.records.len() - 1]
    }

    pub fn last_seq(&self) -> u64 {
        self.records.last().map(|r| r.seq).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ActionRecord] {
        &self.records
    }

    pub fn get(&self, seq: u64) -> Option<&ActionRecord> {
        // seq n lives at index n-1 until the log is cleared
        let idx = seq.checked_sub(1)? as usize;
        self.records.get(idx).filter(|r| r.seq == seq)
    }

    /// Records with `seq > after`.
    pub fn since(&self, after: u64) -> &[ActionRecord] {
        let start = self.records.partition_point(|r| r.seq <= after);
        &self.records[start..]
    }

    /// All records of one trigger.
    pub fn window(&self, trigger: u64) -> &[ActionRecord] {
        let start = self.records.partition_point(|r| r.trigger < trigger);
        let end = self.records.partition_point(|r| r.trigger <= trigger);
        &self.records[start..end]
    }

    pub fn query<'a>(&'a self, filter: &'a LogFilter) -> impl Iterator<Item = &'a ActionRecord> + 'a {
        self.records.iter().filter(move |r| filter.matches(r))
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
