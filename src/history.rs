use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::document::DocumentState;
use crate::ids::IdAllocator;

pub const DEFAULT_MAX_ENTRIES: usize = 100;

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub action: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct HistorySummaryEntry {
    pub action: String,
    pub timestamp: DateTime<Utc>,
    pub description: String,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct HistorySummary {
    pub current: isize,
    pub entries: Vec<HistorySummaryEntry>,
}

impl Default for HistorySummary {
    fn default() -> Self {
        Self { current: -1, entries: Vec::new() }
    }
}

#[derive(Clone, Debug)]
pub struct HistoryManager {
    entries: Vec<HistoryEntry>,
    snapshots: HashMap<String, DocumentState>,
    current_index: isize,
    max_entries: usize,
    paused: bool,
    group_depth: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRIES)
    }
}

impl HistoryManager {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            snapshots: HashMap::new(),
            current_index: -1,
            max_entries: max_entries.max(1),
            paused: false,
            group_depth: 0,
        }
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn current_index(&self) -> isize {
        self.current_index
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn is_recording(&self) -> bool {
        !self.paused && self.group_depth == 0
    }

    pub fn record(&mut self, action: &str, description: &str, snapshot: DocumentState) -> Option<String> {
        if !self.is_recording() {
            trace!(action; "History paused, not recording");
            return None;
        }
        let keep = (self.current_index + 1) as usize;
        for dropped in self.entries.drain(keep..) {
            self.snapshots.remove(&dropped.id);
        }

        let entry = HistoryEntry {
            id: IdAllocator::unique_id(None),
            action: action.to_string(),
            description: description.to_string(),
            timestamp: Utc::now(),
        };
        let id = entry.id.clone();
        self.snapshots.insert(id.clone(), snapshot);
        self.entries.push(entry);
        self.current_index = self.entries.len() as isize - 1;

        while self.entries.len() > self.max_entries {
            let evicted = self.entries.remove(0);
            self.snapshots.remove(&evicted.id);
            self.current_index -= 1;
        }
        debug!(action, index = self.current_index; "Recorded history entry");
        Some(id)
    }

    fn snapshot_at(&self, index: usize) -> Option<DocumentState> {
        let entry = self.entries.get(index)?;
        self.snapshots.get(&entry.id).cloned()
    }

    /// Steps back `steps` entries. Stepping past the first entry parks the
    /// cursor at `-1` and still returns the first entry's snapshot.
    pub fn undo(&mut self, steps: usize) -> Option<DocumentState> {
        if self.current_index < 0 || self.entries.is_empty() {
            return None;
        }
        let target = self.current_index - steps as isize;
        let snapshot = if target >= 0 {
            self.current_index = target;
            self.snapshot_at(target as usize)
        } else {
            self.current_index = -1;
            self.snapshot_at(0)
        };
        debug!(steps, index = self.current_index; "Undo");
        snapshot
    }

    pub fn redo(&mut self, steps: usize) -> Option<DocumentState> {
        if !self.can_redo() || steps == 0 {
            return None;
        }
        let last = self.entries.len() as isize - 1;
        self.current_index = (self.current_index + steps as isize).min(last);
        debug!(steps, index = self.current_index; "Redo");
        self.snapshot_at(self.current_index as usize)
    }

    pub fn goto(&mut self, index: usize) -> Option<DocumentState> {
        let snapshot = self.snapshot_at(index)?;
        self.current_index = index as isize;
        debug!(index; "Jumped in history");
        Some(snapshot)
    }

    pub fn can_undo(&self) -> bool {
        self.current_index >= 0
    }

    pub fn can_redo(&self) -> bool {
        self.current_index < self.entries.len() as isize - 1
    }

    /// Suppresses recording until the matching [`HistoryManager::end_group`].
    /// Groups nest; only the outermost end records.
    pub fn begin_group(&mut self) {
        self.group_depth += 1;
    }

    pub fn end_group(&mut self, action: &str, description: &str, snapshot: DocumentState) -> Option<String> {
        self.group_depth = self.group_depth.saturating_sub(1);
        if self.group_depth > 0 {
            return None;
        }
        self.record(action, description, snapshot)
    }

    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.snapshots.clear();
        self.current_index = -1;
        self.group_depth = 0;
        debug!("Cleared history");
    }

    pub fn summary(&self) -> HistorySummary {
        HistorySummary {
            current: self.current_index,
            entries: self
                .entries
                .iter()
                .map(|e| HistorySummaryEntry {
                    action: e.action.clone(),
                    timestamp: e.timestamp,
                    description: e.description.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::Element;

    fn state(n: usize) -> DocumentState {
        let elements = (1..=n).map(|i| Element::rect(format!("rect-{}", i), 0.0, 0.0, 1.0, 1.0)).collect();
        DocumentState { elements, ..DocumentState::default() }
    }

    #[test]
    fn empty_history_has_nothing_to_do() {
        let mut history = HistoryManager::default();
        assert!(!history.can_undo());
        assert!(!history.can_redo());
        assert!(history.undo(1).is_none());
        assert!(history.redo(1).is_none());
        assert!(history.goto(0).is_none());
    }

    #[test]
    fn undo_then_redo_is_inverse() {
        let mut history = HistoryManager::default();
        history.record("create_canvas", "", state(0));
        history.record("draw_rect", "", state(1));

        assert_eq!(history.undo(1), Some(state(0)));
        assert!(history.can_redo());
        assert_eq!(history.redo(1), Some(state(1)));
        assert!(!history.can_redo());
        assert!(history.redo(1).is_none());
    }

    #[test]
    fn undo_past_first_entry_parks_the_cursor() {
        let mut history = HistoryManager::default();
        history.record("a", "", state(1));
        history.record("b", "", state(2));

        assert_eq!(history.undo(5), Some(state(1)));
        assert_eq!(history.current_index(), -1);
        assert!(!history.can_undo());
        assert!(history.undo(1).is_none());
        assert_eq!(history.redo(1), Some(state(1)));
        assert_eq!(history.redo(3), Some(state(2)));
    }

    #[test]
    fn recording_after_undo_discards_redo_branch() {
        let mut history = HistoryManager::default();
        history.record("d0", "", state(0));
        history.record("d1", "", state(1));
        history.record("d2", "", state(2));
        history.undo(1);
        history.record("d3", "", state(3));

        assert!(!history.can_redo());
        let actions: Vec<&str> = history.entries().iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, ["d0", "d1", "d3"]);
        assert_eq!(history.snapshots.len(), 3);
    }

    #[test]
    fn eviction_keeps_cursor_on_latest() {
        let mut history = HistoryManager::new(3);
        for i in 0..8 {
            history.record(&format!("a{}", i), "", state(i));
        }
        assert_eq!(history.entries().len(), 3);
        assert_eq!(history.entries()[0].action, "a5");
        assert_eq!(history.current_index(), 2);
        assert_eq!(history.undo(1), Some(state(6)));
    }

    #[test]
    fn goto_checks_range() {
        let mut history = HistoryManager::default();
        history.record("a", "", state(1));
        history.record("b", "", state(2));
        assert_eq!(history.goto(0), Some(state(1)));
        assert_eq!(history.current_index(), 0);
        assert!(history.goto(2).is_none());
        assert_eq!(history.current_index(), 0);
    }

    #[test]
    fn nested_groups_record_once() {
        let mut history = HistoryManager::default();
        history.begin_group();
        assert!(history.record("inner", "", state(1)).is_none());
        history.begin_group();
        assert!(history.end_group("inner-group", "", state(2)).is_none());
        assert!(history.end_group("outer", "both steps", state(3)).is_some());
        assert_eq!(history.entries().len(), 1);
        assert_eq!(history.entries()[0].action, "outer");
    }

    #[test]
    fn pause_resume_and_clear() {
        let mut history = HistoryManager::default();
        history.pause();
        assert!(history.record("skipped", "", state(1)).is_none());
        history.resume();
        history.record("kept", "first", state(1));

        let summary = history.summary();
        assert_eq!(summary.current, 0);
        assert_eq!(summary.entries[0].description, "first");

        history.clear();
        assert!(history.entries().is_empty());
        assert_eq!(history.current_index(), -1);
    }
}
