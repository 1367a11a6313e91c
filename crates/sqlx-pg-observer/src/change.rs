use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::delta::compute_delta;

/// Column name to value mapping for one row at one point in time.
///
/// Insertion order follows the order of keys in the notification payload.
pub type RowSnapshot = IndexMap<String, JsonValue>;

/// Columns whose value changed between the `prev` and `curr` snapshots.
pub type Delta = IndexMap<String, JsonValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOperation {
   Insert,
   Update,
   Delete,
}

impl ChangeOperation {
   /// Parses a trigger action name such as `INSERT` or `update`.
   pub fn parse(action: &str) -> Option<Self> {
      match action.trim().to_ascii_lowercase().as_str() {
         "insert" => Some(ChangeOperation::Insert),
         "update" => Some(ChangeOperation::Update),
         "delete" => Some(ChangeOperation::Delete),
         _ => None,
      }
   }
}

/// Identifies which table changed, the operation kind, and when.
///
/// Every field defaults to an empty string when the payload omits it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
   pub table: String,
   pub action: String,
   pub timestamp: String,
}

impl Metadata {
   /// The typed operation for `action`, or `None` for actions this crate doesn't know.
   pub fn operation(&self) -> Option<ChangeOperation> {
      ChangeOperation::parse(&self.action)
   }
}

/// A decoded row change with its computed delta.
///
/// Built once per notification and never mutated afterwards. The subscription
/// loop moves it into the consumer, which becomes its only owner.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
   metadata: Metadata,
   curr: RowSnapshot,
   prev: RowSnapshot,
   delta: Delta,
}

impl ChangeEvent {
   /// Creates an event from its snapshots, computing the delta eagerly.
   pub fn new(metadata: Metadata, curr: RowSnapshot, prev: RowSnapshot) -> Self {
      let delta = compute_delta(&curr, &prev);
      Self {
         metadata,
         curr,
         prev,
         delta,
      }
   }

   pub fn metadata(&self) -> &Metadata {
      &self.metadata
   }

   pub fn table(&self) -> &str {
      &self.metadata.table
   }

   pub fn action(&self) -> &str {
      &self.metadata.action
   }

   pub fn timestamp(&self) -> &str {
      &self.metadata.timestamp
   }

   /// Row state after the operation. Empty for deletes.
   pub fn curr(&self) -> &RowSnapshot {
      &self.curr
   }

   /// Row state before the operation. Empty for inserts.
   pub fn prev(&self) -> &RowSnapshot {
      &self.prev
   }

   pub fn delta(&self) -> &Delta {
      &self.delta
   }

   /// Returns true if the delta is non-empty.
   ///
   /// This is the only gate between a reported change and a no-op.
   pub fn has_change(&self) -> bool {
      !self.delta.is_empty()
   }
}

impl fmt::Display for ChangeEvent {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      let curr = serde_json::to_string(&self.curr).map_err(|_| fmt::Error)?;
      let prev = serde_json::to_string(&self.prev).map_err(|_| fmt::Error)?;
      let delta = serde_json::to_string(&self.delta).map_err(|_| fmt::Error)?;

      writeln!(f, "NEW CHANGE DETECTED ON {}!", self.metadata.table)?;
      writeln!(f, "=========================================")?;
      writeln!(f, "New value: {curr}")?;
      writeln!(f, "Old value: {prev}")?;
      writeln!(f)?;
      write!(f, "Changed values: {delta}")
   }
}
