//! Column-level diffing of row snapshots.

use serde_json::Value as JsonValue;

use crate::change::{Delta, RowSnapshot};

/// Computes the columns that changed between `prev` and `curr`.
///
/// Evaluated in this order:
///
/// 1. `curr` is empty (delete): the whole `prev` row is the change.
/// 2. `prev` is empty (insert): the whole `curr` row is the change.
/// 3. Otherwise (update): every `curr` entry whose value differs from
///    `prev[key]`. A key missing from `prev` reads as JSON `null`, so a
///    curr-only column is kept unless its value is `null` too. Keys missing
///    from `curr` never appear.
///
/// The result preserves the key order of the snapshot it was taken from.
pub fn compute_delta(curr: &RowSnapshot, prev: &RowSnapshot) -> Delta {
   if curr.is_empty() {
      return prev.clone();
   }

   if prev.is_empty() {
      return curr.clone();
   }

   curr
      .iter()
      .filter(|(column, value)| prev.get(*column).unwrap_or(&JsonValue::Null) != *value)
      .map(|(column, value)| (column.clone(), value.clone()))
      .collect()
}

#[cfg(test)]
mod tests {
   use super::*;
   use serde_json::{Value as JsonValue, json};

   fn row(value: JsonValue) -> RowSnapshot {
      serde_json::from_value(value).unwrap()
   }

   #[test]
   fn test_delete_reports_prev() {
      let prev = row(json!({"a": 1}));
      assert_eq!(compute_delta(&RowSnapshot::new(), &prev), prev);
   }

   #[test]
   fn test_both_empty_is_empty() {
      assert!(compute_delta(&RowSnapshot::new(), &RowSnapshot::new()).is_empty());
   }

   #[test]
   fn test_insert_reports_curr() {
      let curr = row(json!({"a": 1}));
      assert_eq!(compute_delta(&curr, &RowSnapshot::new()), curr);
   }

   #[test]
   fn test_update_keeps_only_changed_columns() {
      let delta = compute_delta(&row(json!({"a": 1, "b": 2})), &row(json!({"a": 1, "b": 3})));
      assert_eq!(delta, row(json!({"b": 2})));
   }

   #[test]
   fn test_update_includes_curr_only_columns() {
      let delta = compute_delta(&row(json!({"a": 1, "b": 2})), &row(json!({"a": 1})));
      assert_eq!(delta, row(json!({"b": 2})));
   }

   #[test]
   fn test_missing_prev_key_equals_null() {
      let delta = compute_delta(&row(json!({"a": 1, "b": null})), &row(json!({"a": 1})));
      assert!(delta.is_empty());
   }

   #[test]
   fn test_null_column_becoming_value_is_a_change() {
      let delta = compute_delta(&row(json!({"a": 1, "b": 0})), &row(json!({"a": 1, "b": null})));
      assert_eq!(delta, row(json!({"b": 0})));
   }

   #[test]
   fn test_update_ignores_prev_only_columns() {
      let delta = compute_delta(&row(json!({"a": 1})), &row(json!({"a": 1, "gone": true})));
      assert!(delta.is_empty());
   }

   #[test]
   fn test_values_compare_by_type() {
      let delta = compute_delta(
         &row(json!({"n": 1, "s": "1", "f": 1.5, "flag": false})),
         &row(json!({"n": "1", "s": "1", "f": 1.5, "flag": null})),
      );
      assert_eq!(delta, row(json!({"n": 1, "flag": false})));
   }

   #[test]
   fn test_delta_follows_curr_order() {
      let delta = compute_delta(
         &row(json!({"z": 1, "a": 2, "m": 3})),
         &row(json!({"m": 0, "a": 0, "z": 0})),
      );
      let keys: Vec<&str> = delta.keys().map(String::as_str).collect();
      assert_eq!(keys, vec!["z", "a", "m"]);
   }

   #[test]
   fn test_is_pure() {
      let curr = row(json!({"a": 1, "b": 2}));
      let prev = row(json!({"a": 2, "b": 2}));
      assert_eq!(compute_delta(&curr, &prev), compute_delta(&curr, &prev));
   }

   #[test]
   fn test_delta_keys_subset_of_curr() {
      let curr = row(json!({"a": 1, "b": 2, "c": 3, "e": null}));
      let prev = row(json!({"a": 0, "c": 3, "d": 4}));
      let delta = compute_delta(&curr, &prev);

      for key in delta.keys() {
         assert!(curr.contains_key(key));
      }
      for (key, value) in &curr {
         let before = prev.get(key).unwrap_or(&JsonValue::Null);
         assert_eq!(delta.contains_key(key), before != value);
      }
   }
}
