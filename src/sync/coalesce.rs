//! Journal coalescing: at most one pending mutation per entity.

use std::collections::HashSet;

use super::types::SyncRecord;

/// Reduce a journal slice to the newest record per entity id.
///
/// Records are ordered descending by key and the first occurrence of each
/// entity id is kept, so a later DELETE supersedes earlier writes and a
/// later write supersedes an earlier DELETE. The result stays in
/// descending-key order, which makes the reduction deterministic.
pub fn coalesce(mut records: Vec<SyncRecord>) -> Vec<SyncRecord> {
    records.sort_by(|a, b| b.key.cmp(&a.key));
    let mut seen = HashSet::new();
    records.retain(|r| seen.insert(r.entity_id.clone()));
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::types::SyncMethod;
    use serde_json::json;

    fn record(key: u64, entity_id: &str, method: SyncMethod) -> SyncRecord {
        SyncRecord::new(key, "books", entity_id, method, json!({"_id": entity_id}))
    }

    #[test]
    fn keeps_highest_key_per_entity() {
        let out = coalesce(vec![
            record(5, "d", SyncMethod::CreateOrUpdate),
            record(6, "d", SyncMethod::CreateOrUpdate),
            record(7, "d", SyncMethod::CreateOrUpdate),
            record(8, "d", SyncMethod::Delete),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].key, 8);
        assert_eq!(out[0].state.method, SyncMethod::Delete);
    }

    #[test]
    fn later_write_supersedes_earlier_delete() {
        let out = coalesce(vec![
            record(1, "a", SyncMethod::Delete),
            record(2, "a", SyncMethod::CreateOrUpdate),
        ]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].state.method, SyncMethod::CreateOrUpdate);
    }

    #[test]
    fn distinct_entities_all_survive() {
        let out = coalesce(vec![
            record(1, "a", SyncMethod::CreateOrUpdate),
            record(2, "b", SyncMethod::CreateOrUpdate),
            record(3, "c", SyncMethod::Delete),
        ]);
        assert_eq!(out.len(), 3);
        // Descending key order
        let keys: Vec<u64> = out.iter().map(|r| r.key).collect();
        assert_eq!(keys, vec![3, 2, 1]);
    }

    #[test]
    fn empty_input_empty_output() {
        assert!(coalesce(vec![]).is_empty());
    }
}
