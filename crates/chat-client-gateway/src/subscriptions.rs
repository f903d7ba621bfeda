//! Guild subscription planning after session start
//!
//! After READY the shard announces one subscription entry per guild. The
//! gateway rejects oversized frames, so the map is split greedily into
//! chunks whose serialized JSON stays within the frame budget.

use serde_json::{Map, Value};

/// Serialized-size budget per subscription frame
pub const CHUNK_BYTE_LIMIT: usize = 14 * 1024;

/// Fixed subscription descriptor applied to every guild
const ENTRY_TEMPLATE: &str = r#"{"typing":true,"threads":true,"activities":true,"member_updates":true,"thread_member_lists":[],"members":[],"channels":{}}"#;

/// The subscription descriptor as a JSON value
fn entry_value() -> Value {
    serde_json::from_str(ENTRY_TEMPLATE).expect("static template is valid JSON")
}

/// Split guild ids into subscription maps, each serializing to at most
/// [`CHUNK_BYTE_LIMIT`] bytes
///
/// The split is greedy: a chunk is flushed as soon as the next entry
/// would push it over budget. A chunk is never empty, and only exceeds
/// the budget when a single entry is inherently over it (pathological
/// guild id); such an entry is emitted alone.
#[must_use]
pub fn plan_subscription_chunks(guild_ids: &[String]) -> Vec<Map<String, Value>> {
    let mut chunks = Vec::new();
    let mut current = Map::new();
    // Serialized size of the chunk so far; starts at `{}`.
    let mut size = 2usize;

    for id in guild_ids {
        // `"id":<template>` plus a separator when not the first entry.
        let entry = id.len() + 2 + 1 + ENTRY_TEMPLATE.len();
        let separator = usize::from(!current.is_empty());

        if size + separator + entry > CHUNK_BYTE_LIMIT && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            size = 2;
        }

        let separator = usize::from(!current.is_empty());
        current.insert(id.clone(), entry_value());
        size += separator + entry;

        // A lone over-budget entry cannot be split further; ship it alone.
        if current.len() == 1 && size > CHUNK_BYTE_LIMIT {
            chunks.push(std::mem::take(&mut current));
            size = 2;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(count: usize, len: usize) -> Vec<String> {
        (0..count)
            .map(|i| format!("{i:0len$}", len = len))
            .collect()
    }

    fn serialized_len(chunk: &Map<String, Value>) -> usize {
        serde_json::to_string(chunk).unwrap().len()
    }

    #[test]
    fn test_empty_input_produces_no_chunks() {
        assert!(plan_subscription_chunks(&[]).is_empty());
    }

    #[test]
    fn test_single_guild() {
        let chunks = plan_subscription_chunks(&["123456789012345678".to_string()]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].len(), 1);
        assert!(chunks[0].contains_key("123456789012345678"));
        assert!(serialized_len(&chunks[0]) <= CHUNK_BYTE_LIMIT);
    }

    #[test]
    fn test_entry_shape() {
        let chunks = plan_subscription_chunks(&["42".to_string()]);
        let entry = &chunks[0]["42"];
        assert_eq!(entry["typing"], true);
        assert_eq!(entry["threads"], true);
        assert_eq!(entry["activities"], true);
        assert_eq!(entry["member_updates"], true);
        assert_eq!(entry["thread_member_lists"], serde_json::json!([]));
        assert_eq!(entry["members"], serde_json::json!([]));
        assert_eq!(entry["channels"], serde_json::json!({}));
    }

    #[test]
    fn test_200_guilds_split_under_budget() {
        let input = ids(200, 18);
        let chunks = plan_subscription_chunks(&input);

        // 200 entries of ~150 bytes each cannot fit one 14 KiB frame.
        assert!(chunks.len() >= 2, "expected a split, got {}", chunks.len());

        let mut seen = std::collections::HashSet::new();
        for chunk in &chunks {
            assert!(!chunk.is_empty());
            assert!(serialized_len(chunk) <= CHUNK_BYTE_LIMIT);
            for key in chunk.keys() {
                assert!(seen.insert(key.clone()), "duplicate id {key}");
            }
        }
        assert_eq!(seen.len(), input.len());
    }

    #[test]
    fn test_size_accounting_matches_serialization() {
        // Chunks should be packed tight: adding the first id of the next
        // chunk to the previous one would overflow the budget.
        let input = ids(300, 18);
        let chunks = plan_subscription_chunks(&input);

        for window in chunks.windows(2) {
            let (full, next) = (&window[0], &window[1]);
            let first_extra = next.keys().next().unwrap();
            let overflow = serialized_len(full)
                + 1
                + first_extra.len()
                + 2
                + 1
                + ENTRY_TEMPLATE.len();
            assert!(overflow > CHUNK_BYTE_LIMIT);
        }
    }

    #[test]
    fn test_pathological_id_ships_alone() {
        let huge = "9".repeat(15 * 1024);
        let input = vec![
            "111111111111111111".to_string(),
            huge.clone(),
            "222222222222222222".to_string(),
        ];
        let chunks = plan_subscription_chunks(&input);

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 1);
        assert!(chunks[0].contains_key("111111111111111111"));
        // The over-budget entry is alone; the cap does not apply to it.
        assert_eq!(chunks[1].len(), 1);
        assert!(chunks[1].contains_key(&huge));
        assert!(serialized_len(&chunks[1]) > CHUNK_BYTE_LIMIT);
        assert!(chunks[2].contains_key("222222222222222222"));
    }
}
