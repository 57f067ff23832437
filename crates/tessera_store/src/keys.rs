//! Persistent key layout for the control-meta partition.
//!
//! Region records live under `R/`, command records under `C/`, raft meta
//! under `RM/`. Ids are rendered as zero-padded decimal so lexicographic
//! partition order equals id order and scans come back already sorted.

pub const CONTROL_META_PARTITION: &str = "control_meta";

pub const REGION_PREFIX: &str = "R/";
pub const COMMAND_PREFIX: &str = "C/";
pub const RAFT_META_PREFIX: &str = "RM/";

pub fn region_key(region_id: u64) -> String {
    format!("{REGION_PREFIX}{region_id:020}")
}

pub fn command_key(command_id: u64) -> String {
    format!("{COMMAND_PREFIX}{command_id:020}")
}

pub fn raft_meta_key(region_id: u64) -> String {
    format!("{RAFT_META_PREFIX}{region_id:020}")
}

/// Recover the id from a prefixed key produced by this module.
pub fn parse_id(key: &[u8], prefix: &str) -> Option<u64> {
    let key = std::str::from_utf8(key).ok()?;
    key.strip_prefix(prefix)?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_round_trip_their_ids() {
        assert_eq!(parse_id(region_key(42).as_bytes(), REGION_PREFIX), Some(42));
        assert_eq!(
            parse_id(command_key(u64::MAX).as_bytes(), COMMAND_PREFIX),
            Some(u64::MAX)
        );
        assert_eq!(
            parse_id(raft_meta_key(7).as_bytes(), RAFT_META_PREFIX),
            Some(7)
        );
    }

    #[test]
    fn key_order_matches_id_order() {
        let mut keys: Vec<String> = [9u64, 100, 5, 11, 10]
            .into_iter()
            .map(command_key)
            .collect();
        keys.sort();
        let ids: Vec<u64> = keys
            .iter()
            .map(|k| parse_id(k.as_bytes(), COMMAND_PREFIX).unwrap())
            .collect();
        assert_eq!(ids, vec![5, 9, 10, 11, 100]);
    }

    #[test]
    fn foreign_prefixes_do_not_parse() {
        assert_eq!(parse_id(region_key(1).as_bytes(), COMMAND_PREFIX), None);
        assert_eq!(parse_id(b"garbage", REGION_PREFIX), None);
    }
}
