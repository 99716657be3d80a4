//! Typed ID definitions.

use crate::define_id;

// =============================================================================
// Scheduling
// =============================================================================

define_id!(RequestId, "request");
define_id!(WorkerId, "worker");
define_id!(AccountId, "account");

// =============================================================================
// Pools
// =============================================================================

define_id!(PoolId, "pool");

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IdError, MAX_ID_LEN};
    use proptest::prelude::*;

    #[test]
    fn test_request_id_roundtrip() {
        let id = RequestId::new("4a6f5e2c1d0b3a10").unwrap();
        let parsed: RequestId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert_eq!(parsed.as_str(), "4a6f5e2c1d0b3a10");
    }

    #[test]
    fn test_worker_id_empty() {
        let result: Result<WorkerId, _> = "".parse();
        assert_eq!(result.unwrap_err(), IdError::Empty { kind: "worker" });
    }

    #[test]
    fn test_account_id_too_long() {
        let long = "a".repeat(MAX_ID_LEN + 1);
        let err = AccountId::new(long).unwrap_err();
        assert!(matches!(err, IdError::TooLong { kind: "account", .. }));
        assert!(AccountId::new("a".repeat(MAX_ID_LEN)).is_ok());
    }

    #[test]
    fn test_pool_id_control_character() {
        let err = PoolId::new("pool\n1").unwrap_err();
        assert_eq!(
            err,
            IdError::ControlCharacter {
                kind: "pool",
                position: 4
            }
        );
    }

    #[test]
    fn test_id_json_roundtrip() {
        let id = WorkerId::new("bot-linux-17").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"bot-linux-17\"");
        let parsed: WorkerId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_id_deserialize_rejects_empty() {
        let result: Result<RequestId, _> = serde_json::from_str("\"\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_id_borrow_lookup() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(AccountId::new("chromeos").unwrap(), 1);
        assert_eq!(map.get("chromeos"), Some(&1));
    }

    #[test]
    fn test_all_id_kinds_unique() {
        let kinds = [RequestId::KIND, WorkerId::KIND, AccountId::KIND, PoolId::KIND];
        let unique: std::collections::HashSet<_> = kinds.iter().collect();
        assert_eq!(kinds.len(), unique.len(), "Duplicate ID kinds found!");
    }

    proptest! {
        #[test]
        fn test_printable_ids_roundtrip(s in "[a-zA-Z0-9_:./-]{1,64}") {
            let id = RequestId::new(s.clone()).unwrap();
            prop_assert_eq!(id.as_str(), s.as_str());
            let parsed: RequestId = id.to_string().parse().unwrap();
            prop_assert_eq!(parsed, id);
        }
    }
}
