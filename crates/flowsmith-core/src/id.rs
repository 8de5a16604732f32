use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a flow or one of its entities.
///
/// Fresh ids use the timestamped form `<YYYYmmddHHMMSSffffff>-<uuid hex>`.
/// Plain UUIDs are accepted as well. Counters and ad-hoc names are not.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new() -> Self {
        let stamp = Utc::now().format("%Y%m%d%H%M%S%6f");
        Self(format!("{}-{}", stamp, Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id has one of the accepted unique-id forms.
    pub fn is_canonical(&self) -> bool {
        if Uuid::parse_str(&self.0).is_ok() {
            return true;
        }
        match self.0.split_once('-') {
            Some((stamp, rest)) => {
                (14..=20).contains(&stamp.len())
                    && stamp.bytes().all(|b| b.is_ascii_digit())
                    && rest.len() == 32
                    && Uuid::parse_str(rest).is_ok()
            }
            None => false,
        }
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ids_are_canonical_and_unique() {
        let a = EntityId::new();
        let b = EntityId::new();
        assert!(a.is_canonical(), "{a}");
        assert_ne!(a, b);
    }

    #[test]
    fn test_uuid_forms_are_canonical() {
        assert!(EntityId::from("6f1c2d3e-4b5a-4c6d-8e7f-0123456789ab").is_canonical());
        assert!(EntityId::from("6f1c2d3e4b5a4c6d8e7f0123456789ab").is_canonical());
    }

    #[test]
    fn test_counters_are_not_canonical() {
        for raw in ["", "1", "wa-1", "agent", "2024-abc"] {
            assert!(!EntityId::from(raw).is_canonical(), "{raw:?}");
        }
    }

    #[test]
    fn test_serde_transparent() {
        let id = EntityId::from("6f1c2d3e-4b5a-4c6d-8e7f-0123456789ab");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"6f1c2d3e-4b5a-4c6d-8e7f-0123456789ab\"");
        let back: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
