use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationType {
    Private,
    Group,
}

impl ConversationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationType::Private => "private",
            ConversationType::Group => "group",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "private" => Some(ConversationType::Private),
            "group" => Some(ConversationType::Group),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub conversation_type: ConversationType,
    pub name: Option<String>,
    pub description: Option<String>,
    pub created_by: Uuid,
    pub is_active: bool,
    pub last_message_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Normalized key identifying the unordered pair of a private conversation.
/// The storage layer enforces uniqueness over this key, which is what makes
/// concurrent duplicate creates converge instead of racing.
pub fn private_pair_key(a: Uuid, b: Uuid) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{lo}:{hi}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_key_is_order_independent() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(private_pair_key(a, b), private_pair_key(b, a));
    }

    #[test]
    fn pair_key_distinguishes_pairs() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        assert_ne!(private_pair_key(a, b), private_pair_key(a, c));
    }

    #[test]
    fn conversation_type_round_trips() {
        for t in [ConversationType::Private, ConversationType::Group] {
            assert_eq!(ConversationType::parse(t.as_str()), Some(t));
        }
        assert_eq!(ConversationType::parse("channel"), None);
    }
}
