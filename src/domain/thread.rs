use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use time::OffsetDateTime;
use uuid::Uuid;

/// Maximum length of the denormalized last-message preview.
pub const PREVIEW_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    Active,
    Archived,
    Deleted,
}

impl ThreadStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
            Self::Deleted => "deleted",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "archived" => Some(Self::Archived),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// The two historical shapes a stored thread can take. Old marketplace
/// conversations were keyed by buyer/seller roles; everything since carries an
/// explicit participant list. The distinction stays at this boundary; the
/// service only ever sees the resolved set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThreadParties {
    Explicit(Vec<Uuid>),
    Legacy { buyer_id: Uuid, seller_id: Uuid },
}

impl ThreadParties {
    /// The logical participant set, deduplicated, in stored order.
    #[must_use]
    pub fn participants(&self) -> Vec<Uuid> {
        match self {
            Self::Explicit(ids) => {
                let mut seen = Vec::with_capacity(ids.len());
                for id in ids {
                    if !seen.contains(id) {
                        seen.push(*id);
                    }
                }
                seen
            }
            Self::Legacy { buyer_id, seller_id } => {
                if buyer_id == seller_id {
                    vec![*buyer_id]
                } else {
                    vec![*buyer_id, *seller_id]
                }
            }
        }
    }

    #[must_use]
    pub fn contains(&self, user_id: Uuid) -> bool {
        match self {
            Self::Explicit(ids) => ids.contains(&user_id),
            Self::Legacy { buyer_id, seller_id } => *buyer_id == user_id || *seller_id == user_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: Uuid,
    pub parties: ThreadParties,
    pub status: ThreadStatus,
    pub last_message_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_message_at: Option<OffsetDateTime>,
    pub last_message_text: Option<String>,
    pub last_message_sender_id: Option<Uuid>,
    pub unread: HashMap<Uuid, i64>,
    pub metadata: serde_json::Value,
    pub created_by: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Thread {
    #[must_use]
    pub fn participants(&self) -> Vec<Uuid> {
        self.parties.participants()
    }

    #[must_use]
    pub fn is_participant(&self, user_id: Uuid) -> bool {
        self.parties.contains(user_id)
    }

    #[must_use]
    pub fn unread_for(&self, user_id: Uuid) -> i64 {
        self.unread.get(&user_id).copied().unwrap_or(0)
    }
}

/// Sorted, deduplicated participant set used as the idempotent lookup key.
#[must_use]
pub fn normalized_participants(ids: &[Uuid]) -> Vec<Uuid> {
    let mut sorted = ids.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    sorted
}

/// Truncates message text to the preview length on a char boundary.
#[must_use]
pub fn preview_of(text: &str) -> String {
    text.chars().take(PREVIEW_LEN).collect()
}
