use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryModule {
    Identity,
    Preferences,
    Constraints,
    Projects,
    Relationships,
    Environment,
    RecentContext,
}

/// Durable fact distilled by the Memory Writer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: Uuid,
    pub user_id: String,
    pub level: u8,
    pub module: MemoryModule,
    /// snake_case.
    pub key: String,
    pub value: String,
    pub confidence: f64,
    pub pinned: bool,
    pub archived: bool,
    pub context_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl MemoryItem {
    pub fn new(
        user_id: impl Into<String>,
        level: u8,
        module: MemoryModule,
        key: impl Into<String>,
        value: impl Into<String>,
        confidence: f64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            level,
            module,
            key: key.into(),
            value: value.into(),
            confidence,
            pinned: false,
            archived: false,
            context_id: None,
            created_at: now,
            last_seen_at: now,
        }
    }
}

/// `(maxItems, maxChars)` per level.
pub fn level_caps(level: u8) -> (usize, usize) {
    match level {
        0 => (4, 50),
        1 => (8, 120),
        2 => (10, 180),
        3 => (12, 200),
        4 => (12, 240),
        5 => (6, 300),
        _ => (0, 0),
    }
}
