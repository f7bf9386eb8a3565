use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::time::{SystemTime, UNIX_EPOCH};

/// The uniform player shape every platform normalizes into.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerProfile {
    /// Platform primary id, formatted where the platform convention
    /// includes separators (dashed UUID, Steam64 digits, XUID).
    pub id: String,
    /// Separator-free form where one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_id: Option<String>,
    pub username: String,
    pub avatar: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skin_texture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cape_texture: Option<String>,
    /// Opaque property list forwarded from Mojang.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub properties: Option<Vec<Value>>,
    /// Legacy field, always empty for new lookups.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name_history: Option<Vec<Value>>,
    /// Parsed skin document, Hytale only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skin: Option<Value>,
    /// Platform-specific promoted fields (the modern-gamertag trio on
    /// Xbox), serialized at the top level of the player object. An empty
    /// map flattens to nothing.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
    pub meta: Map<String, Value>,
    /// Seconds since epoch at normalization time.
    pub cached_at: u64,
}

impl PlayerProfile {
    pub fn new(id: &str, username: &str, avatar: &str) -> Self {
        Self {
            id: id.to_string(),
            raw_id: None,
            username: username.to_string(),
            avatar: avatar.to_string(),
            skin_texture: None,
            cape_texture: None,
            properties: None,
            name_history: None,
            skin: None,
            extra: Map::new(),
            meta: Map::new(),
            cached_at: epoch_seconds(),
        }
    }

    /// The success envelope returned to clients.
    pub fn to_envelope(&self) -> Value {
        json!({
            "success": true,
            "code": "player.found",
            "message": "Successfully found player by given ID.",
            "data": { "player": self },
        })
    }
}

pub fn epoch_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
