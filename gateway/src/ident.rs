//! Per-platform identifier canonicalization.
//!
//! The canonical form doubles as the cache key and the upstream query, so
//! the rules here decide both what is accepted and how lookups dedupe.

use crate::errors::ApiError;
use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Minecraft,
    Steam,
    Xbox,
    Hytale,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Minecraft => "minecraft",
            Platform::Steam => "steam",
            Platform::Xbox => "xbox",
            Platform::Hytale => "hytale",
        }
    }

    pub fn from_path_segment(segment: &str) -> Option<Self> {
        match segment {
            "minecraft" => Some(Platform::Minecraft),
            "steam" => Some(Platform::Steam),
            "xbox" => Some(Platform::Xbox),
            "hytale" => Some(Platform::Hytale),
            _ => None,
        }
    }

    /// Error code under this platform's prefix, e.g. `steam.api_failure`.
    pub fn code(&self, suffix: &str) -> String {
        format!("{}.{suffix}", self.as_str())
    }
}

static MINECRAFT_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[\w-]+$").expect("static regex"));
static XBOX_XUID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,16}$").expect("static regex"));
static HYTALE_USERNAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\w{3,16}$").expect("static regex"));
static HYTALE_UUID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[\da-f]{8}(-?[\da-f]{4}){3}-?[\da-f]{12}$").expect("static regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MinecraftQuery {
    /// Separator-free lowercase UUID.
    Uuid(String),
    Name(String),
}

/// Word characters and dashes only; 32 chars is a raw UUID, 36 a dashed
/// one, anything else is treated as a username.
pub fn canonicalize_minecraft(query: &str) -> Result<MinecraftQuery, ApiError> {
    if !MINECRAFT_NAME.is_match(query) {
        return Err(ApiError::fail("minecraft.invalid_username"));
    }
    match query.len() {
        32 => Ok(MinecraftQuery::Uuid(query.to_ascii_lowercase())),
        36 => Ok(MinecraftQuery::Uuid(
            query.replace('-', "").to_ascii_lowercase(),
        )),
        _ => Ok(MinecraftQuery::Name(query.to_string())),
    }
}

/// Formats a 32-char raw UUID as 8-4-4-4-12. Inputs of any other length
/// come back unchanged.
pub fn format_uuid(raw: &str) -> String {
    if raw.len() != 32 {
        return raw.to_string();
    }
    format!(
        "{}-{}-{}-{}-{}",
        &raw[0..8],
        &raw[8..12],
        &raw[12..16],
        &raw[16..20],
        &raw[20..32]
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XboxQuery {
    Xuid(String),
    Gamertag(String),
}

pub fn canonicalize_xbox(query: &str) -> XboxQuery {
    if XBOX_XUID.is_match(query) {
        XboxQuery::Xuid(query.to_string())
    } else {
        XboxQuery::Gamertag(query.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HytaleQuery {
    /// Separator-free lowercase UUID.
    Uuid(String),
    Username(String),
}

pub fn canonicalize_hytale(query: &str) -> Result<HytaleQuery, ApiError> {
    let lowered = query.to_ascii_lowercase();
    if HYTALE_UUID.is_match(&lowered) {
        return Ok(HytaleQuery::Uuid(lowered.replace('-', "")));
    }
    if HYTALE_USERNAME.is_match(query) {
        return Ok(HytaleQuery::Username(query.to_string()));
    }
    Err(ApiError::fail("hytale.invalid_identifier"))
}

/// `<platform>-<role>-<lowercase identifier>`.
pub fn cache_key(platform: Platform, role: &str, ident: &str) -> String {
    format!("{}-{role}-{}", platform.as_str(), ident.to_ascii_lowercase())
}
