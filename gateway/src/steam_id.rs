//! SteamID encodings.
//!
//! A Steam account is one 64-bit id with several textual spellings:
//! `STEAM_X:Y:Z` (steam2), `[U:1:A]` (steam3), and the bare 64-bit
//! number. For individual public accounts they relate as
//! `steam64 = 76561197960265728 + A` and `A = Z * 2 + Y`.

use std::fmt;

/// Base offset for individual accounts in the public universe.
const STEAM64_BASE: u64 = 76561197960265728;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SteamId {
    account_id: u32,
}

#[derive(Debug, PartialEq, Eq)]
pub struct InvalidSteamId;

impl fmt::Display for InvalidSteamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not a recognizable SteamID")
    }
}

impl SteamId {
    /// Accepts any of the supported spellings: steam2 (`STEAM_X:Y:Z`),
    /// steam3 (`[U:1:A]` or `U:1:A`), or a 64-bit id.
    pub fn parse(input: &str) -> Result<Self, InvalidSteamId> {
        let input = input.trim();
        if let Some(rest) = input.strip_prefix("STEAM_") {
            return Self::parse_steam2(rest);
        }
        if input.starts_with("[U:") || input.starts_with("U:") {
            return Self::parse_steam3(input);
        }
        if input.starts_with("7656119") {
            let value: u64 = input.parse().map_err(|_| InvalidSteamId)?;
            let account_id = value.checked_sub(STEAM64_BASE).ok_or(InvalidSteamId)?;
            let account_id = u32::try_from(account_id).map_err(|_| InvalidSteamId)?;
            return Ok(Self { account_id });
        }
        Err(InvalidSteamId)
    }

    fn parse_steam2(rest: &str) -> Result<Self, InvalidSteamId> {
        // rest is "X:Y:Z"; X is the universe and is ignored for lookups.
        let mut parts = rest.split(':');
        let _universe: u8 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or(InvalidSteamId)?;
        let parity: u32 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or(InvalidSteamId)?;
        if parity > 1 {
            return Err(InvalidSteamId);
        }
        let half: u32 = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or(InvalidSteamId)?;
        if parts.next().is_some() {
            return Err(InvalidSteamId);
        }
        let account_id = half.checked_mul(2).ok_or(InvalidSteamId)? + parity;
        Ok(Self { account_id })
    }

    fn parse_steam3(input: &str) -> Result<Self, InvalidSteamId> {
        let inner = input
            .strip_prefix('[')
            .map(|s| s.strip_suffix(']').ok_or(InvalidSteamId))
            .transpose()?
            .unwrap_or(input);
        let rest = inner.strip_prefix("U:1:").ok_or(InvalidSteamId)?;
        let account_id: u32 = rest.parse().map_err(|_| InvalidSteamId)?;
        Ok(Self { account_id })
    }

    pub fn steam64(&self) -> u64 {
        STEAM64_BASE + self.account_id as u64
    }

    /// Legacy rendering with universe 0.
    pub fn steam2(&self) -> String {
        format!("STEAM_0:{}:{}", self.account_id & 1, self.account_id >> 1)
    }

    /// Modern rendering with universe 1.
    pub fn steam2_new(&self) -> String {
        format!("STEAM_1:{}:{}", self.account_id & 1, self.account_id >> 1)
    }

    pub fn steam3(&self) -> String {
        format!("[U:1:{}]", self.account_id)
    }
}

/// Does the input look like one of the SteamID spellings (as opposed to a
/// vanity name)?
pub fn looks_like_steam_id(input: &str) -> bool {
    input.starts_with("STEAM_")
        || input.starts_with("7656119")
        || input.starts_with("U:")
        || input.starts_with("[U:")
}
