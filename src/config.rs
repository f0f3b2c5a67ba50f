use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Whether raw packet payload is kept on stored messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    None,
    Memory,
}

impl Default for StorageMode {
    fn default() -> Self {
        StorageMode::Memory
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureOptions {
    /// Max retained calls, 0 disables rotation entirely.
    pub limit: usize,
    /// Evict the oldest unlocked call when the limit is reached.
    pub rotate: bool,
    /// When false RTP/RTCP ingress is skipped.
    pub rtp_capture: bool,
    pub storage_mode: StorageMode,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            limit: 20000,
            rotate: true,
            rtp_capture: true,
            storage_mode: StorageMode::Memory,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchOptions {
    /// Payload match expression, accept-all when unset.
    pub expr: Option<String>,
    pub ignore_case: bool,
    /// Negate the expression verdict.
    pub invert: bool,
    /// Only create calls for dialogs starting with INVITE.
    pub invite_only: bool,
    /// Only create calls for dialogs starting with a dialog-opening request.
    pub complete_only: bool,
}

/// Sortable call attributes of the call list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    Index,
    CallId,
    From,
    To,
    MsgCount,
    StartTime,
    State,
    Duration,
}

impl SortField {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "index" => Some(SortField::Index),
            "callid" => Some(SortField::CallId),
            "from" => Some(SortField::From),
            "to" => Some(SortField::To),
            "msgcnt" => Some(SortField::MsgCount),
            "starttime" => Some(SortField::StartTime),
            "state" => Some(SortField::State),
            "duration" => Some(SortField::Duration),
            _ => None,
        }
    }
}

impl Default for SortField {
    fn default() -> Self {
        SortField::Index
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SortOptions {
    pub by: SortField,
    pub asc: bool,
}

impl Default for SortOptions {
    fn default() -> Self {
        Self {
            by: SortField::Index,
            asc: true,
        }
    }
}

impl SortOptions {
    /// Resolve the initial sort from the host settings, falling back to
    /// call index ascending when unset or unknown.
    pub fn from_settings(settings: &Settings) -> Self {
        let by = settings
            .get("call-list.sort-field")
            .and_then(SortField::from_name)
            .unwrap_or_default();
        let asc = settings
            .get("call-list.sort-order")
            .map(|order| order == "asc")
            .unwrap_or(true);
        Self { by, asc }
    }
}

/// String settings lookup supplied by the host configuration module.
#[derive(Debug, Clone, Default)]
pub struct Settings(HashMap<String, String>);

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(|s| s.as_str())
    }
}
