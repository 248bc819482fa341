//! Shared types between the agent server and log view clients
//!
//! These types describe the poll protocol:
//! - `PollRequest` / `PollResponse` (client ↔ server, JSON over HTTP)
//! - `LogEntry` (one unit of agent activity inside a poll batch)
//! - `SendMessageRequest` / `SendMessageResponse` (user message submission)
//!
//! Decoding is lenient: a poll batch never fails because one entry is missing a
//! field the server did not bother to fill in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use ts_rs::TS;

// ============================================================================
// Constants
// ============================================================================

/// Prefix marking a kvp value or content token as an image reference.
pub const IMAGE_SENTINEL: &str = "img://";

/// Prefix marking an icon name inside progress strings.
pub const ICON_SENTINEL: &str = "icon://";

/// Tool name the agents use to spawn a subordinate agent.
pub const DEFAULT_DELEGATE_TOOL: &str = "call_subordinate";

/// Type given to entries whose `type` is missing or not a string.
pub const UNKNOWN_TYPE: &str = "unknown";

/// kvp key carrying the tool name of a tool step.
pub const KVP_TOOL_NAME: &str = "tool_name";

// ============================================================================
// Log entries
// ============================================================================

/// Closed set of log entry kinds emitted by the agent server.
///
/// Unknown kinds are preserved in `Other` so they still get a generic rendering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LogType {
    User,
    Agent,
    Response,
    Tool,
    CodeExe,
    Browser,
    Warning,
    Error,
    RateLimit,
    Info,
    Hint,
    Util,
    Progress,
    Other(String),
}

impl LogType {
    pub fn as_str(&self) -> &str {
        match self {
            LogType::User => "user",
            LogType::Agent => "agent",
            LogType::Response => "response",
            LogType::Tool => "tool",
            LogType::CodeExe => "code_exe",
            LogType::Browser => "browser",
            LogType::Warning => "warning",
            LogType::Error => "error",
            LogType::RateLimit => "rate_limit",
            LogType::Info => "info",
            LogType::Hint => "hint",
            LogType::Util => "util",
            LogType::Progress => "progress",
            LogType::Other(raw) => raw.as_str(),
        }
    }
}

impl From<&str> for LogType {
    fn from(value: &str) -> Self {
        match value {
            "user" => LogType::User,
            "agent" => LogType::Agent,
            "response" => LogType::Response,
            "tool" => LogType::Tool,
            "code_exe" => LogType::CodeExe,
            "browser" => LogType::Browser,
            "warning" => LogType::Warning,
            "error" => LogType::Error,
            "rate_limit" => LogType::RateLimit,
            "info" => LogType::Info,
            "hint" => LogType::Hint,
            "util" => LogType::Util,
            "progress" => LogType::Progress,
            other => LogType::Other(other.to_string()),
        }
    }
}

impl From<String> for LogType {
    fn from(value: String) -> Self {
        LogType::from(value.as_str())
    }
}

impl From<LogType> for String {
    fn from(value: LogType) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for LogType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// LogEntry - one server-side log item, keyed by a stable `id`
///
/// Decoding never fails: each field is read on its own and a badly typed value falls
/// back to its default, so one odd entry cannot take down a whole poll batch.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export, export_to = "../bindings/wire.ts")]
pub struct LogEntry {
    /// Position in the server log (informational)
    pub no: Option<u64>,

    /// Stable identifier, unique within a session
    pub id: String,

    #[serde(rename = "type")]
    #[ts(type = "string")]
    pub entry_type: LogType,

    pub heading: String,

    pub content: String,

    /// Key/value details; values may be strings, arrays or nested objects
    #[ts(type = "Record<string, unknown>")]
    pub kvps: serde_json::Map<String, serde_json::Value>,

    /// Epoch seconds (float) or RFC 3339 on the wire
    #[ts(type = "number | string | null")]
    pub timestamp: Option<DateTime<Utc>>,

    /// Absent while the entry is still in progress
    pub duration_ms: Option<u64>,

    /// 0 for the top-level agent, N for a subordinate at delegation depth N
    pub agent_number: u32,
}

impl<'de> Deserialize<'de> for LogEntry {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(LogEntry::from_value(value))
    }
}

impl LogEntry {
    pub fn new(id: impl Into<String>, entry_type: LogType) -> Self {
        Self {
            no: None,
            id: id.into(),
            entry_type,
            heading: String::new(),
            content: String::new(),
            kvps: serde_json::Map::new(),
            timestamp: None,
            duration_ms: None,
            agent_number: 0,
        }
    }

    /// Read an entry field by field from arbitrary JSON.
    ///
    /// Numeric ids become strings, float durations are rounded, and non-text headings are
    /// shown as JSON. Anything that is not an object becomes an `unknown` entry.
    pub fn from_value(value: serde_json::Value) -> Self {
        let mut fields = match value {
            serde_json::Value::Object(fields) => fields,
            other => {
                let mut entry = LogEntry::new("", LogType::Other(UNKNOWN_TYPE.to_string()));
                entry.content = lenient::text(Some(other));
                return entry;
            }
        };

        let entry_type = match fields.remove("type") {
            Some(serde_json::Value::String(raw)) if !raw.trim().is_empty() => {
                LogType::from(raw.trim())
            }
            _ => LogType::Other(UNKNOWN_TYPE.to_string()),
        };
        let kvps = match fields.remove("kvps") {
            Some(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        let duration = lenient::first(&mut fields, &["duration_ms", "durationMs"]);
        let agent = lenient::first(&mut fields, &["agent_number", "agentno", "agentNumber"]);

        Self {
            no: fields.remove("no").and_then(|v| lenient::unsigned(&v)),
            id: lenient::text(fields.remove("id")),
            entry_type,
            heading: lenient::text(fields.remove("heading")),
            content: lenient::text(fields.remove("content")),
            kvps,
            timestamp: fields
                .remove("timestamp")
                .and_then(|v| timestamp::from_value(&v)),
            duration_ms: duration.and_then(|v| lenient::unsigned(&v)),
            agent_number: agent
                .and_then(|v| lenient::unsigned(&v))
                .and_then(|n| u32::try_from(n).ok())
                .unwrap_or(0),
        }
    }

    /// Reconciliation key. Falls back to the log position when the server sent no id.
    pub fn key(&self) -> String {
        if !self.id.trim().is_empty() {
            return self.id.clone();
        }
        match self.no {
            Some(no) => format!("no-{no}"),
            None => String::new(),
        }
    }

    /// Tool name carried in kvps, if any.
    pub fn tool_name(&self) -> Option<&str> {
        self.kvps
            .get(KVP_TOOL_NAME)
            .and_then(|v| v.as_str())
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Bool(flag) => flag,
        serde_json::Value::String(text) => !text.is_empty(),
        serde_json::Value::Number(n) => n.as_f64().map(|v| v != 0.0).unwrap_or(false),
        serde_json::Value::Null => false,
        serde_json::Value::Array(items) => !items.is_empty(),
        serde_json::Value::Object(map) => !map.is_empty(),
    })
}

mod timestamp {
    use chrono::{DateTime, Utc};

    pub fn from_value(value: &serde_json::Value) -> Option<DateTime<Utc>> {
        match value {
            serde_json::Value::Number(n) => n.as_f64().and_then(from_epoch_seconds),
            serde_json::Value::String(raw) => parse_text(raw),
            _ => None,
        }
    }

    fn parse_text(raw: &str) -> Option<DateTime<Utc>> {
        let raw = raw.trim();
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.with_timezone(&Utc));
        }
        raw.parse::<f64>().ok().and_then(from_epoch_seconds)
    }

    pub(crate) fn from_epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        let whole = secs.trunc() as i64;
        let nanos = ((secs - secs.trunc()) * 1_000_000_000.0).round() as u32;
        DateTime::from_timestamp(whole, nanos.min(999_999_999))
    }
}

/// Tolerant readers for loosely typed server JSON.
mod lenient {
    use serde::{Deserialize, Deserializer};
    use serde_json::{Map, Value};

    use crate::LogEntry;

    /// Take the first present, non-null key of `keys`.
    pub fn first(fields: &mut Map<String, Value>, keys: &[&str]) -> Option<Value> {
        keys.iter()
            .filter_map(|key| fields.remove(*key))
            .find(|value| !value.is_null())
    }

    pub fn text(value: Option<Value>) -> String {
        match value {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(text)) => text,
            Some(other) => other.to_string(),
        }
    }

    /// Non-negative integer from an integer, a float (rounded) or a numeric string.
    pub fn unsigned(value: &Value) -> Option<u64> {
        let number = match value {
            Value::Number(n) => match n.as_u64() {
                Some(exact) => return Some(exact),
                None => n.as_f64()?,
            },
            Value::String(raw) => raw.trim().parse::<f64>().ok()?,
            _ => return None,
        };
        (number.is_finite() && number >= 0.0 && number <= u64::MAX as f64)
            .then(|| number.round() as u64)
    }

    pub fn u64_or_zero<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Ok(unsigned(&value).unwrap_or(0))
    }

    /// Entry list that survives a non-array value.
    pub fn entries<'de, D>(deserializer: D) -> Result<Vec<LogEntry>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Value::deserialize(deserializer)? {
            Value::Array(items) => items.into_iter().map(LogEntry::from_value).collect(),
            _ => Vec::new(),
        })
    }
}

// ============================================================================
// Poll protocol
// ============================================================================

/// Client → Server: request the log delta since `log_from`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../bindings/wire.ts")]
pub struct PollRequest {
    /// Last acknowledged log version (0 means "send full history")
    pub log_from: u64,
    /// Session identifier
    pub context: Option<String>,
    pub notifications_from: u64,
    /// IANA timezone name
    pub timezone: String,
}

/// Server → Client: log delta plus auxiliary state
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../bindings/wire.ts")]
pub struct PollResponse {
    #[serde(default, deserialize_with = "truthy")]
    pub deselect_chat: bool,

    /// Session the server answered for (empty when none)
    #[serde(default, deserialize_with = "null_as_default")]
    pub context: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub contexts: Vec<SessionSummary>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub tasks: Vec<SessionSummary>,

    #[serde(default, deserialize_with = "lenient::entries")]
    pub logs: Vec<LogEntry>,

    /// Session-log identity; a change means the log was recreated server-side
    #[serde(default, deserialize_with = "null_as_default")]
    pub log_guid: String,

    #[serde(default, deserialize_with = "lenient::u64_or_zero")]
    pub log_version: u64,

    /// Status string (may embed icon sentinels) or 0 when idle
    #[serde(default)]
    #[ts(type = "string | number | null")]
    pub log_progress: serde_json::Value,

    #[serde(default, deserialize_with = "truthy")]
    pub log_progress_active: bool,

    #[serde(default, deserialize_with = "truthy")]
    pub paused: bool,

    #[serde(default, deserialize_with = "null_as_default")]
    #[ts(type = "unknown[]")]
    pub notifications: Vec<serde_json::Value>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub notifications_guid: String,

    #[serde(default, deserialize_with = "lenient::u64_or_zero")]
    pub notifications_version: u64,
}

/// Entry of the session or task list shown next to the log view
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../bindings/wire.ts")]
pub struct SessionSummary {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default, deserialize_with = "truthy")]
    pub running: bool,
    #[serde(flatten)]
    #[ts(skip)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ============================================================================
// Message submission
// ============================================================================

/// Client → Server: user message with optional attachments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../bindings/wire.ts")]
pub struct SendMessageRequest {
    pub text: String,
    pub attachments: Vec<String>,
    pub context: Option<String>,
    /// Client-generated id; the server echoes it as the user log entry id
    pub message_id: String,
}

impl SendMessageRequest {
    pub fn new(text: impl Into<String>, context: Option<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
            context,
            message_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_attachments(mut self, attachments: Vec<String>) -> Self {
        self.attachments = attachments;
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[ts(export, export_to = "../bindings/wire.ts")]
pub struct SendMessageResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    /// Session the message was routed to (a new one when none was given)
    #[serde(default, deserialize_with = "null_as_default")]
    pub context: String,
}

// ============================================================================
// Tests
// ============================================================================
