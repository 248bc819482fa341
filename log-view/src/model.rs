//! In-memory records the rendered view is projected from.
//!
//! Records live in per-session arenas and refer to each other through typed indices;
//! parent/child links are explicit, never inferred from render order.

use chrono::{DateTime, Utc};
use shared_types::LogType;

use crate::entry::{GroupingClass, LogTypeExt};
use crate::kvps::KvpTable;
use crate::status::StatusBadge;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StepRef(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupRef(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerRef(pub(crate) usize);

/// Title shown on a group header before any step has a heading.
pub const PROCESSING_TITLE: &str = "Processing…";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepParent {
    Group(GroupRef),
    /// Nested under the delegation step that spawned this subordinate.
    Step(StepRef),
}

#[derive(Debug, Clone)]
pub struct StepRecord {
    pub id: String,
    pub entry_type: LogType,
    pub heading: String,
    pub content: String,
    pub content_html: String,
    pub kvps: KvpTable,
    pub timestamp: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub agent_number: u32,
    /// Tool name from kvps, or inherited from the previous sibling of the same type.
    pub tool_name: Option<String>,
    pub tool_name_inherited: bool,
    pub badge: StatusBadge,
    pub group: GroupRef,
    pub parent: StepParent,
    pub children: Vec<StepRef>,
    /// Only the most recently appended step of a group is active.
    pub active: bool,
    pub revision: u64,
}

impl StepRecord {
    pub fn title(&self) -> &str {
        if self.heading.trim().is_empty() {
            self.entry_type.default_heading()
        } else {
            &self.heading
        }
    }

    pub fn has_nested(&self) -> bool {
        !self.children.is_empty()
    }

    /// Subordinate responses show their full content; other steps show it on expand.
    pub fn shows_full_content(&self) -> bool {
        self.entry_type == LogType::Response
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupState {
    Open,
    /// Closed by a top-level response; embedded in that response's container.
    Completed,
    /// A user message arrived before any response; no longer tracked.
    Detached,
}

#[derive(Debug, Clone)]
pub struct ProcessGroup {
    /// Stable across reloads: derived from the first step's entry id.
    pub id: String,
    pub state: GroupState,
    /// Top-level steps only.
    pub steps: Vec<StepRef>,
    /// Every step including nested ones, in append order.
    pub order: Vec<StepRef>,
    /// Standalone container while open, the response container once completed.
    pub container: ContainerRef,
    pub title: String,
    pub badge: StatusBadge,
    pub revision: u64,
}

impl ProcessGroup {
    pub fn is_open(&self) -> bool {
        self.state == GroupState::Open
    }

    pub fn step_count(&self) -> usize {
        self.order.len()
    }
}

#[derive(Debug, Clone)]
pub struct MessageRecord {
    pub id: String,
    pub entry_type: LogType,
    pub heading: String,
    pub content: String,
    pub content_html: String,
    pub kvps: KvpTable,
    pub attachments: Vec<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub agent_number: u32,
    /// Rendered optimistically and not yet corroborated by a poll.
    pub pending: bool,
    pub revision: u64,
}

impl MessageRecord {
    pub fn title(&self) -> &str {
        if self.heading.trim().is_empty() {
            self.entry_type.default_heading()
        } else {
            &self.heading
        }
    }
}

#[derive(Debug, Clone)]
pub enum ContainerKind {
    Message(MessageRecord),
    Process(GroupRef),
}

#[derive(Debug, Clone)]
pub struct Container {
    pub kind: ContainerKind,
    pub class: GroupingClass,
    /// Completed process group shown as a prefix of a response.
    pub embedded_group: Option<GroupRef>,
}

impl Container {
    pub fn message(&self) -> Option<&MessageRecord> {
        match &self.kind {
            ContainerKind::Message(record) => Some(record),
            ContainerKind::Process(_) => None,
        }
    }
}

/// Consecutive containers sharing a grouping class.
#[derive(Debug, Clone)]
pub struct MessageGroup {
    pub class: GroupingClass,
    pub containers: Vec<ContainerRef>,
}
