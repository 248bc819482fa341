//! SessionView - per-session reconciliation context
//!
//! Every log entry of one chat session flows through `SessionView::apply`, which upserts
//! the record keyed by entry id:
//! - unseen id: route it (standalone message, process step, group completion)
//! - known id: patch the existing record in place
//!
//! The view keeps its own grouping pointer and nesting map, so two sessions never share
//! reconciliation state. Every change is recorded as dirty so a renderer can patch only
//! what moved.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use shared_types::{LogEntry, LogType, DEFAULT_DELEGATE_TOOL};

use crate::entry::{GroupingClass, LogTypeExt, Placement};
use crate::kvps::{KvpOptions, KvpTable};
use crate::markup::render_content;
use crate::model::{
    Container, ContainerKind, ContainerRef, GroupRef, MessageGroup, MessageRecord,
    ProcessGroup, StepRecord, StepRef,
};
use crate::nesting::NestingMap;
use crate::status::badge_for;

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub kvps: KvpOptions,
    /// Tool name whose steps host nested subordinate steps.
    pub delegate_tool: String,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self {
            kvps: KvpOptions::default(),
            delegate_tool: DEFAULT_DELEGATE_TOOL.to_string(),
        }
    }
}

/// Rendered node an entry id resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRef {
    Message(ContainerRef),
    Step(StepRef),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Created,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub id: String,
    pub node: NodeRef,
    pub change: Change,
}

/// Something a renderer has to repaint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirtyNode {
    Container(ContainerRef),
    Step(StepRef),
    GroupHeader(GroupRef),
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Dirty {
    pub nodes: Vec<DirtyNode>,
    /// Containers were added, moved or removed.
    pub layout: bool,
}

impl Dirty {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && !self.layout
    }
}

#[derive(Debug)]
pub struct SessionView {
    pub(crate) session_id: Option<String>,
    pub(crate) options: ReconcileOptions,
    pub(crate) containers: Vec<Container>,
    pub(crate) message_groups: Vec<MessageGroup>,
    pub(crate) steps: Vec<StepRecord>,
    pub(crate) groups: Vec<ProcessGroup>,
    pub(crate) index: HashMap<String, NodeRef>,
    /// Group currently receiving steps.
    pub(crate) open_group: Option<GroupRef>,
    pub(crate) nesting: NestingMap,
    pub(crate) dirty: Dirty,
    anonymous: u64,
}

impl SessionView {
    pub fn new(session_id: Option<String>, options: ReconcileOptions) -> Self {
        Self {
            session_id,
            options,
            containers: Vec::new(),
            message_groups: Vec::new(),
            steps: Vec::new(),
            groups: Vec::new(),
            index: HashMap::new(),
            open_group: None,
            nesting: NestingMap::default(),
            dirty: Dirty::default(),
            anonymous: 0,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn options(&self) -> &ReconcileOptions {
        &self.options
    }

    /// Drop every record. Used when the server log identity changes.
    pub fn reset(&mut self) {
        self.containers.clear();
        self.message_groups.clear();
        self.steps.clear();
        self.groups.clear();
        self.index.clear();
        self.open_group = None;
        self.nesting.clear();
        self.anonymous = 0;
        self.dirty = Dirty {
            nodes: Vec::new(),
            layout: true,
        };
    }

    /// Apply a batch in array order.
    pub fn apply_batch<'a>(&mut self, entries: impl IntoIterator<Item = &'a LogEntry>) -> Vec<Applied> {
        entries.into_iter().map(|entry| self.apply(entry)).collect()
    }

    /// Upsert one entry. Never drops an entry: unknown types get a generic container.
    pub fn apply(&mut self, entry: &LogEntry) -> Applied {
        let mut key = entry.key();
        if key.is_empty() {
            self.anonymous += 1;
            key = format!("anon-{}", self.anonymous);
        }

        if let Some(node) = self.index.get(&key).copied() {
            let changed = match node {
                NodeRef::Message(container) => self.patch_message(container, entry),
                NodeRef::Step(step) => self.patch_step(step, entry),
            };
            tracing::trace!(entry_id = %key, changed, "Patched log entry");
            return Applied {
                id: key,
                node,
                change: if changed { Change::Updated } else { Change::Unchanged },
            };
        }

        let node = self.insert(entry, &key);
        self.index.insert(key.clone(), node);
        tracing::trace!(entry_id = %key, entry_type = %entry.entry_type, "Created log entry");
        Applied {
            id: key,
            node,
            change: Change::Created,
        }
    }

    /// Render the user's own message before the server corroborates it.
    ///
    /// The server echoes `message_id` as the entry id, so the poll result patches this
    /// record instead of adding a second one.
    pub fn apply_optimistic_user(
        &mut self,
        message_id: &str,
        text: &str,
        attachments: &[String],
        now: DateTime<Utc>,
    ) -> Applied {
        let mut entry = LogEntry::new(message_id, LogType::User);
        entry.content = text.to_string();
        entry.timestamp = Some(now);
        if !attachments.is_empty() {
            entry.kvps.insert(
                "attachments".to_string(),
                Value::Array(attachments.iter().cloned().map(Value::String).collect()),
            );
        }
        let applied = self.apply(&entry);
        if let NodeRef::Message(container) = applied.node {
            if let ContainerKind::Message(record) = &mut self.containers[container.0].kind {
                if applied.change == Change::Created {
                    record.pending = true;
                }
            }
        }
        applied
    }

    /// Take and clear the set of nodes changed since the last call.
    pub fn take_dirty(&mut self) -> Dirty {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn mark(&mut self, node: DirtyNode) {
        if !self.dirty.nodes.contains(&node) {
            self.dirty.nodes.push(node);
        }
    }

    fn insert(&mut self, entry: &LogEntry, key: &str) -> NodeRef {
        match entry.entry_type.placement(entry.agent_number) {
            Placement::Main => {
                if entry.entry_type == LogType::User {
                    // A new interaction: stop routing steps into the previous group.
                    self.detach_open_group();
                }
                let container = self.insert_message(entry, key);
                if entry.entry_type == LogType::Response {
                    self.complete_open_group(container);
                }
                NodeRef::Message(container)
            }
            Placement::Process => NodeRef::Step(self.insert_step(entry, key)),
            Placement::Contextual if self.open_group.is_some() => {
                NodeRef::Step(self.insert_step(entry, key))
            }
            Placement::Contextual => NodeRef::Message(self.insert_message(entry, key)),
        }
    }

    fn insert_message(&mut self, entry: &LogEntry, key: &str) -> ContainerRef {
        let mut kvps = KvpTable::default();
        kvps.update(&entry.kvps, &self.options.kvps);
        let record = MessageRecord {
            id: key.to_string(),
            entry_type: entry.entry_type.clone(),
            heading: entry.heading.clone(),
            content: entry.content.clone(),
            content_html: render_content(&entry.content, entry.entry_type.renders_markdown()),
            kvps,
            attachments: attachments_of(entry),
            timestamp: entry.timestamp,
            duration_ms: entry.duration_ms,
            agent_number: entry.agent_number,
            pending: false,
            revision: 0,
        };
        let class = entry.entry_type.grouping_class();
        let forced = entry.entry_type.forces_new_group();
        self.push_container(
            Container {
                kind: ContainerKind::Message(record),
                class,
                embedded_group: None,
            },
            forced,
        )
    }

    /// Append a container to the layout, merging into the last message group when the
    /// grouping class matches and the type does not force a new group.
    pub(crate) fn push_container(&mut self, container: Container, force_new_group: bool) -> ContainerRef {
        let class = container.class;
        let container_ref = ContainerRef(self.containers.len());
        self.containers.push(container);

        match self.message_groups.last_mut() {
            Some(group) if !force_new_group && group.class == class => {
                group.containers.push(container_ref);
            }
            _ => self.message_groups.push(MessageGroup {
                class,
                containers: vec![container_ref],
            }),
        }
        self.dirty.layout = true;
        self.mark(DirtyNode::Container(container_ref));
        container_ref
    }

    /// Remove a container from the layout (its record stays in the arena).
    pub(crate) fn detach_container(&mut self, container: ContainerRef) {
        for group in &mut self.message_groups {
            group.containers.retain(|c| *c != container);
        }
        self.message_groups.retain(|group| !group.containers.is_empty());
        self.dirty.layout = true;
    }

    fn patch_message(&mut self, container: ContainerRef, entry: &LogEntry) -> bool {
        let options = self.options.kvps.clone();
        let ContainerKind::Message(record) = &mut self.containers[container.0].kind else {
            return false;
        };

        let mut changed = false;
        if record.heading != entry.heading {
            record.heading = entry.heading.clone();
            changed = true;
        }
        if record.content != entry.content {
            record.content = entry.content.clone();
            record.content_html =
                render_content(&entry.content, record.entry_type.renders_markdown());
            changed = true;
        }
        if !record.kvps.update(&entry.kvps, &options).is_empty() {
            changed = true;
        }
        let attachments = attachments_of(entry);
        if record.attachments != attachments && !(attachments.is_empty() && record.pending) {
            record.attachments = attachments;
            changed = true;
        }
        if record.duration_ms != entry.duration_ms {
            record.duration_ms = entry.duration_ms;
            changed = true;
        }
        if entry.timestamp.is_some() && record.timestamp != entry.timestamp {
            record.timestamp = entry.timestamp;
            changed = true;
        }
        if record.pending {
            record.pending = false;
            changed = true;
        }

        if changed {
            record.revision += 1;
            self.mark(DirtyNode::Container(container));
        }
        changed
    }

    fn patch_step(&mut self, step: StepRef, entry: &LogEntry) -> bool {
        let options = self.options.kvps.clone();
        let delegate_tool = self.options.delegate_tool.clone();
        let record = &mut self.steps[step.0];

        let mut changed = false;
        if record.heading != entry.heading {
            record.heading = entry.heading.clone();
            changed = true;
        }
        if record.content != entry.content {
            record.content = entry.content.clone();
            record.content_html =
                render_content(&entry.content, record.entry_type.renders_markdown());
            changed = true;
        }
        if !record.kvps.update(&entry.kvps, &options).is_empty() {
            changed = true;
        }
        if record.duration_ms != entry.duration_ms {
            record.duration_ms = entry.duration_ms;
            changed = true;
        }
        if entry.timestamp.is_some() && record.timestamp != entry.timestamp {
            record.timestamp = entry.timestamp;
            changed = true;
        }
        if let Some(name) = entry.tool_name() {
            if record.tool_name.as_deref() != Some(name) || record.tool_name_inherited {
                record.tool_name = Some(name.to_string());
                record.tool_name_inherited = false;
                changed = true;
            }
        }
        let badge = badge_for(&record.entry_type, record.tool_name.as_deref(), &delegate_tool);
        if record.badge != badge {
            record.badge = badge;
            changed = true;
        }

        if !changed {
            return false;
        }
        record.revision += 1;
        let group = record.group;
        let agent_number = record.agent_number;
        let is_delegation = record.tool_name.as_deref() == Some(delegate_tool.as_str());

        if self.groups[group.0].is_open() {
            if is_delegation {
                self.nesting.record(agent_number, step);
            } else {
                self.nesting.forget(agent_number, step);
            }
        }
        self.mark(DirtyNode::Step(step));
        if self.groups[group.0].is_open() {
            self.recompute_header(group);
        }
        true
    }

    // ── Read access for renderers ────────────────────────────────────────────

    pub fn message_groups(&self) -> &[MessageGroup] {
        &self.message_groups
    }

    pub fn container(&self, container: ContainerRef) -> &Container {
        &self.containers[container.0]
    }

    pub fn step(&self, step: StepRef) -> &StepRecord {
        &self.steps[step.0]
    }

    pub fn group(&self, group: GroupRef) -> &ProcessGroup {
        &self.groups[group.0]
    }

    pub fn groups(&self) -> impl Iterator<Item = (GroupRef, &ProcessGroup)> {
        self.groups
            .iter()
            .enumerate()
            .map(|(idx, group)| (GroupRef(idx), group))
    }

    pub fn node(&self, id: &str) -> Option<NodeRef> {
        self.index.get(id).copied()
    }

    pub fn step_by_id(&self, id: &str) -> Option<&StepRecord> {
        match self.node(id)? {
            NodeRef::Step(step) => Some(self.step(step)),
            NodeRef::Message(_) => None,
        }
    }

    pub fn message_by_id(&self, id: &str) -> Option<&MessageRecord> {
        match self.node(id)? {
            NodeRef::Message(container) => self.container(container).message(),
            NodeRef::Step(_) => None,
        }
    }

    pub fn open_group(&self) -> Option<GroupRef> {
        self.open_group
    }

    /// Number of distinct entries reconciled so far.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Grouping class of the last container in the layout.
    pub fn last_class(&self) -> Option<GroupingClass> {
        self.message_groups.last().map(|group| group.class)
    }
}

fn attachments_of(entry: &LogEntry) -> Vec<String> {
    match entry.kvps.get("attachments") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str())
            .map(ToString::to_string)
            .collect(),
        Some(Value::String(single)) if !single.is_empty() => vec![single.clone()],
        _ => Vec::new(),
    }
}
