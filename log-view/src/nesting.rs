//! Step nesting: subordinate agents' steps hang under the delegation step that spawned them.

use std::collections::HashMap;

use shared_types::LogEntry;

use crate::entry::LogTypeExt;
use crate::kvps::KvpTable;
use crate::markup::render_content;
use crate::model::{GroupRef, StepParent, StepRecord, StepRef};
use crate::session::{DirtyNode, SessionView};
use crate::status::badge_for;

/// Agent number → the delegation step issued at that depth.
#[derive(Debug, Default, Clone)]
pub struct NestingMap {
    delegations: HashMap<u32, StepRef>,
}

impl NestingMap {
    /// Record (or replace) the delegation step for `agent_number`.
    pub fn record(&mut self, agent_number: u32, step: StepRef) {
        self.delegations.insert(agent_number, step);
    }

    /// Drop the entry for `agent_number` if it still points at `step`.
    pub fn forget(&mut self, agent_number: u32, step: StepRef) {
        if self.delegations.get(&agent_number) == Some(&step) {
            self.delegations.remove(&agent_number);
        }
    }

    /// Delegation step a subordinate at `agent_number` nests under.
    pub fn parent_of(&self, agent_number: u32) -> Option<StepRef> {
        let depth = agent_number.checked_sub(1)?;
        self.delegations.get(&depth).copied()
    }

    pub fn clear(&mut self) {
        self.delegations.clear();
    }

    pub fn len(&self) -> usize {
        self.delegations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delegations.is_empty()
    }
}

impl SessionView {
    /// Insert a new step into the open group, nested under its delegation step when
    /// one is known. Falls back to the group's top level otherwise.
    pub(crate) fn insert_step(&mut self, entry: &LogEntry, key: &str) -> StepRef {
        let group = self.ensure_open_group(key);
        let parent = self.resolve_parent(entry.agent_number, group);

        let (tool_name, inherited) = match entry.tool_name() {
            Some(name) => (Some(name.to_string()), false),
            None => {
                let inherited = self.inherit_tool_name(parent, entry);
                let is_inherited = inherited.is_some();
                (inherited, is_inherited)
            }
        };
        let delegate_tool = self.options.delegate_tool.clone();
        let badge = badge_for(&entry.entry_type, tool_name.as_deref(), &delegate_tool);

        let mut kvps = KvpTable::default();
        kvps.update(&entry.kvps, &self.options.kvps);

        let step = StepRef(self.steps.len());
        self.steps.push(StepRecord {
            id: key.to_string(),
            entry_type: entry.entry_type.clone(),
            heading: entry.heading.clone(),
            content: entry.content.clone(),
            content_html: render_content(&entry.content, entry.entry_type.renders_markdown()),
            kvps,
            timestamp: entry.timestamp,
            duration_ms: entry.duration_ms,
            agent_number: entry.agent_number,
            tool_name,
            tool_name_inherited: inherited,
            badge,
            group,
            parent,
            children: Vec::new(),
            active: true,
            revision: 0,
        });

        match parent {
            StepParent::Group(group) => self.groups[group.0].steps.push(step),
            StepParent::Step(host) => {
                self.steps[host.0].children.push(step);
                self.steps[host.0].revision += 1;
                self.mark(DirtyNode::Step(host));
            }
        }

        // Only the newest step anywhere in the group shows as running.
        let order = self.groups[group.0].order.clone();
        for previous in order {
            if self.steps[previous.0].active {
                self.steps[previous.0].active = false;
                self.mark(DirtyNode::Step(previous));
            }
        }
        self.groups[group.0].order.push(step);

        if self.steps[step.0].tool_name.as_deref() == Some(delegate_tool.as_str()) {
            self.nesting.record(entry.agent_number, step);
        }

        self.mark(DirtyNode::Step(step));
        self.recompute_header(group);
        step
    }

    fn resolve_parent(&self, agent_number: u32, group: GroupRef) -> StepParent {
        match self.nesting.parent_of(agent_number) {
            Some(host) if self.steps[host.0].group == group => StepParent::Step(host),
            Some(_) | None => {
                if agent_number > 0 {
                    tracing::debug!(
                        agent_number,
                        "No delegation step for subordinate; placing at group top level"
                    );
                }
                StepParent::Group(group)
            }
        }
    }

    /// Tool name of the most recent earlier sibling of the same entry type.
    fn inherit_tool_name(&self, parent: StepParent, entry: &LogEntry) -> Option<String> {
        let siblings = match parent {
            StepParent::Group(group) => &self.groups[group.0].steps,
            StepParent::Step(host) => &self.steps[host.0].children,
        };
        siblings
            .iter()
            .rev()
            .map(|sibling| &self.steps[sibling.0])
            .filter(|sibling| sibling.entry_type == entry.entry_type)
            .find_map(|sibling| sibling.tool_name.clone())
    }

    /// Steps nested under `step`, in insertion order.
    pub fn children(&self, step: StepRef) -> &[StepRef] {
        &self.steps[step.0].children
    }

    /// Delegation depth map, for diagnostics.
    pub fn nesting(&self) -> &NestingMap {
        &self.nesting
    }
}
