//! Process group lifecycle and header metrics.
//!
//! `NoGroup → Open` on the first process entry of an interaction, `Open → Completed` on a
//! top-level response, `Open → Detached` when a user message arrives first. Only the open
//! group accepts new steps, and at most one group is open per session.

use chrono::{DateTime, Utc};
use shared_types::LogType;

use crate::entry::GroupingClass;
use crate::format::elapsed_ms;
use crate::model::{
    Container, ContainerKind, ContainerRef, GroupRef, GroupState, ProcessGroup, StepRef,
    PROCESSING_TITLE,
};
use crate::session::{DirtyNode, SessionView};
use crate::status::{DONE_BADGE, PENDING_BADGE};

impl SessionView {
    /// Return the open group, creating it (and its container) on first use.
    pub(crate) fn ensure_open_group(&mut self, first_step_id: &str) -> GroupRef {
        if let Some(group) = self.open_group {
            if self.groups[group.0].is_open() {
                return group;
            }
        }

        let group = GroupRef(self.groups.len());
        // Placeholder; the real container index is assigned right below.
        self.groups.push(ProcessGroup {
            id: format!("pg-{first_step_id}"),
            state: GroupState::Open,
            steps: Vec::new(),
            order: Vec::new(),
            container: ContainerRef(usize::MAX),
            title: PROCESSING_TITLE.to_string(),
            badge: PENDING_BADGE,
            revision: 0,
        });
        let container = self.push_container(
            Container {
                kind: ContainerKind::Process(group),
                class: GroupingClass::Agent,
                embedded_group: None,
            },
            false,
        );
        self.groups[group.0].container = container;
        self.open_group = Some(group);
        tracing::debug!(group_id = %self.groups[group.0].id, "Opened process group");
        group
    }

    /// Close the open group and embed it as a prefix of `response`.
    pub(crate) fn complete_open_group(&mut self, response: ContainerRef) {
        let Some(group) = self.open_group.take() else {
            return;
        };
        self.nesting.clear();

        let standalone = self.groups[group.0].container;
        self.finalize(group, GroupState::Completed);
        {
            let record = &mut self.groups[group.0];
            record.badge = DONE_BADGE;
            record.container = response;
        }
        self.detach_container(standalone);
        self.containers[response.0].embedded_group = Some(group);
        self.mark(DirtyNode::Container(response));
        tracing::debug!(
            group_id = %self.groups[group.0].id,
            steps = self.groups[group.0].step_count(),
            "Completed process group"
        );
    }

    /// Stop routing steps into the open group without completing it.
    pub(crate) fn detach_open_group(&mut self) {
        let Some(group) = self.open_group.take() else {
            return;
        };
        self.nesting.clear();
        self.finalize(group, GroupState::Detached);
    }

    fn finalize(&mut self, group: GroupRef, state: GroupState) {
        let order = self.groups[group.0].order.clone();
        for step in order {
            if self.steps[step.0].active {
                self.steps[step.0].active = false;
                self.mark(DirtyNode::Step(step));
            }
        }
        let record = &mut self.groups[group.0];
        record.state = state;
        record.revision += 1;
        self.mark(DirtyNode::GroupHeader(group));
    }

    /// Refresh title and badge from the group's steps.
    pub(crate) fn recompute_header(&mut self, group: GroupRef) {
        let order = &self.groups[group.0].order;

        let latest_agent_heading = order
            .iter()
            .rev()
            .map(|step| &self.steps[step.0])
            .find(|step| step.entry_type == LogType::Agent && !step.heading.trim().is_empty())
            .map(|step| step.heading.clone());
        let title = latest_agent_heading
            .or_else(|| {
                order
                    .iter()
                    .rev()
                    .map(|step| &self.steps[step.0])
                    .find(|step| !step.heading.trim().is_empty())
                    .map(|step| step.heading.clone())
            })
            .unwrap_or_else(|| PROCESSING_TITLE.to_string());
        let badge = order
            .last()
            .map(|step| self.steps[step.0].badge)
            .unwrap_or(PENDING_BADGE);

        let record = &mut self.groups[group.0];
        record.title = title;
        record.badge = badge;
        record.revision += 1;
        self.mark(DirtyNode::GroupHeader(group));
    }

    /// Timestamp of the group's first step.
    pub fn group_started_at(&self, group: GroupRef) -> Option<DateTime<Utc>> {
        self.groups[group.0]
            .order
            .first()
            .and_then(|step| self.steps[step.0].timestamp)
    }

    /// Sum of step durations. While the group is open, the active step without a
    /// duration contributes `now - its timestamp`.
    pub fn group_duration_ms(&self, group: GroupRef, now: DateTime<Utc>) -> u64 {
        let record = &self.groups[group.0];
        let live = record.is_open() && self.open_group == Some(group);
        record
            .order
            .iter()
            .map(|step| &self.steps[step.0])
            .map(|step| match (step.duration_ms, step.timestamp) {
                (Some(ms), _) => ms,
                (None, Some(started)) if live && step.active => elapsed_ms(started, now),
                (None, _) => 0,
            })
            .sum()
    }

    /// Duration of one step, live while it is the active step of the open group.
    pub fn step_duration_ms(&self, step: StepRef, now: DateTime<Utc>) -> Option<u64> {
        let record = &self.steps[step.0];
        if let Some(ms) = record.duration_ms {
            return Some(ms);
        }
        let live = record.active && self.open_group == Some(record.group);
        match record.timestamp {
            Some(started) if live => Some(elapsed_ms(started, now)),
            _ => None,
        }
    }
}
