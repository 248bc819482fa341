//! HTML projection of a `SessionView`.
//!
//! Rendering reads the model and the expansion preferences and never mutates either.
//! `render_dirty` turns the view's dirty set into element-level patches so a backend
//! replaces only what changed.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};

use crate::entry::LogTypeExt;
use crate::format::{format_clock, format_duration_ms};
use crate::kvps::KvpTable;
use crate::markup::{escape_html, plain_text};
use crate::model::{
    Container, ContainerKind, ContainerRef, GroupRef, GroupState, MessageRecord, StepParent,
    StepRef,
};
use crate::prefs::{ExpansionPrefs, PreferenceStore};
use crate::session::{Dirty, DirtyNode, NodeRef, SessionView};

const SNIPPET_CHARS: usize = 120;

/// One element-level update for a rendering backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch {
    /// Replace the element with this DOM id.
    Replace { dom_id: String, html: String },
    /// Containers moved; re-render the whole message list.
    Layout { html: String },
}

pub fn container_dom_id(view: &SessionView, container: ContainerRef) -> String {
    match &view.container(container).kind {
        ContainerKind::Message(record) => format!("msg-{}", record.id),
        ContainerKind::Process(group) => format!("{}-container", view.group(*group).id),
    }
}

pub fn step_dom_id(view: &SessionView, step: StepRef) -> String {
    format!("step-{}", view.step(step).id)
}

pub fn group_header_dom_id(view: &SessionView, group: GroupRef) -> String {
    format!("{}-header", view.group(group).id)
}

/// Render every message group in order.
pub fn render_view<S: PreferenceStore>(
    view: &SessionView,
    prefs: &ExpansionPrefs<S>,
    now: DateTime<Utc>,
) -> String {
    let mut out = String::from(r#"<div class="messages-list">"#);
    for group in view.message_groups() {
        let _ = write!(out, r#"<div class="message-group {}">"#, group.class.css_class());
        for container in &group.containers {
            out.push_str(&render_container(view, *container, prefs, now));
        }
        out.push_str("</div>");
    }
    out.push_str("</div>");
    out
}

/// Patches for everything marked dirty. A layout change supersedes node patches.
pub fn render_dirty<S: PreferenceStore>(
    view: &SessionView,
    dirty: &Dirty,
    prefs: &ExpansionPrefs<S>,
    now: DateTime<Utc>,
) -> Vec<Patch> {
    if dirty.layout {
        return vec![Patch::Layout {
            html: render_view(view, prefs, now),
        }];
    }
    dirty
        .nodes
        .iter()
        .map(|node| match *node {
            DirtyNode::Container(container) => Patch::Replace {
                dom_id: container_dom_id(view, container),
                html: render_container(view, container, prefs, now),
            },
            DirtyNode::Step(step) => Patch::Replace {
                dom_id: step_dom_id(view, step),
                html: render_step(view, step, prefs, now),
            },
            DirtyNode::GroupHeader(group) => Patch::Replace {
                dom_id: group_header_dom_id(view, group),
                html: render_group_header(view, group, now),
            },
        })
        .collect()
}

pub fn render_container<S: PreferenceStore>(
    view: &SessionView,
    container: ContainerRef,
    prefs: &ExpansionPrefs<S>,
    now: DateTime<Utc>,
) -> String {
    let record: &Container = view.container(container);
    let dom_id = container_dom_id(view, container);
    match &record.kind {
        ContainerKind::Process(group) => format!(
            r#"<div class="message-container process-container" id="{}">{}</div>"#,
            escape_html(&dom_id),
            render_group(view, *group, prefs, now)
        ),
        ContainerKind::Message(message) => {
            let mut classes = format!("message-container {}", message.entry_type.css_class());
            if message.pending {
                classes.push_str(" pending");
            }
            let mut out = format!(
                r#"<div class="{classes}" id="{}">"#,
                escape_html(&dom_id)
            );
            if let Some(group) = record.embedded_group {
                out.push_str(&render_group(view, group, prefs, now));
            }
            out.push_str(&render_message(message));
            out.push_str("</div>");
            out
        }
    }
}

fn render_message(message: &MessageRecord) -> String {
    let mut out = String::new();
    let _ = write!(
        out,
        r#"<div class="message-heading">{}</div>"#,
        escape_html(message.title())
    );
    let _ = write!(out, r#"<div class="message-body">{}</div>"#, message.content_html);
    out.push_str(&render_kvps(&message.kvps));
    if !message.attachments.is_empty() {
        out.push_str(r#"<div class="message-attachments">"#);
        for attachment in &message.attachments {
            let name = attachment.rsplit('/').next().unwrap_or(attachment);
            let _ = write!(
                out,
                r#"<span class="attachment" title="{}">{}</span>"#,
                escape_html(attachment),
                escape_html(name)
            );
        }
        out.push_str("</div>");
    }
    out
}

pub fn render_group<S: PreferenceStore>(
    view: &SessionView,
    group: GroupRef,
    prefs: &ExpansionPrefs<S>,
    now: DateTime<Utc>,
) -> String {
    let record = view.group(group);
    let state = match record.state {
        GroupState::Open => "open",
        GroupState::Completed => "completed",
        GroupState::Detached => "detached",
    };
    let open_attr = if prefs.is_group_expanded(&record.id) {
        " open"
    } else {
        ""
    };
    let mut out = format!(
        r#"<details class="process-group {state}" id="{id}" data-group-id="{id}"{open_attr}>"#,
        id = escape_html(&record.id)
    );
    out.push_str(&render_group_header(view, group, now));
    out.push_str(r#"<div class="process-steps">"#);
    for step in &record.steps {
        out.push_str(&render_step(view, *step, prefs, now));
    }
    out.push_str("</div></details>");
    out
}

/// Header: badge, title, step count, start time and accumulated duration.
pub fn render_group_header(view: &SessionView, group: GroupRef, now: DateTime<Utc>) -> String {
    let record = view.group(group);
    let count = record.step_count();
    let mut out = format!(
        r#"<summary class="process-group-header" id="{}">"#,
        escape_html(&group_header_dom_id(view, group))
    );
    let _ = write!(
        out,
        r#"<span class="status-badge {}">{}</span>"#,
        record.badge.color.css_class(),
        record.badge.code
    );
    let _ = write!(
        out,
        r#"<span class="process-group-title">{}</span>"#,
        escape_html(&record.title)
    );
    let _ = write!(
        out,
        r#"<span class="process-group-count">{count} {}</span>"#,
        if count == 1 { "step" } else { "steps" }
    );
    if let Some(started) = view.group_started_at(group) {
        let _ = write!(
            out,
            r#"<span class="process-group-start">{}</span>"#,
            format_clock(started)
        );
    }
    let _ = write!(
        out,
        r#"<span class="process-group-duration">{}</span>"#,
        format_duration_ms(view.group_duration_ms(group, now))
    );
    out.push_str("</summary>");
    out
}

pub fn render_step<S: PreferenceStore>(
    view: &SessionView,
    step: StepRef,
    prefs: &ExpansionPrefs<S>,
    now: DateTime<Utc>,
) -> String {
    let record = view.step(step);
    let group_id = &view.group(record.group).id;

    let mut classes = format!("process-step {}", record.entry_type.css_class());
    if record.active {
        classes.push_str(" active");
    }
    if record.has_nested() {
        classes.push_str(" has-nested");
    }
    let mut out = format!(
        r#"<div class="{classes}" id="{}" data-step-id="{}">"#,
        escape_html(&step_dom_id(view, step)),
        escape_html(&record.id)
    );

    let open_attr = if prefs.is_step_expanded(group_id, &record.id, &record.entry_type) {
        " open"
    } else {
        ""
    };
    let _ = write!(out, r#"<details class="step-details"{open_attr}>"#);
    out.push_str(r#"<summary class="process-step-header">"#);
    let active_class = if record.active { " status-active" } else { "" };
    let _ = write!(
        out,
        r#"<span class="status-badge {}{active_class}">{}</span>"#,
        record.badge.color.css_class(),
        record.badge.code
    );
    let _ = write!(
        out,
        r#"<span class="step-title">{}</span>"#,
        escape_html(record.title())
    );
    if let Some(ms) = view.step_duration_ms(step, now) {
        let _ = write!(
            out,
            r#"<span class="step-duration">{}</span>"#,
            format_duration_ms(ms)
        );
    }
    out.push_str("</summary>");

    out.push_str(r#"<div class="step-body">"#);
    if !record.shows_full_content() && !record.content.is_empty() {
        let _ = write!(out, r#"<div class="step-content">{}</div>"#, record.content_html);
    }
    out.push_str(&render_kvps(&record.kvps));
    out.push_str("</div></details>");

    if record.shows_full_content() {
        let _ = write!(out, r#"<div class="step-response">{}</div>"#, record.content_html);
    }

    if record.has_nested() {
        out.push_str(r#"<div class="process-step-nested">"#);
        for child in view.children(step) {
            out.push_str(&render_step(view, *child, prefs, now));
        }
        out.push_str("</div>");
    }
    out.push_str("</div>");
    out
}

fn render_kvps(table: &KvpTable) -> String {
    if table.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    if let Some(thoughts) = table.thoughts() {
        let _ = write!(out, r#"<div class="kvp-thoughts">{thoughts}</div>"#);
    }
    if !table.rows().is_empty() {
        out.push_str(r#"<table class="kvps">"#);
        for row in table.rows() {
            let _ = write!(
                out,
                r#"<tr class="kvp-row" data-key="{key}"><th>{key}</th><td>{}</td></tr>"#,
                row.html,
                key = escape_html(&row.key)
            );
        }
        out.push_str("</table>");
    }
    out
}

/// Depth of a step below its group's top level.
pub fn step_depth(view: &SessionView, step: StepRef) -> usize {
    let mut depth = 0;
    let mut current = view.step(step).parent;
    while let StepParent::Step(parent) = current {
        depth += 1;
        current = view.step(parent).parent;
    }
    depth
}

/// One plain-text line describing a node, for terminal output.
pub fn summary_line(view: &SessionView, node: NodeRef, now: DateTime<Utc>) -> String {
    match node {
        NodeRef::Message(container) => match &view.container(container).kind {
            ContainerKind::Message(message) => {
                let mut line = format!("{:<9} {}", message.entry_type.as_str(), message.title());
                let snippet = snippet(&message.content);
                if !snippet.is_empty() {
                    line.push_str(" | ");
                    line.push_str(&snippet);
                }
                if let Some(group) = view.container(container).embedded_group {
                    let record = view.group(group);
                    let _ = write!(
                        line,
                        " [{} steps, {}]",
                        record.step_count(),
                        format_duration_ms(view.group_duration_ms(group, now))
                    );
                }
                line
            }
            ContainerKind::Process(group) => {
                let record = view.group(*group);
                format!("{:<9} {}", record.badge.code, record.title)
            }
        },
        NodeRef::Step(step) => {
            let record = view.step(step);
            let indent = "  ".repeat(step_depth(view, step) + 1);
            let mut line = format!("{:<9} {indent}{}", record.badge.code, record.title());
            if let Some(tool) = &record.tool_name {
                let _ = write!(line, " ({tool})");
            }
            if let Some(ms) = view.step_duration_ms(step, now) {
                let _ = write!(line, " {}", format_duration_ms(ms));
            }
            line
        }
    }
}

fn snippet(content: &str) -> String {
    let text = plain_text(content)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if text.chars().count() <= SNIPPET_CHARS {
        return text;
    }
    text.chars().take(SNIPPET_CHARS).collect::<String>() + "..."
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::MemoryStore;
    use crate::session::ReconcileOptions;
    use serde_json::json;
    use shared_types::{LogEntry, LogType};

    fn prefs() -> ExpansionPrefs<MemoryStore> {
        ExpansionPrefs::new(MemoryStore::default())
    }

    fn delegation(id: &str) -> LogEntry {
        let mut entry = LogEntry::new(id, LogType::Tool);
        entry.kvps.insert("tool_name".into(), json!("call_subordinate"));
        entry
    }

    #[test]
    fn completed_group_is_embedded_in_response() {
        let mut view = SessionView::new(None, ReconcileOptions::default());
        view.apply(&LogEntry::new("u1", LogType::User));
        view.apply(&LogEntry::new("a1", LogType::Agent));
        let mut response = LogEntry::new("r1", LogType::Response);
        response.content = "**done**".into();
        view.apply(&response);

        let html = render_view(&view, &prefs(), Utc::now());
        assert!(!html.contains("process-container"));
        let group_at = html.find(r#"id="pg-a1""#).unwrap();
        let body_at = html.find("<strong>done</strong>").unwrap();
        assert!(group_at < body_at);
        assert!(html.contains(r#"class="process-group completed""#));
        assert!(html.contains(">END<"));
    }

    #[test]
    fn nested_steps_render_inside_delegation_step() {
        let mut view = SessionView::new(None, ReconcileOptions::default());
        view.apply(&delegation("d1"));
        let mut sub = LogEntry::new("s1", LogType::Agent);
        sub.agent_number = 1;
        view.apply(&sub);

        let Some(NodeRef::Step(d1)) = view.node("d1") else {
            panic!("d1 should be a step");
        };
        let html = render_step(&view, d1, &prefs(), Utc::now());
        assert!(html.contains("has-nested"));
        assert!(html.contains(r#"<div class="process-step-nested"><div class="process-step log-agent active""#));
    }

    #[test]
    fn expansion_follows_preferences() {
        let mut view = SessionView::new(None, ReconcileOptions::default());
        view.apply(&LogEntry::new("t1", LogType::Tool));
        view.apply(&LogEntry::new("w1", LogType::Warning));
        let mut prefs = prefs();

        let html = render_view(&view, &prefs, Utc::now());
        assert!(!html.contains(r#"data-group-id="pg-t1" open"#));
        assert!(html.contains(r#"id="step-w1" data-step-id="w1"><details class="step-details" open>"#));

        prefs.set_group_expanded("pg-t1", true).unwrap();
        let html = render_view(&view, &prefs, Utc::now());
        assert!(html.contains(r#"data-group-id="pg-t1" open"#));
    }

    #[test]
    fn dirty_steps_become_replace_patches() {
        let mut view = SessionView::new(None, ReconcileOptions::default());
        let mut tool = LogEntry::new("t1", LogType::Tool);
        view.apply(&tool);
        view.take_dirty();

        tool.content = "partial output".into();
        view.apply(&tool);
        let dirty = view.take_dirty();
        assert!(!dirty.layout);
        let patches = render_dirty(&view, &dirty, &prefs(), Utc::now());
        assert!(patches.iter().any(|patch| matches!(
            patch,
            Patch::Replace { dom_id, html } if dom_id == "step-t1" && html.contains("partial output")
        )));
    }

    #[test]
    fn summary_line_indents_nested_steps() {
        let mut view = SessionView::new(None, ReconcileOptions::default());
        view.apply(&delegation("d1"));
        let mut sub = LogEntry::new("s1", LogType::Tool);
        sub.agent_number = 1;
        sub.heading = "Reading notes".into();
        sub.duration_ms = Some(1200);
        let applied = view.apply(&sub);

        let line = summary_line(&view, applied.node, Utc::now());
        assert_eq!(line, format!("{:<9} {}Reading notes 1.2s", "USE", "    "));
    }
}
