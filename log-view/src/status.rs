//! Status badges: short code + color class derived from a step's type and tool name.

use shared_types::LogType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusColor {
    Agent,
    Tool,
    Code,
    Browser,
    Memory,
    Search,
    Delegate,
    Response,
    Info,
    Warning,
    Error,
    Done,
}

impl StatusColor {
    pub fn css_class(&self) -> &'static str {
        match self {
            StatusColor::Agent => "status-agent",
            StatusColor::Tool => "status-tool",
            StatusColor::Code => "status-code",
            StatusColor::Browser => "status-browser",
            StatusColor::Memory => "status-memory",
            StatusColor::Search => "status-search",
            StatusColor::Delegate => "status-delegate",
            StatusColor::Response => "status-response",
            StatusColor::Info => "status-info",
            StatusColor::Warning => "status-warning",
            StatusColor::Error => "status-error",
            StatusColor::Done => "status-done",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusBadge {
    pub code: &'static str,
    pub color: StatusColor,
}

impl StatusBadge {
    const fn new(code: &'static str, color: StatusColor) -> Self {
        Self { code, color }
    }
}

/// Badge a process group shows once its interaction is complete.
pub const DONE_BADGE: StatusBadge = StatusBadge::new("END", StatusColor::Done);

/// Badge shown on a freshly opened group before any step has a badge.
pub const PENDING_BADGE: StatusBadge = StatusBadge::new("GEN", StatusColor::Agent);

pub fn badge_for(entry_type: &LogType, tool_name: Option<&str>, delegate_tool: &str) -> StatusBadge {
    match entry_type {
        LogType::Agent => StatusBadge::new("GEN", StatusColor::Agent),
        LogType::Response => StatusBadge::new("RES", StatusColor::Response),
        LogType::Tool => tool_badge(tool_name, delegate_tool),
        LogType::CodeExe => StatusBadge::new("EXE", StatusColor::Code),
        LogType::Browser => StatusBadge::new("WWW", StatusColor::Browser),
        LogType::Warning => StatusBadge::new("WRN", StatusColor::Warning),
        LogType::Error => StatusBadge::new("ERR", StatusColor::Error),
        LogType::RateLimit => StatusBadge::new("RTL", StatusColor::Warning),
        LogType::Info => StatusBadge::new("INF", StatusColor::Info),
        LogType::Hint => StatusBadge::new("HNT", StatusColor::Info),
        LogType::Util => StatusBadge::new("UTL", StatusColor::Info),
        LogType::Progress => StatusBadge::new("PRG", StatusColor::Info),
        LogType::User | LogType::Other(_) => StatusBadge::new("LOG", StatusColor::Info),
    }
}

fn tool_badge(tool_name: Option<&str>, delegate_tool: &str) -> StatusBadge {
    let Some(name) = tool_name else {
        return StatusBadge::new("USE", StatusColor::Tool);
    };
    if name == delegate_tool {
        return StatusBadge::new("SUB", StatusColor::Delegate);
    }
    match name {
        "code_execution_tool" | "code_execution" => StatusBadge::new("EXE", StatusColor::Code),
        "browser_agent" | "browser" => StatusBadge::new("WWW", StatusColor::Browser),
        "search_engine" | "knowledge_tool" | "document_query" => {
            StatusBadge::new("SRC", StatusColor::Search)
        }
        "response" => StatusBadge::new("RES", StatusColor::Response),
        "input" => StatusBadge::new("INP", StatusColor::Tool),
        name if name.starts_with("memory_") => StatusBadge::new("MEM", StatusColor::Memory),
        name if name.starts_with("scheduler") => StatusBadge::new("SCH", StatusColor::Tool),
        _ => StatusBadge::new("USE", StatusColor::Tool),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delegate_tool_name_is_configurable() {
        let badge = badge_for(&LogType::Tool, Some("spawn_worker"), "spawn_worker");
        assert_eq!(badge.code, "SUB");
        assert_eq!(badge.color, StatusColor::Delegate);

        let default = badge_for(&LogType::Tool, Some("call_subordinate"), "spawn_worker");
        assert_eq!(default.code, "USE");
    }

    #[test]
    fn memory_tools_share_a_badge() {
        for name in ["memory_load", "memory_save", "memory_forget"] {
            assert_eq!(badge_for(&LogType::Tool, Some(name), "x").code, "MEM");
        }
    }

    #[test]
    fn tool_without_name_uses_generic_badge() {
        let badge = badge_for(&LogType::Tool, None, "call_subordinate");
        assert_eq!(badge.code, "USE");
        assert_eq!(badge.color.css_class(), "status-tool");
    }
}
