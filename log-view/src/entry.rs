//! Log type classification: where an entry lands and how it is presented.

use shared_types::LogType;

/// Routing decision for a newly seen entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Always a standalone message container.
    Main,
    /// A step of the open process group (created lazily).
    Process,
    /// A step while a process group is open, standalone otherwise.
    Contextual,
}

/// Visual grouping class. Consecutive containers of one class share a message group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GroupingClass {
    User,
    Agent,
    System,
}

impl GroupingClass {
    pub fn css_class(&self) -> &'static str {
        match self {
            GroupingClass::User => "message-group-user",
            GroupingClass::Agent => "message-group-agent",
            GroupingClass::System => "message-group-system",
        }
    }
}

pub trait LogTypeExt {
    fn placement(&self, agent_number: u32) -> Placement;
    fn grouping_class(&self) -> GroupingClass;
    /// Entry types that always open a fresh message group.
    fn forces_new_group(&self) -> bool;
    /// Title used when the server sent no heading.
    fn default_heading(&self) -> &'static str;
    fn renders_markdown(&self) -> bool;
    /// Steps of this type start expanded.
    fn auto_expands(&self) -> bool;
    fn css_class(&self) -> String;
}

impl LogTypeExt for LogType {
    fn placement(&self, agent_number: u32) -> Placement {
        match self {
            LogType::User => Placement::Main,
            LogType::Response if agent_number == 0 => Placement::Main,
            LogType::Response => Placement::Process,
            LogType::Warning | LogType::Error | LogType::RateLimit => Placement::Contextual,
            LogType::Agent
            | LogType::Tool
            | LogType::CodeExe
            | LogType::Browser
            | LogType::Info
            | LogType::Hint
            | LogType::Util
            | LogType::Progress => Placement::Process,
            LogType::Other(_) => Placement::Main,
        }
    }

    fn grouping_class(&self) -> GroupingClass {
        match self {
            LogType::User => GroupingClass::User,
            LogType::Warning | LogType::Error | LogType::RateLimit | LogType::Other(_) => {
                GroupingClass::System
            }
            _ => GroupingClass::Agent,
        }
    }

    fn forces_new_group(&self) -> bool {
        matches!(self, LogType::User | LogType::Response)
    }

    fn default_heading(&self) -> &'static str {
        match self {
            LogType::User => "User message",
            LogType::Agent => "Thinking",
            LogType::Response => "Response",
            LogType::Tool => "Tool call",
            LogType::CodeExe => "Code execution",
            LogType::Browser => "Browser",
            LogType::Warning => "Warning",
            LogType::Error => "Error",
            LogType::RateLimit => "Rate limit",
            LogType::Info => "Info",
            LogType::Hint => "Hint",
            LogType::Util => "Utility",
            LogType::Progress => "Progress",
            LogType::Other(_) => "Log",
        }
    }

    fn renders_markdown(&self) -> bool {
        matches!(self, LogType::User | LogType::Response | LogType::Hint)
    }

    fn auto_expands(&self) -> bool {
        matches!(self, LogType::Warning | LogType::Error)
    }

    fn css_class(&self) -> String {
        format!("log-{}", self.as_str().replace('_', "-"))
    }
}
