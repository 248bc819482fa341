use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::kvps::KvpOptions;
use crate::poller::PollerOptions;
use crate::schedule::{ScheduleOptions, DEFAULT_FAST_TICKS};
use crate::scroll::{ScrollOptions, DEFAULT_AUTOSCROLL_TOLERANCE_PX, DEFAULT_PIN_TOLERANCE_PX};
use crate::session::ReconcileOptions;

#[derive(Debug, Clone)]
pub struct ViewConfig {
    /// Agent server base URL
    pub base_url: String,
    /// Session to open on startup
    pub context: Option<String>,
    /// IANA timezone sent with every poll
    pub timezone: String,
    pub poll_short: Duration,
    pub poll_long: Duration,
    /// Fast polls granted after a poll that returned entries
    pub fast_ticks: u32,
    pub request_timeout: Duration,
    /// Kvp keys rendered as thoughts
    pub thought_keys: Vec<String>,
    /// Tool name whose steps host subordinate agents
    pub delegate_tool: String,
    /// Durable expand/collapse store
    pub prefs_path: PathBuf,
    pub pin_tolerance_px: f64,
    pub autoscroll_tolerance_px: f64,
}

impl ViewConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_vars(vars: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let context = vars("LOG_VIEW_CONTEXT")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let config = Self {
            base_url: env_str(&vars, "LOG_VIEW_BASE_URL", "http://127.0.0.1:50001"),
            context,
            timezone: env_str(&vars, "LOG_VIEW_TIMEZONE", "UTC"),
            poll_short: Duration::from_millis(env_parse(&vars, "LOG_VIEW_POLL_SHORT_MS", 25)?),
            poll_long: Duration::from_millis(env_parse(&vars, "LOG_VIEW_POLL_LONG_MS", 250)?),
            fast_ticks: env_parse(&vars, "LOG_VIEW_FAST_TICKS", DEFAULT_FAST_TICKS)?,
            request_timeout: Duration::from_secs(env_parse(
                &vars,
                "LOG_VIEW_REQUEST_TIMEOUT_SECS",
                30,
            )?),
            thought_keys: env_csv(&vars, "LOG_VIEW_THOUGHT_KEYS", &["thoughts", "reasoning"]),
            delegate_tool: env_str(
                &vars,
                "LOG_VIEW_DELEGATE_TOOL",
                shared_types::DEFAULT_DELEGATE_TOOL,
            ),
            prefs_path: PathBuf::from(env_str(
                &vars,
                "LOG_VIEW_PREFS_PATH",
                "./data/log_view_prefs.json",
            )),
            pin_tolerance_px: env_parse(&vars, "LOG_VIEW_PIN_TOLERANCE_PX", DEFAULT_PIN_TOLERANCE_PX)?,
            autoscroll_tolerance_px: env_parse(
                &vars,
                "LOG_VIEW_AUTOSCROLL_TOLERANCE_PX",
                DEFAULT_AUTOSCROLL_TOLERANCE_PX,
            )?,
        };

        if config.poll_short > config.poll_long {
            anyhow::bail!(
                "LOG_VIEW_POLL_SHORT_MS ({:?}) must not exceed LOG_VIEW_POLL_LONG_MS ({:?})",
                config.poll_short,
                config.poll_long
            );
        }
        Ok(config)
    }

    pub fn reconcile_options(&self) -> ReconcileOptions {
        ReconcileOptions {
            kvps: KvpOptions {
                thought_keys: self.thought_keys.clone(),
                ..KvpOptions::default()
            },
            delegate_tool: self.delegate_tool.clone(),
        }
    }

    pub fn schedule_options(&self) -> ScheduleOptions {
        ScheduleOptions {
            short_interval: self.poll_short,
            long_interval: self.poll_long,
            fast_ticks: self.fast_ticks,
        }
    }

    /// Tolerances for a `SurfaceSink` painting this view.
    pub fn scroll_options(&self) -> ScrollOptions {
        ScrollOptions {
            pin_tolerance_px: self.pin_tolerance_px,
            autoscroll_tolerance_px: self.autoscroll_tolerance_px,
        }
    }

    pub fn poller_options(&self) -> PollerOptions {
        PollerOptions {
            schedule: self.schedule_options(),
            timezone: self.timezone.clone(),
            reconcile: self.reconcile_options(),
        }
    }
}

/// Load the first `.env` found in the current directory or its ancestors.
///
/// Runs before the tracing subscriber exists, so `RUST_LOG` and `LOG_VIEW_LOG_FORMAT`
/// from the file take effect; the caller logs the returned path once logging is up.
pub fn load_env_file() -> anyhow::Result<Option<PathBuf>> {
    let cwd = std::env::current_dir()
        .map_err(|e| anyhow::anyhow!("Could not determine current directory: {e}"))?;
    let Some(path) = find_env_file(&cwd) else {
        return Ok(None);
    };
    dotenvy::from_path(&path)
        .map_err(|e| anyhow::anyhow!("Failed to load {}: {e}", path.display()))?;
    Ok(Some(path))
}

/// Nearest `.env` at `start` or above it.
pub fn find_env_file(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(".env"))
        .find(|candidate| candidate.is_file())
}

fn env_str(vars: &impl Fn(&str) -> Option<String>, key: &str, default: &str) -> String {
    vars(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(
    vars: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match vars(key) {
        Some(val) => val
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        None => Ok(default),
    }
}

fn env_csv(vars: &impl Fn(&str) -> Option<String>, key: &str, default: &[&str]) -> Vec<String> {
    match vars(key) {
        Some(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
        None => default.iter().map(|s| (*s).to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> anyhow::Result<ViewConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ViewConfig::from_vars(move |key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_without_environment() {
        let config = config(&[]).unwrap();
        assert_eq!(config.base_url, "http://127.0.0.1:50001");
        assert_eq!(config.context, None);
        assert_eq!(config.poll_short, Duration::from_millis(25));
        assert_eq!(config.poll_long, Duration::from_millis(250));
        assert_eq!(config.fast_ticks, 100);
        assert_eq!(config.thought_keys, vec!["thoughts", "reasoning"]);
        assert_eq!(config.delegate_tool, "call_subordinate");
        assert_eq!(config.pin_tolerance_px, 10.0);
        assert_eq!(config.autoscroll_tolerance_px, 80.0);
    }

    #[test]
    fn overrides_flow_into_reconcile_options() {
        let config = config(&[
            ("LOG_VIEW_THOUGHT_KEYS", "plan, reflection ,"),
            ("LOG_VIEW_DELEGATE_TOOL", "spawn_worker"),
            ("LOG_VIEW_CONTEXT", "  "),
        ])
        .unwrap();
        let options = config.reconcile_options();
        assert_eq!(options.kvps.thought_keys, vec!["plan", "reflection"]);
        assert_eq!(options.delegate_tool, "spawn_worker");
        assert!(options.kvps.reserved_keys.iter().any(|k| k == "tool_name"));
        assert_eq!(config.context, None);
    }

    #[test]
    fn scroll_tolerances_flow_into_scroll_options() {
        let config = config(&[
            ("LOG_VIEW_PIN_TOLERANCE_PX", "4"),
            ("LOG_VIEW_AUTOSCROLL_TOLERANCE_PX", "120.5"),
        ])
        .unwrap();
        assert_eq!(
            config.scroll_options(),
            ScrollOptions {
                pin_tolerance_px: 4.0,
                autoscroll_tolerance_px: 120.5,
            }
        );
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = config(&[("LOG_VIEW_FAST_TICKS", "many")]).unwrap_err();
        assert!(err.to_string().contains("LOG_VIEW_FAST_TICKS"));
    }

    #[test]
    fn env_file_is_found_in_an_ancestor() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();

        std::fs::write(root.path().join(".env"), "RUST_LOG=debug\n").unwrap();
        assert_eq!(find_env_file(&nested), Some(root.path().join(".env")));

        std::fs::write(nested.join(".env"), "LOG_VIEW_LOG_FORMAT=json\n").unwrap();
        assert_eq!(find_env_file(&nested), Some(nested.join(".env")));
    }

    #[test]
    fn short_interval_must_not_exceed_long() {
        assert!(config(&[("LOG_VIEW_POLL_SHORT_MS", "500")]).is_err());
    }
}
