//! Headless log tail: polls one session and prints a line per rendered change.
//!
//! Input lines are sent as user messages, except for these commands:
//! `/switch <session>`, `/deselect`, `/expand <group>`, `/collapse <group>`, `/quit`.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use log_view::config::{load_env_file, ViewConfig};
use log_view::poller::ProgressState;
use log_view::render::summary_line;
use log_view::session::{Change, Dirty};
use log_view::{
    Applied, ConnectionState, ExpansionPrefs, HttpTransport, JsonFileStore, NodeRef,
    PollCommand, PollSink, Poller, SessionView,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type SharedPrefs = Arc<Mutex<ExpansionPrefs<JsonFileStore>>>;

struct TerminalSink {
    prefs: SharedPrefs,
}

impl TerminalSink {
    fn shows(&self, view: &SessionView, node: NodeRef) -> bool {
        let NodeRef::Step(step) = node else {
            return true;
        };
        let Ok(prefs) = self.prefs.lock() else {
            return true;
        };
        let record = view.step(step);
        let group_id = &view.group(record.group).id;
        prefs.is_group_expanded(group_id)
            || prefs.is_step_expanded(group_id, &record.id, &record.entry_type)
    }
}

impl PollSink for TerminalSink {
    fn on_applied(&mut self, view: &SessionView, applied: &[Applied], _dirty: &Dirty) {
        let now = Utc::now();
        for item in applied {
            if item.change == Change::Unchanged || !self.shows(view, item.node) {
                continue;
            }
            let marker = match item.change {
                Change::Created => '+',
                _ => '~',
            };
            println!("{marker} {}", summary_line(view, item.node, now));
        }
        if let Some(group) = view.open_group() {
            let record = view.group(group);
            tracing::debug!(group_id = %record.id, steps = record.step_count(), title = %record.title, "Open group");
        }
    }

    fn on_progress(&mut self, progress: &ProgressState) {
        if !progress.text.is_empty() {
            let icon = progress.icon.as_deref().unwrap_or("-");
            println!("… [{icon}] {}", progress.text);
        }
    }

    fn on_paused(&mut self, paused: bool) {
        println!("{}", if paused { "‖ paused" } else { "▶ resumed" });
    }

    fn on_notifications(&mut self, notifications: &[serde_json::Value]) {
        for notification in notifications {
            let message = notification
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            println!("! {message}");
        }
    }

    fn on_connection(&mut self, state: ConnectionState) {
        if state == ConnectionState::Disconnected {
            println!("x disconnected; retrying");
        }
    }

    fn on_reset(&mut self, session: Option<&str>) {
        println!("= session {}", session.unwrap_or("(none)"));
    }
}

fn set_group(prefs: &SharedPrefs, group_id: &str, expanded: bool) {
    let Ok(mut prefs) = prefs.lock() else {
        return;
    };
    if let Err(e) = prefs.set_group_expanded(group_id, expanded) {
        tracing::warn!(group_id, error = %e, "Failed to persist group preference");
    }
}

async fn read_commands(
    commands: mpsc::Sender<PollCommand>,
    prefs: SharedPrefs,
    cancel: CancellationToken,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read stdin");
                return;
            }
        };
        let line = line.trim();
        let command = match line.split_once(' ').unwrap_or((line, "")) {
            ("", _) => continue,
            ("/quit", _) => {
                cancel.cancel();
                return;
            }
            ("/switch", id) if !id.trim().is_empty() => {
                PollCommand::SwitchSession(Some(id.trim().to_string()))
            }
            ("/deselect", _) => PollCommand::SwitchSession(None),
            ("/expand", group) => {
                set_group(&prefs, group.trim(), true);
                continue;
            }
            ("/collapse", group) => {
                set_group(&prefs, group.trim(), false);
                continue;
            }
            _ => PollCommand::Send {
                text: line.to_string(),
                attachments: Vec::new(),
            },
        };
        if commands.send(command).await.is_err() {
            return;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_file = load_env_file();
    log_view::logging::init();
    match env_file {
        Ok(Some(path)) => tracing::info!(path = %path.display(), "Loaded environment from .env"),
        Ok(None) => tracing::debug!("No .env file found; using process environment only"),
        Err(e) => tracing::warn!(error = %e, "Failed to load .env file"),
    }

    let config = ViewConfig::from_env()?;
    tracing::info!(
        base_url = %config.base_url,
        context = ?config.context,
        prefs = %config.prefs_path.display(),
        "Starting log view"
    );

    let transport = HttpTransport::new(config.base_url.clone(), config.request_timeout)?;
    let prefs: SharedPrefs = Arc::new(Mutex::new(ExpansionPrefs::new(JsonFileStore::open(
        &config.prefs_path,
    )?)));
    let sink = TerminalSink {
        prefs: prefs.clone(),
    };
    let poller = Poller::new(transport, sink, config.context.clone(), config.poller_options());

    let cancel = CancellationToken::new();
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(read_commands(tx, prefs, cancel.clone()));

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    let poller = poller.run(rx, cancel).await;
    tracing::info!(
        session = ?poller.session(),
        entries = poller.view().len(),
        groups = poller.view().groups().count(),
        "Log view stopped"
    );
    Ok(())
}
