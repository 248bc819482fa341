//! Poller - drives one session's log view from the server's poll endpoint
//!
//! Each tick sends the acknowledged log version and session id, then:
//! - drops the response if it belongs to a session that is no longer active
//! - resets everything and re-polls at once when the session-log identity changed
//! - feeds new entries to the `SessionView` in array order and advances the cursor
//!
//! Transport failures mark the connection disconnected and the loop carries on at its
//! normal pace. Only one poll is ever in flight, so batches apply in version order.

use chrono::Utc;
use serde_json::Value;
use shared_types::{
    PollRequest, PollResponse, SendMessageRequest, SendMessageResponse, SessionSummary,
    ICON_SENTINEL,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::schedule::{PollSchedule, ScheduleOptions};
use crate::session::{Applied, Dirty, ReconcileOptions, SessionView};
use crate::transport::{LogTransport, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

/// Normalized progress indicator.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProgressState {
    pub text: String,
    /// Icon name from a leading `icon://name` sentinel.
    pub icon: Option<String>,
    pub active: bool,
}

impl ProgressState {
    pub fn from_response(response: &PollResponse) -> Self {
        let raw = match &response.log_progress {
            Value::String(text) => text.trim().to_string(),
            Value::Null | Value::Bool(false) => String::new(),
            Value::Number(n) if n.as_f64() == Some(0.0) => String::new(),
            other => other.to_string(),
        };
        let (icon, text) = match raw.strip_prefix(ICON_SENTINEL) {
            Some(rest) => {
                let (name, text) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
                (Some(name.to_string()), text.trim().to_string())
            }
            None => (None, raw),
        };
        Self {
            text,
            icon: icon.filter(|name| !name.is_empty()),
            active: response.log_progress_active,
        }
    }
}

/// Receives everything a poll produced. All methods default to no-ops.
pub trait PollSink: Send {
    fn on_applied(&mut self, _view: &SessionView, _applied: &[Applied], _dirty: &Dirty) {}
    fn on_progress(&mut self, _progress: &ProgressState) {}
    fn on_paused(&mut self, _paused: bool) {}
    fn on_sessions(&mut self, _contexts: &[SessionSummary], _tasks: &[SessionSummary]) {}
    fn on_notifications(&mut self, _notifications: &[Value]) {}
    fn on_connection(&mut self, _state: ConnectionState) {}
    /// The view was cleared; the next batch is the full log of `session`.
    fn on_reset(&mut self, _session: Option<&str>) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl PollSink for NoopSink {}

/// Acknowledged positions in the log and notification streams.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollCursor {
    pub log_version: u64,
    pub log_guid: Option<String>,
    pub notifications_version: u64,
    pub notifications_guid: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// New entries were reconciled.
    Applied(usize),
    Idle,
    /// The session-log identity changed; re-poll from zero without waiting.
    Reset,
    /// The response was for a session that is no longer active.
    Stale,
    /// The server asked the client to clear its active session.
    Deselected,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct PollerOptions {
    pub schedule: ScheduleOptions,
    pub timezone: String,
    pub reconcile: ReconcileOptions,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            schedule: ScheduleOptions::default(),
            timezone: "UTC".to_string(),
            reconcile: ReconcileOptions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollCommand {
    SwitchSession(Option<String>),
    Send {
        text: String,
        attachments: Vec<String>,
    },
}

pub struct Poller<T, S> {
    transport: T,
    sink: S,
    options: PollerOptions,
    schedule: PollSchedule,
    cursor: PollCursor,
    session: Option<String>,
    view: SessionView,
    connection: ConnectionState,
    progress: ProgressState,
    paused: bool,
}

impl<T: LogTransport, S: PollSink> Poller<T, S> {
    pub fn new(transport: T, sink: S, session: Option<String>, options: PollerOptions) -> Self {
        Self {
            view: SessionView::new(session.clone(), options.reconcile.clone()),
            schedule: PollSchedule::new(options.schedule),
            transport,
            sink,
            options,
            cursor: PollCursor::default(),
            session,
            connection: ConnectionState::Connecting,
            progress: ProgressState::default(),
            paused: false,
        }
    }

    pub fn session(&self) -> Option<&str> {
        self.session.as_deref()
    }

    pub fn view(&self) -> &SessionView {
        &self.view
    }

    pub fn cursor(&self) -> &PollCursor {
        &self.cursor
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn progress(&self) -> &ProgressState {
        &self.progress
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn schedule(&self) -> &PollSchedule {
        &self.schedule
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_parts(self) -> (T, S, SessionView) {
        (self.transport, self.sink, self.view)
    }

    fn request(&self) -> PollRequest {
        PollRequest {
            log_from: self.cursor.log_version,
            context: self.session.clone(),
            notifications_from: self.cursor.notifications_version,
            timezone: self.options.timezone.clone(),
        }
    }

    /// Issue one poll and apply its result.
    pub async fn poll_once(&mut self) -> PollOutcome {
        let request = self.request();
        match self.transport.poll(&request).await {
            Ok(response) => self.apply_response(request.context.as_deref(), response),
            Err(e) => self.record_failure(&e),
        }
    }

    fn record_failure(&mut self, error: &TransportError) -> PollOutcome {
        tracing::warn!(session = ?self.session, error = %error, "Poll failed");
        self.set_connection(ConnectionState::Disconnected);
        self.schedule.record(false);
        PollOutcome::Failed(error.to_string())
    }

    /// Apply a response to a poll issued for `requested`.
    pub fn apply_response(&mut self, requested: Option<&str>, response: PollResponse) -> PollOutcome {
        let active = self.session.as_deref();
        let echoed_other = !response.context.is_empty() && Some(response.context.as_str()) != active;
        if requested != active || echoed_other {
            tracing::debug!(
                requested = ?requested,
                echoed = %response.context,
                active = ?active,
                "Dropping poll response for inactive session"
            );
            return PollOutcome::Stale;
        }

        self.set_connection(ConnectionState::Connected);
        self.sink.on_sessions(&response.contexts, &response.tasks);
        self.apply_notifications(&response);

        if response.deselect_chat {
            tracing::info!(session = ?self.session, "Server deselected the active session");
            self.reset_session(None);
            return PollOutcome::Deselected;
        }

        match &self.cursor.log_guid {
            Some(known) if *known != response.log_guid => {
                tracing::info!(
                    session = ?self.session,
                    old_guid = %known,
                    new_guid = %response.log_guid,
                    "Session log identity changed; resetting view"
                );
                self.view.reset();
                self.cursor.log_version = 0;
                self.cursor.log_guid = Some(response.log_guid);
                self.schedule.record(true);
                self.sink.on_reset(self.session.as_deref());
                return PollOutcome::Reset;
            }
            Some(_) => {}
            None => self.cursor.log_guid = Some(response.log_guid.clone()),
        }

        let progress = ProgressState::from_response(&response);
        if progress != self.progress {
            self.sink.on_progress(&progress);
            self.progress = progress;
        }
        if response.paused != self.paused {
            self.paused = response.paused;
            self.sink.on_paused(response.paused);
        }

        if response.logs.is_empty() {
            self.schedule.record(false);
            return PollOutcome::Idle;
        }

        let applied = self.view.apply_batch(&response.logs);
        self.cursor.log_version = response.log_version;
        let dirty = self.view.take_dirty();
        tracing::debug!(
            session = ?self.session,
            log_version = response.log_version,
            entries = applied.len(),
            "Applied log batch"
        );
        self.sink.on_applied(&self.view, &applied, &dirty);
        self.schedule.record(true);
        PollOutcome::Applied(applied.len())
    }

    fn apply_notifications(&mut self, response: &PollResponse) {
        match &self.cursor.notifications_guid {
            Some(known) if *known != response.notifications_guid => {
                tracing::debug!(
                    old_guid = %known,
                    new_guid = %response.notifications_guid,
                    "Notification stream identity changed; rewinding cursor"
                );
                self.cursor.notifications_guid = Some(response.notifications_guid.clone());
                self.cursor.notifications_version = 0;
                return;
            }
            Some(_) => {}
            None => self.cursor.notifications_guid = Some(response.notifications_guid.clone()),
        }
        if !response.notifications.is_empty() {
            self.sink.on_notifications(&response.notifications);
        }
        self.cursor.notifications_version = response.notifications_version;
    }

    fn set_connection(&mut self, state: ConnectionState) {
        if self.connection != state {
            tracing::info!(?state, "Connection state changed");
            self.connection = state;
            self.sink.on_connection(state);
        }
    }

    fn reset_session(&mut self, session: Option<String>) {
        self.view = SessionView::new(session.clone(), self.options.reconcile.clone());
        self.session = session;
        self.cursor.log_version = 0;
        self.cursor.log_guid = None;
        self.progress = ProgressState::default();
        if self.session.is_some() {
            self.schedule.record(true);
        } else {
            self.schedule.settle();
        }
        self.sink.on_reset(self.session.as_deref());
    }

    /// Make `session` active. Local state is cleared before the next poll.
    pub fn switch_session(&mut self, session: Option<String>) {
        if session == self.session {
            return;
        }
        tracing::info!(from = ?self.session, to = ?session, "Switching session");
        self.reset_session(session);
    }

    /// Render the message optimistically, then submit it.
    pub async fn send_message(
        &mut self,
        text: &str,
        attachments: Vec<String>,
    ) -> Result<SendMessageResponse, TransportError> {
        let request =
            SendMessageRequest::new(text, self.session.clone()).with_attachments(attachments);
        let applied = self.view.apply_optimistic_user(
            &request.message_id,
            &request.text,
            &request.attachments,
            Utc::now(),
        );
        let dirty = self.view.take_dirty();
        self.sink.on_applied(&self.view, &[applied], &dirty);

        let response = self.transport.send_message(&request).await?;
        if self.session.is_none() && !response.context.is_empty() {
            tracing::info!(session = %response.context, "Server opened a new session");
            self.session = Some(response.context.clone());
            self.view.session_id = self.session.clone();
            self.cursor.log_version = 0;
            self.cursor.log_guid = None;
        }
        self.schedule.record(true);
        Ok(response)
    }

    async fn handle_command(&mut self, command: PollCommand) {
        match command {
            PollCommand::SwitchSession(session) => self.switch_session(session),
            PollCommand::Send { text, attachments } => {
                if let Err(e) = self.send_message(&text, attachments).await {
                    tracing::warn!(session = ?self.session, error = %e, "Sending message failed");
                    self.set_connection(ConnectionState::Disconnected);
                }
            }
        }
    }

    /// Poll until cancelled. Commands interrupt both an in-flight poll and the wait.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<PollCommand>,
        cancel: CancellationToken,
    ) -> Self {
        loop {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => break,
                Some(command) = commands.recv() => {
                    self.handle_command(command).await;
                    continue;
                }
                outcome = self.poll_once() => outcome,
            };
            if outcome == PollOutcome::Reset {
                continue;
            }

            let delay = self.schedule.next_delay();
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(command) = commands.recv() => self.handle_command(command).await,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        tracing::debug!(session = ?self.session, "Poll loop stopped");
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(progress: Value) -> PollResponse {
        PollResponse {
            log_progress: progress,
            log_progress_active: true,
            ..PollResponse::default()
        }
    }

    #[test]
    fn progress_splits_icon_sentinel() {
        let state = ProgressState::from_response(&response(json!("icon://network_intelligence Searching")));
        assert_eq!(state.icon.as_deref(), Some("network_intelligence"));
        assert_eq!(state.text, "Searching");
        assert!(state.active);
    }

    #[test]
    fn numeric_zero_progress_is_empty() {
        let state = ProgressState::from_response(&response(json!(0)));
        assert_eq!(state.text, "");
        assert_eq!(state.icon, None);
    }

    #[test]
    fn plain_progress_has_no_icon() {
        let state = ProgressState::from_response(&response(json!("Waiting for input")));
        assert_eq!(state.text, "Waiting for input");
        assert_eq!(state.icon, None);
    }
}
