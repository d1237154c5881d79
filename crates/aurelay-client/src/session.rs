//! Connection lifecycle for one chat screen visit.
//!
//! The session is an explicit state machine: it loads history, opens the
//! WebSocket, pumps events both ways while connected, and on unexpected
//! closure reconnects with exponential backoff up to a bounded attempt count
//! before surfacing a persistent failure. Callers interact through a
//! [`SessionHandle`] and observe the session through an event channel.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use aurelay_protocol::{ClientCommand, ServerEvent};

use crate::history::ApiClient;
use crate::view::{ConversationView, ViewMessage};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "disconnected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
            SessionState::Reconnecting => write!(f, "reconnecting"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

/// Reconnect/backoff tuning.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound on any single delay.
    pub max: Duration,
    /// Consecutive failed attempts before the session gives up.
    pub max_attempts: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(250),
            max: Duration::from_secs(15),
            max_attempts: 8,
        }
    }
}

impl BackoffConfig {
    /// Exponential delay for the given attempt (1-based), capped at `max`,
    /// with up to 25% jitter so reconnecting clients do not stampede.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self
            .initial
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max);
        let jitter_cap = (base.as_millis() as u64) / 4;
        let jitter = if jitter_cap == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_cap)
        };
        base + Duration::from_millis(jitter)
    }
}

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// HTTP origin of the relay, e.g. `http://127.0.0.1:4000`.
    pub base_url: String,
    pub user_id: i64,
    pub peer_id: i64,
    pub backoff: BackoffConfig,
}

/// Commands a caller can issue to a running session.
#[derive(Debug)]
pub enum SessionCommand {
    /// Send a message to the peer.
    Send { body: String },
    /// Re-fetch history (retry affordance after a failed fetch, or a manual
    /// refresh). Also resets a `Failed` session back into reconnecting.
    ReloadHistory,
    /// Tear the session down, closing the socket so the server frees the
    /// registry slot promptly.
    Close,
}

/// Events the session reports to its caller.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    State(SessionState),
    /// The conversation view changed; carries a full ordered snapshot.
    ViewChanged(Vec<ViewMessage>),
    /// The history fetch failed; the caller should offer a retry.
    HistoryFailed(String),
    SendRejected {
        correlation_id: String,
        reason: String,
    },
    SendFailed {
        correlation_id: String,
        reason: String,
    },
}

/// Handle for issuing commands to a spawned session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    pub async fn send(&self, body: impl Into<String>) {
        let _ = self
            .commands
            .send(SessionCommand::Send { body: body.into() })
            .await;
    }

    pub async fn reload_history(&self) {
        let _ = self.commands.send(SessionCommand::ReloadHistory).await;
    }

    pub async fn close(&self) {
        let _ = self.commands.send(SessionCommand::Close).await;
    }
}

enum PumpOutcome {
    /// Socket closed or errored unexpectedly; reconnect.
    Lost,
    /// Caller asked to close, or dropped the handle; stop.
    Done,
}

/// One conversation's client session.
pub struct ChatSession {
    config: SessionConfig,
    api: ApiClient,
    view: ConversationView,
    state: SessionState,
    events: mpsc::Sender<SessionEvent>,
}

impl ChatSession {
    /// Spawn a session task. Returns the command handle and the event stream.
    pub fn spawn(config: SessionConfig) -> (SessionHandle, mpsc::Receiver<SessionEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::channel(256);

        let session = ChatSession {
            api: ApiClient::new(config.base_url.clone()),
            view: ConversationView::new(config.user_id, config.peer_id),
            state: SessionState::Disconnected,
            events: event_tx,
            config,
        };
        tokio::spawn(session.run(cmd_rx));

        (SessionHandle { commands: cmd_tx }, event_rx)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        // Initial history load; a failure is surfaced as a retryable state,
        // not treated as fatal. The live connection can still come up.
        self.reload_history().await;

        let mut attempt: u32 = 0;
        loop {
            self.set_state(if attempt == 0 {
                SessionState::Connecting
            } else {
                SessionState::Reconnecting
            })
            .await;

            match connect_async(self.ws_url()).await {
                Ok((socket, _)) => {
                    info!(user_id = self.config.user_id, "connected to relay");
                    self.set_state(SessionState::Connected).await;
                    if attempt > 0 {
                        // Reconcile messages missed while offline.
                        self.reload_history().await;
                    }
                    attempt = 0;

                    match self.pump(socket, &mut commands).await {
                        PumpOutcome::Done => {
                            self.set_state(SessionState::Disconnected).await;
                            return;
                        }
                        PumpOutcome::Lost => {}
                    }
                }
                Err(e) => {
                    warn!(attempt, "connect failed: {e}");
                }
            }

            attempt += 1;
            if attempt >= self.config.backoff.max_attempts {
                self.set_state(SessionState::Failed).await;
                // Stay alive so the caller can retry or close.
                match self.wait_for_retry(&mut commands).await {
                    Some(()) => attempt = 0,
                    None => return,
                }
                continue;
            }

            let delay = self.config.backoff.delay_for_attempt(attempt);
            debug!(attempt, ?delay, "backing off before reconnect");
            if self.sleep_or_close(delay, &mut commands).await.is_none() {
                self.set_state(SessionState::Disconnected).await;
                return;
            }
        }
    }

    /// Pump loop while connected: socket events in, caller commands out.
    async fn pump(
        &mut self,
        socket: WsStream,
        commands: &mut mpsc::Receiver<SessionCommand>,
    ) -> PumpOutcome {
        let (mut write, mut read) = socket.split();

        loop {
            tokio::select! {
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<ServerEvent>(text.as_str()) {
                                Ok(event) => {
                                    if let Some(reply) = self.handle_event(event).await {
                                        if send_command(&mut write, &reply).await.is_err() {
                                            return PumpOutcome::Lost;
                                        }
                                    }
                                }
                                Err(e) => warn!("unparseable server event: {e}"),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            warn!("server closed connection");
                            return PumpOutcome::Lost;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("socket error: {e}");
                            return PumpOutcome::Lost;
                        }
                    }
                }
                cmd = commands.recv() => {
                    match cmd {
                        Some(SessionCommand::Send { body }) => {
                            if body.trim().is_empty() {
                                debug!("skipping empty send");
                                continue;
                            }
                            let correlation_id = Uuid::new_v4().to_string();
                            self.view.append_local(&correlation_id, body.trim());
                            self.emit_view().await;

                            let cmd = ClientCommand::Send {
                                correlation_id: correlation_id.clone(),
                                receiver_id: self.config.peer_id,
                                body: body.trim().to_string(),
                            };
                            if send_command(&mut write, &cmd).await.is_err() {
                                self.view.mark_failed(&correlation_id);
                                self.emit(SessionEvent::SendFailed {
                                    correlation_id,
                                    reason: "connection lost".to_string(),
                                })
                                .await;
                                self.emit_view().await;
                                return PumpOutcome::Lost;
                            }
                        }
                        Some(SessionCommand::ReloadHistory) => {
                            self.reload_history().await;
                        }
                        Some(SessionCommand::Close) => {
                            let _ = write.send(Message::Close(None)).await;
                            return PumpOutcome::Done;
                        }
                        None => {
                            // Handle dropped; tear down like an explicit close.
                            let _ = write.send(Message::Close(None)).await;
                            return PumpOutcome::Done;
                        }
                    }
                }
            }
        }
    }

    /// Handle one server event. Returns a command to send back, if any.
    async fn handle_event(&mut self, event: ServerEvent) -> Option<ClientCommand> {
        match event {
            ServerEvent::Connected { user_id } => {
                debug!(user_id, "relay confirmed registration");
            }
            ServerEvent::Ping => return Some(ClientCommand::Pong),
            ServerEvent::Deliver { message } => {
                self.view.apply_delivered(message);
                self.emit_view().await;
            }
            ServerEvent::Ack {
                correlation_id,
                message,
            } => {
                self.view.confirm(&correlation_id, message);
                self.emit_view().await;
            }
            ServerEvent::SendRejected {
                correlation_id,
                reason,
            } => {
                self.view.mark_failed(&correlation_id);
                self.emit(SessionEvent::SendRejected {
                    correlation_id,
                    reason,
                })
                .await;
                self.emit_view().await;
            }
            ServerEvent::SendFailed {
                correlation_id,
                reason,
            } => {
                self.view.mark_failed(&correlation_id);
                self.emit(SessionEvent::SendFailed {
                    correlation_id,
                    reason,
                })
                .await;
                self.emit_view().await;
            }
            ServerEvent::Error { message } => {
                warn!("relay error: {message}");
            }
        }
        None
    }

    async fn reload_history(&mut self) {
        match self
            .api
            .fetch_history(self.config.user_id, self.config.peer_id)
            .await
        {
            Ok(history) => {
                self.view.load_history(history);
                self.emit_view().await;
            }
            Err(e) => {
                warn!("history fetch failed: {e}");
                self.emit(SessionEvent::HistoryFailed(e.to_string())).await;
            }
        }
    }

    /// Sleep for the backoff delay while still honoring commands. Returns
    /// `None` if the caller closed the session.
    async fn sleep_or_close(
        &mut self,
        delay: Duration,
        commands: &mut mpsc::Receiver<SessionCommand>,
    ) -> Option<()> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Some(()),
                cmd = commands.recv() => {
                    if self.handle_offline_command(cmd).await.is_none() {
                        return None;
                    }
                }
            }
        }
    }

    /// After giving up, wait for the caller to either retry or close.
    /// Returns `Some(())` to resume connecting, `None` to stop.
    async fn wait_for_retry(
        &mut self,
        commands: &mut mpsc::Receiver<SessionCommand>,
    ) -> Option<()> {
        loop {
            match commands.recv().await {
                Some(SessionCommand::ReloadHistory) => {
                    self.reload_history().await;
                    return Some(());
                }
                other => {
                    if self.handle_offline_command(other).await.is_none() {
                        return None;
                    }
                }
            }
        }
    }

    /// Commands arriving while there is no connection. Sends fail
    /// immediately and visibly rather than silently.
    async fn handle_offline_command(&mut self, cmd: Option<SessionCommand>) -> Option<()> {
        match cmd {
            Some(SessionCommand::Send { body }) => {
                if body.trim().is_empty() {
                    return Some(());
                }
                let correlation_id = Uuid::new_v4().to_string();
                self.view.append_local(&correlation_id, body.trim());
                self.view.mark_failed(&correlation_id);
                self.emit(SessionEvent::SendFailed {
                    correlation_id,
                    reason: "not connected".to_string(),
                })
                .await;
                self.emit_view().await;
                Some(())
            }
            Some(SessionCommand::ReloadHistory) => {
                self.reload_history().await;
                Some(())
            }
            Some(SessionCommand::Close) | None => None,
        }
    }

    fn ws_url(&self) -> String {
        let base = &self.config.base_url;
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.clone()
        };
        format!(
            "{}/ws?user_id={}",
            ws_base.trim_end_matches('/'),
            self.config.user_id
        )
    }

    async fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            info!(from = %self.state, to = %state, "session state");
            self.state = state;
            self.emit(SessionEvent::State(state)).await;
        }
    }

    async fn emit_view(&self) {
        self.emit(SessionEvent::ViewChanged(self.view.messages().to_vec()))
            .await;
    }

    async fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event).await;
    }
}

async fn send_command(
    write: &mut (impl SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    cmd: &ClientCommand,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let json = serde_json::to_string(cmd)
        .map_err(|e| tokio_tungstenite::tungstenite::Error::Io(std::io::Error::other(e)))?;
    write.send(Message::Text(json.into())).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let backoff = BackoffConfig {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(2),
            max_attempts: 5,
        };

        let d1 = backoff.delay_for_attempt(1);
        assert!(d1 >= Duration::from_millis(100));
        assert!(d1 <= Duration::from_millis(125));

        let d3 = backoff.delay_for_attempt(3);
        assert!(d3 >= Duration::from_millis(400));
        assert!(d3 <= Duration::from_millis(500));

        // Far past the cap: base clamps to max, jitter stays bounded.
        let d20 = backoff.delay_for_attempt(20);
        assert!(d20 >= Duration::from_secs(2));
        assert!(d20 <= Duration::from_millis(2500));
    }

    #[test]
    fn ws_url_from_http_base() {
        let session_url = |base: &str| {
            let config = SessionConfig {
                base_url: base.to_string(),
                user_id: 7,
                peer_id: 8,
                backoff: BackoffConfig::default(),
            };
            let (events, _rx) = mpsc::channel(1);
            let session = ChatSession {
                api: ApiClient::new(config.base_url.clone()),
                view: ConversationView::new(config.user_id, config.peer_id),
                state: SessionState::Disconnected,
                events,
                config,
            };
            session.ws_url()
        };

        assert_eq!(
            session_url("http://127.0.0.1:4000"),
            "ws://127.0.0.1:4000/ws?user_id=7"
        );
        assert_eq!(
            session_url("https://relay.example"),
            "wss://relay.example/ws?user_id=7"
        );
    }
}
