//! Chat session
//!
//! One client connection to the chat server: sends chat text and status
//! changes, turns inbound frames into display lines and presence updates,
//! and owns the connect / shutdown / reconnect lifecycle.

use std::mem;
use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::client::presence::{PresenceNotice, PresenceTable, StatusEvent, reconcile};
use crate::client::sink::{DisplaySink, SYSTEM};
use crate::config::ClientSettings;
use crate::protocol::message::{Content, Message, ServiceCommand, ServicePayload, Status};
use crate::transport::{Connection, Received};
use crate::utils::ChatError;

/// How long `shutdown` waits for the server to close its side.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Open,
}

/// What a call to `receive` did with the next frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Displayed,
    Presence(Vec<PresenceNotice>),
    Discarded,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub struct ChatSession<D: DisplaySink> {
    settings: ClientSettings,
    connection: Option<Connection<TcpStream>>,
    state: SessionState,
    status: Status,
    presence: PresenceTable,
    sink: D,
}

impl<D: DisplaySink> ChatSession<D> {
    /// Creates a disconnected session. Nothing touches the network until
    /// `connect` is called.
    pub fn new(settings: ClientSettings, sink: D) -> Self {
        Self {
            settings,
            connection: None,
            state: SessionState::Disconnected,
            status: Status::Offline,
            presence: PresenceTable::new(),
            sink,
        }
    }

    /// Where the session is in its connect / disconnect lifecycle.
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Open
    }

    /// Name sent as `username` on every outgoing message.
    pub fn username(&self) -> &str {
        &self.settings.username
    }

    /// Last status this session announced.
    pub fn status(&self) -> Status {
        self.status
    }

    /// Other users' statuses as seen over the current connection.
    ///
    /// Emptied whenever the connection ends: departures that happen while
    /// disconnected are never delivered, so older entries cannot be trusted.
    pub fn presence(&self) -> &PresenceTable {
        &self.presence
    }

    fn address(&self) -> String {
        format!("{}:{}", self.settings.host, self.settings.port)
    }

    fn default_status(&self) -> Status {
        Status::from_short_name(&self.settings.default_status).unwrap_or(Status::Online)
    }

    fn system(&mut self, text: &str) {
        self.sink.notify(SYSTEM, text);
    }

    /// Opens the TCP connection to the configured server.
    ///
    /// A failure is shown on the sink and returned; the session stays
    /// `Disconnected`.
    pub async fn connect(&mut self) -> Result<(), ChatError> {
        let addr = self.address();
        self.state = SessionState::Connecting;
        self.system(&format!("Trying to connect to server at {addr}"));

        match TcpStream::connect(&addr).await {
            Ok(stream) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("set_nodelay failed for {}: {}", addr, e);
                }
                self.connection = Some(Connection::new(stream, self.settings.max_frame_len));
                self.state = SessionState::Open;
                info!("Connected to {} as {}", addr, self.settings.username);
                self.system(&format!("Connected to server at {addr}"));
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Disconnected;
                warn!("Connecting to {} failed: {}", addr, e);
                self.system(&format!("Unable to connect to server at {addr} ({e})"));
                Err(e.into())
            }
        }
    }

    /// Sends `content` under this session's username. Failures are shown on
    /// the sink and returned; the session stays usable.
    pub async fn send(&mut self, content: Content) -> Result<(), ChatError> {
        let msg = Message::new(self.settings.username.clone(), content);
        self.send_message(&msg).await
    }

    /// Sends a chat line to everybody else in the room.
    pub async fn send_text(&mut self, body: &str) -> Result<(), ChatError> {
        self.send(Content::User {
            body: body.to_string(),
        })
        .await
    }

    /// Sends a bare service command, e.g. `Shutdown`.
    pub async fn send_command(&mut self, command: ServiceCommand) -> Result<(), ChatError> {
        self.send(Content::Service(ServicePayload::for_command(command)))
            .await
    }

    /// Announces `status` and remembers it once the frame is written.
    pub async fn set_status(&mut self, status: Status) -> Result<(), ChatError> {
        self.send_command(ServiceCommand::StatusChange(status)).await?;
        self.status = status;
        Ok(())
    }

    async fn send_message(&mut self, msg: &Message) -> Result<(), ChatError> {
        let Some(conn) = self.connection.as_mut() else {
            self.system("Unable to send message (not connected).");
            return Err(ChatError::NotConnected);
        };

        let result = conn.write_message(msg).await;
        if let Err(e) = result {
            warn!("Sending {} failed: {}", msg.id, e);
            self.system(&format!("Unable to send message ({e})."));
            return Err(e);
        }
        Ok(())
    }

    /// Reads the next frame and acts on it. Only fails when there is no
    /// connection at all; everything else is reported on the sink.
    pub async fn receive(&mut self) -> Result<Delivery, ChatError> {
        let Some(conn) = self.connection.as_mut() else {
            return Err(ChatError::NotConnected);
        };

        let result = conn.read().await;
        match result {
            Ok(Received::Message { message, .. }) => Ok(self.dispatch(message)),
            Ok(Received::Invalid { error, .. }) => {
                debug!("Discarding inbound frame: {}", error);
                let text = match error {
                    ChatError::MalformedEnvelope(_) => {
                        "Invalid message format. Discarding message.".to_string()
                    }
                    ChatError::IncompleteEnvelope(_) => {
                        "Incomplete message received. Discarding message.".to_string()
                    }
                    other => format!("Discarding message ({other})."),
                };
                self.system(&text);
                Ok(Delivery::Discarded)
            }
            Ok(Received::Closed) => {
                self.lost_connection("No data received. (Disconnected from server)");
                Ok(Delivery::Disconnected)
            }
            Err(e) => {
                warn!("Connection to {} failed: {}", self.address(), e);
                self.lost_connection(&format!("Disconnected from server ({e})"));
                Ok(Delivery::Disconnected)
            }
        }
    }

    fn lost_connection(&mut self, text: &str) {
        self.disconnected();
        self.system(text);
    }

    fn disconnected(&mut self) {
        self.connection = None;
        self.state = SessionState::Disconnected;
        self.presence = PresenceTable::new();
    }

    fn dispatch(&mut self, message: Message) -> Delivery {
        match message.content {
            Content::User { body } => {
                self.sink.notify(&message.sender, body.trim_end());
                Delivery::Displayed
            }
            Content::Service(payload) => match payload.command() {
                Ok(ServiceCommand::StatusChange(status)) => {
                    let event = StatusEvent::new(message.sender, status);
                    let (table, notices) = reconcile(mem::take(&mut self.presence), &event);
                    self.presence = table;
                    for notice in &notices {
                        self.sink.presence(notice);
                    }
                    Delivery::Presence(notices)
                }
                _ => {
                    let text = payload
                        .note
                        .unwrap_or_else(|| format!("service command {:?}", payload.command));
                    self.sink.notify(&message.sender, &text);
                    Delivery::Displayed
                }
            },
        }
    }

    /// Announces departure and closes the connection. Safe to call when
    /// already disconnected.
    pub async fn shutdown(&mut self) {
        let Some(mut conn) = self.connection.take() else {
            self.disconnected();
            return;
        };
        self.system("Stopping client. Tearing down the connection...");

        let farewell = Message::command(self.settings.username.clone(), ServiceCommand::Shutdown);
        match conn.write_message(&farewell).await {
            Ok(()) => {
                if let Err(e) = conn.close_write().await {
                    debug!("Half-close failed: {}", e);
                }
                if let Ok(Ok(Received::Message { message, .. })) =
                    tokio::time::timeout(DRAIN_TIMEOUT, conn.read()).await
                {
                    self.dispatch(message);
                }
            }
            Err(e) => {
                warn!("Shutdown command not delivered: {}", e);
                self.system("Unable to close connection to server (not connected?).");
            }
        }

        conn.mark_closed();
        self.disconnected();
        info!("Session for {} closed", self.settings.username);
    }

    /// Drops any current connection, waits the configured backoff, connects
    /// again and re-announces the default status.
    ///
    /// Makes a single attempt. On failure the error is shown and returned,
    /// and the session stays `Disconnected` until the caller tries again.
    pub async fn reconnect(&mut self) -> Result<(), ChatError> {
        if let Some(mut conn) = self.connection.take() {
            let _ = conn.close_write().await;
        }
        self.disconnected();

        let backoff = Duration::from_millis(self.settings.reconnect_backoff_ms);
        self.system(&format!("Reconnecting in {} ms...", backoff.as_millis()));
        tokio::time::sleep(backoff).await;

        self.connect().await?;
        let status = self.default_status();
        self.set_status(status).await
    }

    /// Console loop: each input line is a chat message or a `!` command, and
    /// inbound frames are displayed as they arrive. Returns once the user
    /// leaves or input ends.
    pub async fn run<R>(&mut self, input: R) -> Result<(), ChatError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();

        if self.is_connected() {
            let status = self.default_status();
            let _ = self.set_status(status).await;
        }

        loop {
            let connected = self.is_connected();
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        self.shutdown().await;
                        break;
                    };
                    if self.handle_input(&line).await == Flow::Stop {
                        break;
                    }
                }
                delivery = self.receive(), if connected => {
                    if let Ok(Delivery::Disconnected) = delivery {
                        self.system("Type !reconnect to connect again or !q to leave.");
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_input(&mut self, line: &str) -> Flow {
        let command = line.trim().to_lowercase();

        match command.as_str() {
            "" => Flow::Continue,
            "!q" | "!quit" | "!shutdown" => {
                self.shutdown().await;
                Flow::Stop
            }
            "!killsrv" => {
                let _ = self.send_command(ServiceCommand::ForceShutdownServer).await;
                self.shutdown().await;
                Flow::Stop
            }
            "!reconnect" => {
                let _ = self.reconnect().await;
                Flow::Continue
            }
            "!who" => {
                self.show_presence();
                Flow::Continue
            }
            _ => match command.strip_prefix("!status:") {
                Some(name) => match Status::from_short_name(name) {
                    Some(Status::Offline) => {
                        let _ = self.set_status(Status::Offline).await;
                        self.shutdown().await;
                        Flow::Stop
                    }
                    Some(status) => {
                        let _ = self.set_status(status).await;
                        Flow::Continue
                    }
                    None => {
                        self.system(&format!(
                            "Unknown status '{name}'. Use one of: on, afk, dnd, off."
                        ));
                        Flow::Continue
                    }
                },
                None => {
                    let _ = self.send_text(line).await;
                    Flow::Continue
                }
            },
        }
    }

    fn show_presence(&mut self) {
        if self.presence.is_empty() {
            self.system("Nobody else has announced a status yet.");
            return;
        }
        let lines: Vec<String> = self
            .presence
            .iter()
            .map(|(user, status)| format!("{user}: {status}"))
            .collect();
        for line in lines {
            self.system(&line);
        }
    }
}
