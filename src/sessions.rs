// src/sessions.rs
//
// The single station session: connect/disconnect lifecycle, device commands,
// the background reader, and link-loss recovery.
//
// All state transitions run under one async mutex (`active`). Status and
// history are published separately so readers never wait on a transition and
// always see a whole pre- or post-transition value.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::broadcast::{EventBroadcaster, StreamEvent, Subscription};
use crate::device::{validate_baud_rate, DeviceCommand, SentenceType};
use crate::io::serial::{LineRead, LinkOpener, SerialConnection};
use crate::io::{lock_recover, IoError};
use crate::settings::{BridgeSettings, SessionSettings};
use crate::terminal_log::{Direction, TerminalLine, TerminalLog};

// ============================================================================
// Types
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// Transient: carries an open failure back to the caller, then Disconnected
    Error,
}

/// Point-in-time view of the session
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    /// Empty when disconnected
    pub port: String,
    /// Last negotiated baud rate
    pub baud_rate: u32,
    /// Increments on every successful connect
    pub generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Operator actions, values already parsed into their typed forms
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionCommand {
    Connect { port: String, baud_rate: u32 },
    Disconnect,
    ChangeBaud(u32),
    StartTransmissions,
    StopTransmissions,
    SetRate {
        sentence: SentenceType,
        rate: Option<u32>,
    },
    SendRaw(String),
    ConfigureDevice,
}

struct ActiveSession {
    connection: Arc<SerialConnection>,
    cancel: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    generation: u64,
}

impl ActiveSession {
    fn is_live(&self) -> bool {
        !self.connection.is_closed()
    }
}

enum ReaderExit {
    Cancelled,
    Lost(String),
}

// ============================================================================
// Shared State
// ============================================================================

struct SessionInner {
    settings: SessionSettings,
    default_port: String,
    default_baud: u32,
    opener: Arc<dyn LinkOpener>,
    active: tokio::sync::Mutex<Option<ActiveSession>>,
    status: RwLock<SessionStatus>,
    log: TerminalLog,
    broadcaster: Arc<EventBroadcaster>,
    /// Held while appending and publishing so viewers see history order
    emit_order: Mutex<()>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    reconnect_cancel: Mutex<Option<Arc<AtomicBool>>>,
    generations: AtomicU64,
}

fn live(slot: &Option<ActiveSession>) -> Result<&ActiveSession, IoError> {
    match slot {
        Some(session) if session.is_live() => Ok(session),
        _ => Err(IoError::not_connected()),
    }
}

/// Write on the blocking pool; the link mutex may be held by the reader for
/// up to one port timeout.
async fn write_bytes(connection: &Arc<SerialConnection>, bytes: Vec<u8>) -> Result<(), IoError> {
    let connection = connection.clone();
    tokio::task::spawn_blocking(move || connection.write(&bytes))
        .await
        .unwrap_or_else(|e| Err(IoError::Io(format!("Write task failed: {}", e))))
}

async fn send_command(session: &ActiveSession, command: &DeviceCommand) -> Result<(), IoError> {
    let bytes = command.encode()?;
    tlog!(
        "[session] -> {}",
        String::from_utf8_lossy(&bytes).trim_end()
    );
    write_bytes(&session.connection, bytes).await
}

/// Stop the reader and close the port. The reader observes the cancel flag
/// within one port timeout.
async fn teardown(mut session: ActiveSession) {
    session.cancel.store(true, Ordering::SeqCst);
    if let Some(reader) = session.reader.take() {
        let _ = reader.await;
    }
    session.connection.close();
}

/// Wait for the next incoming sentence. `false` if the subscription closed.
async fn next_sentence(watch: &mut Subscription) -> bool {
    while let Some(event) = watch.recv().await {
        if let StreamEvent::Line { line } = event {
            if line.direction == Direction::Incoming && line.text.starts_with('$') {
                return true;
            }
        }
    }
    false
}

fn read_loop(inner: &SessionInner, connection: &SerialConnection, cancel: &AtomicBool) -> ReaderExit {
    loop {
        match connection.read_line(cancel) {
            Ok(LineRead::Line(text)) => inner.record(TerminalLine::incoming(text)),
            Ok(LineRead::Cancelled) => return ReaderExit::Cancelled,
            Ok(LineRead::EndOfStream) => return ReaderExit::Lost("end of stream".to_string()),
            Err(e) => return ReaderExit::Lost(e.to_string()),
        }
    }
}

impl SessionInner {
    fn update_status<R>(&self, f: impl FnOnce(&mut SessionStatus) -> R) -> R {
        match self.status.write() {
            Ok(mut status) => f(&mut *status),
            Err(poisoned) => f(&mut *poisoned.into_inner()),
        }
    }

    fn status(&self) -> SessionStatus {
        match self.status.read() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Append to history and publish, as one step.
    fn record(&self, line: TerminalLine) {
        let _order = lock_recover(&self.emit_order);
        let line = self.log.append(line);
        self.broadcaster.publish(StreamEvent::Line { line });
    }

    fn publish_status(&self) {
        let _order = lock_recover(&self.emit_order);
        self.broadcaster.publish(StreamEvent::Session {
            status: self.status(),
        });
    }

    fn set_disconnected(&self, last_error: Option<String>) {
        self.update_status(|s| {
            s.state = SessionState::Disconnected;
            s.port.clear();
            s.last_error = last_error;
        });
        self.publish_status();
    }

    fn cancel_reconnect(&self) {
        if let Some(flag) = lock_recover(&self.reconnect_cancel).take() {
            flag.store(true, Ordering::SeqCst);
        }
    }

    fn spawn_reader(
        self: &Arc<Self>,
        connection: Arc<SerialConnection>,
        cancel: Arc<AtomicBool>,
        generation: u64,
    ) -> JoinHandle<()> {
        let inner = self.clone();
        tokio::spawn(async move {
            let exit = {
                let inner = inner.clone();
                let connection = connection.clone();
                let cancel = cancel.clone();
                tokio::task::spawn_blocking(move || read_loop(&inner, &connection, &cancel))
                    .await
                    .unwrap_or_else(|e| ReaderExit::Lost(format!("reader task failed: {}", e)))
            };

            match exit {
                ReaderExit::Cancelled => {
                    tlog!("[session] Reader for {} stopped", connection.port());
                }
                ReaderExit::Lost(_) if cancel.load(Ordering::SeqCst) => {
                    // Explicit teardown in progress owns the cleanup
                }
                ReaderExit::Lost(reason) => {
                    // Separate task: teardown awaits this one while holding `active`
                    tokio::spawn(inner.handle_link_loss(cancel, generation, reason));
                }
            }
        })
    }

    /// Transition to Disconnected after the reader lost its link. Runs under
    /// `active` and does nothing if the link was already superseded.
    async fn handle_link_loss(self: Arc<Self>, cancel: Arc<AtomicBool>, generation: u64, reason: String) {
        let mut active = self.active.lock().await;
        let current = match active.as_ref() {
            Some(session) => {
                session.generation == generation
                    && Arc::ptr_eq(&session.cancel, &cancel)
                    && !cancel.load(Ordering::SeqCst)
            }
            None => false,
        };
        if !current {
            tlog!("[session] Ignoring loss of superseded link: {}", reason);
            return;
        }
        let Some(session) = active.take() else {
            return;
        };

        let port = session.connection.port().to_string();
        let baud_rate = session.connection.baud_rate();
        tlog!("[session] Link to {} lost: {}", port, reason);
        session.connection.close();
        self.record(TerminalLine::info(format!("Link to {} lost: {}", port, reason)));

        self.update_status(|s| {
            s.state = SessionState::Disconnected;
            s.port.clear();
            s.last_error = Some(reason.clone());
        });
        self.publish_status();

        if self.settings.auto_reconnect {
            self.spawn_reconnect(port, baud_rate);
        }
    }

    /// Send `probe` (if any) and wait for a sentence, up to
    /// `verify_attempts` times.
    async fn await_response(
        &self,
        session: &ActiveSession,
        watch: &mut Subscription,
        probe: Option<&DeviceCommand>,
    ) -> Result<(), IoError> {
        let attempts = self.settings.verify_attempts.max(1);
        let window = self.settings.verify_interval();
        for attempt in 1..=attempts {
            if let Some(command) = probe {
                send_command(session, command).await?;
            }
            if matches!(tokio::time::timeout(window, next_sentence(watch)).await, Ok(true)) {
                return Ok(());
            }
            tlog!(
                "[session] No reply from {} (attempt {}/{})",
                session.connection.port(),
                attempt,
                attempts
            );
        }
        Err(IoError::Io(format!(
            "No response from {} at {} baud",
            session.connection.port(),
            session.connection.baud_rate()
        )))
    }

    /// Tear down the session in `slot` after a failed check.
    async fn abandon(&self, slot: &mut Option<ActiveSession>, error: &IoError) {
        if let Some(session) = slot.take() {
            teardown(session).await;
        }
        self.set_disconnected(Some(error.to_string()));
    }

    /// Retry the lost connection until it opens or an explicit
    /// connect/disconnect raises the cancel flag.
    fn spawn_reconnect(self: &Arc<Self>, port: String, baud_rate: u32) {
        self.cancel_reconnect();
        let flag = Arc::new(AtomicBool::new(false));
        *lock_recover(&self.reconnect_cancel) = Some(flag.clone());

        let inner = self.clone();
        let interval = self.settings.reconnect_interval();
        tokio::spawn(async move {
            tlog!("[session] Reconnecting to {} every {:?}", port, interval);
            loop {
                tokio::time::sleep(interval).await;
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                let mut active = inner.active.lock().await;
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                match inner.connect_locked(&mut active, &port, baud_rate, false).await {
                    Ok(()) => {
                        tlog!("[session] Reconnected to {}", port);
                        break;
                    }
                    Err(e) => tlog!("[session] Reconnect to {} failed: {}", port, e),
                }
            }
        });
    }

    async fn connect_locked(
        self: &Arc<Self>,
        slot: &mut Option<ActiveSession>,
        port: &str,
        baud_rate: u32,
        fresh: bool,
    ) -> Result<(), IoError> {
        if let Some(previous) = slot.take() {
            tlog!(
                "[session] Closing {} before opening {}",
                previous.connection.port(),
                port
            );
            teardown(previous).await;
        }

        self.update_status(|s| {
            s.state = SessionState::Connecting;
            s.port = port.to_string();
            s.baud_rate = baud_rate;
            s.last_error = None;
        });
        if fresh && self.settings.clear_history_on_connect {
            self.log.clear();
        }

        let opened = {
            let opener = self.opener.clone();
            let port = port.to_string();
            tokio::task::spawn_blocking(move || SerialConnection::open(opener.as_ref(), &port, baud_rate))
                .await
                .unwrap_or_else(|e| Err(IoError::Io(format!("Open task failed: {}", e))))
        };

        let connection = match opened {
            Ok(connection) => Arc::new(connection),
            Err(e) => {
                tlog!("[session] Failed to open {}: {}", port, e);
                self.update_status(|s| {
                    s.state = SessionState::Error;
                    s.last_error = Some(e.to_string());
                });
                self.set_disconnected(Some(e.to_string()));
                return Err(e);
            }
        };

        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        self.update_status(|s| {
            s.state = SessionState::Connected;
            s.generation = generation;
        });

        let cancel = Arc::new(AtomicBool::new(false));
        let reader = self.spawn_reader(connection.clone(), cancel.clone(), generation);
        *slot = Some(ActiveSession {
            connection,
            cancel,
            reader: Some(reader),
            generation,
        });

        tlog!("[session] Connected to {} at {} baud", port, baud_rate);
        self.publish_status();
        Ok(())
    }
}

// ============================================================================
// Session Manager
// ============================================================================

/// Handle to the process-wide session. Cheap to clone.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    /// Must be called from within a tokio runtime (starts the heartbeat).
    pub fn new(settings: &BridgeSettings, opener: Arc<dyn LinkOpener>) -> Self {
        let session = settings.session.clone();
        let broadcaster = EventBroadcaster::new(session.subscriber_queue);
        let heartbeat = broadcaster.spawn_heartbeat(session.heartbeat_interval());

        let inner = SessionInner {
            log: TerminalLog::new(session.history_capacity),
            default_port: settings.default_port.clone(),
            default_baud: settings.default_baud,
            opener,
            active: tokio::sync::Mutex::new(None),
            status: RwLock::new(SessionStatus {
                state: SessionState::Disconnected,
                port: String::new(),
                baud_rate: settings.default_baud,
                generation: 0,
                last_error: None,
            }),
            broadcaster,
            emit_order: Mutex::new(()),
            heartbeat: Mutex::new(Some(heartbeat)),
            reconnect_cancel: Mutex::new(None),
            generations: AtomicU64::new(0),
            settings: session,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Open `port`, closing any existing session first.
    pub async fn connect(&self, port: &str, baud_rate: u32) -> Result<(), IoError> {
        let port = port.trim();
        if port.is_empty() {
            return Err(IoError::Validation("Port identifier is empty".to_string()));
        }
        let baud_rate = validate_baud_rate(baud_rate)?;

        let mut active = self.inner.active.lock().await;
        self.inner.cancel_reconnect();
        let verify = self.inner.settings.verify_on_connect && self.inner.settings.verify_attempts > 0;
        let mut watch = self.inner.broadcaster.subscribe();
        self.inner
            .connect_locked(&mut active, port, baud_rate, true)
            .await?;
        if !verify {
            return Ok(());
        }

        let checked = match live(&active) {
            Ok(session) => self.inner.await_response(session, &mut watch, None).await,
            Err(e) => Err(e),
        };
        if let Err(e) = checked {
            tlog!("[session] {} did not answer: {}", port, e);
            self.inner.abandon(&mut active, &e).await;
            return Err(e);
        }
        Ok(())
    }

    /// Close the session. Succeeds when already disconnected.
    pub async fn disconnect(&self) -> Result<(), IoError> {
        let mut active = self.inner.active.lock().await;
        self.inner.cancel_reconnect();
        let Some(session) = active.take() else {
            return Ok(());
        };

        let baud_rate = session.connection.baud_rate();
        if session.is_live()
            && self.inner.settings.restore_default_baud_on_disconnect
            && baud_rate != self.inner.default_baud
        {
            // Best effort: the device answers at the new rate, nobody listens for it
            let restore = DeviceCommand::SetBaud(self.inner.default_baud);
            if let Err(e) = send_command(&session, &restore).await {
                tlog!("[session] Failed to restore {} baud: {}", self.inner.default_baud, e);
            }
        }

        let port = session.connection.port().to_string();
        teardown(session).await;
        tlog!("[session] Disconnected from {}", port);
        self.inner.set_disconnected(None);
        Ok(())
    }

    /// Close the session and stop background tasks.
    pub async fn shutdown(&self) {
        if let Err(e) = self.disconnect().await {
            tlog!("[session] Disconnect during shutdown failed: {}", e);
        }
        if let Some(heartbeat) = lock_recover(&self.inner.heartbeat).take() {
            heartbeat.abort();
        }
    }

    // ------------------------------------------------------------------------
    // Device Commands
    // ------------------------------------------------------------------------

    /// Switch device and host to `rate`.
    ///
    /// The device is told first, then the local port is reopened at the new
    /// rate and the station must answer there. If the reopen or the answer
    /// fails the session is torn down.
    pub async fn change_baud(&self, rate: u32) -> Result<(), IoError> {
        let rate = validate_baud_rate(rate)?;
        let settings = &self.inner.settings;

        let mut active = self.inner.active.lock().await;
        let session = live(&active)?;
        if session.connection.baud_rate() == rate {
            return Ok(());
        }

        if settings.quiesce_on_baud_change {
            send_command(session, &DeviceCommand::StopTransmissions).await?;
            tokio::time::sleep(settings.command_spacing()).await;
        }
        send_command(session, &DeviceCommand::SetBaud(rate)).await?;
        tokio::time::sleep(settings.baud_settle()).await;

        let Some(mut session) = active.take() else {
            return Err(IoError::not_connected());
        };
        session.cancel.store(true, Ordering::SeqCst);
        if let Some(reader) = session.reader.take() {
            let _ = reader.await;
        }
        let mut watch = self.inner.broadcaster.subscribe();

        let reopened = {
            let connection = session.connection.clone();
            let opener = self.inner.opener.clone();
            tokio::task::spawn_blocking(move || connection.reopen(opener.as_ref(), rate))
                .await
                .unwrap_or_else(|e| Err(IoError::Io(format!("Reopen task failed: {}", e))))
        };
        if let Err(e) = reopened {
            tlog!(
                "[session] Reopen of {} at {} failed: {}",
                session.connection.port(),
                rate,
                e
            );
            session.connection.close();
            self.inner.set_disconnected(Some(e.to_string()));
            return Err(e);
        }

        session.cancel = Arc::new(AtomicBool::new(false));
        session.reader = Some(self.inner.spawn_reader(
            session.connection.clone(),
            session.cancel.clone(),
            session.generation,
        ));
        self.inner.update_status(|s| s.baud_rate = rate);
        self.inner.publish_status();
        tlog!("[session] {} now at {} baud", session.connection.port(), rate);

        let session = active.insert(session);
        tokio::time::sleep(settings.baud_settle()).await;

        let start = DeviceCommand::StartTransmissions;
        let restart = settings.quiesce_on_baud_change.then_some(&start);
        if settings.verify_attempts == 0 {
            if let Some(command) = restart {
                send_command(session, command).await?;
            }
            return Ok(());
        }
        let answered = self.inner.await_response(session, &mut watch, restart).await;
        if let Err(e) = answered {
            tlog!("[session] Station silent at {} baud: {}", rate, e);
            self.inner.abandon(&mut active, &e).await;
            return Err(e);
        }
        Ok(())
    }

    pub async fn start_transmissions(&self) -> Result<(), IoError> {
        let active = self.inner.active.lock().await;
        send_command(live(&active)?, &DeviceCommand::StartTransmissions).await
    }

    pub async fn stop_transmissions(&self) -> Result<(), IoError> {
        let active = self.inner.active.lock().await;
        send_command(live(&active)?, &DeviceCommand::StopTransmissions).await
    }

    /// Enable/disable one sentence. Unknown sentence types are rejected
    /// before anything is written.
    pub async fn set_sentence_rate(&self, sentence: &str, rate: Option<u32>) -> Result<(), IoError> {
        let sentence: SentenceType = sentence.parse()?;
        let command = DeviceCommand::set_sentence(sentence, rate)?;
        let active = self.inner.active.lock().await;
        send_command(live(&active)?, &command).await
    }

    /// Write operator text verbatim plus CR LF and echo it to the terminal.
    pub async fn send_raw(&self, text: &str) -> Result<(), IoError> {
        let text = text.trim_end_matches(&['\r', '\n'][..]);
        if text.is_empty() {
            return Err(IoError::Validation("Command text is empty".to_string()));
        }
        if text.contains(&['\r', '\n'][..]) {
            return Err(IoError::Validation(
                "Command text must be a single line".to_string(),
            ));
        }

        let active = self.inner.active.lock().await;
        let session = live(&active)?;
        let mut bytes = text.as_bytes().to_vec();
        bytes.extend_from_slice(b"\r\n");
        write_bytes(&session.connection, bytes).await?;
        self.inner.record(TerminalLine::outgoing(text));
        Ok(())
    }

    /// Put the station into its working configuration: every sentence on,
    /// heater control on, transmissions running.
    pub async fn configure_device(&self) -> Result<(), IoError> {
        let spacing = self.inner.settings.command_spacing();
        let active = self.inner.active.lock().await;
        let session = live(&active)?;

        let sequence = [
            DeviceCommand::StopTransmissions,
            DeviceCommand::EnableAllSentences(true),
            DeviceCommand::HeaterControl(true),
            DeviceCommand::StartTransmissions,
        ];
        for (i, command) in sequence.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(spacing).await;
            }
            send_command(session, command).await?;
        }
        Ok(())
    }

    /// Run one operator command.
    pub async fn execute(&self, command: SessionCommand) -> Result<(), IoError> {
        match command {
            SessionCommand::Connect { port, baud_rate } => self.connect(&port, baud_rate).await,
            SessionCommand::Disconnect => self.disconnect().await,
            SessionCommand::ChangeBaud(rate) => self.change_baud(rate).await,
            SessionCommand::StartTransmissions => self.start_transmissions().await,
            SessionCommand::StopTransmissions => self.stop_transmissions().await,
            SessionCommand::SetRate { sentence, rate } => {
                let command = DeviceCommand::set_sentence(sentence, rate)?;
                let active = self.inner.active.lock().await;
                send_command(live(&active)?, &command).await
            }
            SessionCommand::SendRaw(text) => self.send_raw(&text).await,
            SessionCommand::ConfigureDevice => self.configure_device().await,
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    pub fn status(&self) -> SessionStatus {
        self.inner.status()
    }

    pub fn default_port(&self) -> &str {
        &self.inner.default_port
    }

    pub fn default_baud(&self) -> u32 {
        self.inner.default_baud
    }

    /// History as plain text, oldest first.
    pub fn history(&self) -> Vec<String> {
        self.inner.log.snapshot_text()
    }

    pub fn history_lines(&self) -> Vec<TerminalLine> {
        self.inner.log.snapshot()
    }

    /// Register a live viewer.
    pub fn subscribe(&self) -> Subscription {
        self.inner.broadcaster.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.broadcaster.subscriber_count()
    }
}

// ============================================================================
// Tests
// ============================================================================
