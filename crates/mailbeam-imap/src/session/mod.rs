//! IMAP session: connection lifecycle, authentication and mailbox state.
//!
//! A [`Session`] owns exactly one byte stream and serializes all
//! command-level I/O on it. The handle stays stable across reconnects:
//! [`Session::reconnect`] swaps the stream and re-establishes
//! authentication and mailbox selection in place.
//!
//! Public mutating methods are not safe for concurrent invocation; the only
//! concurrency the session supports is the IDLE reader task coordinating
//! with [`Session::stop_idle`] and [`Session::close`].

mod exec;
mod folders;
mod idle;
mod messages;

pub use exec::LineCallback;
pub use idle::{ExistsEvent, ExpungeEvent, FetchEvent, IdleHandler};

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::command::quote;
use crate::config::Config;
use crate::connection::{self, ImapStream, LineReader};
use crate::tag::{RandomTagger, TagSource};
use crate::{Error, Result, ResultExt};

/// Process-wide connection number allocator, attached to log lines so
/// interleaved sessions can be told apart.
static NEXT_CONN_NUM: AtomicU32 = AtomicU32::new(0);

/// Session lifecycle states.
///
/// Transitions are guarded by a mutex; operations invalid for the current
/// state return [`Error::InvalidState`] instead of signaling in-band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No live connection.
    Disconnected,
    /// Connected and authenticated, no mailbox selected.
    Connected,
    /// A mailbox is selected.
    Selected,
    /// IDLE issued, waiting for the server's continuation.
    IdlePending,
    /// Receiving unsolicited updates.
    Idling,
    /// DONE sent, waiting for the IDLE reader task to exit.
    StoppingIdle,
}

/// Authentication method, fixed at open time and reused on reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthMethod {
    Login,
    XOAuth2,
}

/// Mutable mailbox/lifecycle state behind the state mutex.
struct MailboxState {
    lifecycle: SessionState,
    folder: String,
    read_only: bool,
    connected: bool,
}

/// Shared interior of a session.
///
/// The reader and writer halves live behind separate async mutexes: during
/// IDLE the reader task holds the read side for the lifetime of the command
/// while `stop_idle` writes `DONE` through the write side.
pub(crate) struct Core {
    pub(crate) config: Config,
    username: String,
    secret: String,
    auth: AuthMethod,
    conn_num: u32,
    state: Mutex<MailboxState>,
    reader: AsyncMutex<Option<LineReader<ReadHalf<ImapStream>>>>,
    writer: AsyncMutex<Option<WriteHalf<ImapStream>>>,
    shutdown: Mutex<CancellationToken>,
    idle: Mutex<idle::IdleControl>,
}

impl Core {
    fn new(config: Config, username: String, secret: String, auth: AuthMethod) -> Self {
        Self {
            config,
            username,
            secret,
            auth,
            conn_num: NEXT_CONN_NUM.fetch_add(1, Ordering::SeqCst),
            state: Mutex::new(MailboxState {
                lifecycle: SessionState::Disconnected,
                folder: String::new(),
                read_only: false,
                connected: false,
            }),
            reader: AsyncMutex::new(None),
            writer: AsyncMutex::new(None),
            shutdown: Mutex::new(CancellationToken::new()),
            idle: Mutex::new(idle::IdleControl::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MailboxState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn conn_num(&self) -> u32 {
        self.conn_num
    }

    pub(crate) fn lifecycle(&self) -> SessionState {
        self.state().lifecycle
    }

    pub(crate) fn set_lifecycle(&self, lifecycle: SessionState) {
        self.state().lifecycle = lifecycle;
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state().connected
    }

    /// Returns the selected folder name (empty if none) and its access mode.
    pub(crate) fn selection(&self) -> (String, bool) {
        let state = self.state();
        (state.folder.clone(), state.read_only)
    }

    pub(crate) fn set_folder(&self, folder: &str) {
        self.state().folder = folder.to_string();
    }

    pub(crate) fn folder(&self) -> String {
        self.state().folder.clone()
    }

    pub(crate) fn next_tag(&self) -> String {
        self.config
            .tagger
            .as_ref()
            .map_or_else(|| RandomTagger.next_tag(), |tagger| tagger.next_tag())
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn idle_control(&self) -> MutexGuard<'_, idle::IdleControl> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks the session disconnected and cancels pending reads. Safe to
    /// call from synchronous contexts (e.g. inside a line callback).
    pub(crate) fn mark_disconnected(&self) {
        self.shutdown_token().cancel();
        let mut state = self.state();
        state.connected = false;
        state.lifecycle = SessionState::Disconnected;
    }

    /// Installs a freshly dialed stream, resetting the shutdown token.
    async fn install_stream(&self, stream: ImapStream) {
        let (read_half, write_half) = tokio::io::split(stream);
        *self.reader.lock().await = Some(LineReader::new(read_half));
        *self.writer.lock().await = Some(write_half);
        *self.shutdown.lock().unwrap_or_else(PoisonError::into_inner) = CancellationToken::new();

        let mut state = self.state();
        state.connected = true;
        state.lifecycle = SessionState::Connected;
    }

    /// Closes the stream if any. Idempotent; pending reads unblock promptly
    /// because the shutdown token is cancelled before the locks are taken.
    pub(crate) async fn teardown(&self) {
        self.mark_disconnected();

        let mut writer = self.writer.lock().await;
        if let Some(mut write_half) = writer.take() {
            let _ = write_half.shutdown().await;
        }
        drop(writer);

        self.reader.lock().await.take();
    }

    /// Writes raw bytes outside the tagged-command path (IDLE's `DONE`).
    pub(crate) async fn write_raw(&self, data: &[u8]) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let write_half = writer.as_mut().ok_or(Error::ConnectionClosed)?;
        write_half.write_all(data).await?;
        write_half.flush().await?;
        Ok(())
    }

    /// Single-attempt LOGIN. Never retried: a server rejection must surface,
    /// not loop through reconnection.
    async fn login_once(&self) -> Result<()> {
        let command = format!(
            "LOGIN {} {}",
            quote(&self.username),
            quote(&self.secret)
        );
        self.run_command(&command, false, None)
            .await
            .with_command("login")?;
        Ok(())
    }

    /// Single-attempt `AUTHENTICATE XOAUTH2` with the canonical
    /// `user=<u>\x01auth=Bearer <t>\x01\x01` payload.
    async fn xoauth2_once(&self) -> Result<()> {
        let payload = format!("user={}\x01auth=Bearer {}\x01\x01", self.username, self.secret);
        let command = format!("AUTHENTICATE XOAUTH2 {}", STANDARD.encode(payload));
        self.run_command(&command, false, None)
            .await
            .with_command("authenticate xoauth2")?;
        Ok(())
    }

    async fn authenticate_once(&self) -> Result<()> {
        match self.auth {
            AuthMethod::Login => self.login_once().await,
            AuthMethod::XOAuth2 => self.xoauth2_once().await,
        }
    }

    /// Single-attempt SELECT/EXAMINE, recording the folder and access mode.
    async fn select_once(&self, folder: &str, read_only: bool) -> Result<Vec<u8>> {
        let verb = if read_only { "EXAMINE" } else { "SELECT" };
        let response = self
            .run_command(&format!("{verb} {}", quote(folder)), true, None)
            .await?;

        let mut state = self.state();
        state.folder = folder.to_string();
        state.read_only = read_only;
        state.lifecycle = SessionState::Selected;
        drop(state);

        Ok(response)
    }

    /// SELECT/EXAMINE through the retrying wire engine.
    pub(crate) async fn select_with_retry(&self, folder: &str, read_only: bool) -> Result<Vec<u8>> {
        let verb = if read_only { "EXAMINE" } else { "SELECT" };
        let response = self
            .exec(
                &format!("{verb} {}", quote(folder)),
                true,
                self.config.retry_count,
                None,
            )
            .await
            .with_command(if read_only {
                "examine folder"
            } else {
                "select folder"
            })?;

        let mut state = self.state();
        state.folder = folder.to_string();
        state.read_only = read_only;
        state.lifecycle = SessionState::Selected;
        drop(state);

        Ok(response)
    }

    /// Closes and reopens the connection: dial, re-authenticate with the
    /// original method, restore the previously selected mailbox in its
    /// recorded access mode. Any failure leaves the session disconnected.
    ///
    /// Called by the wire engine's retry handler; every command issued here
    /// is single-attempt so recovery can never recurse into itself.
    pub(crate) async fn reconnect(&self) -> Result<()> {
        self.teardown().await;

        if self.config.verbose {
            debug!(conn = self.conn_num, mailbox = %self.folder(), "reopening connection");
        }

        let stream = connection::connect(&self.config)
            .await
            .with_command("reconnect dial")?;
        self.install_stream(stream).await;

        if let Err(err) = self.authenticate_once().await {
            self.teardown().await;
            return Err(err.with_command("reconnect auth"));
        }

        let (folder, read_only) = self.selection();
        if !folder.is_empty()
            && let Err(err) = self.select_once(&folder, read_only).await
        {
            self.teardown().await;
            return Err(err.with_command(if read_only {
                "reconnect examine"
            } else {
                "reconnect select"
            }));
        }

        Ok(())
    }
}

/// An authenticated IMAP session over TLS.
///
/// Created by [`Session::open`] or [`Session::open_with_oauth2`]; destroyed
/// by [`Session::close`]. The handle is cheap to pass around by reference;
/// all interior state is mutated in place across reconnects.
pub struct Session {
    core: Arc<Core>,
}

impl Session {
    /// Opens a connection and authenticates with `LOGIN`.
    ///
    /// The TCP + TLS dial is retried up to `config.retry_count` times;
    /// authentication is attempted exactly once, and a rejection closes the
    /// socket and surfaces the server's error.
    ///
    /// # Errors
    ///
    /// Returns an error when dialing ultimately fails or the server rejects
    /// the credentials.
    pub async fn open(config: &Config, username: &str, password: &str) -> Result<Self> {
        Self::open_with(config, username, password, AuthMethod::Login).await
    }

    /// Opens a connection and authenticates with `AUTHENTICATE XOAUTH2`
    /// using a bearer access token.
    ///
    /// # Errors
    ///
    /// Returns an error when dialing ultimately fails or the server rejects
    /// the token.
    pub async fn open_with_oauth2(
        config: &Config,
        username: &str,
        access_token: &str,
    ) -> Result<Self> {
        Self::open_with(config, username, access_token, AuthMethod::XOAuth2).await
    }

    async fn open_with(
        config: &Config,
        username: &str,
        secret: &str,
        auth: AuthMethod,
    ) -> Result<Self> {
        let core = Arc::new(Core::new(
            config.clone(),
            username.to_string(),
            secret.to_string(),
            auth,
        ));

        let mut attempt: u32 = 0;
        loop {
            if core.config.verbose {
                debug!(conn = core.conn_num, "establishing connection");
            }
            match connection::connect(&core.config).await {
                Ok(stream) => {
                    core.install_stream(stream).await;
                    break;
                }
                Err(err) => {
                    warn!(conn = core.conn_num, error = %err, "failed to connect");
                    if attempt >= core.config.retry_count {
                        return Err(err.with_command("establish connection"));
                    }
                    attempt += 1;
                    tokio::time::sleep(Duration::from_secs(u64::from(attempt) * 2).min(
                        Duration::from_secs(10),
                    ))
                    .await;
                }
            }
        }

        if let Err(err) = core.authenticate_once().await {
            warn!(conn = core.conn_num, error = %err, "authentication failed");
            core.teardown().await;
            return Err(err);
        }

        Ok(Self { core })
    }

    /// Executes a bare command through the wire engine.
    ///
    /// The engine prepends the tag and appends CRLF. With `build_response`
    /// the concatenated untagged lines (literals included) are returned;
    /// `line_callback`, when present, observes every untagged logical line
    /// and may abort the command by returning an error. `retry_budget`
    /// bounds close-reconnect-retry cycles for I/O failures; tagged
    /// `NO`/`BAD` responses are never retried.
    ///
    /// # Errors
    ///
    /// Returns the terminal error once the retry budget is exhausted, or
    /// immediately for protocol-level rejections.
    pub async fn execute(
        &self,
        command: &str,
        build_response: bool,
        retry_budget: u32,
        on_line: Option<&mut LineCallback<'_>>,
    ) -> Result<Vec<u8>> {
        self.core.exec(command, build_response, retry_budget, on_line).await
    }

    /// Selects a mailbox read-write.
    ///
    /// # Errors
    ///
    /// Returns an error if the mailbox cannot be selected.
    pub async fn select(&self, folder: &str) -> Result<()> {
        self.core.select_with_retry(folder, false).await.map(|_| ())
    }

    /// Opens a mailbox read-only.
    ///
    /// # Errors
    ///
    /// Returns an error if the mailbox cannot be examined.
    pub async fn examine(&self, folder: &str) -> Result<()> {
        self.core.select_with_retry(folder, true).await.map(|_| ())
    }

    /// Closes and reopens the connection, re-authenticating and restoring
    /// the selected mailbox in its recorded access mode.
    ///
    /// # Errors
    ///
    /// Returns an error if dialing, re-authentication or selection restore
    /// fails; the session is left disconnected in that case.
    pub async fn reconnect(&self) -> Result<()> {
        self.core.reconnect().await
    }

    /// Closes the connection. Idempotent; unblocks any pending reader
    /// (including the IDLE task) within 100 ms.
    pub async fn close(&self) {
        if let Some(token) = self.core.idle_control().supervisor.take() {
            token.cancel();
        }
        if self.core.is_connected() && self.core.config.verbose {
            debug!(conn = self.core.conn_num, mailbox = %self.core.folder(), "closing connection");
        }
        self.core.teardown().await;
    }

    /// Opens a brand-new session with the same configuration and
    /// credentials, restoring the current mailbox in its current mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the new connection cannot be established.
    pub async fn clone_session(&self) -> Result<Self> {
        let auth = self.core.auth;
        let session = Self::open_with(
            &self.core.config,
            &self.core.username,
            &self.core.secret,
            auth,
        )
        .await?;

        let (folder, read_only) = self.core.selection();
        if !folder.is_empty() {
            if read_only {
                session.examine(&folder).await.with_command("clone examine")?;
            } else {
                session.select(&folder).await.with_command("clone select")?;
            }
        }
        Ok(session)
    }

    /// The process-wide connection number, for correlating log lines.
    #[must_use]
    pub fn conn_num(&self) -> u32 {
        self.core.conn_num()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.core.lifecycle()
    }

    /// True while the underlying stream is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.core.is_connected()
    }

    /// The selected folder, if any.
    #[must_use]
    pub fn selected_folder(&self) -> Option<String> {
        let (folder, _) = self.core.selection();
        if folder.is_empty() { None } else { Some(folder) }
    }

    /// True when the selected folder was opened with `EXAMINE`.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        let (_, read_only) = self.core.selection();
        read_only
    }

    pub(crate) fn core(&self) -> &Arc<Core> {
        &self.core
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.core.config.host)
            .field("conn_num", &self.core.conn_num)
            .field("state", &self.core.lifecycle())
            .field("folder", &self.core.folder())
            .finish_non_exhaustive()
    }
}
