//! IDLE monitoring (RFC 2177).
//!
//! `start_idle` turns an open, selected session into a source of unsolicited
//! mailbox-change events. A background reader task runs the `IDLE` command
//! with a zero retry budget (an auth failure during recovery must never
//! loop); a supervisor task refreshes the IDLE session every five minutes
//! (well inside the 29-minute ceiling the RFC imposes) and reconnects first
//! if the connection died. `stop_idle` writes `DONE` on the write half while
//! the reader task is still blocked on the read half, then waits for the
//! task to observe the tagged completion and exit.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use regex::Regex;
use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Core, Session, SessionState};
use crate::{Error, Result};

/// How long to wait for the server's `+` continuation after `IDLE`.
const CONTINUATION_TIMEOUT: Duration = Duration::from_secs(5);

/// How often the supervisor restarts the IDLE session.
const REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

static EVENT_FLAGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)FLAGS\s*\(([^)]*)\)").expect("valid regex"));
static EVENT_UID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bUID\s+(\d+)").expect("valid regex"));

/// A `<index> EXISTS` event: the mailbox now holds this many messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExistsEvent {
    /// Message sequence number (not a UID).
    pub message_index: u32,
}

/// A `<index> EXPUNGE` event: the message at this sequence number was
/// removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpungeEvent {
    /// Message sequence number (not a UID).
    pub message_index: u32,
}

/// A `<index> FETCH (… FLAGS (…) …)` event: a message's flags changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchEvent {
    /// Message sequence number (not a UID).
    pub message_index: u32,
    /// Message UID when the server included one, zero otherwise.
    pub uid: u32,
    /// Flag names with the leading `\` stripped.
    pub flags: Vec<String>,
}

type Callback<E> = Arc<dyn Fn(E) + Send + Sync>;

/// Callbacks for IDLE events. All are optional; each invocation runs on its
/// own task, so a slow handler never blocks event reception. Callback
/// completion order is therefore not guaranteed, and handlers mutating
/// shared state must synchronize themselves.
#[derive(Clone, Default)]
pub struct IdleHandler {
    on_exists: Option<Callback<ExistsEvent>>,
    on_expunge: Option<Callback<ExpungeEvent>>,
    on_fetch: Option<Callback<FetchEvent>>,
}

impl IdleHandler {
    /// Creates a handler with no callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the EXISTS callback.
    #[must_use]
    pub fn on_exists(mut self, callback: impl Fn(ExistsEvent) + Send + Sync + 'static) -> Self {
        self.on_exists = Some(Arc::new(callback));
        self
    }

    /// Sets the EXPUNGE callback.
    #[must_use]
    pub fn on_expunge(mut self, callback: impl Fn(ExpungeEvent) + Send + Sync + 'static) -> Self {
        self.on_expunge = Some(Arc::new(callback));
        self
    }

    /// Sets the FETCH (flag change) callback.
    #[must_use]
    pub fn on_fetch(mut self, callback: impl Fn(FetchEvent) + Send + Sync + 'static) -> Self {
        self.on_fetch = Some(Arc::new(callback));
        self
    }
}

impl std::fmt::Debug for IdleHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdleHandler")
            .field("on_exists", &self.on_exists.is_some())
            .field("on_expunge", &self.on_expunge.is_some())
            .field("on_fetch", &self.on_fetch.is_some())
            .finish()
    }
}

/// Coordination state between the IDLE reader task, the supervisor and the
/// public stop/close paths.
#[derive(Default)]
pub(crate) struct IdleControl {
    /// Signaled when the current IDLE reader task exits.
    pub(crate) exited: Option<oneshot::Receiver<()>>,
    /// Cancels the refresh supervisor.
    pub(crate) supervisor: Option<CancellationToken>,
}

impl Session {
    /// Starts IDLE monitoring.
    ///
    /// Returns once the server's continuation line is observed (or errors
    /// after five seconds without one). Events are delivered to `handler`
    /// until [`Session::stop_idle`] or [`Session::close`]; every five
    /// minutes the session is refreshed, reconnecting first if the
    /// connection has died.
    ///
    /// # Errors
    ///
    /// Returns an error if already in IDLE or the server does not accept
    /// the command.
    pub async fn start_idle(&self, handler: IdleHandler) -> Result<()> {
        let core = self.core();
        if matches!(
            core.lifecycle(),
            SessionState::Idling | SessionState::IdlePending
        ) {
            return Err(Error::InvalidState("already entering or in IDLE".into()));
        }

        start_idle_single(core, &handler).await?;

        let token = CancellationToken::new();
        if let Some(previous) = core.idle_control().supervisor.replace(token.clone()) {
            previous.cancel();
        }
        tokio::spawn(supervise(Arc::clone(core), handler, token));
        Ok(())
    }

    /// Leaves IDLE by sending `DONE`, then waits for the reader task to
    /// exit.
    ///
    /// # Errors
    ///
    /// Returns an error when the session is not currently idling.
    pub async fn stop_idle(&self) -> Result<()> {
        if self.core().lifecycle() != SessionState::Idling {
            return Err(Error::InvalidState("not in IDLE state".into()));
        }
        if let Some(token) = self.core().idle_control().supervisor.take() {
            token.cancel();
        }
        stop_idle_inner(self.core()).await
    }
}

/// Runs one IDLE session: spawns the reader task and waits for the
/// continuation line.
async fn start_idle_single(core: &Arc<Core>, handler: &IdleHandler) -> Result<()> {
    if matches!(
        core.lifecycle(),
        SessionState::Idling | SessionState::IdlePending
    ) {
        return Err(Error::InvalidState("already entering or in IDLE".into()));
    }
    core.set_lifecycle(SessionState::IdlePending);

    let (ready_tx, ready_rx) = oneshot::channel();
    let (exited_tx, exited_rx) = oneshot::channel();
    core.idle_control().exited = Some(exited_rx);

    let task_core = Arc::clone(core);
    let task_handler = handler.clone();
    tokio::spawn(async move {
        let mut ready = Some(ready_tx);
        let result = {
            let core: &Core = &task_core;
            let handler = &task_handler;
            let mut on_line =
                |line: &[u8]| -> Result<()> { handle_idle_line(core, handler, &mut ready, line) };
            task_core.run_command("IDLE", true, Some(&mut on_line)).await
        };

        if let Err(err) = result {
            warn!(
                conn = task_core.conn_num(),
                mailbox = %task_core.folder(),
                error = %err,
                "IDLE command error"
            );
            task_core.mark_disconnected();
        }
        // A server-terminated IDLE (tagged OK with no DONE from us) drops
        // back to Selected; the stop path transitions from StoppingIdle
        // itself once the exit signal arrives.
        if task_core.lifecycle() == SessionState::Idling {
            task_core.set_lifecycle(SessionState::Selected);
        }
        let _ = exited_tx.send(());
    });

    match tokio::time::timeout(CONTINUATION_TIMEOUT, ready_rx).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => {
            if core.lifecycle() == SessionState::IdlePending {
                core.set_lifecycle(SessionState::Selected);
            }
            Err(Error::Protocol("IDLE ended before continuation".into()))
        }
        Err(_) => {
            if core.lifecycle() == SessionState::IdlePending {
                core.set_lifecycle(SessionState::Selected);
            }
            Err(Error::Protocol(
                "timeout waiting for IDLE continuation".into(),
            ))
        }
    }
}

/// Sends `DONE` and waits for the reader task to exit. Used by the public
/// stop path and the supervisor's refresh cycle.
async fn stop_idle_inner(core: &Arc<Core>) -> Result<()> {
    if core.lifecycle() != SessionState::Idling {
        return Err(Error::InvalidState("not in IDLE state".into()));
    }

    if core.config.verbose {
        debug!(
            conn = core.conn_num(),
            mailbox = %core.folder(),
            "sending DONE to exit IDLE"
        );
    }
    core.write_raw(b"DONE\r\n")
        .await
        .map_err(|e| e.with_command("stop idle"))?;
    core.set_lifecycle(SessionState::StoppingIdle);

    let exited = core.idle_control().exited.take();
    if let Some(receiver) = exited {
        let _ = receiver.await;
    }

    if core.lifecycle() == SessionState::StoppingIdle {
        core.set_lifecycle(SessionState::Selected);
    }
    Ok(())
}

/// Refresh loop: every five minutes, leave and re-enter IDLE so the server
/// never times the connection out; reconnect first when the connection has
/// died. Exits when the public stop/close paths cancel the token or a
/// restart fails.
async fn supervise(core: Arc<Core>, handler: IdleHandler, token: CancellationToken) {
    let mut ticker = tokio::time::interval(REFRESH_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // The first tick completes immediately.

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {
                if !core.is_connected()
                    && let Err(err) = core.reconnect().await
                {
                    warn!(
                        conn = core.conn_num(),
                        mailbox = %core.folder(),
                        error = %err,
                        "IDLE reconnect failed"
                    );
                    break;
                }

                if core.lifecycle() == SessionState::Idling
                    && let Err(err) = stop_idle_inner(&core).await
                {
                    warn!(
                        conn = core.conn_num(),
                        mailbox = %core.folder(),
                        error = %err,
                        "IDLE refresh stop failed"
                    );
                    break;
                }

                if let Err(err) = start_idle_single(&core, &handler).await {
                    warn!(
                        conn = core.conn_num(),
                        mailbox = %core.folder(),
                        error = %err,
                        "IDLE session stopped"
                    );
                    break;
                }
            }
        }
    }
}

/// Routes one unsolicited line received while idling.
fn handle_idle_line(
    core: &Core,
    handler: &IdleHandler,
    ready: &mut Option<oneshot::Sender<()>>,
    line: &[u8],
) -> Result<()> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();

    if text.starts_with('+') {
        core.set_lifecycle(SessionState::Idling);
        if let Some(tx) = ready.take() {
            let _ = tx.send(());
        }
        return Ok(());
    }

    let Some(rest) = text.strip_prefix("* ") else {
        return Ok(());
    };

    // Untagged OK is server keep-alive; BYE is a graceful shutdown.
    if rest.len() >= 2 && rest[..2].eq_ignore_ascii_case("OK") {
        return Ok(());
    }
    if rest.len() >= 3 && rest[..3].eq_ignore_ascii_case("BYE") {
        core.mark_disconnected();
        return Err(Error::Bye(rest.to_string()));
    }

    dispatch_event(handler, rest)
}

/// Parses `<index> <EVENT> …` and dispatches the matching callback on its
/// own task.
fn dispatch_event(handler: &IdleHandler, line: &str) -> Result<()> {
    let mut fields = line.split_whitespace();
    let (Some(index), Some(kind)) = (fields.next(), fields.next()) else {
        return Err(Error::Protocol(format!("invalid IDLE event line: {line:?}")));
    };
    let Ok(message_index) = index.parse::<u32>() else {
        return Err(Error::Protocol(format!("invalid IDLE event line: {line:?}")));
    };

    if kind.eq_ignore_ascii_case("EXISTS") {
        if let Some(callback) = &handler.on_exists {
            let callback = Arc::clone(callback);
            tokio::spawn(async move { callback(ExistsEvent { message_index }) });
        }
    } else if kind.eq_ignore_ascii_case("EXPUNGE") {
        if let Some(callback) = &handler.on_expunge {
            let callback = Arc::clone(callback);
            tokio::spawn(async move { callback(ExpungeEvent { message_index }) });
        }
    } else if kind.eq_ignore_ascii_case("FETCH") {
        let Some(callback) = &handler.on_fetch else {
            return Ok(());
        };
        // A FETCH line without a flag list carries nothing we report.
        let Some(captures) = EVENT_FLAGS.captures(line) else {
            return Ok(());
        };
        let stripped = captures[1].replace('\\', "");
        let flags: Vec<String> = stripped
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        let uid = EVENT_UID
            .captures(line)
            .and_then(|c| c[1].parse().ok())
            .unwrap_or(0);

        let callback = Arc::clone(callback);
        tokio::spawn(async move {
            callback(FetchEvent {
                message_index,
                uid,
                flags,
            });
        });
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_event_regexes() {
        let line = "3 FETCH (UID 1000 FLAGS (\\Seen \\Flagged))";
        let flags = EVENT_FLAGS.captures(line).unwrap();
        assert_eq!(&flags[1], "\\Seen \\Flagged");
        let uid = EVENT_UID.captures(line).unwrap();
        assert_eq!(&uid[1], "1000");
    }

    #[test]
    fn test_fetch_event_without_flags_has_no_match() {
        assert!(EVENT_FLAGS.captures("3 FETCH (UID 1000)").is_none());
    }

    #[tokio::test]
    async fn test_dispatch_parses_events() {
        use std::sync::Mutex;
        use std::time::Duration;

        let seen: Arc<Mutex<Vec<FetchEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = IdleHandler::new().on_fetch(move |event| {
            sink.lock().unwrap().push(event);
        });

        dispatch_event(&handler, "3 FETCH (UID 1000 FLAGS (\\Seen, \\Flagged))").unwrap();

        // The callback runs on its own task.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message_index, 3);
        assert_eq!(events[0].uid, 1000);
        assert_eq!(events[0].flags, vec!["Seen", "Flagged"]);
    }

    #[tokio::test]
    async fn test_dispatch_ignores_fetch_without_flags() {
        let handler = IdleHandler::new().on_fetch(|_| panic!("must not be called"));
        dispatch_event(&handler, "3 FETCH (UID 1000)").unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[test]
    fn test_dispatch_rejects_garbage() {
        let handler = IdleHandler::new();
        assert!(dispatch_event(&handler, "what even is this").is_err());
    }
}
