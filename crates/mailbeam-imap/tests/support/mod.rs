//! Scripted in-process IMAP server for integration tests.
//!
//! Each connection follows a script of steps: read one command, record it,
//! send the scripted replies (with `{tag}` substituted), optionally wait
//! for `DONE` (IDLE) or close the connection (reconnect scenarios).

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// One scripted exchange: expect a command containing `expect`, answer with
/// `replies` (each line gets CRLF appended; `{tag}` is replaced with the
/// client's tag).
pub struct Step {
    pub expect: &'static str,
    pub replies: Vec<String>,
    pub wait_for_done: bool,
    pub close_after: bool,
}

impl Step {
    pub fn new(expect: &'static str) -> Self {
        Self {
            expect,
            replies: Vec::new(),
            wait_for_done: false,
            close_after: false,
        }
    }

    pub fn reply(mut self, line: impl Into<String>) -> Self {
        self.replies.push(line.into());
        self
    }

    /// Shorthand for a step answered with a bare tagged OK.
    pub fn ok(expect: &'static str) -> Self {
        Self::new(expect).reply("{tag} OK completed")
    }

    /// After the replies, read until the client sends `DONE`, then send the
    /// tagged completion.
    pub fn then_wait_for_done(mut self) -> Self {
        self.wait_for_done = true;
        self
    }

    /// Drop the connection once the replies are flushed.
    pub fn then_close(mut self) -> Self {
        self.close_after = true;
        self
    }
}

/// A mock server driving one script per accepted connection, in order.
pub struct MockServer {
    addr: SocketAddr,
    log: Arc<Mutex<Vec<String>>>,
}

impl MockServer {
    pub async fn start(scripts: Vec<Vec<Step>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let log = Arc::new(Mutex::new(Vec::new()));

        let task_log = Arc::clone(&log);
        tokio::spawn(async move {
            for script in scripts {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                serve(stream, script, Arc::clone(&task_log)).await;
            }
        });

        Self { addr, log }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Commands received so far, tags stripped, across all connections.
    pub fn commands(&self) -> Vec<String> {
        self.log.lock().expect("log lock").clone()
    }
}

async fn serve(stream: TcpStream, script: Vec<Step>, log: Arc<Mutex<Vec<String>>>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    if write_half
        .write_all(b"* OK mock IMAP server ready\r\n")
        .await
        .is_err()
    {
        return;
    }

    for step in script {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let line = line.trim_end();
        let (tag, command) = line.split_once(' ').unwrap_or(("", line));
        log.lock().expect("log lock").push(command.to_string());

        if !command.contains(step.expect) {
            let _ = write_half
                .write_all(format!("{tag} BAD unexpected command\r\n").as_bytes())
                .await;
            continue;
        }

        for reply in &step.replies {
            let rendered = format!("{}\r\n", reply.replace("{tag}", tag));
            if write_half.write_all(rendered.as_bytes()).await.is_err() {
                return;
            }
        }

        if step.wait_for_done {
            loop {
                let mut done = String::new();
                match reader.read_line(&mut done).await {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }
                if done.trim_end().eq_ignore_ascii_case("DONE") {
                    break;
                }
            }
            if write_half
                .write_all(format!("{tag} OK IDLE terminated\r\n").as_bytes())
                .await
                .is_err()
            {
                return;
            }
        }

        if step.close_after {
            return;
        }
    }

    // Script exhausted: hold the connection open until the client goes away
    // so an in-flight close on the client side is not an abrupt reset.
    let mut sink = String::new();
    while let Ok(n) = reader.read_line(&mut sink).await {
        if n == 0 {
            break;
        }
        sink.clear();
    }
}
