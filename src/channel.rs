use std::collections::HashMap;
use std::io;

use async_trait::async_trait;
use russh::server::Handle;
use russh::{ChannelId, CryptoVec};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::event::{Event, SessionCloseEvent};
use crate::logging::ConnContext;
use crate::shell::commands::execute_program;
use crate::shell::{ByteSink, CommandContext, ReadLiner, SessionContext, TerminalInfo};

/// Input lines that may queue ahead of the interpreter before being dropped.
const INPUT_BACKLOG: usize = 256;

/// State for one accepted channel, keyed by the transport's channel id.
pub enum ChannelKind {
    Session(SessionChannel),
    DirectTcpip(DirectTcpipChannel),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStage {
    /// Accepting setup requests (pty-req, env, …).
    Requests,
    /// A shell or exec command owns the channel's stdio.
    Running,
}

pub struct SessionChannel {
    pub local_id: u32,
    pub stage: SessionStage,
    pub env: HashMap<String, String>,
    pub terminal: Option<TerminalInfo>,
    line_buf: String,
    input_tx: mpsc::Sender<String>,
    input_rx: Option<mpsc::Receiver<String>>,
}

impl SessionChannel {
    pub fn new(local_id: u32) -> Self {
        let (input_tx, input_rx) = mpsc::channel(INPUT_BACKLOG);
        SessionChannel {
            local_id,
            stage: SessionStage::Requests,
            env: HashMap::new(),
            terminal: None,
            line_buf: String::new(),
            input_tx,
            input_rx: Some(input_rx),
        }
    }

    /// Buffer raw channel data and return the complete lines in it.
    pub fn push_data(&mut self, data: &[u8]) -> Vec<String> {
        split_lines(&mut self.line_buf, data)
    }

    /// Hand one line to the interpreter's stdin. Lines arriving faster than
    /// the interpreter reads them, or after it exited, are dropped.
    pub fn feed_line(&mut self, line: String) {
        match self.input_tx.try_send(line) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                log::debug!("Input backlog full on channel {}, dropping line", self.local_id);
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Take the interpreter's end of stdin. Present until the channel
    /// transitions to `Running`.
    pub fn take_input(&mut self) -> Option<mpsc::Receiver<String>> {
        self.input_rx.take()
    }
}

pub struct DirectTcpipChannel {
    pub local_id: u32,
}

/// Split buffered bytes into lines. Keeps the trailing partial line in `buf`;
/// strips one `\r` before each `\n`.
pub fn split_lines(buf: &mut String, data: &[u8]) -> Vec<String> {
    buf.push_str(&String::from_utf8_lossy(data));
    let mut lines = Vec::new();
    while let Some(pos) = buf.find('\n') {
        let mut line: String = buf.drain(..=pos).collect();
        line.pop();
        if line.ends_with('\r') {
            line.pop();
        }
        lines.push(line);
    }
    lines
}

/// The interpreter's stdin: lines forwarded from the channel task.
pub struct ChannelStdin {
    rx: mpsc::Receiver<String>,
}

#[async_trait]
impl ReadLiner for ChannelStdin {
    async fn read_line(&mut self) -> io::Result<Option<String>> {
        Ok(self.rx.recv().await)
    }
}

/// The interpreter's stdout or stderr, written through the transport handle.
/// stderr goes out as extended data stream 1.
pub struct ChannelWriter {
    handle: Handle,
    id: ChannelId,
    stderr: bool,
}

#[async_trait]
impl ByteSink for ChannelWriter {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        let data = CryptoVec::from_slice(data);
        let result = if self.stderr {
            self.handle.extended_data(self.id, 1, data).await
        } else {
            self.handle.data(self.id, data).await
        };
        result.map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "channel closed"))
    }
}

/// Run one program (a shell or an exec'd argv) on its own task, wired to the
/// channel's stdio. On completion the exit status is reported, the channel is
/// closed, and `session_close` is emitted exactly once for this channel.
pub fn spawn_interpreter(
    ctx: ConnContext,
    handle: Handle,
    id: ChannelId,
    local_id: u32,
    session: SessionContext,
    input: mpsc::Receiver<String>,
    program: Vec<String>,
) {
    tokio::spawn(async move {
        let mut stdin = ChannelStdin { rx: input };
        let mut stdout = ChannelWriter {
            handle: handle.clone(),
            id,
            stderr: false,
        };
        let mut stderr = ChannelWriter {
            handle: handle.clone(),
            id,
            stderr: true,
        };
        let mut session = session;
        let mut context = CommandContext {
            args: program,
            stdin: &mut stdin,
            stdout: &mut stdout,
            stderr: &mut stderr,
            pty: session.pty.is_some(),
            user: session.user.clone(),
        };
        match execute_program(&mut context, &mut session).await {
            Ok(status) => {
                let _ = handle.exit_status_request(id, status).await;
            }
            Err(err) => {
                log::warn!("Command execution on channel {} failed: {}", local_id, err);
            }
        }
        let _ = handle.eof(id).await;
        let _ = handle.close(id).await;
        ctx.log_event(&Event::SessionClose(SessionCloseEvent {
            channel_id: local_id,
        }))
        .await;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_lines_handles_partial_lines_and_crlf() {
        let mut buf = String::new();
        assert_eq!(split_lines(&mut buf, b"who"), Vec::<String>::new());
        assert_eq!(split_lines(&mut buf, b"ami\n"), vec!["whoami".to_string()]);
        assert_eq!(
            split_lines(&mut buf, b"pwd\r\nexit 3\r\n"),
            vec!["pwd".to_string(), "exit 3".to_string()]
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn split_lines_keeps_the_tail_buffered() {
        let mut buf = String::new();
        assert_eq!(
            split_lines(&mut buf, b"echo hi\necho by"),
            vec!["echo hi".to_string()]
        );
        assert_eq!(buf, "echo by");
        assert_eq!(split_lines(&mut buf, b"e\n"), vec!["echo bye".to_string()]);
    }

    #[test]
    fn session_channel_input_flows_until_taken_receiver_is_dropped() {
        let mut channel = SessionChannel::new(0);
        let mut rx = channel.take_input().expect("stdin receiver available once");
        assert!(channel.take_input().is_none());

        channel.feed_line("whoami".to_string());
        assert_eq!(rx.try_recv().ok(), Some("whoami".to_string()));

        drop(rx);
        // After the interpreter is gone, lines are silently discarded.
        channel.feed_line("ignored".to_string());
    }

    #[test]
    fn session_stage_starts_in_requests() {
        let channel = SessionChannel::new(3);
        assert_eq!(channel.stage, SessionStage::Requests);
        assert_eq!(channel.local_id, 3);
        assert!(channel.terminal.is_none());
        assert!(channel.env.is_empty());
    }
}
