pub mod commands;

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;

/// Terminal parameters recorded from a `pty-req`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalInfo {
    pub term: String,
    pub width: u32,
    pub height: u32,
}

/// Per-session-channel state: the identity claimed at authentication, the
/// simulated working directory and the terminal environment the client set up
/// before starting a shell or command.
pub struct SessionContext {
    pub user: String,
    pub virtual_path: String,
    pub env: HashMap<String, String>,
    pub pty: Option<TerminalInfo>,
    pub cfg: Arc<Config>,
}

impl SessionContext {
    pub fn new(user: &str, cfg: Arc<Config>) -> Self {
        let virtual_path = if user == "root" {
            "/root".to_string()
        } else {
            format!("/home/{}", user)
        };
        SessionContext {
            user: user.to_string(),
            virtual_path,
            env: HashMap::new(),
            pty: None,
            cfg,
        }
    }
}

/// Line-oriented command input. `Ok(None)` is end of input.
#[async_trait]
pub trait ReadLiner: Send {
    async fn read_line(&mut self) -> io::Result<Option<String>>;
}

/// Byte-oriented command output.
#[async_trait]
pub trait ByteSink: Send {
    async fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        self.write_all(format!("{}\n", line).as_bytes()).await
    }
}

/// Everything one command execution sees: argv, stdio, whether a PTY is
/// allocated and the effective user name (`su` swaps it).
pub struct CommandContext<'a> {
    pub args: Vec<String>,
    pub stdin: &'a mut dyn ReadLiner,
    pub stdout: &'a mut dyn ByteSink,
    pub stderr: &'a mut dyn ByteSink,
    pub pty: bool,
    pub user: String,
}

impl CommandContext<'_> {
    /// A child context sharing this context's stdio, for commands that run
    /// other commands (`sh`, `su`).
    pub fn reborrow(&mut self) -> CommandContext<'_> {
        CommandContext {
            args: self.args.clone(),
            stdin: &mut *self.stdin,
            stdout: &mut *self.stdout,
            stderr: &mut *self.stderr,
            pty: self.pty,
            user: self.user.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;

    /// Scripted stdin for tests; yields lines then EOF.
    pub struct ScriptInput {
        lines: VecDeque<String>,
    }

    impl ScriptInput {
        pub fn new(lines: &[&str]) -> Self {
            ScriptInput {
                lines: lines.iter().map(|line| line.to_string()).collect(),
            }
        }
    }

    #[async_trait]
    impl ReadLiner for ScriptInput {
        async fn read_line(&mut self) -> io::Result<Option<String>> {
            Ok(self.lines.pop_front())
        }
    }

    /// In-memory byte sink for tests.
    #[derive(Default)]
    pub struct BufferSink {
        pub data: Vec<u8>,
    }

    impl BufferSink {
        pub fn as_str(&self) -> String {
            String::from_utf8_lossy(&self.data).into_owned()
        }
    }

    #[async_trait]
    impl ByteSink for BufferSink {
        async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
            self.data.extend_from_slice(data);
            Ok(())
        }
    }
}
