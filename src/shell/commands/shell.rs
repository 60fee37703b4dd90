use std::io;

use async_trait::async_trait;

use super::{execute_program, Command};
use crate::shell::{CommandContext, SessionContext};

/// The argv used to (re)enter the interactive shell.
pub const SHELL_PROGRAM: &[&str] = &["sh"];

/// The interactive shell loop: prompt, read a line, dispatch, repeat.
pub struct Shell;

#[async_trait]
impl Command for Shell {
    async fn execute(
        &self,
        context: &mut CommandContext<'_>,
        session: &mut SessionContext,
    ) -> io::Result<u32> {
        let prompt = if context.pty {
            if context.user == "root" {
                "# "
            } else {
                "$ "
            }
        } else {
            ""
        };
        let mut last_status: u32 = 0;
        loop {
            if !prompt.is_empty() {
                context.stdout.write_all(prompt.as_bytes()).await?;
            }
            let line = match context.stdin.read_line().await? {
                Some(line) => line,
                None => return Ok(last_status),
            };
            let args: Vec<String> = line.split_whitespace().map(str::to_string).collect();
            let Some(first) = args.first() else {
                continue;
            };
            if first.trim_end_matches(';') == "exit" {
                return Ok(match args.get(1) {
                    None => last_status,
                    Some(status) => status.parse::<u32>().unwrap_or(255),
                });
            }
            let mut sub = context.reborrow();
            sub.args = args;
            last_status = execute_program(&mut sub, session).await?;
        }
    }
}

/// `su [user]`: restart the shell as another user (default root).
pub struct Su;

#[async_trait]
impl Command for Su {
    async fn execute(
        &self,
        context: &mut CommandContext<'_>,
        session: &mut SessionContext,
    ) -> io::Result<u32> {
        let user = context
            .args
            .get(1)
            .cloned()
            .unwrap_or_else(|| "root".to_string());
        let mut sub = context.reborrow();
        sub.user = user;
        sub.args = SHELL_PROGRAM.iter().map(|arg| arg.to_string()).collect();
        execute_program(&mut sub, session).await
    }
}
