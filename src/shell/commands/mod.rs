mod cat;
mod ls;
mod shell;
mod simple;

use std::io;

use async_trait::async_trait;

use super::{CommandContext, SessionContext};

pub use shell::SHELL_PROGRAM;

/// A builtin of the fake shell. Returns the exit status; an `Err` is an I/O
/// failure on the channel and aborts the enclosing shell.
#[async_trait]
pub trait Command: Send + Sync {
    async fn execute(
        &self,
        context: &mut CommandContext<'_>,
        session: &mut SessionContext,
    ) -> io::Result<u32>;
}

fn lookup(name: &str) -> Option<&'static dyn Command> {
    Some(match name {
        "sh" => &shell::Shell,
        "su" => &shell::Su,
        "true" => &simple::True,
        "false" => &simple::False,
        "echo" => &simple::Echo,
        "whoami" => &simple::Whoami,
        "huahuo" => &simple::Huahuo,
        "never" => &simple::Never,
        "uname" => &simple::Uname,
        "pwd" => &simple::Pwd,
        "cd" => &simple::Cd,
        "cat" => &cat::Cat,
        "ls" | "ll" => &ls::Ls,
        _ => return None,
    })
}

/// Dispatch one parsed argv. The command name has any trailing `;` stripped;
/// unknown names report `command not found` and status 127.
pub async fn execute_program(
    context: &mut CommandContext<'_>,
    session: &mut SessionContext,
) -> io::Result<u32> {
    let Some(first) = context.args.first() else {
        return Ok(0);
    };
    let name = first.trim_end_matches(';').to_string();
    match lookup(&name) {
        Some(command) => command.execute(context, session).await,
        None => {
            let line = format!("{}: command not found", context.args[0]);
            context.stderr.write_line(&line).await?;
            Ok(127)
        }
    }
}

#[cfg(test)]
pub(super) mod tests {
    use super::*;
    use crate::config::Config;
    use crate::shell::testing::{BufferSink, ScriptInput};
    use std::sync::Arc;

    pub(crate) struct Harness {
        pub stdin: ScriptInput,
        pub stdout: BufferSink,
        pub stderr: BufferSink,
        pub session: SessionContext,
        pub pty: bool,
        pub user: String,
    }

    impl Harness {
        pub fn new(user: &str, input: &[&str]) -> Self {
            Harness {
                stdin: ScriptInput::new(input),
                stdout: BufferSink::default(),
                stderr: BufferSink::default(),
                session: SessionContext::new(user, Arc::new(Config::default())),
                pty: false,
                user: user.to_string(),
            }
        }

        pub fn with_config(user: &str, input: &[&str], cfg: Config) -> Self {
            let mut harness = Self::new(user, input);
            harness.session = SessionContext::new(user, Arc::new(cfg));
            harness
        }

        pub async fn run(&mut self, args: &[&str]) -> u32 {
            let mut context = CommandContext {
                args: args.iter().map(|arg| arg.to_string()).collect(),
                stdin: &mut self.stdin,
                stdout: &mut self.stdout,
                stderr: &mut self.stderr,
                pty: self.pty,
                user: self.user.clone(),
            };
            execute_program(&mut context, &mut self.session)
                .await
                .expect("in-memory command execution failed")
        }
    }

    #[tokio::test]
    async fn unknown_command_reports_not_found() {
        let mut harness = Harness::new("root", &[]);
        let status = harness.run(&["frobnicate", "now"]).await;
        assert_eq!(status, 127);
        assert_eq!(harness.stderr.as_str(), "frobnicate: command not found\n");
        assert!(harness.stdout.as_str().is_empty());
    }

    #[tokio::test]
    async fn trailing_semicolon_is_stripped_from_the_command_name() {
        let mut harness = Harness::new("root", &[]);
        assert_eq!(harness.run(&["true;"]).await, 0);
        assert_eq!(harness.run(&["false;"]).await, 1);
    }

    #[tokio::test]
    async fn empty_argv_is_a_successful_no_op() {
        let mut harness = Harness::new("root", &[]);
        assert_eq!(harness.run(&[]).await, 0);
    }

    #[tokio::test]
    async fn true_and_false_statuses() {
        let mut harness = Harness::new("root", &[]);
        assert_eq!(harness.run(&["true"]).await, 0);
        assert_eq!(harness.run(&["false"]).await, 1);
    }

    #[tokio::test]
    async fn echo_joins_arguments() {
        let mut harness = Harness::new("root", &[]);
        let status = harness.run(&["echo", "hello", "world"]).await;
        assert_eq!(status, 0);
        assert_eq!(harness.stdout.as_str(), "hello world\n");
    }

    #[tokio::test]
    async fn cd_then_pwd_round_trips() {
        let mut harness = Harness::new("root", &[]);
        assert_eq!(harness.run(&["cd", "/etc"]).await, 0);
        assert_eq!(harness.run(&["pwd"]).await, 0);
        assert_eq!(harness.stdout.as_str(), "/etc\n");
    }

    #[tokio::test]
    async fn cd_truncates_very_long_paths() {
        let mut harness = Harness::new("root", &[]);
        let long = "x".repeat(3000);
        assert_eq!(harness.run(&["cd", &long]).await, 0);
        assert_eq!(harness.session.virtual_path.len(), 1024);
        assert_eq!(harness.run(&["pwd"]).await, 0);
        assert_eq!(harness.stdout.as_str(), format!("{}\n", "x".repeat(1024)));
    }

    #[tokio::test]
    async fn cd_without_argument_is_tolerated() {
        let mut harness = Harness::new("root", &[]);
        let before = harness.session.virtual_path.clone();
        assert_eq!(harness.run(&["cd"]).await, 0);
        assert_eq!(harness.session.virtual_path, before);
    }

    #[tokio::test]
    async fn pwd_starts_in_the_home_directory() {
        let mut harness = Harness::new("alice", &[]);
        harness.run(&["pwd"]).await;
        assert_eq!(harness.stdout.as_str(), "/home/alice\n");

        let mut root = Harness::new("root", &[]);
        root.run(&["pwd"]).await;
        assert_eq!(root.stdout.as_str(), "/root\n");
    }

    #[tokio::test]
    async fn canned_outputs() {
        let mut harness = Harness::new("root", &[]);
        harness.run(&["whoami"]).await;
        assert_eq!(harness.stdout.as_str(), "花斯卡，火斯卡，小~花~火！\n");

        let mut harness = Harness::new("root", &[]);
        harness.run(&["uname"]).await;
        assert!(harness
            .stdout
            .as_str()
            .starts_with("Linux never-gonna-give-you-up-server"));
    }
}
