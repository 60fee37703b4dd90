use std::io;

use async_trait::async_trait;

use super::Command;
use crate::shell::{CommandContext, SessionContext};

pub struct True;

#[async_trait]
impl Command for True {
    async fn execute(
        &self,
        _context: &mut CommandContext<'_>,
        _session: &mut SessionContext,
    ) -> io::Result<u32> {
        Ok(0)
    }
}

pub struct False;

#[async_trait]
impl Command for False {
    async fn execute(
        &self,
        _context: &mut CommandContext<'_>,
        _session: &mut SessionContext,
    ) -> io::Result<u32> {
        Ok(1)
    }
}

pub struct Echo;

#[async_trait]
impl Command for Echo {
    async fn execute(
        &self,
        context: &mut CommandContext<'_>,
        _session: &mut SessionContext,
    ) -> io::Result<u32> {
        let line = context.args[1..].join(" ");
        context.stdout.write_line(&line).await?;
        Ok(0)
    }
}

pub struct Whoami;

#[async_trait]
impl Command for Whoami {
    async fn execute(
        &self,
        context: &mut CommandContext<'_>,
        _session: &mut SessionContext,
    ) -> io::Result<u32> {
        context.stdout.write_line("花斯卡，火斯卡，小~花~火！").await?;
        Ok(0)
    }
}

pub struct Huahuo;

#[async_trait]
impl Command for Huahuo {
    async fn execute(
        &self,
        context: &mut CommandContext<'_>,
        _session: &mut SessionContext,
    ) -> io::Result<u32> {
        context
            .stdout
            .write_line("哟，小灰毛，玩的开心吗？玩的开心就好。")
            .await?;
        Ok(0)
    }
}

pub struct Never;

#[async_trait]
impl Command for Never {
    async fn execute(
        &self,
        context: &mut CommandContext<'_>,
        _session: &mut SessionContext,
    ) -> io::Result<u32> {
        context
            .stdout
            .write_line(
                "Never gonna give you up, Never gonna let you down, Never gonna run around \
                 and desert you, Never gonna make you cry, Never gonna say goodbye, \
                 Never gonna tell a lie and hurt you",
            )
            .await?;
        Ok(0)
    }
}

pub struct Uname;

#[async_trait]
impl Command for Uname {
    async fn execute(
        &self,
        context: &mut CommandContext<'_>,
        _session: &mut SessionContext,
    ) -> io::Result<u32> {
        context
            .stdout
            .write_line(
                "Linux never-gonna-give-you-up-server 5.4.0-187-generic #207-Ubuntu SMP \
                 Mon Jun 10 08:16:10 UTC 2024 x86_64 x86_64 x86_64 GNU/Linux",
            )
            .await?;
        Ok(0)
    }
}

pub struct Pwd;

#[async_trait]
impl Command for Pwd {
    async fn execute(
        &self,
        context: &mut CommandContext<'_>,
        session: &mut SessionContext,
    ) -> io::Result<u32> {
        let path = session.virtual_path.clone();
        context.stdout.write_line(&path).await?;
        Ok(0)
    }
}

/// Maximum length a `cd` target is stored at.
const MAX_PATH_LEN: usize = 1024;

pub struct Cd;

#[async_trait]
impl Command for Cd {
    async fn execute(
        &self,
        context: &mut CommandContext<'_>,
        session: &mut SessionContext,
    ) -> io::Result<u32> {
        // No validation: any string becomes the new virtual path.
        if let Some(path) = context.args.get(1) {
            session.virtual_path = truncate(path, MAX_PATH_LEN);
        }
        Ok(0)
    }
}

fn truncate(path: &str, max: usize) -> String {
    if path.len() <= max {
        return path.to_string();
    }
    let mut cut = max;
    while !path.is_char_boundary(cut) {
        cut -= 1;
    }
    path[..cut].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("/etc", 1024), "/etc");
        assert_eq!(truncate(&"a".repeat(2000), 1024).len(), 1024);
        // A multi-byte character straddling the cut is dropped whole.
        let path = format!("{}火", "a".repeat(1023));
        let cut = truncate(&path, 1024);
        assert_eq!(cut.len(), 1023);
        assert!(cut.chars().all(|c| c == 'a'));
    }
}
