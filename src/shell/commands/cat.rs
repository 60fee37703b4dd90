use std::io;

use async_trait::async_trait;

use super::Command;
use crate::shell::{CommandContext, SessionContext};

/// `cat` either echoes stdin lines back, or reveals one of the planted files
/// under `<work_dir>/funny_files/cat/`. Path separators in the argument are
/// flattened to underscores so the lookup can never escape that directory.
pub struct Cat;

#[async_trait]
impl Command for Cat {
    async fn execute(
        &self,
        context: &mut CommandContext<'_>,
        session: &mut SessionContext,
    ) -> io::Result<u32> {
        if context.args.len() > 1 {
            for file in context.args[1..].to_vec() {
                let flattened = file.replace('/', "_");
                let path = session
                    .cfg
                    .work_dir
                    .join("funny_files")
                    .join("cat")
                    .join(&flattened);
                if let Ok(data) = tokio::fs::read(&path).await {
                    context.stdout.write_all(&data).await?;
                    context.stdout.write_all(b"\n").await?;
                    return Ok(0);
                }
                let line = format!("{}: {}: No such file or directory", context.args[0], file);
                context.stderr.write_line(&line).await?;
            }
            return Ok(1);
        }
        loop {
            match context.stdin.read_line().await? {
                Some(line) => context.stdout.write_line(&line).await?,
                None => return Ok(0),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::Harness;
    use crate::config::Config;

    #[tokio::test]
    async fn cat_without_arguments_echoes_stdin() {
        let mut harness = Harness::new("root", &["first", "second"]);
        assert_eq!(harness.run(&["cat"]).await, 0);
        assert_eq!(harness.stdout.as_str(), "first\nsecond\n");
    }

    #[tokio::test]
    async fn cat_reports_missing_files_and_fails() {
        let mut harness = Harness::new("root", &[]);
        assert_eq!(harness.run(&["cat", "/etc/passwd", "/etc/shadow"]).await, 1);
        assert_eq!(
            harness.stderr.as_str(),
            "cat: /etc/passwd: No such file or directory\n\
             cat: /etc/shadow: No such file or directory\n"
        );
    }

    #[tokio::test]
    async fn cat_short_circuits_on_the_first_readable_file() {
        let dir = tempfile::tempdir().unwrap();
        let cat_dir = dir.path().join("funny_files").join("cat");
        std::fs::create_dir_all(&cat_dir).unwrap();
        std::fs::write(cat_dir.join("_etc_passwd"), b"root:x:0:0:root:/root:/bin/bash").unwrap();

        let mut cfg = Config::default();
        cfg.work_dir = dir.path().to_path_buf();
        let mut harness = Harness::with_config("root", &[], cfg);

        let status = harness
            .run(&["cat", "missing", "/etc/passwd", "also-ignored"])
            .await;
        assert_eq!(status, 0);
        assert_eq!(
            harness.stdout.as_str(),
            "root:x:0:0:root:/root:/bin/bash\n"
        );
        // Only the unreadable argument before the hit is reported.
        assert_eq!(
            harness.stderr.as_str(),
            "cat: missing: No such file or directory\n"
        );
    }
}
