use std::io;

use async_trait::async_trait;
use rand::Rng;

use super::Command;
use crate::faker::{fake_file_list, FakeFile};
use crate::shell::{CommandContext, SessionContext};

/// `ls`/`ll` invent a directory listing on the spot. `ll` behaves as `ls`
/// with `l` appended to whatever flag string was given.
pub struct Ls;

#[async_trait]
impl Command for Ls {
    async fn execute(
        &self,
        context: &mut CommandContext<'_>,
        _session: &mut SessionContext,
    ) -> io::Result<u32> {
        let mut flags = context.args.get(1).cloned().unwrap_or_default();
        if context.args[0] == "ll" {
            flags.push('l');
        }
        let listing = {
            let mut rng = rand::rng();
            let count = rng.random_range(0..100);
            let files = fake_file_list(&mut rng, count);
            render_listing(&files, &flags)
        };
        context.stdout.write_all(listing.as_bytes()).await?;
        Ok(0)
    }
}

fn render_listing(files: &[FakeFile], flags: &str) -> String {
    let show_hidden = flags.contains('a');
    let mut out = String::new();
    if flags.contains('l') {
        for file in files {
            if file.is_hidden && !show_hidden {
                continue;
            }
            let kind = if file.is_dir { 'd' } else { '-' };
            out.push_str(&format!(
                "{}{} {:1} {:>8} {:>8} {:>8} {} {}\n",
                kind,
                file.perm,
                1,
                file.owner,
                file.group,
                file.size,
                file.mod_time.format("%b %d %H:%M"),
                file.name,
            ));
        }
        out.push_str(&format!("total {}\n", files.len()));
    } else {
        for file in files {
            if file.is_hidden && !show_hidden {
                continue;
            }
            out.push_str(&file.name);
            out.push('\t');
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sample() -> Vec<FakeFile> {
        let mod_time = Utc.with_ymd_and_hms(2024, 6, 10, 8, 16, 0).unwrap();
        vec![
            FakeFile {
                is_dir: true,
                is_hidden: false,
                name: "docs".into(),
                size: 64,
                mod_time,
                perm: "rwxr-xr-x".into(),
                owner: "root".into(),
                group: "root".into(),
            },
            FakeFile {
                is_dir: false,
                is_hidden: true,
                name: ".secret".into(),
                size: 128,
                mod_time,
                perm: "rw-r--r--".into(),
                owner: "huahuo".into(),
                group: "huahuo".into(),
            },
            FakeFile {
                is_dir: false,
                is_hidden: false,
                name: "notes.txt".into(),
                size: 512,
                mod_time,
                perm: "rw-rw-r--".into(),
                owner: "fumo".into(),
                group: "fumo".into(),
            },
        ]
    }

    #[test]
    fn short_listing_hides_dotfiles_unless_asked() {
        let files = sample();
        assert_eq!(render_listing(&files, ""), "docs\tnotes.txt\t\n");
        assert_eq!(render_listing(&files, "a"), "docs\t.secret\tnotes.txt\t\n");
    }

    #[test]
    fn long_listing_formats_rows_and_total() {
        let files = sample();
        let listing = render_listing(&files, "l");
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            "drwxr-xr-x 1     root     root       64 Jun 10 08:16 docs"
        );
        assert_eq!(
            lines[1],
            "-rw-rw-r-- 1     fumo     fumo      512 Jun 10 08:16 notes.txt"
        );
        // The total counts every invented entry, hidden ones included.
        assert_eq!(lines[2], "total 3");
    }

    #[test]
    fn listing_is_stable_for_a_seed() {
        let first = render_listing(&fake_file_list(&mut StdRng::seed_from_u64(5), 30), "la");
        let second = render_listing(&fake_file_list(&mut StdRng::seed_from_u64(5), 30), "la");
        assert_eq!(first, second);
    }
}
