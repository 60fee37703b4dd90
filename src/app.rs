use std::path::PathBuf;

use directories::ProjectDirs;

#[derive(clap::Parser, Debug)]
#[command(
    version,
    about = "An interactive SSH honeypot",
    long_about = "An interactive SSH honeypot. It accepts authentication per a configurable \
                  policy, fakes a small shell without ever executing anything, logs every \
                  observable event as structured records and optionally stores them in MongoDB."
)]
pub struct App {
    /// Optional config file
    #[arg(long = "config", default_value = "./sshesame.yaml", env = "SSHESAME_CONFIG")]
    pub config: PathBuf,

    /// Data directory to store automatically generated host keys in
    #[arg(long = "data_dir", default_value_os_t = default_data_dir(), env = "SSHESAME_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Parse an old log file and re-ingest it into the document store
    #[arg(long = "old-log")]
    pub old_log: Option<PathBuf>,

    /// Treat the old log as structured-line (JSON) records instead of text
    #[arg(long = "old-log-json", default_value_t = false)]
    pub old_log_json: bool,

    /// Only count events by type and print the totals, writing nothing
    #[arg(long = "dry-run", default_value_t = false)]
    pub dry_run: bool,
}

fn default_data_dir() -> PathBuf {
    ProjectDirs::from("", "", "sshesame")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}
