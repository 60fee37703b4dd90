use chrono::{DateTime, Duration, Utc};
use fake::faker::lorem::en::Word;
use fake::Fake;
use rand::Rng;

/// A file entry invented for one `ls` invocation. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeFile {
    pub is_dir: bool,
    pub is_hidden: bool,
    pub name: String,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
    pub perm: String,
    pub owner: String,
    pub group: String,
}

const FILE_OWNERS: [&str; 3] = ["huahuo", "fumo", "root"];

const FILE_EXTENSIONS: [&str; 54] = [
    ".txt", ".doc", ".docx", ".pdf", ".xls", ".xlsx", ".ppt", ".pptx", ".jpg", ".jpeg", ".png",
    ".gif", ".bmp", ".tiff", ".csv", ".zip", ".rar", ".tar", ".gz", ".7z", ".mp3", ".wav", ".mp4",
    ".avi", ".mov", ".mkv", ".flv", ".html", ".css", ".js", ".json", ".xml", ".sql", ".py",
    ".java", ".c", ".cpp", ".h", ".hpp", ".go", ".php", ".rb", ".swift", ".kt", ".ts", ".tsx",
    ".vue", ".md", ".log", ".ini", ".conf", ".bat", ".sh", ".ps1",
];

const PERM_TRIPLES: [&str; 8] = ["rwx", "rw-", "r-x", "r--", "-wx", "-w-", "--x", "---"];

fn pick<'a, R: Rng + ?Sized>(rng: &mut R, values: &[&'a str]) -> &'a str {
    values[rng.random_range(0..values.len())]
}

/// Invent `count` file entries. The first `dir_index` entries are directories,
/// the rest are regular files, of which at most the first 20 are hidden. The
/// listing is a pure function of the RNG state and `count`.
pub fn fake_file_list<R: Rng + ?Sized>(rng: &mut R, count: usize) -> Vec<FakeFile> {
    if count == 0 {
        return Vec::new();
    }
    let now = Utc::now();
    let dir_index = rng.random_range(0..count);
    let hidden_index = rng.random_range(0..count - dir_index) % 20;
    let mut files = Vec::with_capacity(count);
    for i in 0..count {
        let owner = pick(rng, &FILE_OWNERS).to_string();
        let mut name: String = Word().fake_with_rng(rng);
        let size = rng.random_range(0..1u64 << 17);
        let mod_time = now - Duration::nanoseconds(rng.random_range(0..i64::MAX >> 4));
        let mut perm = String::with_capacity(9);
        for _ in 0..3 {
            perm.push_str(pick(rng, &PERM_TRIPLES));
        }
        let is_dir = i < dir_index;
        let is_hidden = !is_dir && (i - dir_index) < hidden_index;
        if !is_dir {
            if is_hidden {
                name = format!(".{}", name);
            } else {
                name.push_str(pick(rng, &FILE_EXTENSIONS));
            }
        }
        files.push(FakeFile {
            is_dir,
            is_hidden,
            name,
            size,
            mod_time,
            group: owner.clone(),
            owner,
            perm,
        });
    }
    files
}
