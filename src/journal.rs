//! Event Journal Writer (spec §4.G): for a repo with a configured local
//! `path`, append one JSON line per dedup-passing event to
//! `{path}/.metarelay/events.jsonl`.
//!
//! Directory/file permission discipline mirrors `storage/journal.rs::open`:
//! restrictive modes set immediately after creation, never widened.

use crate::model::Event;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

const JOURNAL_DIR: &str = ".metarelay";
const JOURNAL_FILE: &str = "events.jsonl";

pub struct JournalWriter {
    file: File,
}

impl JournalWriter {
    /// Open (creating if absent) the journal file under `repo_path`. Creates
    /// `{repo_path}/.metarelay` with mode 0700 and the file with mode 0600 on
    /// unix. Never truncates — rotation is the operator's concern (spec §4.G).
    pub fn open(repo_path: &Path) -> std::io::Result<Self> {
        let dir = repo_path.join(JOURNAL_DIR);
        std::fs::create_dir_all(&dir)?;
        set_dir_permissions(&dir);

        let path = journal_path(repo_path);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        set_file_permissions(&path);

        Ok(JournalWriter { file })
    }

    /// Append one JSON-encoded line for `event`, flushing before returning
    /// (spec §4.G: "flushed before the cursor advances").
    pub fn append(&mut self, event: &Event) -> std::io::Result<()> {
        serde_json::to_writer(&mut self.file, event)?;
        self.file.write_all(b"\n")?;
        self.file.flush()
    }
}

fn journal_path(repo_path: &Path) -> PathBuf {
    repo_path.join(JOURNAL_DIR).join(JOURNAL_FILE)
}

#[cfg(unix)]
fn set_dir_permissions(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = std::fs::metadata(dir) {
        let mut perms = metadata.permissions();
        perms.set_mode(0o700);
        let _ = std::fs::set_permissions(dir, perms);
    }
}

#[cfg(not(unix))]
fn set_dir_permissions(_dir: &Path) {}

#[cfg(unix)]
fn set_file_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = std::fs::metadata(path) {
        let mut perms = metadata.permissions();
        perms.set_mode(0o600);
        let _ = std::fs::set_permissions(path, perms);
    }
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) {}
