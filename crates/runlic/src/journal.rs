//! Append-only shared log file.
//!
//! One line per message, `<HH:MM:SS><message text>`, written with a
//! single `write_all` so a line is never split across writes. The file
//! is shared by every cooperating process (and the load generator), so
//! callers must hold the critical section when appending — that is
//! what keeps whole lines from interleaving.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;

#[derive(Debug, Clone)]
pub struct Journal {
    path: PathBuf,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line. Opens and closes the file per call;
    /// the log is an external shared resource, not a held handle.
    pub fn append(&self, message: &str) -> io::Result<()> {
        let line = format!("{}{}\n", Local::now().format("%H:%M:%S"), message);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_timestamped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let journal = Journal::new(dir.path().join("run.log"));

        journal.append(" - Termination").unwrap();
        journal.append(" 1234 1/3").unwrap();

        let text = std::fs::read_to_string(journal.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        // <HH:MM:SS> prefix on every line.
        for line in &lines {
            let bytes = line.as_bytes();
            assert!(bytes.len() > 8);
            assert_eq!(bytes[2], b':');
            assert_eq!(bytes[5], b':');
            assert!(bytes[..8]
                .iter()
                .enumerate()
                .all(|(i, b)| if i == 2 || i == 5 { *b == b':' } else { b.is_ascii_digit() }));
        }
        assert!(lines[0].ends_with(" - Termination"));
        assert!(lines[1].ends_with(" 1234 1/3"));
    }

    #[test]
    fn append_creates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fresh.log");
        assert!(!path.exists());

        Journal::new(&path).append(" hello").unwrap();
        assert!(path.exists());
    }
}
