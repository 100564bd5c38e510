//! Append-only conversation logs, one text file per user.
//!
//! Each line carries an embedded `[ID: <n>]` marker naming the human the
//! conversation belongs to. Identity is resolved through an in-memory
//! `user ID -> path` index rebuilt from those markers by a single directory
//! scan at startup, so a renamed or colliding filename can never detach a
//! user from their history.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context as _, Result};
use chrono::Utc;
use chrono_tz::America::Chicago;
use tracing::{debug, warn};

/// ID marker recorded on lines written by the bot itself.
const BOT_MARKER: &str = "BOT_ID";

const ARCHIVE_TAG: &str = "_archived_";

/// Who authored a logged message.
pub enum Author<'a> {
    User { name: &'a str },
    Bot { name: &'a str },
}

pub struct ConversationStore {
    dir: PathBuf,
    index: Mutex<HashMap<i64, PathBuf>>,
}

impl ConversationStore {
    /// Opens (creating if needed) the log directory and rebuilds the ID index
    /// from the marker lines of every active log file.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create conversation dir {}", dir.display()))?;
        let index = Self::scan(&dir)?;
        debug!(
            dir = %dir.display(),
            users = index.len(),
            "conversation index rebuilt"
        );
        Ok(Self {
            dir,
            index: Mutex::new(index),
        })
    }

    fn scan(dir: &Path) -> Result<HashMap<i64, PathBuf>> {
        let mut paths: Vec<PathBuf> = fs::read_dir(dir)
            .with_context(|| format!("failed to read conversation dir {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("txt"))
            .filter(|p| {
                // Archived logs are renamed out of the active set.
                p.file_stem()
                    .and_then(|s| s.to_str())
                    .is_some_and(|s| !s.contains(ARCHIVE_TAG))
            })
            .collect();
        paths.sort();

        let mut index = HashMap::new();
        for path in paths {
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable log");
                    continue;
                }
            };
            for id in extract_marker_ids(&content) {
                index.entry(id).or_insert_with(|| path.clone());
            }
        }
        Ok(index)
    }

    /// Appends one line to the user's log, creating the log on first contact.
    ///
    /// Bot replies are resolved through the index and land in the same file
    /// as the human's own messages; a new file keyed by the sanitized display
    /// name is only created when the user has no active log at all.
    pub fn append(&self, user_id: i64, author: Author<'_>, body: &str) -> Result<PathBuf> {
        let (author_name, display_id) = match author {
            Author::User { name } => (name, user_id.to_string()),
            Author::Bot { name } => (name, BOT_MARKER.to_string()),
        };

        let path = {
            let mut index = self.index.lock().unwrap();
            match index.get(&user_id) {
                Some(path) => path.clone(),
                None => {
                    let path = self
                        .dir
                        .join(format!("{}.txt", sanitize_filename(author_name)));
                    index.insert(user_id, path.clone());
                    path
                }
            }
        };

        let now = Utc::now().with_timezone(&Chicago);
        let line = format!(
            "{} {} [ID: {}]: --- {}\n",
            now.format("%m-%d-%Y %I:%M %p CT"),
            author_name,
            display_id,
            body
        );

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open log {}", path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("failed to append to log {}", path.display()))?;

        debug!(user_id, path = %path.display(), "conversation line appended");
        Ok(path)
    }

    /// Resolves the active log for a user, if one exists.
    pub fn find(&self, user_id: i64) -> Option<PathBuf> {
        self.index.lock().unwrap().get(&user_id).cloned()
    }

    /// Returns the last `count` message lines of the user's log in their
    /// original chronological order. Read failures degrade to no history.
    pub fn recent(&self, user_id: i64, count: usize) -> Vec<String> {
        let Some(path) = self.find(user_id) else {
            debug!(user_id, "no conversation log found");
            return Vec::new();
        };
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read conversation log");
                return Vec::new();
            }
        };
        // Blank or truncated lines without a marker are skipped.
        let lines: Vec<String> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && line.contains("[ID: "))
            .map(String::from)
            .collect();
        let start = lines.len().saturating_sub(count);
        lines[start..].to_vec()
    }

    /// Renames the user's log with a timestamp suffix, removing it from the
    /// active set. A later message from the same user starts a fresh log.
    pub fn archive(&self, user_id: i64) -> Result<PathBuf> {
        let mut index = self.index.lock().unwrap();
        let path = index
            .get(&user_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no conversation log for user {user_id}"))?;

        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("conversation");
        let stamp = Utc::now().with_timezone(&Chicago).format("%Y%m%d_%H%M%S");
        let target = self.dir.join(format!("{stem}{ARCHIVE_TAG}{stamp}.txt"));

        fs::rename(&path, &target)
            .with_context(|| format!("failed to archive log {}", path.display()))?;
        // The file may hold more than one user's markers under a colliding
        // filename; every entry pointing at it goes with it.
        index.retain(|_, p| p != &path);

        debug!(user_id, target = %target.display(), "conversation archived");
        Ok(target)
    }
}

fn extract_marker_ids(content: &str) -> Vec<i64> {
    let mut ids = Vec::new();
    for line in content.lines() {
        let Some(pos) = line.find("[ID: ") else {
            continue;
        };
        let rest = &line[pos + 5..];
        let Some(end) = rest.find(']') else {
            continue;
        };
        if let Ok(id) = rest[..end].trim().parse::<i64>() {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}

/// Strips characters illegal in filenames, trims, and caps at 50 characters.
fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            other => other,
        })
        .collect();
    let capped: String = cleaned.trim().chars().take(50).collect();
    if capped.is_empty() {
        "unknown_user".to_string()
    } else {
        capped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_append_then_recent_in_order() {
        let dir = tempdir().unwrap();
        let store = ConversationStore::new(dir.path()).unwrap();

        for i in 1..=5 {
            store
                .append(42, Author::User { name: "Alex" }, &format!("message {i}"))
                .unwrap();
        }

        let recent = store.recent(42, 3);
        assert_eq!(recent.len(), 3);
        assert!(recent[0].contains("message 3"));
        assert!(recent[1].contains("message 4"));
        assert!(recent[2].contains("message 5"));

        // Asking for more than exists returns everything.
        assert_eq!(store.recent(42, 100).len(), 5);
    }

    #[test]
    fn test_find_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = ConversationStore::new(dir.path()).unwrap();
        store
            .append(42, Author::User { name: "Alex" }, "hello")
            .unwrap();

        let first = store.find(42).unwrap();
        let second = store.find(42).unwrap();
        assert_eq!(first, second);
        assert!(store.find(99).is_none());
    }

    #[test]
    fn test_bot_reply_lands_in_same_log() {
        let dir = tempdir().unwrap();
        let store = ConversationStore::new(dir.path()).unwrap();

        store
            .append(42, Author::User { name: "Alex" }, "hello")
            .unwrap();
        store
            .append(42, Author::Bot { name: "Steward" }, "hi there")
            .unwrap();

        let path = store.find(42).unwrap();
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("[ID: 42]: --- hello"));
        assert!(content.contains("[ID: BOT_ID]: --- hi there"));
        assert_eq!(store.recent(42, 10).len(), 2);
    }

    #[test]
    fn test_log_keyed_by_sanitized_name() {
        let dir = tempdir().unwrap();
        let store = ConversationStore::new(dir.path()).unwrap();

        store
            .append(7, Author::User { name: "We/ird: Na*me" }, "hi")
            .unwrap();
        let path = store.find(7).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "We_ird_ Na_me.txt"
        );
    }

    #[test]
    fn test_rename_does_not_split_log() {
        let dir = tempdir().unwrap();
        let store = ConversationStore::new(dir.path()).unwrap();

        store
            .append(42, Author::User { name: "Alex" }, "first")
            .unwrap();
        // Display name changed; the message still lands in the original log.
        store
            .append(42, Author::User { name: "Alexander" }, "second")
            .unwrap();

        let path = store.find(42).unwrap();
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "Alex.txt");
        assert_eq!(store.recent(42, 10).len(), 2);
    }

    #[test]
    fn test_index_rebuilt_from_existing_logs() {
        let dir = tempdir().unwrap();
        {
            let store = ConversationStore::new(dir.path()).unwrap();
            store
                .append(42, Author::User { name: "Alex" }, "hello")
                .unwrap();
            store
                .append(42, Author::Bot { name: "Steward" }, "hi")
                .unwrap();
        }

        // A fresh instance over the same directory resolves the same log.
        let store = ConversationStore::new(dir.path()).unwrap();
        let path = store.find(42).unwrap();
        assert_eq!(path.file_name().unwrap().to_str().unwrap(), "Alex.txt");
        assert_eq!(store.recent(42, 10).len(), 2);
    }

    #[test]
    fn test_archive_excludes_log_from_lookup() {
        let dir = tempdir().unwrap();
        let store = ConversationStore::new(dir.path()).unwrap();

        store
            .append(42, Author::User { name: "Alex" }, "hello")
            .unwrap();
        let archived = store.archive(42).unwrap();
        assert!(archived
            .file_stem()
            .unwrap()
            .to_str()
            .unwrap()
            .contains("_archived_"));
        assert!(archived.exists());

        assert!(store.find(42).is_none());
        assert!(store.recent(42, 10).is_empty());

        // Archived files stay excluded across an index rebuild.
        let reopened = ConversationStore::new(dir.path()).unwrap();
        assert!(reopened.find(42).is_none());

        // A re-engaged user starts a fresh log.
        store
            .append(42, Author::User { name: "Alex" }, "back again")
            .unwrap();
        assert_eq!(store.recent(42, 10).len(), 1);
    }

    #[test]
    fn test_archive_without_log_fails() {
        let dir = tempdir().unwrap();
        let store = ConversationStore::new(dir.path()).unwrap();
        assert!(store.archive(42).is_err());
    }

    #[test]
    fn test_recent_skips_lines_without_marker() {
        let dir = tempdir().unwrap();
        let store = ConversationStore::new(dir.path()).unwrap();
        let path = store
            .append(42, Author::User { name: "Alex" }, "hello")
            .unwrap();

        // Simulate a partial write and stray blank lines.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"\ngarbage without a marker\n\n").unwrap();

        let recent = store.recent(42, 10);
        assert_eq!(recent.len(), 1);
        assert!(recent[0].contains("hello"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("Alex"), "Alex");
        assert_eq!(sanitize_filename("a/b\\c:d"), "a_b_c_d");
        assert_eq!(sanitize_filename("   "), "unknown_user");
        assert_eq!(sanitize_filename(""), "unknown_user");
        let long = "x".repeat(80);
        assert_eq!(sanitize_filename(&long).chars().count(), 50);
    }

    #[test]
    fn test_extract_marker_ids() {
        let content = "01-01-2026 10:00 AM CT Alex [ID: 42]: --- hi\n\
                       01-01-2026 10:01 AM CT Steward [ID: BOT_ID]: --- hello\n\
                       01-01-2026 10:02 AM CT Alex [ID: 42]: --- again\n";
        assert_eq!(extract_marker_ids(content), vec![42]);
    }
}
