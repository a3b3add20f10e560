//! Property-file store: one `key=value` pair per line.

use crate::error::{StorageError, StorageResult};
use crate::store::KeyValueStore;
use crate::table::OrderedTable;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Line terminator written by [`PropertyFileStore::flush`].
#[cfg(windows)]
pub const LINE_ENDING: &str = "\r\n";

/// Line terminator written by [`PropertyFileStore::flush`].
#[cfg(not(windows))]
pub const LINE_ENDING: &str = "\n";

/// Folder under the configuration directory that holds item caches.
const CACHE_DIR_NAME: &str = "item_cache";

/// Extension of item cache files.
const CACHE_FILE_EXTENSION: &str = "dat";

/// A file-backed key/value store.
///
/// The on-disk format is a flat property file: one `key=value` pair per
/// line, platform line endings, no header and no encryption. Backslash,
/// `=`, CR and LF inside keys or values are backslash-escaped.
///
/// The whole file is loaded on open. Mutations stay in memory until
/// [`flush`](KeyValueStore::flush), which rewrites the file through a
/// temporary sibling and an atomic rename.
///
/// # Example
///
/// ```no_run
/// use cachesync_storage::{KeyValueStore, PropertyFileStore};
/// use std::path::Path;
///
/// let path = PropertyFileStore::cache_path(Path::new("/tmp/cfg"), "contact");
/// let mut store = PropertyFileStore::open(&path).unwrap();
/// store.set("42", "1234567");
/// store.flush().unwrap();
/// ```
#[derive(Debug)]
pub struct PropertyFileStore {
    path: PathBuf,
    table: OrderedTable,
}

impl PropertyFileStore {
    /// Returns `<config_dir>/item_cache/<source_name>.dat`.
    #[must_use]
    pub fn cache_path(config_dir: &Path, source_name: &str) -> PathBuf {
        config_dir
            .join(CACHE_DIR_NAME)
            .join(format!("{source_name}.{CACHE_FILE_EXTENSION}"))
    }

    /// Opens the cache of `source_name` under `config_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::InvalidName`] if the name could escape
    /// `item_cache/`, otherwise as [`open`](Self::open).
    pub fn open_cache(config_dir: &Path, source_name: &str) -> StorageResult<Self> {
        validate_name(source_name)?;
        Self::open(&Self::cache_path(config_dir, source_name))
    }

    /// Opens the store at `path`, creating the file and its parent
    /// directories if they are missing.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the directory or file cannot be
    /// created, or the file cannot be read.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let open_err = |source| StorageError::Open {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(open_err)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .map_err(open_err)?;

        let mut raw = Vec::new();
        file.read_to_end(&mut raw).map_err(open_err)?;
        let text = String::from_utf8(raw).map_err(|e| {
            open_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;

        let table = parse(&text, path);
        debug!(path = %path.display(), entries = table.len(), "opened property file");

        Ok(Self {
            path: path.to_path_buf(),
            table,
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn write_atomically(&self) -> std::io::Result<()> {
        let temp_path = self.temp_path();
        let mut file = File::create(&temp_path)?;
        file.write_all(render(&self.table).as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temp_path, &self.path)?;
        sync_parent(&self.path)
    }
}

impl KeyValueStore for PropertyFileStore {
    fn get(&self, key: &str) -> Option<String> {
        self.table.get(key).map(str::to_string)
    }

    fn set(&mut self, key: &str, value: &str) {
        self.table.insert(key, value);
    }

    fn remove(&mut self, key: &str) -> bool {
        self.table.remove(key)
    }

    fn entries(&self) -> Vec<(String, String)> {
        self.table.to_vec()
    }

    fn len(&self) -> usize {
        self.table.len()
    }

    fn clear(&mut self) {
        self.table.clear();
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.write_atomically().map_err(|source| StorageError::Flush {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), entries = self.table.len(), "flushed property file");
        Ok(())
    }
}

/// Accepts names that stay a single file name once joined into a path.
fn validate_name(name: &str) -> StorageResult<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', '\0']);
    if bad {
        return Err(StorageError::InvalidName(name.to_string()));
    }
    Ok(())
}

#[cfg(unix)]
fn sync_parent(path: &Path) -> std::io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => File::open(parent)?.sync_all(),
        _ => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) -> std::io::Result<()> {
    // NTFS journals the rename.
    Ok(())
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '=' => out.push_str("\\="),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out
}

/// Splits an escaped line at its first unescaped `=` and unescapes both
/// halves. Returns `None` if there is no separator.
fn split_line(line: &str) -> Option<(String, String)> {
    let mut key = String::new();
    let mut value = String::new();
    let mut in_value = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        let target = if in_value { &mut value } else { &mut key };
        match c {
            '\\' => match chars.next() {
                Some('n') => target.push('\n'),
                Some('r') => target.push('\r'),
                Some(other) => target.push(other),
                None => target.push('\\'),
            },
            '=' if !in_value => in_value = true,
            other => target.push(other),
        }
    }

    in_value.then_some((key, value))
}

fn parse(text: &str, path: &Path) -> OrderedTable {
    let mut table = OrderedTable::new();
    for (number, line) in text.lines().enumerate() {
        if line.is_empty() {
            continue;
        }
        match split_line(line) {
            Some((key, value)) => table.insert(&key, &value),
            None => warn!(
                path = %path.display(),
                line = number + 1,
                "skipping malformed property line"
            ),
        }
    }
    table
}

fn render(table: &OrderedTable) -> String {
    let mut out = String::new();
    for (key, value) in table.iter() {
        out.push_str(&escape(key));
        out.push('=');
        out.push_str(&escape(value));
        out.push_str(LINE_ENDING);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn cache_path_layout() {
        let path = PropertyFileStore::cache_path(Path::new("/cfg"), "contact");
        assert_eq!(path, Path::new("/cfg/item_cache/contact.dat"));
    }

    #[test]
    fn open_creates_file_and_dirs() {
        let dir = tempdir().unwrap();
        let path = PropertyFileStore::cache_path(dir.path(), "calendar");

        let store = PropertyFileStore::open(&path).unwrap();
        assert!(store.is_empty());
        assert!(path.exists());
        assert_eq!(store.path(), path);
    }

    #[test]
    fn flush_writes_key_value_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("contact.dat");

        let mut store = PropertyFileStore::open(&path).unwrap();
        store.set("1", "3632233996");
        store.set("2", "42");
        store.flush().unwrap();

        let written = fs::read_to_string(&path).unwrap();
        assert_eq!(written, format!("1=3632233996{LINE_ENDING}2=42{LINE_ENDING}"));
    }

    #[test]
    fn mutations_not_on_disk_until_flush() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("note.dat");

        let mut store = PropertyFileStore::open(&path).unwrap();
        store.set("a", "1");
        assert_eq!(fs::read_to_string(&path).unwrap(), "");

        store.flush().unwrap();
        store.remove("a");
        let reopened = PropertyFileStore::open(&path).unwrap();
        assert_eq!(reopened.get("a").as_deref(), Some("1"));
    }

    #[test]
    fn persistence_keeps_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("order.dat");

        {
            let mut store = PropertyFileStore::open(&path).unwrap();
            store.set("zeta", "1");
            store.set("alpha", "2");
            store.set("mid", "3");
            store.flush().unwrap();
        }

        let store = PropertyFileStore::open(&path).unwrap();
        let keys: Vec<String> = store.entries().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn escaped_keys_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("files.dat");
        let awkward = "dir\\a=b\nc";

        {
            let mut store = PropertyFileStore::open(&path).unwrap();
            store.set(awkward, "7");
            store.flush().unwrap();
        }

        let store = PropertyFileStore::open(&path).unwrap();
        assert_eq!(store.get(awkward).as_deref(), Some("7"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn reads_crlf_and_skips_malformed_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mixed.dat");
        fs::write(&path, "a=1\r\nnot a pair\r\n\r\nb=2=3\n").unwrap();

        let store = PropertyFileStore::open(&path).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("a").as_deref(), Some("1"));
        assert_eq!(store.get("b").as_deref(), Some("2=3"));
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clean.dat");

        let mut store = PropertyFileStore::open(&path).unwrap();
        store.set("k", "v");
        store.flush().unwrap();

        assert!(!dir.path().join("clean.dat.tmp").exists());
    }

    #[cfg(unix)]
    #[test]
    fn open_cache_rejects_names_outside_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["", ".", "..", "../x", "a/b", "a\\b"] {
            assert!(
                matches!(
                    PropertyFileStore::open_cache(dir.path(), name),
                    Err(StorageError::InvalidName(_))
                ),
                "{name:?} accepted"
            );
        }
        assert!(!dir.path().join("x.dat").exists());

        let store = PropertyFileStore::open_cache(dir.path(), "contact").unwrap();
        assert_eq!(store.path(), PropertyFileStore::cache_path(dir.path(), "contact"));
    }

    #[test]
    fn open_fails_when_parent_is_a_file() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("item_cache");
        fs::write(&blocker, "not a directory").unwrap();

        let result = PropertyFileStore::open(&blocker.join("contact.dat"));
        assert!(matches!(result, Err(StorageError::Open { .. })));
    }

    #[test]
    fn flush_failure_names_the_store_file() {
        let dir = tempdir().unwrap();
        let path = PropertyFileStore::cache_path(dir.path(), "contact");
        let mut store = PropertyFileStore::open(&path).unwrap();
        store.set("a", "1");

        let cache_dir = path.parent().unwrap();
        fs::remove_dir_all(cache_dir).unwrap();
        fs::write(cache_dir, "not a directory").unwrap();

        match store.flush() {
            Err(StorageError::Flush { path: failed, .. }) => assert_eq!(failed, path),
            other => panic!("expected flush error, got {other:?}"),
        }
    }
}
