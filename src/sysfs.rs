//! Access to kernel pseudo-files.
//!
//! Every display attribute the Amlogic driver exposes is a small text file under `/sys`. Reads
//! and writes are synchronous and fast, but any of them may fail on kernels that lack a given
//! attribute, so callers treat errors as "unsupported on this hardware" rather than fatal.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;

pub trait SysfsBridge: Send + Sync {
    /// Reads a value with trailing whitespace removed.
    fn get_string(&self, path: &str) -> anyhow::Result<String>;

    fn set_string(&self, path: &str, value: &str) -> anyhow::Result<()>;

    fn exists(&self, path: &str) -> bool;

    /// Reads a decimal or `0x`-prefixed hexadecimal integer.
    fn get_int(&self, path: &str) -> anyhow::Result<i32> {
        let value = self.get_string(path)?;
        parse_int(&value).with_context(|| format!("error parsing {value:?} from {path}"))
    }

    fn set_int(&self, path: &str, value: i32) -> anyhow::Result<()> {
        self.set_string(path, &value.to_string())
    }
}

fn parse_int(value: &str) -> anyhow::Result<i32> {
    let value = value.trim();
    let parsed = if let Some(hex) = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        i32::from_str_radix(hex, 16)?
    } else {
        value.parse()?
    };
    Ok(parsed)
}

/// Sysfs rooted at a directory, normally `/`.
#[derive(Debug, Clone)]
pub struct Sysfs {
    root: PathBuf,
}

impl Sysfs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl Default for Sysfs {
    fn default() -> Self {
        Self::new("/")
    }
}

impl SysfsBridge for Sysfs {
    fn get_string(&self, path: &str) -> anyhow::Result<String> {
        let full = self.resolve(path);
        let mut value =
            fs::read_to_string(&full).with_context(|| format!("error reading {full:?}"))?;
        value.truncate(value.trim_end().len());
        trace!("read {path}: {value:?}");
        Ok(value)
    }

    fn set_string(&self, path: &str, value: &str) -> anyhow::Result<()> {
        let full = self.resolve(path);
        trace!("write {path}: {value:?}");
        fs::write(&full, value).with_context(|| format!("error writing {full:?}"))
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }
}

#[cfg(test)]
pub(crate) use self::memory::MemorySysfs;

#[cfg(test)]
mod memory {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use anyhow::Context;

    use super::SysfsBridge;

    /// In-memory sysfs that records every write.
    #[derive(Debug, Default)]
    pub(crate) struct MemorySysfs {
        files: Mutex<HashMap<String, String>>,
        writes: Mutex<Vec<(String, String)>>,
    }

    impl MemorySysfs {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(self, path: &str, value: &str) -> Self {
            self.put(path, value);
            self
        }

        /// Changes a file without recording a write, as the kernel would.
        pub fn put(&self, path: &str, value: &str) {
            self.files
                .lock()
                .unwrap()
                .insert(path.to_owned(), value.to_owned());
        }

        pub fn get(&self, path: &str) -> Option<String> {
            self.files.lock().unwrap().get(path).cloned()
        }

        pub fn writes(&self) -> Vec<(String, String)> {
            self.writes.lock().unwrap().clone()
        }

        pub fn writes_to(&self, path: &str) -> Vec<String> {
            self.writes
                .lock()
                .unwrap()
                .iter()
                .filter(|(p, _)| p == path)
                .map(|(_, v)| v.clone())
                .collect()
        }
    }

    impl SysfsBridge for MemorySysfs {
        fn get_string(&self, path: &str) -> anyhow::Result<String> {
            self.get(path)
                .map(|value| value.trim_end().to_owned())
                .with_context(|| format!("no such file: {path}"))
        }

        fn set_string(&self, path: &str, value: &str) -> anyhow::Result<()> {
            self.put(path, value);
            self.writes
                .lock()
                .unwrap()
                .push((path.to_owned(), value.to_owned()));
            Ok(())
        }

        fn exists(&self, path: &str) -> bool {
            self.files.lock().unwrap().contains_key(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::process;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn scratch_dir() -> PathBuf {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("amlwin-sysfs-{}-{n}", process::id()));
        fs::create_dir_all(dir.join("sys/class/display")).unwrap();
        dir
    }

    #[test]
    fn parse_int_accepts_hex() {
        assert_eq!(parse_int("42\n").unwrap(), 42);
        assert_eq!(parse_int("0x1f").unwrap(), 31);
        assert_eq!(parse_int("-3").unwrap(), -3);
        assert!(parse_int("yes").is_err());
    }

    #[test]
    fn rooted_read_write() {
        let dir = scratch_dir();
        let sysfs = Sysfs::new(&dir);

        sysfs.set_string("/sys/class/display/mode", "1080p60hz").unwrap();
        assert_eq!(
            fs::read_to_string(dir.join("sys/class/display/mode")).unwrap(),
            "1080p60hz"
        );

        fs::write(dir.join("sys/class/display/mode"), "720p50hz\n").unwrap();
        assert_eq!(
            sysfs.get_string("/sys/class/display/mode").unwrap(),
            "720p50hz"
        );

        sysfs.set_int("/sys/class/display/blank", 1).unwrap();
        assert_eq!(sysfs.get_int("/sys/class/display/blank").unwrap(), 1);

        assert!(sysfs.exists("/sys/class/display/mode"));
        assert!(!sysfs.exists("/sys/class/display/missing"));

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn missing_file_is_an_error() {
        let sysfs = Sysfs::new(std::env::temp_dir().join("amlwin-does-not-exist"));
        assert!(sysfs.get_string("/sys/class/amhdmitx/amhdmitx0/hpd_state").is_err());
        assert!(sysfs.get_int("/sys/class/amhdmitx/amhdmitx0/hpd_state").is_err());
    }

    #[test]
    fn memory_records_writes() {
        let sysfs = MemorySysfs::new().with("/a", "1\n");
        assert_eq!(sysfs.get_int("/a").unwrap(), 1);
        sysfs.set_int("/a", 2).unwrap();
        assert_eq!(sysfs.writes_to("/a"), vec!["2".to_owned()]);
        assert!(sysfs.get_string("/b").is_err());
    }
}
