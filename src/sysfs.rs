//! sysfs attribute access
use crate::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

pub fn read_attr(dir: &Path, name: &str) -> Result<String, Error> {
    Ok(fs::read_to_string(dir.join(name))?.trim().to_string())
}

pub fn read_u32(dir: &Path, name: &str) -> Result<u32, Error> {
    let value = read_attr(dir, name)?;
    value.parse().map_err(|_| {
        Error::InvalidArgument(format!("{}/{}: not a number: {:?}", dir.display(), name, value))
    })
}

pub fn read_f64(dir: &Path, name: &str) -> Result<f64, Error> {
    let value = read_attr(dir, name)?;
    value.parse().map_err(|_| {
        Error::InvalidArgument(format!("{}/{}: not a number: {:?}", dir.display(), name, value))
    })
}

pub fn write_attr(dir: &Path, name: &str, value: &str) -> Result<(), Error> {
    fs::write(dir.join(name), value)?;
    Ok(())
}

/// Entries of `dir`, sorted by name. A missing directory is empty.
pub fn list(dir: &Path) -> Vec<PathBuf> {
    let mut entries: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries.flatten().map(|e| e.path()).collect(),
        Err(_) => Vec::new(),
    };
    entries.sort();
    entries
}

/// File name of `path` as UTF-8
pub fn name_of(path: &Path) -> Option<&str> {
    path.file_name()?.to_str()
}

#[cfg(test)]
pub(crate) mod fixture {
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static COUNTER: AtomicUsize = AtomicUsize::new(0);

    /// Fresh scratch directory under the system temp dir, removed on drop
    pub struct Scratch {
        root: PathBuf,
    }

    impl Scratch {
        pub fn new(tag: &str) -> Self {
            let n = COUNTER.fetch_add(1, Ordering::SeqCst);
            let root = std::env::temp_dir().join(format!(
                "clightd-{}-{}-{}",
                tag,
                std::process::id(),
                n
            ));
            let _ = fs::remove_dir_all(&root);
            fs::create_dir_all(&root).unwrap();
            Self { root }
        }

        pub fn path(&self) -> &Path {
            &self.root
        }

        /// Write `contents` to `rel`, creating parent directories
        pub fn file(&self, rel: &str, contents: &str) -> PathBuf {
            let path = self.root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, contents).unwrap();
            path
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.root);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixture::Scratch;
    use super::*;

    #[test]
    fn reads_trimmed_values() {
        let dir = Scratch::new("sysfs-read");
        dir.file("max_brightness", "255\n");
        dir.file("scale", "0.25\n");
        assert_eq!(read_u32(dir.path(), "max_brightness").unwrap(), 255);
        assert_eq!(read_f64(dir.path(), "scale").unwrap(), 0.25);
    }

    #[test]
    fn garbage_is_an_invalid_argument() {
        let dir = Scratch::new("sysfs-garbage");
        dir.file("brightness", "lots");
        assert!(matches!(
            read_u32(dir.path(), "brightness"),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn missing_attribute_is_io() {
        let dir = Scratch::new("sysfs-missing");
        assert!(matches!(read_attr(dir.path(), "nope"), Err(Error::Io(_))));
    }

    #[test]
    fn list_is_sorted_and_tolerates_missing_dirs() {
        let dir = Scratch::new("sysfs-list");
        dir.file("b/x", "");
        dir.file("a/x", "");
        let names: Vec<String> = list(dir.path())
            .iter()
            .filter_map(|p| name_of(p).map(str::to_owned))
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(list(&dir.path().join("absent")).is_empty());
    }
}
