//! Working directories: one directory per target file holding every
//! generated artifact, plus the naming scheme for two-pass stats files.


use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

/// Directory collecting all artifacts produced while processing one
/// target file. Shared read/write by every step of an execution; files
/// are coordinated by name uniqueness, not locking.
#[derive(Debug)]
pub struct WorkingDirectory {
    root: PathBuf,
    cwd: PathBuf,
}

impl WorkingDirectory {
    /// Creates (or reuses) the artifact directory for a target file,
    /// `<stem>.recode` beside it.
    pub fn create(target_file: &Path) -> io::Result<WorkingDirectory> {
        let stem = target_file
            .file_stem()
            .unwrap_or_else(|| target_file.as_os_str())
            .to_string_lossy();
        let root = match target_file.parent() {
            Some(parent) if parent != Path::new("") => parent.join(format!("{stem}.recode")),
            _ => PathBuf::from(format!("{stem}.recode")),
        };
        if !root.is_dir() {
            fs::create_dir_all(&root)?;
        }
        let cwd = std::env::current_dir()?;
        info!("working directory: {}", root.display());
        Ok(WorkingDirectory { root, cwd })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The process working directory at construction time. Two-pass
    /// encodes write their stats files there before moving them in.
    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Reserves a path for a new artifact; the name must be unused.
    pub fn new_file(&self, name: &str) -> io::Result<PathBuf> {
        let path = self.root.join(name);
        if path.exists() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("artifact name already taken: {}", path.display()),
            ));
        }
        Ok(path)
    }

    /// Path of an artifact under the root, existing or about to.
    pub fn get_file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Deletes the directory and everything in it.
    pub fn remove(self) -> io::Result<()> {
        fs::remove_dir_all(&self.root)
    }
}

/// Names of the two files ffmpeg writes for a `-passlogfile` base.
pub fn pass_log_file_names(base: &str) -> (String, String) {
    (format!("{base}-0.log"), format!("{base}-0.log.mbtree"))
}

/// First `<base>_<i>` whose stats files collide with nothing in `dir`.
pub fn available_pass_log_name(dir: &Path, base: &str) -> String {
    let mut idx = 0usize;
    loop {
        let candidate = format!("{base}_{idx}");
        let (log, mbtree) = pass_log_file_names(&candidate);
        if !dir.join(log).exists() && !dir.join(mbtree).exists() {
            return candidate;
        }
        idx += 1;
    }
}
