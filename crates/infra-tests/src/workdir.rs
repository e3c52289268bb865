//! Per-scenario working directories.
//!
//! Parallel scenarios must not share engine state (`.terraform/`, local
//! state). [`WorkDir::prepare`] copies the Terraform tree into a fresh
//! temporary directory and points the engine at the module inside the copy.
//! The dependency lock file travels with the copy so every scenario installs
//! the pinned provider versions. The copy is deleted when the `WorkDir` is
//! dropped.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum WorkDirError {
    #[error("Terraform module directory not found: {0}")]
    ModuleNotFound(PathBuf),

    #[error("Failed to copy {path}: {source}")]
    Copy {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Working directory handed to the engine.
#[derive(Debug)]
pub enum WorkDir {
    /// The module directory itself (no isolation).
    InPlace(PathBuf),

    /// A private copy of the tree; removed on drop.
    Copied { dir: TempDir, module: PathBuf },
}

impl WorkDir {
    /// Prepare the working directory for one scenario.
    ///
    /// `module` is relative to `root`. With `copy_to_temp`, everything under
    /// `root` except `.terraform/`, `.git/` and state files is copied.
    pub fn prepare(root: &Path, module: &Path, copy_to_temp: bool) -> Result<Self, WorkDirError> {
        let source_module = root.join(module);
        if !source_module.is_dir() {
            return Err(WorkDirError::ModuleNotFound(source_module));
        }

        if !copy_to_temp {
            return Ok(WorkDir::InPlace(source_module));
        }

        let dir = tempfile::Builder::new()
            .prefix("erdtree-tf-")
            .tempdir()
            .map_err(|e| WorkDirError::Copy {
                path: std::env::temp_dir(),
                source: e,
            })?;

        copy_tree(root, dir.path())?;

        let module_copy = dir.path().join(module);
        debug!(
            target: "infra_tests.workdir",
            source = %source_module.display(),
            copy = %module_copy.display(),
            "Copied Terraform tree to temporary directory"
        );

        Ok(WorkDir::Copied {
            dir,
            module: module_copy,
        })
    }

    /// Directory the engine runs in.
    pub fn path(&self) -> &Path {
        match self {
            WorkDir::InPlace(path) => path,
            WorkDir::Copied { module, .. } => module,
        }
    }

    /// Disable cleanup.
    ///
    /// Used whenever destroy has not succeeded yet: the copy holds the only
    /// state file describing what is still deployed.
    pub fn keep(self) -> KeptDir {
        match self {
            WorkDir::InPlace(path) => KeptDir {
                copy_root: None,
                module: path,
            },
            WorkDir::Copied { dir, module } => KeptDir {
                copy_root: Some(dir.keep()),
                module,
            },
        }
    }
}

/// A working directory that outlives its `WorkDir`.
#[derive(Debug)]
pub struct KeptDir {
    copy_root: Option<PathBuf>,
    module: PathBuf,
}

impl KeptDir {
    pub fn path(&self) -> &Path {
        &self.module
    }

    pub fn into_path(self) -> PathBuf {
        self.module
    }

    /// Delete the temporary copy. An in-place directory is left untouched.
    pub fn remove(self) -> io::Result<()> {
        match self.copy_root {
            Some(root) => std::fs::remove_dir_all(root),
            None => Ok(()),
        }
    }
}

fn skip(entry: &walkdir::DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    matches!(&*name, ".terraform" | ".git") || name.contains(".tfstate")
}

fn copy_tree(source: &Path, dest: &Path) -> Result<(), WorkDirError> {
    for entry in WalkDir::new(source).into_iter().filter_entry(|e| !skip(e)) {
        let entry = entry.map_err(|e| WorkDirError::Copy {
            path: e.path().map(Path::to_path_buf).unwrap_or_default(),
            source: e
                .into_io_error()
                .unwrap_or_else(|| io::Error::other("filesystem loop")),
        })?;

        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| WorkDirError::Copy {
                path: entry.path().to_path_buf(),
                source: io::Error::other(e),
            })?;
        let target = dest.join(relative);

        let result = if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
        } else {
            std::fs::copy(entry.path(), &target).map(|_| ())
        };

        result.map_err(|e| WorkDirError::Copy {
            path: entry.path().to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}
