//! Wrapper template management.
//!
//! A wrapper is a fixed prefix that frames job content before it is sent
//! to the remote model. Wrappers live in a directory as
//! `wrapper_<name>.txt` files and are selected by name; a missing wrapper
//! is terminal for the job that needed it.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File name prefix shared by all wrapper templates.
const WRAPPER_FILE_PREFIX: &str = "wrapper_";

/// Errors that can occur while loading wrapper templates.
#[derive(Debug, Error)]
pub enum WrapperError {
    /// The named wrapper file does not exist.
    #[error("Wrapper template '{name}' not found at {path}")]
    NotFound { name: String, path: PathBuf },

    /// IO error while reading a wrapper file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Directory of named wrapper templates.
#[derive(Debug, Clone)]
pub struct WrapperLibrary {
    dir: PathBuf,
}

impl WrapperLibrary {
    /// Creates a library over the given directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Returns the path a named wrapper would live at.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{WRAPPER_FILE_PREFIX}{name}.txt"))
    }

    /// Loads a wrapper template by name.
    pub fn load(&self, name: &str) -> Result<String, WrapperError> {
        let path = self.path_for(name);
        if !path.exists() {
            return Err(WrapperError::NotFound {
                name: name.to_string(),
                path,
            });
        }
        Ok(fs::read_to_string(path)?)
    }

    /// Lists the names of all available wrappers, sorted.
    pub fn available(&self) -> Result<Vec<String>, WrapperError> {
        let mut names = Vec::new();
        if !self.dir.exists() {
            return Ok(names);
        }
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if let Some(name) = wrapper_name(&path) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Combines a wrapper template with job content into the full request text.
pub fn build_prompt(wrapper: &str, content: &str) -> String {
    format!("{wrapper}{content}")
}

/// Extracts the wrapper name from a `wrapper_<name>.txt` path.
fn wrapper_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    if path.extension()?.to_str()? != "txt" {
        return None;
    }
    stem.strip_prefix(WRAPPER_FILE_PREFIX)
        .map(|name| name.to_string())
}
