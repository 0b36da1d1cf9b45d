//! Declarative YAML suites.
//!
//! A suite file describes a test tree whose bodies and fixtures are short
//! step scripts, so the scheduler can be driven without a discovery layer.

pub mod manifest;
pub mod script;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::tree::{TestTree, TreeError};

pub use manifest::{NodeSpec, ParamSpec, Step, StepSpec, SuiteFile};
pub use script::build_tree;

/// Errors raised while loading a suite file.
#[derive(Debug, Error)]
pub enum SuiteError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{}: invalid suite: {source}", path.display())]
    Yaml {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("{at}: {message}")]
    Invalid { at: String, message: String },
    #[error(transparent)]
    Tree(#[from] TreeError),
}

impl SuiteError {
    pub fn invalid(at: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            at: at.into(),
            message: message.into(),
        }
    }
}

/// Parse suite text. `path` is only used in error messages.
///
/// # Errors
///
/// Returns [`SuiteError::Yaml`] if the text is not a valid suite document.
pub fn parse_suite(input: &str, path: &Path) -> Result<SuiteFile, SuiteError> {
    serde_yaml::from_str(input).map_err(|source| SuiteError::Yaml {
        path: path.to_path_buf(),
        source,
    })
}

/// Read and parse a suite file.
///
/// # Errors
///
/// Returns [`SuiteError::Io`] or [`SuiteError::Yaml`].
pub fn load_suite(path: &Path) -> Result<SuiteFile, SuiteError> {
    let input = std::fs::read_to_string(path).map_err(|source| SuiteError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_suite(&input, path)
}

/// Read a suite file and build its test tree.
///
/// # Errors
///
/// Any loading, validation or tree-construction error.
pub fn load_tree(path: &Path) -> Result<TestTree, SuiteError> {
    build_tree(load_suite(path)?)
}
