// ABOUTME: Builds the per-run staging directory mounted into the sandbox
// ABOUTME: Validates every declared file up front and copies it under its base name

use std::collections::BTreeSet;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::error::StageError;
use crate::types::ExecutionRequest;

const STAGING_PREFIX: &str = "scriptbox-";

/// Exclusively owned staging directory for one run.
///
/// Dropping the context deletes the directory and everything the sandbox wrote into it.
#[derive(Debug)]
pub struct StagingContext {
    dir: TempDir,
    script_name: String,
    manifest_name: String,
    pre_existing: BTreeSet<OsString>,
}

impl StagingContext {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    pub fn manifest_name(&self) -> &str {
        &self.manifest_name
    }

    /// Entry names present before the sandbox ran, exactly as they appear on disk
    pub fn pre_existing(&self) -> &BTreeSet<OsString> {
        &self.pre_existing
    }
}

/// Copies the request files into a fresh staging directory
#[derive(Debug, Clone, Default)]
pub struct ContextStager {
    parent: Option<PathBuf>,
}

impl ContextStager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create staging directories under `parent` instead of the system temp dir
    pub fn in_dir(parent: impl Into<PathBuf>) -> Self {
        Self {
            parent: Some(parent.into()),
        }
    }

    pub fn stage(&self, request: &ExecutionRequest) -> Result<StagingContext, StageError> {
        let declared: Vec<&Path> = [request.script.as_path(), request.manifest.as_path()]
            .into_iter()
            .chain(request.inputs.iter().map(PathBuf::as_path))
            .collect();

        // Nothing is created until every declared path checks out
        for path in &declared {
            validate_file(path)?;
        }

        let mut builder = tempfile::Builder::new();
        builder.prefix(STAGING_PREFIX);
        let dir = match &self.parent {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
        .map_err(|source| StageError::Io {
            path: self.parent.clone().unwrap_or_else(std::env::temp_dir),
            source,
        })?;

        let mut staged = BTreeSet::new();
        for path in &declared {
            let name = base_name(path)?;
            if !staged.insert(name.clone()) {
                warn!(
                    "Staged file name {} is declared more than once; the later copy wins",
                    name.to_string_lossy()
                );
            }
            let target = dir.path().join(&name);
            fs::copy(path, &target).map_err(|source| StageError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            debug!("Staged {} as {}", path.display(), target.display());
        }

        let script_name = base_name(&request.script)?.to_string_lossy().into_owned();
        let manifest_name = base_name(&request.manifest)?.to_string_lossy().into_owned();

        info!(
            "Staged {} file(s) in {}",
            staged.len(),
            dir.path().display()
        );

        Ok(StagingContext {
            dir,
            script_name,
            manifest_name,
            pre_existing: staged,
        })
    }
}

fn validate_file(path: &Path) -> Result<(), StageError> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(StageError::NotAFile(path.to_path_buf())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(StageError::FileNotFound(path.to_path_buf()))
        }
        Err(source) => Err(StageError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn base_name(path: &Path) -> Result<OsString, StageError> {
    path.file_name()
        .map(OsStr::to_os_string)
        .ok_or_else(|| StageError::NotAFile(path.to_path_buf()))
}
