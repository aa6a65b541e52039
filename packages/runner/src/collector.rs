// ABOUTME: Reconciles files produced inside the sandbox back to the host
// ABOUTME: Diffs the staging directory against its pre-run names and copies new regular files out

use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::staging::StagingContext;
use crate::types::CapturedFile;

#[derive(Error, Debug)]
pub enum CollectError {
    #[error("Failed to read staging directory {}: {source}", path.display())]
    ReadStaging {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to prepare results directory {}: {source}", path.display())]
    PrepareDestination {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to copy {name} into {}: {source}", destination.display())]
    Copy {
        name: String,
        destination: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Copies newly produced files into a results directory it owns during collection
#[derive(Debug, Clone)]
pub struct ResultCollector {
    destination: PathBuf,
}

impl ResultCollector {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
        }
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Names of regular files that appeared in the staging directory during the run,
    /// decoded for display
    pub fn new_files(&self, context: &StagingContext) -> Result<Vec<String>, CollectError> {
        Ok(self
            .new_entries(context)?
            .iter()
            .map(|name| name.to_string_lossy().into_owned())
            .collect())
    }

    fn new_entries(&self, context: &StagingContext) -> Result<Vec<OsString>, CollectError> {
        let read_err = |source| CollectError::ReadStaging {
            path: context.path().to_path_buf(),
            source,
        };

        let mut names = Vec::new();
        for entry in fs::read_dir(context.path()).map_err(read_err)? {
            let entry = entry.map_err(read_err)?;
            let name = entry.file_name();
            if context.pre_existing().contains(&name) {
                continue;
            }
            // file_type does not follow symlinks
            let file_type = entry.file_type().map_err(read_err)?;
            if file_type.is_file() {
                names.push(name);
            } else {
                warn!(
                    "Ignoring non-regular entry {} produced by the sandbox",
                    name.to_string_lossy()
                );
            }
        }
        names.sort();
        Ok(names)
    }

    /// Clear the destination and copy every new file into it.
    ///
    /// On any copy failure the destination is cleared again so no partial set survives.
    pub fn collect(&self, context: &StagingContext) -> Result<Vec<CapturedFile>, CollectError> {
        let names = self.new_entries(context)?;
        self.reset_destination()?;

        let mut captured = Vec::with_capacity(names.len());
        for name in names {
            match self.copy_one(context, &name) {
                Ok(file) => captured.push(file),
                Err(err) => {
                    if let Err(cleanup) = self.reset_destination() {
                        warn!(
                            "Failed to clear partial results in {}: {}",
                            self.destination.display(),
                            cleanup
                        );
                    }
                    return Err(err);
                }
            }
        }

        info!(
            "Collected {} file(s) into {}",
            captured.len(),
            self.destination.display()
        );
        Ok(captured)
    }

    fn copy_one(&self, context: &StagingContext, name: &OsStr) -> Result<CapturedFile, CollectError> {
        let display_name = name.to_string_lossy().into_owned();
        let target = self.destination.join(name);
        let size_bytes =
            fs::copy(context.path().join(name), &target).map_err(|source| CollectError::Copy {
                name: display_name.clone(),
                destination: self.destination.clone(),
                source,
            })?;
        debug!("Captured {} ({} bytes)", display_name, size_bytes);

        Ok(CapturedFile {
            name: display_name,
            path: target,
            size_bytes,
        })
    }

    fn reset_destination(&self) -> Result<(), CollectError> {
        let prepare_err = |source| CollectError::PrepareDestination {
            path: self.destination.clone(),
            source,
        };

        match fs::symlink_metadata(&self.destination) {
            Ok(meta) if meta.is_dir() => fs::remove_dir_all(&self.destination).map_err(prepare_err)?,
            Ok(_) => fs::remove_file(&self.destination).map_err(prepare_err)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(prepare_err(err)),
        }
        fs::create_dir_all(&self.destination).map_err(prepare_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staging::ContextStager;
    use crate::types::ExecutionRequest;
    use tempfile::TempDir;

    fn staged() -> (TempDir, StagingContext) {
        let src = TempDir::new().unwrap();
        fs::write(src.path().join("main.py"), b"print(1)").unwrap();
        fs::write(src.path().join("requirements.txt"), b"").unwrap();
        fs::write(src.path().join("input.csv"), b"a,b").unwrap();
        let request = ExecutionRequest::new(
            src.path().join("main.py"),
            src.path().join("requirements.txt"),
        )
        .with_inputs(vec![src.path().join("input.csv")]);
        let context = ContextStager::new().stage(&request).unwrap();
        (src, context)
    }

    #[test]
    fn test_only_new_regular_files_are_collected() {
        let (_src, context) = staged();
        let out = TempDir::new().unwrap();
        let destination = out.path().join("results");

        fs::write(context.path().join("output.txt"), b"result").unwrap();
        fs::write(context.path().join("input.csv"), b"modified in place").unwrap();
        fs::create_dir(context.path().join("__pycache__")).unwrap();
        fs::write(context.path().join("__pycache__").join("x.pyc"), b"").unwrap();

        let captured = ResultCollector::new(&destination).collect(&context).unwrap();

        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].name, "output.txt");
        assert_eq!(captured[0].size_bytes, 6);
        assert_eq!(fs::read(destination.join("output.txt")).unwrap(), b"result");
        assert!(!destination.join("input.csv").exists());
        assert!(!destination.join("__pycache__").exists());
    }

    #[test]
    fn test_no_new_files_leaves_empty_destination() {
        let (_src, context) = staged();
        let out = TempDir::new().unwrap();
        let destination = out.path().join("results");

        let captured = ResultCollector::new(&destination).collect(&context).unwrap();

        assert!(captured.is_empty());
        assert!(destination.is_dir());
        assert_eq!(fs::read_dir(&destination).unwrap().count(), 0);
    }

    #[test]
    fn test_stale_results_are_cleared() {
        let (_src, context) = staged();
        let out = TempDir::new().unwrap();
        let destination = out.path().join("results");
        fs::create_dir_all(destination.join("nested")).unwrap();
        fs::write(destination.join("stale.txt"), b"old").unwrap();
        fs::write(context.path().join("fresh.txt"), b"new").unwrap();

        ResultCollector::new(&destination).collect(&context).unwrap();

        let mut names: Vec<String> = fs::read_dir(&destination)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["fresh.txt"]);
    }

    #[test]
    fn test_new_files_lists_without_copying() {
        let (_src, context) = staged();
        let out = TempDir::new().unwrap();
        let destination = out.path().join("results");
        fs::write(context.path().join("b.txt"), b"").unwrap();
        fs::write(context.path().join("a.txt"), b"").unwrap();

        let names = ResultCollector::new(&destination)
            .new_files(&context)
            .unwrap();

        assert_eq!(names, vec!["a.txt", "b.txt"]);
        assert!(!destination.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_not_collected() {
        let (_src, context) = staged();
        let out = TempDir::new().unwrap();
        std::os::unix::fs::symlink("/etc/hostname", context.path().join("link")).unwrap();

        let names = ResultCollector::new(out.path().join("results"))
            .new_files(&context)
            .unwrap();

        assert!(names.is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_names_are_copied_verbatim() {
        use std::os::unix::ffi::OsStrExt;

        let (_src, context) = staged();
        let out = TempDir::new().unwrap();
        let destination = out.path().join("results");
        let name = OsStr::from_bytes(b"caf\xe9.txt");
        fs::write(context.path().join(name), b"latin-1").unwrap();

        let captured = ResultCollector::new(&destination).collect(&context).unwrap();

        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].name, "caf\u{FFFD}.txt");
        assert_eq!(captured[0].path, destination.join(name));
        assert_eq!(captured[0].size_bytes, 7);
        assert_eq!(fs::read(destination.join(name)).unwrap(), b"latin-1");
    }
}
