use crate::io::RasterStore;
use crate::types::{DemError, DemResult};
use std::path::{Path, PathBuf};

/// Result of an idempotent step
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome<T> {
    /// Every artifact already existed; nothing was produced
    Skipped,
    Produced(T),
}

/// Staging area handed to the producer of an [`IdempotentStep`].
///
/// Every declared path gets its own staged path inside a temporary directory
/// created in the target's own directory, so committing is a same-filesystem
/// rename.
pub struct Staging {
    /// (target, staged) for every declared path
    paths: Vec<(PathBuf, PathBuf)>,
}

impl Staging {
    /// Where the producer must write the artifact destined for `target`.
    /// Fails for paths the step did not declare.
    pub fn path_for(&self, target: &Path) -> DemResult<PathBuf> {
        self.paths
            .iter()
            .find(|(t, _)| t == target)
            .map(|(_, staged)| staged.clone())
            .ok_or_else(|| {
                DemError::Processing(format!("{} is not an output of this step", target.display()))
            })
    }
}

/// A step whose result is a set of raster artifacts on disk.
///
/// Each artifact is a list of acceptable paths (alternative encodings of the
/// same product); the step is complete once every artifact has at least one
/// existing path. Producers write into a staging directory next to the
/// outputs and the results are moved into place only after the producer
/// succeeded, so an interrupted run never leaves a partial artifact at a
/// final path.
#[derive(Debug, Clone)]
pub struct IdempotentStep {
    name: String,
    artifacts: Vec<Vec<PathBuf>>,
}

impl IdempotentStep {
    pub fn new<S: Into<String>>(name: S, artifacts: Vec<Vec<PathBuf>>) -> Self {
        Self {
            name: name.into(),
            artifacts,
        }
    }

    /// Step with one artifact at one path
    pub fn single<S: Into<String>>(name: S, output: PathBuf) -> Self {
        Self::new(name, vec![vec![output]])
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// First existing path of every artifact, or `None` if any is missing
    pub fn existing<S: RasterStore + ?Sized>(&self, store: &S) -> Option<Vec<PathBuf>> {
        self.artifacts
            .iter()
            .map(|alternatives| alternatives.iter().find(|p| store.exists(p)).cloned())
            .collect()
    }

    pub fn is_complete<S: RasterStore + ?Sized>(&self, store: &S) -> bool {
        self.existing(store).is_some()
    }

    /// Skip if complete, otherwise [`IdempotentStep::produce`]
    pub fn run<S, T, F>(&self, store: &S, producer: F) -> DemResult<StepOutcome<T>>
    where
        S: RasterStore + ?Sized,
        F: FnOnce(&Staging) -> DemResult<T>,
    {
        if self.is_complete(store) {
            log::warn!("{}: outputs already exist, skipping", self.name);
            return Ok(StepOutcome::Skipped);
        }
        self.produce(store, producer).map(StepOutcome::Produced)
    }

    /// Run `producer` against a fresh staging directory and move whatever it
    /// staged to the final paths. Every artifact must end up with one path.
    pub fn produce<S, T, F>(&self, store: &S, producer: F) -> DemResult<T>
    where
        S: RasterStore + ?Sized,
        F: FnOnce(&Staging) -> DemResult<T>,
    {
        if self.artifacts.iter().flatten().next().is_none() {
            return Err(DemError::Processing(format!("{}: no outputs declared", self.name)));
        }

        // one temporary directory per target directory, dropped on return
        let mut dirs: Vec<(PathBuf, tempfile::TempDir)> = Vec::new();
        let mut paths = Vec::new();
        for (i, alternatives) in self.artifacts.iter().enumerate() {
            for (j, target) in alternatives.iter().enumerate() {
                let parent = non_empty_parent(target).unwrap_or_else(|| Path::new("."));
                let index = match dirs.iter().position(|(p, _)| p == parent) {
                    Some(index) => index,
                    None => {
                        std::fs::create_dir_all(parent)?;
                        let dir = tempfile::Builder::new()
                            .prefix(".staging-")
                            .tempdir_in(parent)?;
                        dirs.push((parent.to_path_buf(), dir));
                        dirs.len() - 1
                    }
                };
                let name = target
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "artifact".to_string());
                let staged = dirs[index].1.path().join(format!("{}_{}_{}", i, j, name));
                paths.push((target.clone(), staged));
            }
        }
        let staging = Staging { paths };

        let value = producer(&staging)?;

        for alternatives in &self.artifacts {
            let mut committed = false;
            for target in alternatives {
                let staged = staging.path_for(target)?;
                if store.exists(&staged) {
                    store.rename(&staged, target)?;
                    committed = true;
                }
            }
            if !committed {
                return Err(DemError::Processing(format!(
                    "{}: producer did not write any of {:?}",
                    self.name, alternatives
                )));
            }
        }
        Ok(value)
    }
}

fn non_empty_parent(path: &Path) -> Option<&Path> {
    path.parent().filter(|p| !p.as_os_str().is_empty())
}
