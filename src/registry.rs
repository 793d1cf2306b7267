//! Versioned model registry on the local filesystem.
//!
//! Layout: `{root}/{name}/{version}/model.json` plus `version.json` with the
//! registration metadata. Versions start at 1 and only grow. `version.json`
//! is written last, and a version directory without it is not a version.

use crate::models::{Model, ModelKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

const MODEL_FILE: &str = "model.json";
const VERSION_FILE: &str = "version.json";

/// Attempts at claiming a free version slot before giving up.
const MAX_REGISTER_ATTEMPTS: u32 = 8;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid registry document {path}: {source}")]
    Serde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("model {0} is not registered")]
    NotFound(String),

    #[error("model {name} has no version {version}")]
    VersionNotFound { name: String, version: u32 },

    #[error("could not claim a version for {name} after {attempts} attempts (last tried {last})")]
    VersionConflict { name: String, attempts: u32, last: u32 },
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> RegistryError + '_ {
    move |source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// A trained model together with what is needed to score with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub kind: ModelKind,
    pub model: Model,
    /// Training columns without the target, in matrix order
    pub feature_names: Vec<String>,
    pub target: String,
    pub trained_at: DateTime<Utc>,
}

/// Metadata of one registered version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub name: String,
    pub version: u32,
    pub kind: ModelKind,
    pub run_id: Option<Uuid>,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Registry {
    root: PathBuf,
}

impl Registry {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn model_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn version_dir(&self, name: &str, version: u32) -> PathBuf {
        self.model_dir(name).join(version.to_string())
    }

    /// Registered model names, sorted.
    pub fn list(&self) -> RegistryResult<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root).map_err(io_err(&self.root))? {
            let entry = entry.map_err(io_err(&self.root))?;
            if entry.path().is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Complete versions of `name`, ascending. Empty if unregistered.
    /// Slots still being written or abandoned by a failed write are skipped.
    pub fn versions(&self, name: &str) -> RegistryResult<Vec<u32>> {
        let dir = self.model_dir(name);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut versions = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(io_err(&dir))? {
            let entry = entry.map_err(io_err(&dir))?;
            let Some(v) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            let path = entry.path();
            if path.join(MODEL_FILE).is_file() && path.join(VERSION_FILE).is_file() {
                versions.push(v);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    pub fn latest_version(&self, name: &str) -> RegistryResult<u32> {
        self.versions(name)?
            .last()
            .copied()
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Store `artifact` as the next version of `name`.
    ///
    /// A version slot is claimed by creating its directory. If another
    /// writer already holds the slot the next one is tried, up to
    /// [`MAX_REGISTER_ATTEMPTS`] times.
    pub fn register(
        &self,
        name: &str,
        artifact: &ModelArtifact,
        run_id: Option<Uuid>,
    ) -> RegistryResult<ModelVersion> {
        let model_dir = self.model_dir(name);
        std::fs::create_dir_all(&model_dir).map_err(io_err(&model_dir))?;
        let next = self.versions(name)?.last().map_or(1, |v| v + 1);
        self.register_from(name, next, artifact, run_id)
    }

    fn register_from(
        &self,
        name: &str,
        start: u32,
        artifact: &ModelArtifact,
        run_id: Option<Uuid>,
    ) -> RegistryResult<ModelVersion> {
        let mut version = start;
        for attempt in 1..=MAX_REGISTER_ATTEMPTS {
            let dir = self.version_dir(name, version);
            match std::fs::create_dir(&dir) {
                Ok(()) => {
                    return write_or_release(&dir, || {
                        self.write_version(name, version, &dir, artifact, run_id)
                    })
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    tracing::warn!(
                        "Version {} of {} already taken (attempt {}), trying next",
                        version,
                        name,
                        attempt
                    );
                    version += 1;
                }
                Err(e) => return Err(io_err(&dir)(e)),
            }
        }

        Err(RegistryError::VersionConflict {
            name: name.to_string(),
            attempts: MAX_REGISTER_ATTEMPTS,
            last: version - 1,
        })
    }

    fn write_version(
        &self,
        name: &str,
        version: u32,
        dir: &Path,
        artifact: &ModelArtifact,
        run_id: Option<Uuid>,
    ) -> RegistryResult<ModelVersion> {
        let meta = ModelVersion {
            name: name.to_string(),
            version,
            kind: artifact.kind,
            run_id,
            registered_at: Utc::now(),
        };
        write_json(&dir.join(MODEL_FILE), artifact)?;
        write_json(&dir.join(VERSION_FILE), &meta)?;
        tracing::info!("Registered {} version {}", name, version);
        Ok(meta)
    }

    pub fn load(&self, name: &str, version: u32) -> RegistryResult<ModelArtifact> {
        let path = self.version_dir(name, version).join(MODEL_FILE);
        if !path.exists() {
            return Err(if self.model_dir(name).exists() {
                RegistryError::VersionNotFound {
                    name: name.to_string(),
                    version,
                }
            } else {
                RegistryError::NotFound(name.to_string())
            });
        }
        read_json(&path)
    }

    pub fn load_latest(&self, name: &str) -> RegistryResult<(u32, ModelArtifact)> {
        let version = self.latest_version(name)?;
        Ok((version, self.load(name, version)?))
    }

    pub fn version_info(&self, name: &str, version: u32) -> RegistryResult<ModelVersion> {
        read_json(&self.version_dir(name, version).join(VERSION_FILE))
    }
}

/// Run `write` into a freshly claimed `dir`, removing the directory if it
/// fails so the slot does not look registered.
fn write_or_release<T>(dir: &Path, write: impl FnOnce() -> RegistryResult<T>) -> RegistryResult<T> {
    let result = write();
    if result.is_err() {
        if let Err(e) = std::fs::remove_dir_all(dir) {
            tracing::warn!("Failed to release {}: {}", dir.display(), e);
        }
    }
    result
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> RegistryResult<()> {
    let json = serde_json::to_vec_pretty(value).map_err(|source| RegistryError::Serde {
        path: path.to_path_buf(),
        source,
    })?;
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(io_err(path))?;
    file.write_all(&json).map_err(io_err(path))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> RegistryResult<T> {
    let content = std::fs::read(path).map_err(io_err(path))?;
    serde_json::from_slice(&content).map_err(|source| RegistryError::Serde {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrainingConfig;
    use tempfile::TempDir;

    fn artifact() -> ModelArtifact {
        let kind = ModelKind::LogisticRegression;
        ModelArtifact {
            kind,
            model: Model::from_config(kind, &TrainingConfig::default()),
            feature_names: vec!["A".to_string(), "B".to_string()],
            target: "ATTRITION".to_string(),
            trained_at: Utc::now(),
        }
    }

    #[test]
    fn test_register_creates_sequential_versions() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::new(dir.path());
        assert!(matches!(
            registry.latest_version("lr_model"),
            Err(RegistryError::NotFound(_))
        ));

        let v1 = registry.register("lr_model", &artifact(), None).unwrap();
        let v2 = registry.register("lr_model", &artifact(), Some(Uuid::new_v4())).unwrap();
        assert_eq!((v1.version, v2.version), (1, 2));
        assert_eq!(registry.latest_version("lr_model").unwrap(), 2);
        assert_eq!(registry.list().unwrap(), vec!["lr_model"]);

        let (version, loaded) = registry.load_latest("lr_model").unwrap();
        assert_eq!(version, 2);
        assert_eq!(loaded.feature_names, vec!["A", "B"]);
        assert_eq!(registry.version_info("lr_model", 2).unwrap().run_id, v2.run_id);
        assert!(dir.path().join("lr_model/1/model.json").is_file());
    }

    #[test]
    fn test_register_skips_claimed_slot() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::new(dir.path());
        registry.register("m", &artifact(), None).unwrap();

        // A stale scan still believes version 1 is free
        let meta = registry.register_from("m", 1, &artifact(), None).unwrap();
        assert_eq!(meta.version, 2);
        assert_eq!(registry.versions("m").unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_register_gives_up_after_bounded_attempts() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::new(dir.path());
        for v in 1..=MAX_REGISTER_ATTEMPTS {
            std::fs::create_dir_all(dir.path().join("m").join(v.to_string())).unwrap();
        }

        let err = registry.register_from("m", 1, &artifact(), None).unwrap_err();
        assert!(matches!(
            err,
            RegistryError::VersionConflict { attempts: MAX_REGISTER_ATTEMPTS, last, .. } if last == MAX_REGISTER_ATTEMPTS
        ));
    }

    #[test]
    fn test_incomplete_slots_are_not_versions() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::new(dir.path());
        registry.register("m", &artifact(), None).unwrap();
        std::fs::create_dir_all(dir.path().join("m/2")).unwrap();
        std::fs::create_dir_all(dir.path().join("m/3")).unwrap();
        std::fs::write(dir.path().join("m/3/model.json"), b"{}").unwrap();

        assert_eq!(registry.versions("m").unwrap(), vec![1]);
        assert_eq!(registry.latest_version("m").unwrap(), 1);
        let (version, _) = registry.load_latest("m").unwrap();
        assert_eq!(version, 1);

        // The stale slots are skipped rather than reused
        let meta = registry.register("m", &artifact(), None).unwrap();
        assert_eq!(meta.version, 4);
        assert_eq!(registry.versions("m").unwrap(), vec![1, 4]);
    }

    #[test]
    fn test_failed_write_releases_slot() {
        let dir = TempDir::new().unwrap();
        let slot = dir.path().join("m/1");
        std::fs::create_dir_all(&slot).unwrap();
        std::fs::write(slot.join(MODEL_FILE), b"partial").unwrap();

        let result: RegistryResult<()> = write_or_release(&slot, || {
            Err(RegistryError::NotFound("m".to_string()))
        });
        assert!(result.is_err());
        assert!(!slot.exists());

        let kept = dir.path().join("m/2");
        std::fs::create_dir_all(&kept).unwrap();
        write_or_release(&kept, || Ok(())).unwrap();
        assert!(kept.is_dir());
    }

    #[test]
    fn test_missing_versions_are_typed_errors() {
        let dir = TempDir::new().unwrap();
        let registry = Registry::new(dir.path());
        assert!(matches!(registry.load("nope", 1), Err(RegistryError::NotFound(_))));

        registry.register("m", &artifact(), None).unwrap();
        assert!(matches!(
            registry.load("m", 5),
            Err(RegistryError::VersionNotFound { version: 5, .. })
        ));
    }
}
