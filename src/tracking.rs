//! File-backed experiment tracking.
//!
//! Each run is a JSON document at `{dir}/{experiment}/{run_id}/run.json`
//! holding params, metrics, tags and input lineage. The document is
//! rewritten after every update so a crashed step still leaves its partial
//! record behind.

use crate::config::TrackingConfig;
use crate::frame::Frame;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const RUN_FILE: &str = "run.json";

/// Tag naming the registry entry a training run produced.
pub const REGISTERED_MODEL_TAG: &str = "registered_model";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
}

/// Dataset consumed by a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRecord {
    /// Role of the dataset, e.g. `training` or `inference`
    pub context: String,
    pub source: String,
    pub rows: usize,
    pub columns: usize,
}

impl InputRecord {
    pub fn from_frame(context: &str, source: &Path, frame: &Frame) -> Self {
        Self {
            context: context.to_string(),
            source: source.display().to_string(),
            rows: frame.height(),
            columns: frame.width(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub name: String,
    pub experiment: String,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub inputs: Vec<InputRecord>,
}

impl Run {
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags.get(name).map(String::as_str)
    }
}

/// Handle to one experiment directory.
#[derive(Debug, Clone)]
pub struct Tracker {
    experiment: String,
    root: PathBuf,
}

impl Tracker {
    pub fn new(dir: impl AsRef<Path>, experiment: &str) -> Result<Self> {
        let root = dir.as_ref().join(experiment);
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create tracking dir {}", root.display()))?;
        Ok(Self {
            experiment: experiment.to_string(),
            root,
        })
    }

    pub fn from_config(config: &TrackingConfig) -> Result<Self> {
        Self::new(&config.dir, &config.experiment)
    }

    pub fn experiment(&self) -> &str {
        &self.experiment
    }

    /// Create a RUNNING run and persist it immediately.
    pub fn start_run(&self, name: &str) -> Result<ActiveRun<'_>> {
        let run = Run {
            id: Uuid::new_v4(),
            name: name.to_string(),
            experiment: self.experiment.clone(),
            status: RunStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            params: BTreeMap::new(),
            metrics: BTreeMap::new(),
            tags: BTreeMap::new(),
            inputs: Vec::new(),
        };
        tracing::info!("Started run {} ({})", run.name, run.id);
        let active = ActiveRun {
            tracker: self,
            run,
            closed: false,
        };
        active.save()?;
        Ok(active)
    }

    fn run_path(&self, id: &Uuid) -> PathBuf {
        self.root.join(id.to_string()).join(RUN_FILE)
    }

    pub fn get_run(&self, id: &Uuid) -> Result<Run> {
        let path = self.run_path(id);
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read run {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Corrupt run file {}", path.display()))
    }

    /// All runs of the experiment, oldest first.
    pub fn list_runs(&self) -> Result<Vec<Run>> {
        let mut runs = Vec::new();
        for entry in std::fs::read_dir(&self.root)
            .with_context(|| format!("Failed to list {}", self.root.display()))?
        {
            let path = entry?.path().join(RUN_FILE);
            if !path.is_file() {
                continue;
            }
            let content = std::fs::read_to_string(&path)?;
            match serde_json::from_str::<Run>(&content) {
                Ok(run) => runs.push(run),
                Err(e) => tracing::warn!("Skipping unreadable run {}: {}", path.display(), e),
            }
        }
        runs.sort_by_key(|r| r.start_time);
        Ok(runs)
    }

    /// Runs with the given status (any if `None`), sorted by `order_by_metric`
    /// descending. Runs without the metric come last.
    pub fn search_runs(&self, status: Option<RunStatus>, order_by_metric: &str) -> Result<Vec<Run>> {
        let mut runs: Vec<Run> = self
            .list_runs()?
            .into_iter()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .collect();
        runs.sort_by(|a, b| match (a.metric(order_by_metric), b.metric(order_by_metric)) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
        Ok(runs)
    }

    /// Finished run with the highest value of `metric`, if any has it.
    /// With `tag`, only runs carrying that tag are considered.
    pub fn best_run(&self, metric: &str, tag: Option<&str>) -> Result<Option<Run>> {
        Ok(self
            .search_runs(Some(RunStatus::Finished), metric)?
            .into_iter()
            .find(|r| r.metric(metric).is_some() && tag.map_or(true, |t| r.tag(t).is_some())))
    }
}

/// A run being recorded. Dropping it without calling [`ActiveRun::finish`]
/// marks it FAILED.
#[derive(Debug)]
pub struct ActiveRun<'a> {
    tracker: &'a Tracker,
    run: Run,
    closed: bool,
}

impl ActiveRun<'_> {
    pub fn id(&self) -> Uuid {
        self.run.id
    }

    pub fn run(&self) -> &Run {
        &self.run
    }

    fn save(&self) -> Result<()> {
        let path = self.tracker.run_path(&self.run.id);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.run)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("Failed to write run {}", path.display()))
    }

    pub fn log_param(&mut self, key: &str, value: impl ToString) -> Result<()> {
        self.run.params.insert(key.to_string(), value.to_string());
        self.save()
    }

    pub fn log_params(&mut self, params: &BTreeMap<String, String>) -> Result<()> {
        self.run.params.extend(params.clone());
        self.save()
    }

    pub fn log_metric(&mut self, key: &str, value: f64) -> Result<()> {
        self.run.metrics.insert(key.to_string(), value);
        self.save()
    }

    pub fn log_metrics(&mut self, metrics: &BTreeMap<String, f64>) -> Result<()> {
        self.run.metrics.extend(metrics.iter().map(|(k, v)| (k.clone(), *v)));
        self.save()
    }

    pub fn set_tag(&mut self, key: &str, value: impl ToString) -> Result<()> {
        self.run.tags.insert(key.to_string(), value.to_string());
        self.save()
    }

    pub fn log_input(&mut self, input: InputRecord) -> Result<()> {
        tracing::debug!(
            "Run {} input {}: {} ({} x {})",
            self.run.id,
            input.context,
            input.source,
            input.rows,
            input.columns
        );
        self.run.inputs.push(input);
        self.save()
    }

    fn close(&mut self, status: RunStatus) -> Result<Run> {
        self.run.status = status;
        self.run.end_time = Some(Utc::now());
        self.closed = true;
        self.save()?;
        Ok(self.run.clone())
    }

    pub fn finish(mut self) -> Result<Run> {
        let run = self.close(RunStatus::Finished)?;
        tracing::info!("Finished run {} ({})", run.name, run.id);
        Ok(run)
    }

    pub fn fail(mut self, reason: &str) -> Result<Run> {
        self.run.tags.insert("error".to_string(), reason.to_string());
        let run = self.close(RunStatus::Failed)?;
        tracing::warn!("Run {} failed: {}", run.name, reason);
        Ok(run)
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close(RunStatus::Failed) {
                tracing::warn!("Failed to mark run {} as failed: {}", self.run.id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn finished_run(tracker: &Tracker, name: &str, auc: Option<f64>) -> Run {
        let mut run = tracker.start_run(name).unwrap();
        run.log_param("model", name).unwrap();
        if let Some(auc) = auc {
            run.log_metric("roc_auc", auc).unwrap();
        }
        run.finish().unwrap()
    }

    #[test]
    fn test_best_run_with_tag() {
        let dir = TempDir::new().unwrap();
        let tracker = Tracker::new(dir.path(), "exp").unwrap();
        finished_run(&tracker, "untagged", Some(0.95));
        let mut run = tracker.start_run("tagged").unwrap();
        run.log_metric("roc_auc", 0.8).unwrap();
        run.set_tag(REGISTERED_MODEL_TAG, "rf_model").unwrap();
        run.finish().unwrap();

        assert_eq!(tracker.best_run("roc_auc", None).unwrap().unwrap().name, "untagged");
        let best = tracker.best_run("roc_auc", Some(REGISTERED_MODEL_TAG)).unwrap().unwrap();
        assert_eq!(best.name, "tagged");
        assert_eq!(best.tag(REGISTERED_MODEL_TAG), Some("rf_model"));
        assert!(tracker.best_run("roc_auc", Some("other")).unwrap().is_none());
    }

    #[test]
    fn test_run_lifecycle_persists() {
        let dir = TempDir::new().unwrap();
        let tracker = Tracker::new(dir.path(), "exp").unwrap();

        let mut active = tracker.start_run("rf").unwrap();
        let id = active.id();
        assert_eq!(tracker.get_run(&id).unwrap().status, RunStatus::Running);

        active.log_metrics(&BTreeMap::from([("f1".to_string(), 0.5)])).unwrap();
        active.set_tag("registered_model", "rf_model").unwrap();
        active
            .log_input(InputRecord {
                context: "training".into(),
                source: "train_clean.csv".into(),
                rows: 10,
                columns: 4,
            })
            .unwrap();
        active.finish().unwrap();

        let run = tracker.get_run(&id).unwrap();
        assert_eq!(run.status, RunStatus::Finished);
        assert!(run.end_time.is_some());
        assert_eq!(run.metric("f1"), Some(0.5));
        assert_eq!(run.tag("registered_model"), Some("rf_model"));
        assert_eq!(run.inputs.len(), 1);
        assert!(dir.path().join("exp").join(id.to_string()).join("run.json").is_file());
    }

    #[test]
    fn test_dropped_run_is_failed() {
        let dir = TempDir::new().unwrap();
        let tracker = Tracker::new(dir.path(), "exp").unwrap();
        let id = {
            let run = tracker.start_run("broken").unwrap();
            run.id()
        };
        assert_eq!(tracker.get_run(&id).unwrap().status, RunStatus::Failed);
    }

    #[test]
    fn test_search_runs_orders_by_metric() {
        let dir = TempDir::new().unwrap();
        let tracker = Tracker::new(dir.path(), "exp").unwrap();
        finished_run(&tracker, "a", Some(0.7));
        finished_run(&tracker, "b", None);
        finished_run(&tracker, "c", Some(0.9));
        let failed = tracker.start_run("d").unwrap();
        failed.fail("boom").unwrap();

        let names: Vec<String> = tracker
            .search_runs(Some(RunStatus::Finished), "roc_auc")
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        assert_eq!(names, vec!["c", "a", "b"]);

        assert_eq!(tracker.search_runs(None, "roc_auc").unwrap().len(), 4);
        assert_eq!(tracker.best_run("roc_auc", None).unwrap().unwrap().name, "c");
        assert!(tracker.best_run("missing_metric", None).unwrap().is_none());
    }
}
