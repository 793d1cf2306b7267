//! Fit, evaluate, track and register every configured model.

use super::{labels, load_oot, OotData};
use crate::config::Config;
use crate::features::ReferenceSchema;
use crate::frame::{read_csv, Frame};
use crate::models::{Classifier, Evaluation, Model, ModelKind};
use crate::registry::{ModelArtifact, Registry};
use crate::tracking::{InputRecord, Tracker, REGISTERED_MODEL_TAG};
use anyhow::{Context, Result};
use chrono::Utc;
use ndarray::{Array1, Array2};
use uuid::Uuid;

/// Outcome of training one model.
#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub kind: ModelKind,
    pub run_id: Uuid,
    pub holdout: Evaluation,
    pub oot: Option<Evaluation>,
    /// Registered version, `None` when registration failed
    pub version: Option<u32>,
}

impl std::fmt::Display for TrainedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.holdout)?;
        if let Some(oot) = &self.oot {
            write!(f, ", OOT {}", oot)?;
        }
        match self.version {
            Some(v) => write!(f, " (v{})", v),
            None => write!(f, " (unregistered)"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrainStats {
    pub models: Vec<TrainedModel>,
}

impl TrainStats {
    /// Model with the highest holdout ROC AUC, if any could compute one.
    pub fn best(&self) -> Option<&TrainedModel> {
        self.models
            .iter()
            .filter(|m| m.holdout.roc_auc.is_some())
            .max_by(|a, b| a.holdout.roc_auc.unwrap_or(0.0).total_cmp(&b.holdout.roc_auc.unwrap_or(0.0)))
    }
}

impl std::fmt::Display for TrainStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Trained: {}", self.models.len())?;
        if let Some(best) = self.best() {
            write!(f, ", Best: {}", best)?;
        }
        Ok(())
    }
}

/// Features and labels of one labelled matrix.
struct Dataset {
    x: Array2<f64>,
    y: Vec<i64>,
}

impl Dataset {
    fn y_f64(&self) -> Array1<f64> {
        self.y.iter().map(|&v| v as f64).collect()
    }
}

fn labelled_dataset(frame: &Frame, schema: &ReferenceSchema, target: &str) -> Result<Dataset> {
    let y = labels(frame, target)?;
    let x = schema.align(frame)?.to_array(schema.columns())?;
    Ok(Dataset { x, y })
}

pub fn run_train(config: &Config, tracker: &Tracker, registry: &Registry) -> Result<TrainStats> {
    let target = &config.features.target_column;
    let train_path = config.output.train_clean_path();
    let train = read_csv(&train_path)?;
    if !train.contains(target) {
        anyhow::bail!("Target {} missing from {}", target, train_path.display());
    }

    let features = ReferenceSchema::of(&train).without(target);
    if features.is_empty() {
        anyhow::bail!("{} has no feature columns", train_path.display());
    }
    let training = labelled_dataset(&train, &features, target)?;
    let y_train = training.y_f64();

    let test_path = config.output.test_clean_path();
    let test = read_csv(&test_path)?;
    let holdout = labelled_dataset(&test, &features, target)
        .with_context(|| format!("Invalid holdout {}", test_path.display()))?;

    let oot = match load_oot(config)? {
        Some(OotData {
            clean,
            labels: Some(y),
            ..
        }) => Some(Dataset {
            x: features.align(&clean)?.to_array(features.columns())?,
            y,
        }),
        Some(_) => {
            tracing::info!("OOT data has no {} column; skipping OOT evaluation", target);
            None
        }
        None => None,
    };

    tracing::info!(
        "Training {} models on {} rows x {} features",
        config.training.models.len(),
        training.y.len(),
        features.len()
    );

    let mut stats = TrainStats::default();
    for &kind in &config.training.models {
        let mut run = tracker.start_run(kind.as_str())?;
        let mut model = Model::from_config(kind, &config.training);
        run.log_param("model_type", kind)?;
        run.log_params(&model.params())?;
        run.log_input(InputRecord::from_frame("training", &train_path, &train))?;

        if let Err(e) = model.fit(&training.x, &y_train) {
            run.fail(&e.to_string())?;
            return Err(e.context(format!("Failed to fit {}", kind)));
        }

        let proba = model.predict_proba(&holdout.x)?.to_vec();
        let holdout_eval = Evaluation::from_proba(&holdout.y, &proba);
        run.log_metrics(&holdout_eval.to_metrics(""))?;

        let oot_eval = match &oot {
            Some(data) => {
                let proba = model.predict_proba(&data.x)?.to_vec();
                let eval = Evaluation::from_proba(&data.y, &proba);
                run.log_metrics(&eval.to_metrics("oot_"))?;
                Some(eval)
            }
            None => None,
        };

        let name = kind.registered_name();
        let artifact = ModelArtifact {
            kind,
            model,
            feature_names: features.columns().to_vec(),
            target: target.clone(),
            trained_at: Utc::now(),
        };
        let version = match registry.register(&name, &artifact, Some(run.id())) {
            Ok(meta) => {
                run.set_tag(REGISTERED_MODEL_TAG, &name)?;
                run.set_tag("registered_version", meta.version)?;
                Some(meta.version)
            }
            Err(e) => {
                tracing::warn!("Failed to register {}: {}", name, e);
                None
            }
        };

        let trained = TrainedModel {
            kind,
            run_id: run.id(),
            holdout: holdout_eval,
            oot: oot_eval,
            version,
        };
        run.finish()?;
        tracing::info!("{}", trained);
        stats.models.push(trained);
    }

    tracing::info!("Train complete: {}", stats);
    Ok(stats)
}
