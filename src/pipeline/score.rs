//! Batch inference over out-of-time data and publication of the scores.

use super::{load_oot, OotData};
use crate::config::Config;
use crate::features::ReferenceSchema;
use crate::frame::{write_csv, Column, Frame};
use crate::io::{create_output_store, get_output_prefix};
use crate::models::{Classifier, Evaluation};
use crate::registry::{ModelArtifact, Registry};
use crate::scoring::{
    build_scores, load_date, publish_scores, resolve_codmes, Published, RiskProfile,
};
use crate::tracking::{InputRecord, Tracker, REGISTERED_MODEL_TAG};
use anyhow::{Context, Result};
use chrono::Utc;

/// Registered model picked for scoring.
#[derive(Debug, Clone)]
pub struct SelectedModel {
    pub name: String,
    pub version: u32,
    pub artifact: ModelArtifact,
}

#[derive(Debug, Clone)]
pub struct ScoreStats {
    pub model_name: String,
    pub model_version: u32,
    pub codmes: i64,
    pub rows: usize,
    pub high_risk: usize,
    pub medium_risk: usize,
    pub low_risk: usize,
    /// Metrics against the OOT target, when the raw data carried one
    pub oot: Option<Evaluation>,
    pub published: Published,
}

impl std::fmt::Display for ScoreStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Model: {} v{}, codmes: {}, Scored: {} (High: {}, Medium: {}, Low: {})",
            self.model_name,
            self.model_version,
            self.codmes,
            self.rows,
            self.high_risk,
            self.medium_risk,
            self.low_risk
        )
    }
}

/// Configured model if set, else the latest version of the model registered
/// by the best finished run.
pub fn select_model(config: &Config, tracker: &Tracker, registry: &Registry) -> Result<SelectedModel> {
    if let Some(name) = &config.scoring.model_name {
        let version = match config.scoring.model_version {
            Some(v) => v,
            None => registry.latest_version(name)?,
        };
        let artifact = registry.load(name, version)?;
        tracing::info!("Using configured model {} v{}", name, version);
        return Ok(SelectedModel {
            name: name.clone(),
            version,
            artifact,
        });
    }

    let metric = &config.training.selection_metric;
    let best = tracker
        .best_run(metric, Some(REGISTERED_MODEL_TAG))?
        .with_context(|| format!("No finished run with {} and a registered model", metric))?;
    let name = best
        .tag(REGISTERED_MODEL_TAG)
        .with_context(|| format!("Run {} has no {} tag", best.id, REGISTERED_MODEL_TAG))?
        .to_string();
    let (version, artifact) = registry.load_latest(&name)?;
    tracing::info!(
        "Best run {} ({}) has {}={:.4}; using {} v{}",
        best.name,
        best.id,
        metric,
        best.metric(metric).unwrap_or(f64::NAN),
        name,
        version
    );
    Ok(SelectedModel {
        name,
        version,
        artifact,
    })
}

fn count_profile(scores: &Frame, profile: RiskProfile) -> usize {
    scores.column("risk_profile").map_or(0, |c| {
        (0..c.len())
            .filter(|&i| c.label_at(i).as_deref() == Some(profile.as_str()))
            .count()
    })
}

pub async fn run_score(config: &Config, tracker: &Tracker, registry: &Registry) -> Result<ScoreStats> {
    let selected = select_model(config, tracker, registry)?;
    let mut run = tracker.start_run("batch_inference")?;
    run.log_param("model_name", &selected.name)?;
    run.log_param("model_version", selected.version)?;

    let OotData { raw, clean, labels } = load_oot(config)?.with_context(|| {
        format!(
            "OOT inputs not found: {} / {}",
            config.input.oot_clients_path.display(),
            config.input.oot_requests_path.display()
        )
    })?;
    run.log_input(InputRecord::from_frame(
        "inference",
        &config.input.oot_clients_path,
        &raw,
    ))?;
    write_csv(&clean, config.output.oot_clean_path())?;

    let schema = ReferenceSchema::new(selected.artifact.feature_names.clone())?;
    let x = schema.align(&clean)?.to_array(schema.columns())?;
    let probs = selected.artifact.model.predict_proba(&x)?.to_vec();

    let oot = match &labels {
        Some(y) => {
            let eval = Evaluation::from_proba(y, &probs);
            run.log_metrics(&eval.to_metrics("oot_"))?;
            tracing::info!("OOT evaluation: {}", eval);
            Some(eval)
        }
        None => None,
    };

    let ids = raw.require(&config.features.id_column)?;
    let predictions = Frame::new(vec![
        Column::new(ids.name.clone(), ids.data.clone()),
        Column::float("prob", probs.iter().copied().map(Some).collect()),
    ])?;
    write_csv(&predictions, &config.output.predictions_csv)?;

    let codmes = resolve_codmes(config.scoring.codmes, &raw, &config.features.period_column)?;
    run.log_param("codmes", codmes)?;
    let scores = build_scores(
        ids,
        &probs,
        &selected.name,
        &load_date(Utc::now()),
        &config.scoring,
    )?;

    let store = create_output_store(&config.output)?;
    let published = publish_scores(
        store.as_ref(),
        get_output_prefix(&config.output),
        &config.output.path_display(),
        &config.scoring.table,
        codmes,
        &scores,
    )
    .await?;

    let stats = ScoreStats {
        model_name: selected.name,
        model_version: selected.version,
        codmes,
        rows: scores.height(),
        high_risk: count_profile(&scores, RiskProfile::High),
        medium_risk: count_profile(&scores, RiskProfile::Medium),
        low_risk: count_profile(&scores, RiskProfile::Low),
        oot,
        published,
    };
    run.log_metric("rows_scored", stats.rows as f64)?;
    run.log_metric("high_risk", stats.high_risk as f64)?;
    run.log_metric("medium_risk", stats.medium_risk as f64)?;
    run.log_metric("low_risk", stats.low_risk as f64)?;
    run.set_tag("partition", &stats.published.scores)?;
    run.finish()?;

    tracing::info!("Score complete: {}", stats);
    Ok(stats)
}
