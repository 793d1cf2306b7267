//! End-to-end tests of the pipeline steps on a temporary directory.
//!
//! Fixtures are small synthetic client and request tables shaped like the
//! production extracts: binary flags with gaps, a geography label, column
//! families, categorical ranges and request logs with several rows per
//! customer.

use super::*;
use crate::config::Config;
use crate::frame::{read_csv, read_csv_header};
use crate::models::ModelKind;
use crate::registry::Registry;
use crate::tracking::{RunStatus, Tracker, REGISTERED_MODEL_TAG};
use std::fmt::Write as _;
use std::path::Path;
use tempfile::TempDir;

const CLIENT_HEADER: &str = "ID_CORRELATIVO,CODMES,FLG_BANCARIZADO,RANG_INGRESO,FLAG_LIMA_PROVINCIA,EDAD,SDO_ACTIVO_MENOS0,SDO_ACTIVO_MENOS1,NRO_ACCES_CANAL1_MENOS0,NRO_ACCES_CANAL2_MENOS0";

/// Client rows `first..first + n`. Customers over 40 churn.
fn clients_csv(first: usize, n: usize, codmes: i64, with_target: bool, ranges: &[&str]) -> String {
    let mut out = String::from(CLIENT_HEADER);
    if with_target {
        out.push_str(",ATTRITION");
    }
    out.push('\n');
    for id in first..first + n {
        let edad = 20 + (id * 7) % 50;
        let accesses = (id * 3) % 11;
        let churn = edad > 40;
        let flag = if id % 5 == 0 { String::new() } else { (id % 2).to_string() };
        let geo = match id % 4 {
            0 => "Lima",
            1 => "Provincia",
            2 => "",
            _ => "Extranjero",
        };
        write!(
            out,
            "{},{},{},{},{},{},{},{},{},{}",
            id,
            codmes,
            flag,
            ranges[id % ranges.len()],
            geo,
            edad,
            (id * 13 % 97) as f64 * 10.5,
            (id * 17 % 89) as f64 * 9.25,
            accesses,
            (id * 5) % 7,
        )
        .unwrap();
        if with_target {
            write!(out, ",{}", i64::from(churn)).unwrap();
        }
        out.push('\n');
    }
    out
}

/// A few requests for every third client, two for some.
fn requests_csv(first: usize, n: usize) -> String {
    let mut out = String::from("ID_CORRELATIVO,TIPO_REQUERIMIENTO2,DICTAMEN,PRODUCTO_SERVICIO_2,SUBMOTIVO_2\n");
    for id in (first..first + n).filter(|id| id % 3 == 0) {
        let rows = if id % 2 == 0 { 2 } else { 1 };
        for r in 0..rows {
            let tipo = if r == 0 { "RECLAMO" } else { "SOLICITUD" };
            let dictamen = if id % 4 == 0 { "PROCEDE" } else { "NO PROCEDE" };
            writeln!(out, "{},{},{},TARJETA,MOTIVO_{}", id, tipo, dictamen, id % 2).unwrap();
        }
    }
    out
}

fn write_fixtures(dir: &Path) -> Config {
    let raw = dir.join("raw");
    std::fs::create_dir_all(&raw).unwrap();
    let ranges = ["Rang_ingreso_01", "Rang_ingreso_02", "Rang_ingreso_03"];
    std::fs::write(raw.join("clients.csv"), clients_csv(1, 80, 201908, true, &ranges)).unwrap();
    std::fs::write(raw.join("requests.csv"), requests_csv(1, 80)).unwrap();
    // OOT drifts: one training range disappears and an unseen one shows up
    let oot_ranges = ["Rang_ingreso_01", "Rang_ingreso_02", "Rang_ingreso_09"];
    std::fs::write(raw.join("oot_clients.csv"), clients_csv(1001, 30, 201910, true, &oot_ranges)).unwrap();
    std::fs::write(raw.join("oot_requests.csv"), requests_csv(1001, 30)).unwrap();

    let mut config = Config::default();
    config.input.clients_path = raw.join("clients.csv");
    config.input.requests_path = raw.join("requests.csv");
    config.input.oot_clients_path = raw.join("oot_clients.csv");
    config.input.oot_requests_path = raw.join("oot_requests.csv");
    config.output.processed_dir = dir.join("processed");
    config.output.predictions_csv = dir.join("output/predictions.csv");
    config.output.local_path = Some(dir.join("output/scores").display().to_string());
    config.tracking.dir = dir.join("mlruns");
    config.tracking.registry_dir = dir.join("registry");
    config.training.forest.n_estimators = 10;
    config.training.boosting.n_estimators = 10;
    config.training.boosting.max_depth = 3;
    config.training.logistic.max_iter = 300;
    config.validate().unwrap();
    config
}

fn tracker_and_registry(config: &Config) -> (Tracker, Registry) {
    (
        Tracker::from_config(&config.tracking).unwrap(),
        Registry::new(&config.tracking.registry_dir),
    )
}

#[tokio::test]
async fn test_steps_end_to_end() {
    let dir = TempDir::new().unwrap();
    let config = write_fixtures(dir.path());
    let (tracker, registry) = tracker_and_registry(&config);

    let prepared = run_prepare(&config).unwrap();
    assert_eq!(prepared.merged_rows, 80);
    assert_eq!((prepared.train_rows, prepared.test_rows), (64, 16));
    assert!(config.output.merged_path().is_file());

    let cleaned = run_preprocess(&config, &tracker).unwrap();
    assert_eq!(cleaned.train_rows, 64);
    let reference = read_csv_header(config.output.train_clean_path()).unwrap();
    assert_eq!(reference.last().map(String::as_str), Some("ATTRITION"));
    assert!(!reference.iter().any(|c| c == "ID_CORRELATIVO" || c == "CODMES"));
    assert!(reference.contains(&"SDO_ACTIVO_PROM".to_string()));
    assert!(reference.contains(&"TOTAL_ACCESOS".to_string()));
    assert_eq!(read_csv_header(config.output.test_clean_path()).unwrap(), reference);

    let trained = run_train(&config, &tracker, &registry).unwrap();
    assert_eq!(trained.models.len(), 3);
    for model in &trained.models {
        assert_eq!(model.version, Some(1), "{}", model.kind);
        assert!(model.oot.is_some(), "{}", model.kind);
        let run = tracker.get_run(&model.run_id).unwrap();
        assert_eq!(run.status, RunStatus::Finished);
        assert!(run.metric("accuracy").is_some());
        assert!(run.metric("oot_f1").is_some());
        assert_eq!(run.tag(REGISTERED_MODEL_TAG), Some(model.kind.registered_name().as_str()));
    }
    assert_eq!(
        registry.list().unwrap(),
        vec![
            "gradient_boosting_model",
            "logistic_regression_model",
            "random_forest_model"
        ]
    );

    let scored = run_score(&config, &tracker, &registry).await.unwrap();
    assert_eq!(scored.rows, 30);
    assert_eq!(scored.codmes, 201910);
    assert_eq!(scored.high_risk + scored.medium_risk + scored.low_risk, 30);
    assert!(scored.oot.is_some());
    assert_eq!(scored.published.scores, "codmes=201910/output.parquet");

    // Drifted OOT data still lands on the training schema
    assert_eq!(read_csv_header(config.output.oot_clean_path()).unwrap(), reference);

    let scores_dir = dir.path().join("output/scores");
    assert!(scores_dir.join("codmes=201910/output.parquet").is_file());
    assert!(scores_dir.join("_ddl/create_table.sql").is_file());
    assert!(scores_dir.join("_ddl/repair_table.sql").is_file());

    let predictions = read_csv(&config.output.predictions_csv).unwrap();
    assert_eq!(predictions.column_names(), vec!["ID_CORRELATIVO", "prob"]);
    assert_eq!(predictions.height(), 30);
    assert_eq!(predictions.column("ID_CORRELATIVO").unwrap().label_at(0).as_deref(), Some("1001"));
}

#[tokio::test]
async fn test_score_with_configured_model_and_codmes() {
    let dir = TempDir::new().unwrap();
    let mut config = write_fixtures(dir.path());
    config.training.models = vec![ModelKind::LogisticRegression];
    let (tracker, registry) = tracker_and_registry(&config);

    run_prepare(&config).unwrap();
    run_preprocess(&config, &tracker).unwrap();
    run_train(&config, &tracker, &registry).unwrap();
    run_train(&config, &tracker, &registry).unwrap();
    assert_eq!(registry.versions("logistic_regression_model").unwrap(), vec![1, 2]);

    config.scoring.model_name = Some("logistic_regression_model".to_string());
    config.scoring.model_version = Some(1);
    config.scoring.codmes = Some(202001);
    let scored = run_score(&config, &tracker, &registry).await.unwrap();
    assert_eq!((scored.model_name.as_str(), scored.model_version), ("logistic_regression_model", 1));
    assert_eq!(scored.published.scores, "codmes=202001/output.parquet");

    let inference = tracker
        .list_runs()
        .unwrap()
        .into_iter()
        .find(|r| r.name == "batch_inference")
        .unwrap();
    assert_eq!(inference.status, RunStatus::Finished);
    assert_eq!(inference.params.get("codmes").map(String::as_str), Some("202001"));
    assert_eq!(inference.inputs[0].rows, 30);
}

#[tokio::test]
async fn test_score_without_training_fails() {
    let dir = TempDir::new().unwrap();
    let config = write_fixtures(dir.path());
    let (tracker, registry) = tracker_and_registry(&config);
    assert!(run_score(&config, &tracker, &registry).await.is_err());
}

#[tokio::test]
async fn test_run_pipeline() {
    let dir = TempDir::new().unwrap();
    let config = write_fixtures(dir.path());
    let stats = crate::run_pipeline(config).await.unwrap();
    assert_eq!(stats.score.rows, 30);
    assert!(stats.to_string().contains("Score      | Model:"));
}
