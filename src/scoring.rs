//! Post-processing and publication of batch scores.
//!
//! Scores are bucketed into risk profiles, ranked, stamped with the model
//! name and load date, then written as one Snappy Parquet partition per
//! period (`codmes={value}/output.parquet`) next to the DDL that exposes the
//! partitions as an external table.

use crate::config::ScoringConfig;
use crate::frame::{cast_columns, to_record_batch, write_parquet_bytes, Column, Frame};
use crate::io::{object_path, put_bytes};
use anyhow::{Context, Result};
use arrow::datatypes::DataType;
use bytes::Bytes;
use chrono::{DateTime, FixedOffset, Utc};
use object_store::ObjectStore;
use std::fmt;

/// Lima has no daylight saving time; UTC-5 all year.
const LIMA_UTC_OFFSET_SECS: i32 = 5 * 3600;

pub const PARTITION_COLUMN: &str = "codmes";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskProfile {
    High,
    Medium,
    Low,
}

impl RiskProfile {
    /// Bucket a probability; boundaries are inclusive on the riskier side.
    pub fn from_prob(prob: f64, scoring: &ScoringConfig) -> Self {
        if prob >= scoring.high_risk_threshold {
            RiskProfile::High
        } else if prob >= scoring.medium_risk_threshold {
            RiskProfile::Medium
        } else {
            RiskProfile::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskProfile::High => "High risk",
            RiskProfile::Medium => "Medium risk",
            RiskProfile::Low => "Low risk",
        }
    }
}

impl fmt::Display for RiskProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 1-based rank by probability, highest first. Equal probabilities keep
/// row order.
pub fn rank_descending(probs: &[f64]) -> Vec<i64> {
    let mut order: Vec<usize> = (0..probs.len()).collect();
    order.sort_by(|&a, &b| probs[b].total_cmp(&probs[a]));
    let mut ranks = vec![0i64; probs.len()];
    for (rank, &row) in order.iter().enumerate() {
        ranks[row] = rank as i64 + 1;
    }
    ranks
}

/// `YYYYMMDD` of `now` in America/Lima.
pub fn load_date(now: DateTime<Utc>) -> String {
    match FixedOffset::west_opt(LIMA_UTC_OFFSET_SECS) {
        Some(lima) => now.with_timezone(&lima).format("%Y%m%d").to_string(),
        None => now.format("%Y%m%d").to_string(),
    }
}

/// Partition value: the configured one, else the latest period in `clients`.
pub fn resolve_codmes(configured: Option<i64>, clients: &Frame, period_column: &str) -> Result<i64> {
    if let Some(codmes) = configured {
        return Ok(codmes);
    }
    let column = clients
        .require(period_column)
        .context("No codmes configured and no period column to derive it from")?;
    (0..column.len())
        .filter_map(|i| column.f64_at(i))
        .map(|v| v as i64)
        .max()
        .with_context(|| format!("Period column {} has no values", period_column))
}

/// Final score table, one row per customer, in input order.
///
/// Columns: `id`, `prob`, `model`, `risk_profile`, `load_date`, `order`.
/// The partition value is not a column; it is encoded in the object path.
pub fn build_scores(
    ids: &Column,
    probs: &[f64],
    model_name: &str,
    load_date: &str,
    scoring: &ScoringConfig,
) -> Result<Frame> {
    if ids.len() != probs.len() {
        anyhow::bail!("{} ids but {} probabilities", ids.len(), probs.len());
    }
    let n = probs.len();
    let id_labels: Vec<Option<String>> = (0..n).map(|i| ids.label_at(i)).collect();
    let profiles: Vec<Option<&str>> = probs
        .iter()
        .map(|&p| Some(RiskProfile::from_prob(p, scoring).as_str()))
        .collect();

    Frame::new(vec![
        Column::text("id", id_labels),
        Column::float("prob", probs.iter().copied().map(Some).collect()),
        Column::text("model", vec![Some(model_name); n]),
        Column::text("risk_profile", profiles),
        Column::text("load_date", vec![Some(load_date); n]),
        Column::int("order", rank_descending(probs).into_iter().map(Some).collect()),
    ])
}

/// Parquet bytes of a score table with `order` narrowed to int32.
pub fn encode_scores(scores: &Frame) -> Result<Bytes> {
    let batch = to_record_batch(scores)?;
    let batch = cast_columns(&batch, &[("order", DataType::Int32)])?;
    write_parquet_bytes(&batch)
}

/// `CREATE EXTERNAL TABLE` statement for the partitioned score table.
pub fn create_table_ddl(table: &str, location: &str) -> String {
    format!(
        "CREATE EXTERNAL TABLE IF NOT EXISTS {table} (\n\
         \x20   id string,\n\
         \x20   prob double,\n\
         \x20   model string,\n\
         \x20   risk_profile string,\n\
         \x20   load_date string,\n\
         \x20   `order` int\n\
         )\n\
         PARTITIONED BY ({PARTITION_COLUMN} int)\n\
         STORED AS parquet\n\
         LOCATION '{location}'\n\
         TBLPROPERTIES ('parquet.compression'='SNAPPY');\n"
    )
}

/// Statement registering newly written partitions.
pub fn repair_table_ddl(table: &str) -> String {
    format!("MSCK REPAIR TABLE {table};\n")
}

/// Object keys written by [`publish_scores`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub scores: String,
    pub create_table: String,
    pub repair_table: String,
}

/// Write the score partition and the table DDL to `store` under `prefix`.
pub async fn publish_scores(
    store: &dyn ObjectStore,
    prefix: &str,
    location: &str,
    table: &str,
    codmes: i64,
    scores: &Frame,
) -> Result<Published> {
    let scores_path = object_path(
        prefix,
        &format!("{}={}/output.parquet", PARTITION_COLUMN, codmes),
    );
    let create_path = object_path(prefix, "_ddl/create_table.sql");
    let repair_path = object_path(prefix, "_ddl/repair_table.sql");

    let parquet = encode_scores(scores)?;
    put_bytes(store, &scores_path, parquet).await?;
    put_bytes(store, &create_path, Bytes::from(create_table_ddl(table, location))).await?;
    put_bytes(store, &repair_path, Bytes::from(repair_table_ddl(table))).await?;

    tracing::info!(
        "Published {} scores for {}={} to {}",
        scores.height(),
        PARTITION_COLUMN,
        codmes,
        location
    );
    Ok(Published {
        scores: scores_path.to_string(),
        create_table: create_path.to_string(),
        repair_table: repair_path.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ColumnData;
    use arrow::array::{Array, Int32Array, StringArray};
    use chrono::TimeZone;
    use object_store::local::LocalFileSystem;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use tempfile::TempDir;

    #[test]
    fn test_risk_boundaries() {
        let scoring = ScoringConfig::default();
        assert_eq!(RiskProfile::from_prob(0.415, &scoring), RiskProfile::High);
        assert_eq!(RiskProfile::from_prob(0.4149, &scoring), RiskProfile::Medium);
        assert_eq!(RiskProfile::from_prob(0.285, &scoring), RiskProfile::Medium);
        assert_eq!(RiskProfile::from_prob(0.2849, &scoring), RiskProfile::Low);
        assert_eq!(RiskProfile::High.to_string(), "High risk");
    }

    #[test]
    fn test_rank_descending_ties_by_row() {
        assert_eq!(rank_descending(&[0.2, 0.9, 0.5, 0.9]), vec![4, 1, 3, 2]);
        assert!(rank_descending(&[]).is_empty());
    }

    #[test]
    fn test_load_date_uses_lima_offset() {
        // 03:00 UTC is still the previous day in Lima
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 3, 0, 0).unwrap();
        assert_eq!(load_date(now), "20240229");
        let later = Utc.with_ymd_and_hms(2024, 3, 1, 5, 0, 0).unwrap();
        assert_eq!(load_date(later), "20240301");
    }

    #[test]
    fn test_resolve_codmes() {
        let clients = Frame::new(vec![Column::int(
            "CODMES",
            vec![Some(201908), Some(201910), None],
        )])
        .unwrap();
        assert_eq!(resolve_codmes(Some(202001), &clients, "CODMES").unwrap(), 202001);
        assert_eq!(resolve_codmes(None, &clients, "CODMES").unwrap(), 201910);
        assert!(resolve_codmes(None, &clients, "MISSING").is_err());
    }

    #[test]
    fn test_build_scores_columns() {
        let ids = Column::int("ID_CORRELATIVO", vec![Some(10), Some(11), Some(12)]);
        let scores = build_scores(
            &ids,
            &[0.1, 0.5, 0.3],
            "gradient_boosting_model",
            "20240301",
            &ScoringConfig::default(),
        )
        .unwrap();

        assert_eq!(
            scores.column_names(),
            vec!["id", "prob", "model", "risk_profile", "load_date", "order"]
        );
        assert_eq!(
            scores.column("order").unwrap().data,
            ColumnData::Int(vec![Some(3), Some(1), Some(2)])
        );
        assert_eq!(scores.column("id").unwrap().label_at(0).as_deref(), Some("10"));
        assert_eq!(
            scores.column("risk_profile").unwrap().label_at(2).as_deref(),
            Some("Medium risk")
        );
        assert!(build_scores(&ids, &[0.1], "m", "d", &ScoringConfig::default()).is_err());
    }

    #[test]
    fn test_ddl_mentions_partition() {
        let ddl = create_table_ddl("mlops.scores", "s3://bucket/scores");
        assert!(ddl.starts_with("CREATE EXTERNAL TABLE IF NOT EXISTS mlops.scores ("));
        assert!(ddl.contains("PARTITIONED BY (codmes int)"));
        assert!(ddl.contains("LOCATION 's3://bucket/scores'"));
        assert!(ddl.contains("'parquet.compression'='SNAPPY'"));
        assert_eq!(repair_table_ddl("mlops.scores"), "MSCK REPAIR TABLE mlops.scores;\n");
    }

    #[tokio::test]
    async fn test_publish_scores_writes_partition() {
        let dir = TempDir::new().unwrap();
        let store = LocalFileSystem::new_with_prefix(dir.path()).unwrap();
        let ids = Column::text("ID_CORRELATIVO", vec![Some("a"), Some("b")]);
        let scores = build_scores(&ids, &[0.2, 0.8], "m", "20240301", &ScoringConfig::default()).unwrap();

        let published = publish_scores(&store, "", "scores", "mlops.scores", 201910, &scores)
            .await
            .unwrap();
        assert_eq!(published.scores, "codmes=201910/output.parquet");
        assert!(dir.path().join("_ddl/create_table.sql").is_file());

        let file = std::fs::File::open(dir.path().join("codmes=201910/output.parquet")).unwrap();
        let mut reader = ParquetRecordBatchReaderBuilder::try_new(file).unwrap().build().unwrap();
        let batch = reader.next().unwrap().unwrap();
        assert_eq!(batch.num_columns(), 6);
        assert!(batch.schema().field_with_name(PARTITION_COLUMN).is_err());

        let order = batch.column(5).as_any().downcast_ref::<Int32Array>().unwrap();
        assert_eq!((order.value(0), order.value(1)), (2, 1));
        let profiles = batch.column(3).as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(profiles.value(1), "High risk");
        assert_eq!(profiles.len(), 2);
    }
}
