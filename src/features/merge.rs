//! Per-customer aggregation of service requests and the client merge.

use super::encode::one_hot_columns;
use crate::config::FeatureConfig;
use crate::frame::{Column, ColumnData, Frame};
use anyhow::{Context, Result};
use std::collections::HashMap;

/// One-hot encode request categoricals and sum every numeric column per id.
///
/// Groups keep the order in which each id first appears. Text columns that
/// are not encoded cannot be summed and are dropped.
pub fn aggregate_requests(
    requests: &Frame,
    id_column: &str,
    categoricals: &[String],
) -> Result<Frame> {
    let encoded = one_hot_columns(requests, categoricals)?;
    let ids = encoded
        .require(id_column)
        .context("Requests table has no id column")?;

    let mut group_of_row = Vec::with_capacity(encoded.height());
    let mut group_index: HashMap<String, usize> = HashMap::new();
    let mut first_rows = Vec::new();
    for i in 0..encoded.height() {
        let Some(key) = ids.label_at(i) else {
            group_of_row.push(None);
            continue;
        };
        let next = group_index.len();
        let group = *group_index.entry(key).or_insert_with(|| {
            first_rows.push(i);
            next
        });
        group_of_row.push(Some(group));
    }
    let n_groups = first_rows.len();

    let first_picks: Vec<Option<usize>> = first_rows.iter().map(|&r| Some(r)).collect();
    let mut columns = vec![Column::new(id_column, ids.data.gather(&first_picks))];
    let mut dropped = Vec::new();
    for column in encoded.columns() {
        if column.name == id_column {
            continue;
        }
        match &column.data {
            ColumnData::Int(values) => {
                let mut sums = vec![0i64; n_groups];
                for (value, group) in values.iter().zip(&group_of_row) {
                    if let (Some(v), Some(g)) = (value, group) {
                        sums[*g] += v;
                    }
                }
                columns.push(Column::int(column.name.clone(), sums.into_iter().map(Some).collect()));
            }
            ColumnData::Float(values) => {
                let mut sums = vec![0.0f64; n_groups];
                for (value, group) in values.iter().zip(&group_of_row) {
                    if let (Some(v), Some(g)) = (value, group) {
                        if !v.is_nan() {
                            sums[*g] += v;
                        }
                    }
                }
                columns.push(Column::float(column.name.clone(), sums.into_iter().map(Some).collect()));
            }
            ColumnData::Text(_) => dropped.push(column.name.clone()),
        }
    }

    if !dropped.is_empty() {
        tracing::debug!("Dropped non-numeric request columns: {:?}", dropped);
    }

    Frame::new(columns)
}

/// Left-join aggregated requests onto clients and zero-fill the result.
///
/// Client row order is preserved. Request columns whose name is already
/// taken by a client column receive a `_req` suffix.
pub fn merge_raw(clients: &Frame, requests: &Frame, features: &FeatureConfig) -> Result<Frame> {
    tracing::info!(
        "Merging clients {:?} with requests {:?} on {}",
        clients.shape(),
        requests.shape(),
        features.id_column
    );

    let aggregated = aggregate_requests(requests, &features.id_column, &features.request_categoricals)?;
    let client_ids = clients
        .require(&features.id_column)
        .context("Clients table has no id column")?;
    let request_ids = aggregated.require(&features.id_column)?;

    let lookup: HashMap<String, usize> = (0..aggregated.height())
        .filter_map(|i| request_ids.label_at(i).map(|k| (k, i)))
        .collect();
    let matches: Vec<Option<usize>> = (0..clients.height())
        .map(|i| client_ids.label_at(i).and_then(|k| lookup.get(&k).copied()))
        .collect();

    let mut merged = clients.clone();
    for column in aggregated.columns() {
        if column.name == features.id_column {
            continue;
        }
        let name = if merged.contains(&column.name) {
            format!("{}_req", column.name)
        } else {
            column.name.clone()
        };
        merged.push(Column::new(name, column.data.gather(&matches)))?;
    }

    merged.fill_null_zero();

    let matched = matches.iter().filter(|m| m.is_some()).count();
    tracing::info!(
        "Merged shape: {:?} ({} of {} clients have requests)",
        merged.shape(),
        matched,
        clients.height()
    );
    Ok(merged)
}
