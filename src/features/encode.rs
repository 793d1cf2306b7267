//! One-hot encoding with deterministic column names.

use crate::frame::{Column, ColumnData, Frame};
use anyhow::{Context, Result};
use std::cmp::Ordering;

/// Expand a categorical column into one integer 0/1 column per category.
///
/// Columns are named `{column}_{value}` and ordered by category: numerically
/// for numeric columns, lexicographically for text. Missing values produce a
/// row of zeros.
pub fn one_hot(column: &Column) -> Vec<Column> {
    let labels: Vec<Option<String>> = (0..column.len()).map(|i| column.label_at(i)).collect();

    let mut categories: Vec<(Option<f64>, String)> = Vec::new();
    for (i, label) in labels.iter().enumerate() {
        if let Some(label) = label {
            if !categories.iter().any(|(_, l)| l == label) {
                categories.push((column.f64_at(i), label.clone()));
            }
        }
    }

    if column.is_numeric() {
        categories.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });
    } else {
        categories.sort_by(|a, b| a.1.cmp(&b.1));
    }

    categories
        .into_iter()
        .map(|(_, category)| {
            let values = labels
                .iter()
                .map(|l| Some(i64::from(l.as_deref() == Some(category.as_str()))))
                .collect();
            Column::new(format!("{}_{}", column.name, category), ColumnData::Int(values))
        })
        .collect()
}

/// One-hot encode the named columns that exist in `frame`.
///
/// Encoded columns are removed; their dummies are appended after the
/// remaining columns, grouped in the order of `names`.
pub fn one_hot_columns(frame: &Frame, names: &[String]) -> Result<Frame> {
    let present: Vec<&String> = names.iter().filter(|n| frame.contains(n)).collect();
    if present.is_empty() {
        return Ok(frame.clone());
    }

    let mut out = frame.clone();
    let mut dummies = Vec::new();
    for name in &present {
        if let Some(column) = out.remove(name) {
            dummies.extend(one_hot(&column));
        }
    }
    for dummy in dummies {
        let name = dummy.name.clone();
        out.push(dummy)
            .with_context(|| format!("One-hot column {} collides with an existing column", name))?;
    }

    tracing::debug!("One-hot encoded {} columns: {:?}", present.len(), present);
    Ok(out)
}
