//! CSV reading with per-column type inference, and CSV writing.

use super::{format_float, Column, ColumnData, Frame};
use anyhow::{Context, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Inferred type for a raw CSV column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InferredType {
    Int,
    Float,
    Bool,
    Text,
}

/// Read a CSV file with a header row into a [`Frame`].
///
/// Every value of a column is considered for type inference. Empty cells
/// are missing values.
pub fn read_csv(path: impl AsRef<Path>) -> Result<Frame> {
    let path = path.as_ref();
    let file =
        File::open(path).with_context(|| format!("Failed to open CSV file: {}", path.display()))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(BufReader::new(file));

    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("Failed to read CSV header: {}", path.display()))?
        .iter()
        .map(|s| s.trim().to_string())
        .collect();

    let mut raw: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
    for (row, result) in reader.records().enumerate() {
        let record =
            result.with_context(|| format!("Malformed CSV row {} in {}", row + 1, path.display()))?;
        for (i, cells) in raw.iter_mut().enumerate() {
            cells.push(record.get(i).unwrap_or("").to_string());
        }
    }

    let columns = headers
        .into_iter()
        .zip(raw)
        .map(|(name, cells)| parse_column(name, &cells))
        .collect();

    let frame = Frame::new(columns)
        .with_context(|| format!("Invalid table in {}", path.display()))?;
    tracing::debug!(
        "Read {} rows x {} columns from {}",
        frame.height(),
        frame.width(),
        path.display()
    );
    Ok(frame)
}

/// Read only the header row of a CSV file.
pub fn read_csv_header(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let file =
        File::open(path).with_context(|| format!("Failed to open CSV file: {}", path.display()))?;
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(BufReader::new(file));
    Ok(reader
        .headers()?
        .iter()
        .map(|s| s.trim().to_string())
        .collect())
}

/// Write a frame to CSV with a header row, creating parent directories.
pub fn write_csv(frame: &Frame, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;
    writer.write_record(frame.columns().iter().map(|c| c.name.as_str()))?;

    let mut record = Vec::with_capacity(frame.width());
    for i in 0..frame.height() {
        record.clear();
        record.extend(frame.columns().iter().map(|c| render_cell(c, i)));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

fn render_cell(column: &Column, i: usize) -> String {
    match &column.data {
        ColumnData::Int(v) => v[i].map(|x| x.to_string()).unwrap_or_default(),
        ColumnData::Float(v) => v[i].map(format_float).unwrap_or_default(),
        ColumnData::Text(v) => v[i].clone().unwrap_or_default(),
    }
}

fn infer_type(cells: &[String]) -> InferredType {
    let mut non_empty = cells.iter().map(|s| s.trim()).filter(|s| !s.is_empty()).peekable();
    if non_empty.peek().is_none() {
        // An all-empty column carries no information; keep it numeric so
        // the zero-fill step turns it into zeros.
        return InferredType::Float;
    }
    let values: Vec<&str> = non_empty.collect();

    if values.iter().all(|s| s.parse::<i64>().is_ok()) {
        return InferredType::Int;
    }
    if values.iter().all(|s| s.parse::<f64>().is_ok()) {
        return InferredType::Float;
    }
    if values
        .iter()
        .all(|s| matches!(s.to_ascii_lowercase().as_str(), "true" | "false"))
    {
        return InferredType::Bool;
    }
    InferredType::Text
}

fn cell(s: &str) -> Option<&str> {
    let t = s.trim();
    (!t.is_empty()).then_some(t)
}

fn parse_column(name: String, cells: &[String]) -> Column {
    match infer_type(cells) {
        InferredType::Int => Column::int(
            name,
            cells.iter().map(|s| cell(s).and_then(|t| t.parse().ok())).collect(),
        ),
        InferredType::Float => Column::float(
            name,
            cells.iter().map(|s| cell(s).and_then(|t| t.parse().ok())).collect(),
        ),
        InferredType::Bool => Column::int(
            name,
            cells
                .iter()
                .map(|s| cell(s).map(|t| i64::from(t.eq_ignore_ascii_case("true"))))
                .collect(),
        ),
        InferredType::Text => Column::text(name, cells.iter().map(|s| cell(s)).collect::<Vec<_>>()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_infer_type() {
        assert_eq!(infer_type(&strings(&["1", "2", ""])), InferredType::Int);
        assert_eq!(infer_type(&strings(&["1", "2.5"])), InferredType::Float);
        assert_eq!(infer_type(&strings(&["True", "false"])), InferredType::Bool);
        assert_eq!(infer_type(&strings(&["Lima", "1"])), InferredType::Text);
        assert_eq!(infer_type(&strings(&["", " "])), InferredType::Float);
    }

    #[test]
    fn test_read_csv_types_and_nulls() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clients.csv");
        std::fs::write(
            &path,
            "ID,FLAG,BAL,CITY,ACTIVE\n1,1,10.5,Lima,True\n2,,3,,False\n",
        )
        .unwrap();

        let frame = read_csv(&path).unwrap();
        assert_eq!(frame.shape(), (2, 5));
        assert_eq!(
            frame.column("FLAG").unwrap().data,
            ColumnData::Int(vec![Some(1), None])
        );
        assert_eq!(
            frame.column("BAL").unwrap().data,
            ColumnData::Float(vec![Some(10.5), Some(3.0)])
        );
        assert_eq!(
            frame.column("CITY").unwrap().data,
            ColumnData::Text(vec![Some("Lima".to_string()), None])
        );
        assert_eq!(
            frame.column("ACTIVE").unwrap().data,
            ColumnData::Int(vec![Some(1), Some(0)])
        );
    }

    #[test]
    fn test_write_then_read_keeps_types() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/out.csv");
        let frame = Frame::new(vec![
            Column::int("i", vec![Some(1), None]),
            Column::float("f", vec![Some(2.0), Some(0.5)]),
            Column::text("t", vec![Some("a,b"), Some("c")]),
        ])
        .unwrap();

        write_csv(&frame, &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("i,f,t\n1,2.0,\"a,b\"\n"));

        let back = read_csv(&path).unwrap();
        assert_eq!(back, frame);
        assert_eq!(read_csv_header(&path).unwrap(), vec!["i", "f", "t"]);
    }

    #[test]
    fn test_read_missing_file() {
        let err = read_csv("/nonexistent/clients.csv").unwrap_err();
        assert!(err.to_string().contains("/nonexistent/clients.csv"));
    }
}
