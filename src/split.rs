//! Seeded train/test partitioning.

use crate::frame::Frame;
use anyhow::Result;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Shuffle rows with `seed` and hold out `ceil(n * test_size)` of them.
///
/// The same seed and input always give the same partition. Rows in each
/// half keep the shuffled order.
pub fn train_test_split(frame: &Frame, test_size: f64, seed: u64) -> Result<(Frame, Frame)> {
    if !(test_size > 0.0 && test_size < 1.0) {
        anyhow::bail!("test_size must be in (0, 1), got {}", test_size);
    }
    let n = frame.height();
    let n_test = (n as f64 * test_size).ceil() as usize;
    if n < 2 || n_test >= n {
        anyhow::bail!("Cannot split {} rows with test_size {}", n, test_size);
    }

    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let (test_idx, train_idx) = indices.split_at(n_test);
    tracing::info!(
        "Split {} rows into {} train / {} test (seed {})",
        n,
        train_idx.len(),
        test_idx.len(),
        seed
    );
    Ok((frame.take(train_idx), frame.take(test_idx)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{Column, ColumnData};

    fn frame(n: i64) -> Frame {
        Frame::new(vec![Column::int("id", (0..n).map(Some).collect())]).unwrap()
    }

    fn ids(frame: &Frame) -> Vec<i64> {
        match &frame.column("id").unwrap().data {
            ColumnData::Int(v) => v.iter().map(|x| x.unwrap()).collect(),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_split_sizes_and_partition() {
        let (train, test) = train_test_split(&frame(10), 0.2, 42).unwrap();
        assert_eq!(train.height(), 8);
        assert_eq!(test.height(), 2);

        let mut all: Vec<i64> = ids(&train).into_iter().chain(ids(&test)).collect();
        all.sort_unstable();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_split_is_deterministic() {
        let a = train_test_split(&frame(50), 0.2, 42).unwrap();
        let b = train_test_split(&frame(50), 0.2, 42).unwrap();
        assert_eq!(a, b);

        let c = train_test_split(&frame(50), 0.2, 7).unwrap();
        assert_ne!(ids(&a.1), ids(&c.1));
    }

    #[test]
    fn test_split_rejects_degenerate() {
        assert!(train_test_split(&frame(1), 0.2, 42).is_err());
        assert!(train_test_split(&frame(10), 0.0, 42).is_err());
        assert!(train_test_split(&frame(10), 1.0, 42).is_err());
    }
}
