//! Feature engineering: request aggregation, preprocessing and schema
//! alignment between training and inference matrices.

mod encode;
mod merge;
mod preprocess;
mod schema;

pub use encode::{one_hot, one_hot_columns};
pub use merge::{aggregate_requests, merge_raw};
pub use preprocess::{Mode, Preprocessor};
pub use schema::{ReferenceSchema, SchemaDiff};
