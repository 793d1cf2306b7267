//! Object storage for published score partitions.

mod store;

pub use store::{create_output_store, get_output_prefix, object_path, put_bytes};
