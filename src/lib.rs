/*
 * A single-writer, single-process embedded record store keyed by a 64-bit
 * integer. Rows are fixed-width byte blobs whose size is fixed when the
 * database is created; the library never interprets their contents.
 */

mod codec;
mod engine;
mod error;
mod index_store;
mod tree;

pub use engine::{Db, Info};
pub use error::{error_to_string, Error, Result};
