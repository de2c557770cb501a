/*
 * Error enum for the whole crate, plus a Result alias.
 *
 * Unlike a bare derive(Debug) enum, this one derives thiserror::Error so it
 * gets a real Display/std::error::Error impl, and #[source]/#[from] wire up
 * the underlying io::Error for CannotOpenFile and Generic.
 */

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot open file {path}: {source}")]
    CannotOpenFile { path: String, #[source] source: io::Error }, //file could not be opened or created at the requested path

    #[error("allocation failure")]
    AllocationFailure, //kept for API-shape parity; the Rust allocator aborts on OOM rather than returning, so this is never produced by ordinary use

    #[error("row not found")]
    RowNotFound, //select/update/delete targeted a key with no row

    #[error("duplicated key violation")]
    DuplicatedKeyViolation, //insert targeted a key that already has a row

    #[error("{0}")]
    Generic(#[from] io::Error), //any other I/O failure, including short reads/writes from read_exact/write_all
}

// Logs error! immediately before an I/O-flavored failure crosses back out to
// the caller, then passes it through unchanged. Called once at each public
// entry point rather than at every fallible I/O call inside it.
pub(crate) fn log_io_failures<T>(result: Result<T>) -> Result<T> {
    if let Err(err) = &result {
        if matches!(err, Error::Generic(_) | Error::CannotOpenFile { .. }) {
            log::error!("{}", err);
        }
    }
    result
}

// Categorical (variant-name) string for an error, independent of Error's
// richer Display output used for logging.
pub fn error_to_string(err: &Error) -> &'static str {
    match err {
        Error::CannotOpenFile { .. } => "CannotOpenFile",
        Error::AllocationFailure => "AllocationFailure",
        Error::RowNotFound => "RowNotFound",
        Error::DuplicatedKeyViolation => "DuplicatedKeyViolation",
        Error::Generic(_) => "Generic",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_to_string_covers_every_variant() {
        assert_eq!(error_to_string(&Error::AllocationFailure), "AllocationFailure");
        assert_eq!(error_to_string(&Error::RowNotFound), "RowNotFound");
        assert_eq!(error_to_string(&Error::DuplicatedKeyViolation), "DuplicatedKeyViolation");
        assert_eq!(
            error_to_string(&Error::Generic(io::Error::new(io::ErrorKind::Other, "boom"))),
            "Generic"
        );
        let cannot_open = Error::CannotOpenFile {
            path: "/tmp/does-not-exist".into(),
            source: io::Error::new(io::ErrorKind::NotFound, "missing"),
        };
        assert_eq!(error_to_string(&cannot_open), "CannotOpenFile");
    }
}
