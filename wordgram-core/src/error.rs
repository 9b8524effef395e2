use std::io;
use std::path::PathBuf;

/// Errors returned by the language model and its persistence layer.
///
/// An absent prefix or an unseen token is never reported through this type:
/// lookups return `Ok(None)` / `Ok(0)` for "no evidence", which feeds the
/// backoff like any other outcome.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
	/// The caller passed an argument outside the accepted domain
	/// (empty sequence, order out of range, zero count, `k == 0`...).
	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	/// A model file could not be opened, read or written.
	#[error("I/O failure on {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: io::Error,
	},

	/// A persisted file was truncated or contained inconsistent data.
	#[error("corrupt model file {path}: {reason}")]
	Corrupt { path: PathBuf, reason: String },

	/// The postcard snapshot could not be encoded or decoded.
	#[error("snapshot serialization failed: {0}")]
	Snapshot(#[from] postcard::Error),
}

impl ModelError {
	pub(crate) fn invalid(message: impl Into<String>) -> Self {
		Self::InvalidArgument(message.into())
	}

	/// Wraps an I/O error with the path it happened on.
	///
	/// A short read is reported as `Corrupt`, since the file exists but
	/// ends before the layout says it should.
	pub(crate) fn from_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
		let path = path.into();
		if source.kind() == io::ErrorKind::UnexpectedEof {
			Self::Corrupt { path, reason: "unexpected end of file".to_owned() }
		} else {
			Self::Io { path, source }
		}
	}
}

pub type Result<T> = std::result::Result<T, ModelError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn short_read_is_reported_as_corrupt() {
		let err = ModelError::from_io("m.uni", io::Error::from(io::ErrorKind::UnexpectedEof));
		assert!(matches!(err, ModelError::Corrupt { .. }));
	}

	#[test]
	fn missing_file_keeps_io_kind() {
		let err = ModelError::from_io("m.uni", io::Error::from(io::ErrorKind::NotFound));
		match err {
			ModelError::Io { path, source } => {
				assert_eq!(path, PathBuf::from("m.uni"));
				assert_eq!(source.kind(), io::ErrorKind::NotFound);
			}
			other => panic!("unexpected error: {other:?}"),
		}
	}
}
