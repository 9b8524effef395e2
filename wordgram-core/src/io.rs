use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::{env, fs, io};

use crate::error::{ModelError, Result};
use crate::persist::VOCAB_EXTENSION;

/// Extension of the postcard snapshot written next to a corpus.
pub const SNAPSHOT_EXTENSION: &str = "bin";

/// Reads a text file and returns all its lines as a `Vec<String>`.
///
/// - Reads the entire file into memory
/// - Splits on `\n` / `\r\n`
/// - Invalid UTF-8 sequences are replaced rather than rejected
pub(crate) fn read_file<P: AsRef<Path>>(filename: P) -> io::Result<Vec<String>> {
	let mut contents = Vec::new();
	File::open(filename)?.read_to_end(&mut contents)?;
	Ok(String::from_utf8_lossy(&contents).lines().map(str::to_owned).collect())
}

/// Path of the snapshot cached for `corpus`: `data/chat.txt` → `data/chat.bin`.
///
/// # Errors
/// Returns `InvalidArgument` if `corpus` does not name a file.
pub(crate) fn snapshot_path(corpus: &Path) -> Result<PathBuf> {
	if corpus.file_stem().is_none() {
		return Err(ModelError::invalid(format!("corpus path {:?} has no file name", corpus)));
	}
	Ok(corpus.with_extension(SNAPSHOT_EXTENSION))
}

/// Appends `.extension` to a model prefix.
///
/// Nothing in the prefix is replaced:
/// `data/model.v2` + `"vocab"` → `data/model.v2.vocab`
pub fn prefixed_path<P: AsRef<Path>>(prefix: P, extension: &str) -> PathBuf {
	let mut path: OsString = prefix.as_ref().as_os_str().to_owned();
	path.push(".");
	path.push(extension);
	PathBuf::from(path)
}

/// Resolves a directory of saved models.
///
/// An empty input, `"."` or `"./"` is the current working directory; any
/// other path is taken as-is.
pub fn model_dir(input: &str) -> Result<PathBuf> {
	match input.trim() {
		"" | "." | "./" => env::current_dir().map_err(|source| ModelError::from_io(".", source)),
		dir => Ok(PathBuf::from(dir)),
	}
}

/// Lists the prefixes of the models saved in `dir`, sorted.
///
/// A model is found through its vocabulary file, so `dir/chat.vocab`
/// lists as `dir/chat`, ready for `LanguageModel::load`.
pub fn list_models(dir: &Path) -> Result<Vec<PathBuf>> {
	let entries = fs::read_dir(dir).map_err(|source| ModelError::from_io(dir, source))?;
	let mut prefixes = Vec::new();

	for entry in entries {
		let path = entry.map_err(|source| ModelError::from_io(dir, source))?.path();
		if path.is_file() && path.extension() == Some(OsStr::new(VOCAB_EXTENSION)) {
			prefixes.push(path.with_extension(""));
		}
	}

	prefixes.sort();
	Ok(prefixes)
}
