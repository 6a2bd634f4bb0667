use std::fs::{self, DirBuilder};
use std::io;
use std::path::{Path, PathBuf};

use lazy_static::lazy_static;
use regex::Regex;
use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Creates a directory if it doesn't exist
pub fn ensure_dir(path: impl AsRef<Path>) -> io::Result<()> {
    DirBuilder::new().recursive(true).create(path)
}

/// Creates the parent directory of `file` if it has one
pub fn ensure_parent_dir(file: impl AsRef<Path>) -> io::Result<()> {
    match file.as_ref().parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir(parent),
        _ => Ok(()),
    }
}

/// The text a document is embedded from: title and body separated by a blank line.
pub fn canonical_text(title: &str, body: &str) -> String {
    format!("{}\n\n{}", title.trim(), body.trim()).trim().to_string()
}

/// NFC-normalizes and collapses runs of whitespace so cosmetic edits
/// don't invalidate a cached embedding.
pub fn normalize_text(text: &str) -> String {
    lazy_static! {
        static ref WHITESPACE: Regex = Regex::new(r"\s+").expect("static regex");
    }

    let text = text.nfc().collect::<String>();
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Hex SHA-256 of the normalized text.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(normalize_text(text).as_bytes());
    format!("{:x}", digest)
}

/// Loads all text files below a directory recursively, ordered by path
pub fn load_text_files(dir_path: impl AsRef<Path>) -> io::Result<Vec<(PathBuf, String)>> {
    let mut texts = Vec::new();
    collect_text_files(dir_path.as_ref(), &mut texts)?;
    texts.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(texts)
}

fn collect_text_files(dir: &Path, texts: &mut Vec<(PathBuf, String)>) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        if path.is_file() {
            if path.extension().is_some_and(|ext| ext == "txt") {
                let content = fs::read_to_string(&path)?;
                texts.push((path, content));
            }
        } else if path.is_dir() {
            collect_text_files(&path, texts)?;
        }
    }

    Ok(())
}
