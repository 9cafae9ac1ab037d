//! Synthetic library naming and header-jar detection

use sha2::{Digest, Sha256};
use std::path::Path;

use crate::label::Label;

const HEADER_PREFIX: &str = "header_";
const PROCESSED_PREFIX: &str = "processed_";

/// Length of the path digest suffix in synthetic names
const NAME_HASH_LEN: usize = 7;

/// Stable synthetic library name for a jar.
///
/// `escape(file_name) + "-" + sha256(path)[..7]`. The digest covers the full
/// path string so same-named jars in different directories stay distinct.
pub fn synthetic_library_name(jar: &Path) -> String {
    let file_name = jar
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    format!(
        "{}-{}",
        escape_name(&file_name),
        short_digest(&jar.to_string_lossy())
    )
}

fn short_digest(raw: &str) -> String {
    let digest = Sha256::digest(raw.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hex[..NAME_HASH_LEN].to_string()
}

/// Replace every character outside `[A-Za-z0-9._-]` with `_`
pub fn escape_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Name of the library wrapping the class jars of a source-less target
pub fn compiled_library_name(target: &Label) -> String {
    format!("{}-compiled", label_stem(target))
}

/// Name of the library wrapping annotation-processor output of a target
pub fn generated_library_name(target: &Label) -> String {
    format!("{}-generated", label_stem(target))
}

/// Escaped label plus a digest of the canonical label, since escaping
/// maps `//a/b:c` and `//a_b:c` to the same text
fn label_stem(label: &Label) -> String {
    let raw = label.as_str().trim_start_matches('@').replacen("//", "", 1);
    format!("{}-{}", escape_name(&raw), short_digest(label.as_str()))
}

/// Whether `jar` is a `header_X` jar with a sibling `processed_X`
pub fn is_superseded_header_jar(jar: &Path) -> bool {
    let Some(rest) = jar
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix(HEADER_PREFIX))
    else {
        return false;
    };
    jar.with_file_name(format!("{PROCESSED_PREFIX}{rest}")).exists()
}
