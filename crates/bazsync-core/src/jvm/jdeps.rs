//! Jdeps descriptor decoding
//!
//! Compilers write one `.jdeps` file per compiled output: a `deps.proto`
//! `Dependencies` message listing every jar on the compile classpath and how
//! it was used. Only `EXPLICIT` and `IMPLICIT` entries count as used.

use prost::Message;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{trace, warn};

/// Summary of a compilation's classpath usage
#[derive(Clone, PartialEq, Message)]
pub struct Dependencies {
    #[prost(message, repeated, tag = "1")]
    pub dependency: Vec<Dependency>,
    #[prost(string, optional, tag = "2")]
    pub rule_label: Option<String>,
    #[prost(bool, optional, tag = "3")]
    pub success: Option<bool>,
    #[prost(string, repeated, tag = "4")]
    pub contained_package: Vec<String>,
    #[prost(bool, optional, tag = "5")]
    pub requires_reduced_classpath: Option<bool>,
}

/// One classpath entry
#[derive(Clone, PartialEq, Message)]
pub struct Dependency {
    #[prost(string, required, tag = "1")]
    pub path: String,
    #[prost(enumeration = "Kind", required, tag = "2")]
    pub kind: i32,
    #[prost(message, repeated, tag = "3")]
    pub location: Vec<SourceLocation>,
}

#[derive(Clone, PartialEq, Message)]
pub struct SourceLocation {
    #[prost(string, required, tag = "1")]
    pub path: String,
    #[prost(int32, optional, tag = "2")]
    pub line: Option<i32>,
    #[prost(int32, optional, tag = "3")]
    pub column: Option<i32>,
}

/// How a classpath entry was used
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum Kind {
    /// Referenced directly from source
    Explicit = 0,
    /// Needed by the compiler through a referenced type
    Implicit = 1,
    Unused = 2,
    /// The compiler could not tell
    Incomplete = 3,
}

impl Dependency {
    pub fn is_used(&self) -> bool {
        matches!(Kind::try_from(self.kind), Ok(Kind::Explicit | Kind::Implicit))
    }
}

impl Dependencies {
    /// Paths of used classpath entries, as written by the compiler
    pub fn used_paths(&self) -> impl Iterator<Item = PathBuf> + '_ {
        self.dependency
            .iter()
            .filter(|d| d.is_used())
            .map(|d| PathBuf::from(&d.path))
    }
}

/// Read the used jar paths from one descriptor.
///
/// A missing file contributes nothing. An unreadable or undecodable file is
/// logged and also contributes nothing.
pub fn read_used_jars(path: &Path) -> BTreeSet<PathBuf> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            trace!(path = %path.display(), "Jdeps descriptor missing");
            return BTreeSet::new();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read jdeps descriptor");
            return BTreeSet::new();
        }
    };

    match Dependencies::decode(bytes.as_slice()) {
        Ok(deps) => deps.used_paths().collect(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to decode jdeps descriptor");
            BTreeSet::new()
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::descriptor;
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_only_explicit_and_implicit_are_used() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lib.jdeps");
        std::fs::write(
            &path,
            descriptor(&[
                ("bazel-out/bin/a.jar", Kind::Explicit),
                ("bazel-out/bin/b.jar", Kind::Implicit),
                ("bazel-out/bin/c.jar", Kind::Unused),
                ("bazel-out/bin/d.jar", Kind::Incomplete),
            ]),
        )
        .unwrap();

        let used = read_used_jars(&path);
        assert_eq!(
            used,
            BTreeSet::from([
                PathBuf::from("bazel-out/bin/a.jar"),
                PathBuf::from("bazel-out/bin/b.jar"),
            ])
        );
    }

    #[test]
    fn test_missing_descriptor_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(read_used_jars(&dir.path().join("nope.jdeps")).is_empty());
    }

    #[test]
    fn test_garbage_descriptor_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.jdeps");
        std::fs::write(&path, [0xffu8, 0xff, 0xff, 0xff, 0x0f]).unwrap();
        assert!(read_used_jars(&path).is_empty());
    }

    #[test]
    fn test_decode_preserves_metadata() {
        let bytes = descriptor(&[("x.jar", Kind::Implicit)]);
        let deps = Dependencies::decode(bytes.as_slice()).unwrap();
        assert_eq!(deps.rule_label.as_deref(), Some("//test:target"));
        assert_eq!(deps.dependency[0].kind, Kind::Implicit as i32);
        assert!(deps.dependency[0].is_used());
    }
}
