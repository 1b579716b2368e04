//! Reversible path <-> key codec for the namespace hashtable.
//!
//! Keys are the base64 encoding of the absolute path, so `/` never needs
//! escaping inside a key and `key_to_path(path_to_key(p)) == p` for every
//! path. Ancestor chains are derived on the path side and re-encoded,
//! which keeps parent lookups a pure string operation.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::types::NnError;

/// Encodes an absolute path into its namespace key.
pub fn path_to_key(path: &str) -> String {
    STANDARD.encode(path.as_bytes())
}

/// Decodes a namespace key back into the path it was built from.
pub fn key_to_path(key: &str) -> Result<String, NnError> {
    let bytes = STANDARD
        .decode(key.as_bytes())
        .map_err(|e| NnError::Codec(format!("bad path key: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| NnError::Codec(format!("bad path key utf8: {}", e)))
}

/// Splits a path into its non-empty components.
///
/// `"/a//b/"` yields `["a", "b"]`; `"/"` yields `[]`.
pub fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

/// Returns every ancestor path from root down to `path` itself.
///
/// `"/a/b"` yields `["/", "/a", "/a/b"]`; `"/"` yields `["/"]`.
pub fn ancestor_paths(path: &str) -> Vec<String> {
    let mut out = vec![String::from("/")];
    let mut acc = String::new();
    for name in components(path) {
        acc.push('/');
        acc.push_str(name);
        out.push(acc.clone());
    }
    out
}

/// Returns the keys of every ancestor from root down to `path` itself.
pub fn ancestor_keys(path: &str) -> Vec<String> {
    ancestor_paths(path)
        .iter()
        .map(|p| path_to_key(p))
        .collect()
}

/// Returns the parent path, or `None` for root.
pub fn parent_path(path: &str) -> Option<String> {
    let names = components(path);
    match names.len() {
        0 => None,
        1 => Some(String::from("/")),
        n => {
            let mut acc = String::new();
            for name in &names[..n - 1] {
                acc.push('/');
                acc.push_str(name);
            }
            Some(acc)
        }
    }
}

/// Returns the parent's key, or `None` for root.
pub fn parent_key(path: &str) -> Option<String> {
    parent_path(path).map(|p| path_to_key(&p))
}

/// Key of the root directory "/".
pub fn root_key() -> String {
    path_to_key("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_key_roundtrip() {
        for path in ["/", "/a", "/a/b/c", "/with space", "/трек/ű"] {
            assert_eq!(key_to_path(&path_to_key(path)).unwrap(), path);
        }
    }

    #[test]
    fn test_key_matches_known_encoding() {
        // "/" encodes to "Lw==" under standard base64
        assert_eq!(path_to_key("/"), "Lw==");
    }

    #[test]
    fn test_bad_key_rejected() {
        assert!(key_to_path("not base64!!").is_err());
    }

    #[test]
    fn test_components() {
        assert_eq!(components("/"), Vec::<&str>::new());
        assert_eq!(components("/a/b"), vec!["a", "b"]);
        assert_eq!(components("/a//b/"), vec!["a", "b"]);
    }

    #[test]
    fn test_ancestor_paths() {
        assert_eq!(ancestor_paths("/"), vec!["/"]);
        assert_eq!(ancestor_paths("/a/b/c"), vec!["/", "/a", "/a/b", "/a/b/c"]);
    }

    #[test]
    fn test_parent_path() {
        assert_eq!(parent_path("/"), None);
        assert_eq!(parent_path("/a").as_deref(), Some("/"));
        assert_eq!(parent_path("/a/b/c").as_deref(), Some("/a/b"));
    }

    #[test]
    fn test_parent_key_consistent() {
        assert_eq!(parent_key("/a/b").unwrap(), path_to_key("/a"));
        assert_eq!(parent_key("/a").unwrap(), root_key());
    }

    proptest! {
        #[test]
        fn prop_key_roundtrip(path in "/[a-zA-Z0-9_./-]{0,64}") {
            prop_assert_eq!(key_to_path(&path_to_key(&path)).unwrap(), path);
        }

        #[test]
        fn prop_ancestors_end_at_path(parts in proptest::collection::vec("[a-z]{1,8}", 1..6)) {
            let path = format!("/{}", parts.join("/"));
            let chain = ancestor_paths(&path);
            prop_assert_eq!(chain.first().map(String::as_str), Some("/"));
            prop_assert_eq!(chain.last().map(String::as_str), Some(path.as_str()));
            prop_assert_eq!(chain.len(), parts.len() + 1);
        }
    }
}
