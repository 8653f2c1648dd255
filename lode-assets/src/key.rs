use fnv::FnvHasher;
use std::hash::Hasher;

/// Content-stable hash of a normalized resource path. This is the cache's
/// identity: two requests for the same normalized path always produce the
/// same key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey(u64);

impl ResourceKey {
    /// Hashes an already-normalized path. Callers outside the cache should
    /// go through [`normalize_path`] first.
    pub fn from_path(normalized_path: &str) -> ResourceKey {
        let mut hasher = FnvHasher::default();
        hasher.write(normalized_path.as_bytes());
        ResourceKey(hasher.finish())
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

/// Hash identifying a resource type, derived from a file extension. Used to
/// pick the factory that constructs the load logic for a path.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TypeKey(u64);

impl TypeKey {
    /// Accepts the extension with or without its leading dot; both forms
    /// produce the same key.
    pub fn from_extension(extension: &str) -> TypeKey {
        let ext = extension.strip_prefix('.').unwrap_or(extension);
        let mut hasher = FnvHasher::default();
        hasher.write(ext.as_bytes());
        TypeKey(hasher.finish())
    }
}

/// Normalizes a resource path so equivalent spellings hash to the same key:
/// backslashes become forward slashes and leading `./` segments are dropped.
pub fn normalize_path(path: &str) -> String {
    let mut normalized = path.replace('\\', "/");
    while let Some(rest) = normalized.strip_prefix("./") {
        normalized = rest.to_string();
    }
    normalized
}

/// Returns the extension substring of a path (without the dot), or None if
/// the final path component has no extension separator. A leading dot names
/// a dotfile, not an extension, so `.config` has no extension.
pub fn extension(path: &str) -> Option<&str> {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    match file_name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < file_name.len() => Some(&file_name[pos + 1..]),
        _ => None,
    }
}
