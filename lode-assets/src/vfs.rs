use crate::error::LodeResult;
use fnv::FnvHashMap;
use std::path::PathBuf;
use std::sync::Mutex;

/// The file-system boundary. Concrete load logic pulls raw bytes through
/// this; the cache itself never touches file contents.
pub trait FileSystem: Send + Sync {
    fn open_file(
        &self,
        path: &str,
    ) -> LodeResult<Vec<u8>>;
}

/// Reads resources from a root directory on disk.
pub struct DiskFileSystem {
    root: PathBuf,
}

impl DiskFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        DiskFileSystem { root: root.into() }
    }
}

impl FileSystem for DiskFileSystem {
    fn open_file(
        &self,
        path: &str,
    ) -> LodeResult<Vec<u8>> {
        let full_path = self.root.join(path);
        log::trace!("opening file {:?}", full_path);
        Ok(std::fs::read(&full_path)?)
    }
}

/// In-memory file system, mainly for tests and demos.
#[derive(Default)]
pub struct MemoryFileSystem {
    files: Mutex<FnvHashMap<String, Vec<u8>>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn insert(
        &self,
        path: &str,
        contents: impl Into<Vec<u8>>,
    ) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), contents.into());
    }
}

impl FileSystem for MemoryFileSystem {
    fn open_file(
        &self,
        path: &str,
    ) -> LodeResult<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotFound, format!("no such file: {}", path))
                    .into()
            })
    }
}
