use crate::cache::{ResourceCache, WeakResourceCache};
use crate::error::{LodeError, LodeResult};
use crate::handle::{Payload, ResourceHandle};
use crate::vfs::FileSystem;
use lode_base::{Job, JobPool, WorkClass};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Everything a load task may touch: the resource being loaded, the file
/// system, and the cache (for requesting sub-resources).
pub struct LoadContext {
    handle: ResourceHandle,
    // Weak: a load task finishing after the last cache clone is released
    // must not be the one tearing the cache (and its pool) down.
    cache: WeakResourceCache,
    file_system: Arc<dyn FileSystem>,
}

impl LoadContext {
    pub fn path(&self) -> &str {
        self.handle.path()
    }

    /// Pulls the raw bytes for the resource being loaded.
    pub fn read_file(&self) -> LodeResult<Vec<u8>> {
        self.file_system.open_file(self.handle.path())
    }

    /// Requests another resource and attaches it as a sub-resource of the
    /// one being loaded, so the parent holds a strong reference to it. The
    /// returned handle may still be Pending; waiting for it (or not) is the
    /// caller's composition decision.
    pub fn request_sub_resource(
        &self,
        name: &str,
    ) -> ResourceHandle {
        let Some(cache) = self.cache.upgrade() else {
            log::error!(
                "sub-resource '{}' requested after the resource cache was released",
                name
            );
            return ResourceHandle::new_failed(
                name,
                LodeError::StringError("resource cache was released".to_string()),
            );
        };

        let sub_resource = cache.request(name);
        self.handle.add_sub_resource(sub_resource.clone());
        sub_resource
    }
}

/// Type-specific load logic, produced by a factory from the registry. One
/// loader instance serves exactly one load of one resource.
pub trait ResourceLoader: Send {
    /// Which worker-pool channel this load should run on. Loads that parse
    /// in-memory data can opt into the CPU channel; the default suits
    /// logic that reads from disk.
    fn work_class(&self) -> WorkClass {
        WorkClass::DiskIo
    }

    fn load(
        &mut self,
        context: &mut LoadContext,
    ) -> LodeResult<Payload>;
}

/// Submits load tasks to the worker pool on behalf of freshly created
/// handles. The wrapper it builds owns the terminal transition: a normal
/// return marks the handle Loaded, an error return marks it Failed, and a
/// panic is caught and converted to Failed so a dead task can never leave
/// a handle Pending forever.
pub(crate) struct LoadDispatcher {
    pool: Arc<dyn JobPool>,
}

impl LoadDispatcher {
    pub(crate) fn new(pool: Arc<dyn JobPool>) -> Self {
        LoadDispatcher { pool }
    }

    /// Exactly one submission per handle, made before the handle is
    /// returned to any caller.
    pub(crate) fn submit(
        &self,
        cache: &ResourceCache,
        handle: &ResourceHandle,
        mut loader: Box<dyn ResourceLoader>,
    ) {
        let work_class = loader.work_class();
        let handle = handle.clone();
        let mut context = LoadContext {
            handle: handle.clone(),
            cache: cache.downgrade(),
            file_system: cache.file_system(),
        };

        let job: Job = Box::new(move || {
            log::trace!("load task starting for '{}'", handle.path());
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| loader.load(&mut context)));
            match result {
                Ok(Ok(payload)) => handle.mark_loaded(payload),
                Ok(Err(error)) => handle.mark_failed(error),
                Err(_panic) => handle.mark_failed(LodeError::LoadPanicked),
            }
        });

        self.pool.submit(work_class, job);
    }
}
