use crate::dispatch::LoadDispatcher;
use crate::error::LodeError;
use crate::handle::{ResourceHandle, WeakResourceHandle};
use crate::key::{self, ResourceKey, TypeKey};
use crate::registry::FactoryRegistry;
use crate::vfs::FileSystem;
use crossbeam_channel::{Receiver, Sender};
use lode_base::JobPool;
use std::sync::{Arc, Mutex, Weak};

// Index sorted by key. Entries are weak so the index never keeps an
// otherwise-unreferenced resource alive; dead entries are removed when the
// drop channel is pumped.
struct CacheIndex {
    entries: Vec<(ResourceKey, WeakResourceHandle)>,
    create_count: u64,
}

impl CacheIndex {
    fn position(
        &self,
        resource_key: ResourceKey,
    ) -> Result<usize, usize> {
        self.entries
            .binary_search_by_key(&resource_key, |(key, _)| *key)
    }
}

#[derive(Debug, Copy, Clone)]
pub struct ResourceCacheMetrics {
    /// Index entries, including not-yet-pumped dead ones.
    pub entry_count: usize,
    /// Handles created (and loads submitted) over the cache's lifetime.
    pub create_count: u64,
}

struct ResourceCacheInner {
    index: Mutex<CacheIndex>,
    registry: FactoryRegistry,
    dispatcher: LoadDispatcher,
    file_system: Arc<dyn FileSystem>,
    drop_tx: Sender<ResourceKey>,
    drop_rx: Receiver<ResourceKey>,
}

/// The deduplicated resource cache: turns a path into a shared handle,
/// guaranteeing at most one live handle (and at most one in-flight load)
/// per distinct key. Cheap to clone; clones share the same cache.
#[derive(Clone)]
pub struct ResourceCache {
    inner: Arc<ResourceCacheInner>,
}

// Held by in-flight load tasks. Weak so a queued task never keeps the cache
// (and therefore its worker pool) alive: the pool must not be dropped from
// one of its own worker threads.
#[derive(Clone)]
pub(crate) struct WeakResourceCache {
    inner: Weak<ResourceCacheInner>,
}

impl WeakResourceCache {
    pub(crate) fn upgrade(&self) -> Option<ResourceCache> {
        self.inner.upgrade().map(|inner| ResourceCache { inner })
    }
}

impl ResourceCache {
    pub fn new(
        registry: FactoryRegistry,
        pool: Arc<dyn JobPool>,
        file_system: Arc<dyn FileSystem>,
    ) -> Self {
        let (drop_tx, drop_rx) = crossbeam_channel::unbounded();

        ResourceCache {
            inner: Arc::new(ResourceCacheInner {
                index: Mutex::new(CacheIndex {
                    entries: Vec::new(),
                    create_count: 0,
                }),
                registry,
                dispatcher: LoadDispatcher::new(pool),
                file_system,
                drop_tx,
                drop_rx,
            }),
        }
    }

    /// Requests a resource by path. Never blocks on the load itself.
    ///
    /// Cache hit: the existing handle, no new load (dedup guarantee).
    /// Cache miss: a Pending handle whose load task has already been
    /// submitted to the worker pool by the time this returns, so
    /// subscribing immediately afterwards cannot miss the notification.
    /// Unknown extension (or no extension at all): a detached handle
    /// already in the Failed state; nothing is inserted into the index, so
    /// unknown types never occupy cache space.
    pub fn request(
        &self,
        name: &str,
    ) -> ResourceHandle {
        let normalized = key::normalize_path(name);
        let resource_key = ResourceKey::from_path(&normalized);

        // Get-or-create happens under a single lock acquisition: two
        // threads racing on a never-before-seen key cannot both insert.
        let (handle, loader) = {
            let mut index = self.inner.index.lock().unwrap();
            Self::pump_drops(&mut index, &self.inner.drop_rx);

            let search = index.position(resource_key);
            if let Ok(position) = search {
                if let Some(existing) = index.entries[position].1.upgrade() {
                    log::trace!("resource cache hit for '{}'", normalized);
                    return existing;
                }
                // The entry is dead but its drop signal raced past the pump
                // above; fall through and replace it in place.
            }

            let Some(extension) = key::extension(&normalized) else {
                log::error!("resource path '{}' has no extension", normalized);
                return ResourceHandle::new_failed(&normalized, LodeError::InvalidPath(normalized.clone()));
            };

            let type_key = TypeKey::from_extension(extension);
            let Some(factory) = self.inner.registry.lookup(type_key) else {
                log::error!(
                    "no resource factory registered for extension '{}' (requested '{}')",
                    extension,
                    normalized
                );
                return ResourceHandle::new_failed(
                    &normalized,
                    LodeError::UnknownResourceType(extension.to_string()),
                );
            };

            let loader = factory();
            let handle =
                ResourceHandle::new_pending(resource_key, &normalized, self.inner.drop_tx.clone());

            match search {
                Ok(position) => index.entries[position].1 = handle.downgrade(),
                Err(position) => {
                    // The binary-search miss position is the insertion
                    // point, so the index stays sorted without a re-search.
                    index.entries.insert(position, (resource_key, handle.downgrade()))
                }
            }
            index.create_count += 1;
            log::trace!("insert resource '{}' ({:016x})", normalized, resource_key.as_u64());

            (handle, loader)
        };

        // Load submission happens outside the index lock; the load may
        // itself re-enter the cache for sub-resources.
        self.inner.dispatcher.submit(self, &handle, loader);
        handle
    }

    /// Lookup without creating: returns the live handle for a path if one
    /// is cached, never schedules a load.
    pub fn get(
        &self,
        name: &str,
    ) -> Option<ResourceHandle> {
        let normalized = key::normalize_path(name);
        let resource_key = ResourceKey::from_path(&normalized);

        let index = self.inner.index.lock().unwrap();
        let position = index.position(resource_key).ok()?;
        index.entries[position].1.upgrade()
    }

    /// Removes index entries for resources that have been fully released.
    /// Eviction also happens opportunistically during `request`, so calling
    /// this is only needed to bound idle memory between requests.
    pub fn sweep(&self) {
        let mut index = self.inner.index.lock().unwrap();
        Self::pump_drops(&mut index, &self.inner.drop_rx);
    }

    pub fn metrics(&self) -> ResourceCacheMetrics {
        let index = self.inner.index.lock().unwrap();
        ResourceCacheMetrics {
            entry_count: index.entries.len(),
            create_count: index.create_count,
        }
    }

    pub(crate) fn file_system(&self) -> Arc<dyn FileSystem> {
        self.inner.file_system.clone()
    }

    pub(crate) fn downgrade(&self) -> WeakResourceCache {
        WeakResourceCache {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // Caller holds the index lock. A signalled key whose entry has a live
    // weak reference was already replaced by a newer handle and is kept.
    fn pump_drops(
        index: &mut CacheIndex,
        drop_rx: &Receiver<ResourceKey>,
    ) {
        for dropped_key in drop_rx.try_iter() {
            if let Ok(position) = index.position(dropped_key) {
                if index.entries[position].1.upgrade().is_none() {
                    log::trace!("evict resource ({:016x})", dropped_key.as_u64());
                    index.entries.remove(position);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{LoadContext, ResourceLoader};
    use crate::error::LodeResult;
    use crate::handle::Payload;
    use crate::vfs::MemoryFileSystem;
    use lode_base::{Job, WorkClass};

    // Collects jobs instead of running them, so tests control exactly when
    // loads finish.
    #[derive(Default)]
    struct ManualPool {
        jobs: Mutex<Vec<Job>>,
    }

    impl ManualPool {
        fn run_all(&self) {
            let jobs: Vec<Job> = std::mem::take(&mut *self.jobs.lock().unwrap());
            for job in jobs {
                job();
            }
        }

        fn queued(&self) -> usize {
            self.jobs.lock().unwrap().len()
        }
    }

    impl JobPool for ManualPool {
        fn submit(
            &self,
            _work_class: WorkClass,
            job: Job,
        ) {
            self.jobs.lock().unwrap().push(job);
        }
    }

    struct TextLoader;

    impl ResourceLoader for TextLoader {
        fn load(
            &mut self,
            context: &mut LoadContext,
        ) -> LodeResult<Payload> {
            let bytes = context.read_file()?;
            Ok(Box::new(String::from_utf8_lossy(&bytes).into_owned()))
        }
    }

    fn test_cache() -> (ResourceCache, Arc<ManualPool>, Arc<MemoryFileSystem>) {
        let registry = FactoryRegistry::builder()
            .register("txt", || Box::new(TextLoader))
            .build();
        let pool = Arc::new(ManualPool::default());
        let file_system = Arc::new(MemoryFileSystem::new());
        let cache = ResourceCache::new(registry, pool.clone(), file_system.clone());
        (cache, pool, file_system)
    }

    #[test]
    fn second_request_is_a_hit_with_no_second_load() {
        let (cache, pool, fs) = test_cache();
        fs.insert("a.txt", "hello");

        let first = cache.request("a.txt");
        let second = cache.request("a.txt");

        assert!(first.same_resource(&second));
        assert_eq!(pool.queued(), 1);
        assert_eq!(cache.metrics().create_count, 1);
    }

    #[test]
    fn normalized_spellings_share_one_entry() {
        let (cache, pool, fs) = test_cache();
        fs.insert("dir/a.txt", "hello");

        let first = cache.request("dir/a.txt");
        let second = cache.request(".\\dir\\a.txt");

        assert!(first.same_resource(&second));
        assert_eq!(pool.queued(), 1);
    }

    #[test]
    fn unknown_extension_is_failed_and_never_indexed() {
        let (cache, pool, _fs) = test_cache();

        let first = cache.request("model.xyz");
        assert!(first.has_failed());
        assert!(matches!(first.error(), Some(LodeError::UnknownResourceType(_))));
        assert_eq!(pool.queued(), 0);
        assert_eq!(cache.metrics().entry_count, 0);

        // Independent failed handle each time; unknown types are not cached.
        let second = cache.request("model.xyz");
        assert!(second.has_failed());
        assert!(!first.same_resource(&second));
    }

    #[test]
    fn missing_extension_is_failed_immediately() {
        let (cache, pool, _fs) = test_cache();

        let handle = cache.request("no_extension");
        assert!(handle.has_failed());
        assert!(matches!(handle.error(), Some(LodeError::InvalidPath(_))));
        assert_eq!(pool.queued(), 0);
    }

    #[test]
    fn get_never_creates() {
        let (cache, pool, fs) = test_cache();
        fs.insert("a.txt", "hello");

        assert!(cache.get("a.txt").is_none());
        assert_eq!(pool.queued(), 0);

        let handle = cache.request("a.txt");
        assert!(cache.get("a.txt").unwrap().same_resource(&handle));
    }

    #[test]
    fn full_release_evicts_on_next_sweep() {
        let (cache, pool, fs) = test_cache();
        fs.insert("a.txt", "hello");

        let handle = cache.request("a.txt");
        pool.run_all();
        assert!(handle.is_loaded());
        assert_eq!(cache.metrics().entry_count, 1);

        drop(handle);
        cache.sweep();
        assert_eq!(cache.metrics().entry_count, 0);
        assert!(cache.get("a.txt").is_none());
    }

    #[test]
    fn rerequest_after_full_release_loads_fresh() {
        let (cache, pool, fs) = test_cache();
        fs.insert("a.txt", "hello");

        let first = cache.request("a.txt");
        pool.run_all();
        drop(first);

        // No explicit sweep between drop and re-request: the dead entry
        // must not block a fresh load under the same key.
        let second = cache.request("a.txt");
        assert!(second.is_pending());
        assert_eq!(cache.metrics().create_count, 2);
        assert_eq!(cache.metrics().entry_count, 1);

        pool.run_all();
        assert!(second.is_loaded());
    }

    #[test]
    fn index_stays_sorted_across_inserts() {
        let (cache, _pool, fs) = test_cache();

        let paths: Vec<String> = (0..32).map(|i| format!("res_{:02}.txt", i)).collect();
        for path in &paths {
            fs.insert(path, "x");
        }
        let handles: Vec<_> = paths.iter().rev().map(|p| cache.request(p)).collect();

        let index = cache.inner.index.lock().unwrap();
        assert!(index.entries.windows(2).all(|w| w[0].0 < w[1].0));
        assert_eq!(index.entries.len(), handles.len());
    }

    #[test]
    fn load_failure_is_local_to_the_handle() {
        let (cache, pool, fs) = test_cache();
        fs.insert("good.txt", "fine");

        let bad = cache.request("missing.txt");
        let good = cache.request("good.txt");
        pool.run_all();

        assert!(bad.has_failed());
        assert!(good.is_loaded());
        assert_eq!(good.payload::<String>().unwrap(), "fine");
    }
}
