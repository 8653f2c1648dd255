//! Asynchronous, deduplicated, ref-counted resource loading.
//!
//! [`ResourceCache::request`] turns a path into a shared [`ResourceHandle`]
//! without blocking: at most one live handle and one in-flight load exist
//! per distinct path. Loads run on a [`lode_base::JobPool`]; completion is
//! observed through the handle's state or its subscribers.

mod cache;
pub use cache::ResourceCache;
pub use cache::ResourceCacheMetrics;

mod dispatch;
pub use dispatch::LoadContext;
pub use dispatch::ResourceLoader;

mod error;
pub use error::LodeError;
pub use error::LodeResult;

mod handle;
pub use handle::Payload;
pub use handle::ResourceHandle;
pub use handle::ResourceState;

mod key;
pub use key::extension;
pub use key::normalize_path;
pub use key::ResourceKey;
pub use key::TypeKey;

mod registry;
pub use registry::FactoryFn;
pub use registry::FactoryRegistry;
pub use registry::FactoryRegistryBuilder;

mod vfs;
pub use vfs::DiskFileSystem;
pub use vfs::FileSystem;
pub use vfs::MemoryFileSystem;
