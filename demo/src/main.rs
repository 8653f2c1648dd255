use lode_assets::{
    FactoryRegistry, LoadContext, LodeResult, MemoryFileSystem, Payload, ResourceCache,
    ResourceLoader,
};
use lode_base::{WorkClass, WorkerPool};
use std::sync::Arc;

pub fn logging_init() {
    #[cfg(not(debug_assertions))]
    let log_level = log::LevelFilter::Info;
    #[cfg(debug_assertions)]
    let log_level = log::LevelFilter::Trace;

    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();
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

// A material pulls in the shaders it names, demonstrating sub-resource
// ownership: the material handle keeps its shaders alive.
struct MaterialLoader;

impl ResourceLoader for MaterialLoader {
    fn work_class(&self) -> WorkClass {
        WorkClass::Cpu
    }

    fn load(
        &mut self,
        context: &mut LoadContext,
    ) -> LodeResult<Payload> {
        let manifest = String::from_utf8_lossy(&context.read_file()?).into_owned();

        let mut shader_count = 0;
        for shader_path in manifest.lines().filter(|l| !l.is_empty()) {
            let shader = context.request_sub_resource(shader_path);
            if shader.wait() != lode_assets::ResourceState::Loaded {
                return Err(format!("shader '{}' failed to load", shader_path).into());
            }
            shader_count += 1;
        }

        Ok(Box::new(format!("material with {} shaders", shader_count)))
    }
}

fn main() {
    logging_init();

    let registry = FactoryRegistry::builder()
        .register("glsl", || Box::new(TextLoader))
        .register("material", || Box::new(MaterialLoader))
        .build();

    let file_system = Arc::new(MemoryFileSystem::new());
    file_system.insert("shaders/sprite.glsl", "void main() {}");
    file_system.insert("shaders/mesh.glsl", "void main() {}");
    file_system.insert("pbr.material", "shaders/sprite.glsl\nshaders/mesh.glsl");

    let cache = ResourceCache::new(registry, Arc::new(WorkerPool::default()), file_system);

    let material = cache.request("pbr.material");
    material.subscribe(|handle| {
        log::info!("'{}' finished in state {:?}", handle.path(), handle.state());
    });

    // A second request for a shader the material already pulled in is a
    // cache hit, not a second load.
    material.wait();
    let shader = cache.request("shaders/sprite.glsl");
    assert!(shader.is_loaded());

    println!(
        "{}: {}",
        material.path(),
        material.payload::<String>().expect("material payload")
    );
    println!("cache metrics: {:?}", cache.metrics());

    // Requesting something nobody registered fails fast and is never cached.
    let unknown = cache.request("model.xyz");
    println!("'{}' -> {:?}", unknown.path(), unknown.error());
}
