use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use sb_core::{EngineFlavor, HostMap, ScriptBridgeError, ScriptSource};
use tracing::debug;

use super::bindings::LazyVariableBindings;
use super::handle::ScriptHandle;
use super::instance::{negotiate_flavor, CompiledScript, EngineInstance, EngineLimits};
use super::lookup::DocumentLookup;

#[derive(Debug, Clone, Default)]
pub struct EngineCacheOptions {
    pub flavor: EngineFlavor,
    pub limits: EngineLimits,
    /// Names every script can read, shared by all threads.
    pub builtins: Arc<HostMap>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub engine_id: u64,
    pub compiled_scripts: usize,
    pub hits: u64,
    pub misses: u64,
}

/// What callers keep after compiling: just the source, so it can cross threads.
/// Each thread resolves it to its own compiled script.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompiledScriptHandle {
    source: ScriptSource,
}

impl CompiledScriptHandle {
    pub fn source(&self) -> &ScriptSource {
        &self.source
    }
}

#[derive(Debug)]
struct CacheShared {
    flavor: EngineFlavor,
    limits: EngineLimits,
    builtins: Arc<HostMap>,
    engines_created: AtomicUsize,
}

type EngineSlot = (Weak<CacheShared>, Rc<EngineInstance>);

thread_local! {
    static THREAD_ENGINES: RefCell<Vec<EngineSlot>> = const { RefCell::new(Vec::new()) };
}

/// Hands every calling thread its own engine instance and compiled scripts.
///
/// Nothing engine-side is shared between threads. Instances belonging to a
/// dropped cache are evicted on the owning thread's next access, or when that
/// thread exits.
#[derive(Debug, Clone)]
pub struct ThreadAffineEngineCache {
    shared: Arc<CacheShared>,
}

impl ThreadAffineEngineCache {
    pub fn new(options: EngineCacheOptions) -> Result<Self, ScriptBridgeError> {
        let flavor = negotiate_flavor(options.flavor)?;
        Ok(Self {
            shared: Arc::new(CacheShared {
                flavor,
                limits: options.limits,
                builtins: options.builtins,
                engines_created: AtomicUsize::new(0),
            }),
        })
    }

    /// The negotiated flavor, never `Auto`.
    pub fn flavor(&self) -> EngineFlavor {
        self.shared.flavor
    }

    pub fn engines_created(&self) -> usize {
        self.shared.engines_created.load(Ordering::Relaxed)
    }

    pub fn engine_for_current_thread(&self) -> Result<Rc<EngineInstance>, ScriptBridgeError> {
        THREAD_ENGINES.with(|slots| {
            let mut slots = slots.borrow_mut();
            slots.retain(|(owner, _)| owner.strong_count() > 0);
            if let Some(instance) = self.find(&slots) {
                return Ok(instance);
            }

            let instance = Rc::new(EngineInstance::create(
                self.shared.flavor,
                self.shared.limits,
                &self.shared.builtins,
            )?);
            let created = self.shared.engines_created.fetch_add(1, Ordering::Relaxed) + 1;
            debug!(
                engine_id = instance.id(),
                engines_created = created,
                "bound script engine to thread"
            );
            slots.push((Arc::downgrade(&self.shared), Rc::clone(&instance)));
            Ok(instance)
        })
    }

    pub fn compiled_script_for(
        &self,
        source: &ScriptSource,
    ) -> Result<CompiledScript, ScriptBridgeError> {
        self.engine_for_current_thread()?.compile(source)
    }

    /// Compiles on the calling thread so errors surface now.
    pub fn compile(
        &self,
        source: impl Into<ScriptSource>,
    ) -> Result<CompiledScriptHandle, ScriptBridgeError> {
        let source = source.into();
        self.compiled_script_for(&source)?;
        Ok(CompiledScriptHandle { source })
    }

    pub fn bind<L: DocumentLookup>(
        &self,
        handle: &CompiledScriptHandle,
        variables: LazyVariableBindings<L>,
    ) -> Result<ScriptHandle<L>, ScriptBridgeError> {
        let engine = self.engine_for_current_thread()?;
        let script = engine.compile(&handle.source)?;
        ScriptHandle::bind(engine, script, variables)
    }

    /// Stats for the calling thread, without creating an engine.
    pub fn current_thread_stats(&self) -> Option<CacheStats> {
        THREAD_ENGINES
            .try_with(|slots| {
                self.find(&slots.borrow()).map(|instance| CacheStats {
                    engine_id: instance.id(),
                    compiled_scripts: instance.compiled_scripts(),
                    hits: instance.hits(),
                    misses: instance.misses(),
                })
            })
            .ok()
            .flatten()
    }

    /// Drops the calling thread's engine and compiled scripts. Handles still
    /// holding the instance keep it alive until they are dropped.
    pub fn teardown_current_thread(&self) -> bool {
        THREAD_ENGINES
            .try_with(|slots| {
                let mut slots = slots.borrow_mut();
                let before = slots.len();
                slots.retain(|(owner, _)| {
                    owner.strong_count() > 0 && Weak::as_ptr(owner) != Arc::as_ptr(&self.shared)
                });
                let removed = before != slots.len();
                if removed {
                    debug!("tore down thread script engine");
                }
                removed
            })
            .unwrap_or(false)
    }

    fn find(&self, slots: &[EngineSlot]) -> Option<Rc<EngineInstance>> {
        slots
            .iter()
            .find(|(owner, _)| Weak::as_ptr(owner) == Arc::as_ptr(&self.shared))
            .map(|(_, instance)| Rc::clone(instance))
    }
}
