use std::sync::Arc;

use sb_core::{EngineFlavor, HostMap, HostValue, ScriptBridgeError, ScriptSource};
use sb_runtime::{EngineCacheOptions, EngineLimits, LazyVariableBindings, ThreadAffineEngineCache};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use sb_runtime::{
    CacheStats, CompiledScriptHandle, DocumentLookup, Dynamic, ExecutableHandle, NoLookup,
    ScriptHandle, SearchHandle, ValueBridge,
};

pub const SCRIPT_TYPES: &[&str] = &["rhai"];
pub const SCRIPT_EXTENSIONS: &[&str] = &["rhai"];

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptEngineHostOptions {
    pub flavor: EngineFlavor,
    pub max_operations: Option<u64>,
    pub max_expr_depth: Option<usize>,
    /// Read-only values visible to every script unless a variable shadows them.
    pub builtins: HostMap,
}

impl ScriptEngineHostOptions {
    pub fn from_json(raw: &str) -> Result<Self, ScriptBridgeError> {
        serde_json::from_str(raw).map_err(|error| {
            ScriptBridgeError::config(
                "CONFIG_OPTIONS_INVALID",
                format!("Invalid script engine options: {}.", error),
            )
        })
    }
}

/// Entry point for hosts: compiles scripts and hands out handles bound to the
/// calling thread's engine.
#[derive(Debug, Clone)]
pub struct ScriptEngineHost {
    cache: ThreadAffineEngineCache,
}

impl ScriptEngineHost {
    pub fn new(options: ScriptEngineHostOptions) -> Result<Self, ScriptBridgeError> {
        let cache = ThreadAffineEngineCache::new(EngineCacheOptions {
            flavor: options.flavor,
            limits: EngineLimits {
                max_operations: options.max_operations,
                max_expr_depth: options.max_expr_depth,
            },
            builtins: Arc::new(options.builtins),
        })?;
        debug!(flavor = %cache.flavor(), "script engine host ready");
        Ok(Self { cache })
    }

    pub fn compile(&self, source: &str) -> Result<CompiledScriptHandle, ScriptBridgeError> {
        self.cache.compile(ScriptSource::from(source))
    }

    pub fn executable(
        &self,
        script: &CompiledScriptHandle,
        vars: HostMap,
    ) -> Result<ExecutableHandle, ScriptBridgeError> {
        self.cache.bind(script, LazyVariableBindings::new(vars))
    }

    /// One-shot run. Failures are logged and read as null.
    pub fn execute(&self, script: &CompiledScriptHandle, vars: HostMap) -> HostValue {
        match self.try_execute(script, vars) {
            Ok(value) => value,
            Err(error) => {
                warn!(code = %error.code, message = %error.message, "script execution failed");
                HostValue::Null
            }
        }
    }

    pub fn try_execute(
        &self,
        script: &CompiledScriptHandle,
        vars: HostMap,
    ) -> Result<HostValue, ScriptBridgeError> {
        self.executable(script, vars)?.try_run()
    }

    pub fn search<L: DocumentLookup>(
        &self,
        script: &CompiledScriptHandle,
        lookup: L,
        vars: HostMap,
    ) -> Result<SearchHandle<L>, ScriptBridgeError> {
        let handle = self
            .cache
            .bind(script, LazyVariableBindings::with_lookup(vars, lookup))?;
        Ok(SearchHandle::new(handle))
    }

    pub fn unwrap(&self, value: Dynamic) -> HostValue {
        ValueBridge::unwrap(value)
    }

    pub fn types(&self) -> &'static [&'static str] {
        SCRIPT_TYPES
    }

    pub fn extensions(&self) -> &'static [&'static str] {
        SCRIPT_EXTENSIONS
    }

    pub fn flavor(&self) -> EngineFlavor {
        self.cache.flavor()
    }

    /// Releases the calling thread's engine. Other threads release theirs on
    /// their own `close` or when they exit after the host is dropped.
    pub fn close(&self) -> bool {
        self.cache.teardown_current_thread()
    }

    pub fn cache(&self) -> &ThreadAffineEngineCache {
        &self.cache
    }
}
