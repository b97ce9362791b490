use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use rhai::packages::{CorePackage, Package};
use rhai::{Dynamic, Engine, EvalAltResult, ParseError, Position, Scope, AST, FLOAT};
use sb_core::{
    EngineFlavor, ErrorKind, HostMap, ScriptBridgeError, ScriptSource, SourcePosition,
};
use tracing::{debug, trace};

use crate::helpers::rhai_bridge::{referenced_identifiers, ValueBridge};

static NEXT_ENGINE_ID: AtomicU64 = AtomicU64::new(1);

/// Exercises what the bridge needs from an engine: object maps, arrays and floats.
const PROBE_SCRIPT: &str = "let probe = #{ values: [1, 2.5] }; probe.values[1]";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineLimits {
    pub max_operations: Option<u64>,
    pub max_expr_depth: Option<usize>,
}

/// Read-only names every script on an engine can see unless a variable shadows them.
#[derive(Debug, Default)]
pub struct BuiltinScope {
    values: BTreeMap<String, Dynamic>,
}

impl BuiltinScope {
    pub fn from_host(definitions: &HostMap) -> Self {
        Self {
            values: definitions
                .iter()
                .map(|(name, value)| (name.clone(), ValueBridge::wrap(value)))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Dynamic> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A parsed script plus the names it reads. Only usable with the engine that
/// produced it.
#[derive(Debug, Clone)]
pub struct CompiledScript {
    engine_id: u64,
    source: ScriptSource,
    ast: Rc<AST>,
    identifiers: Rc<[String]>,
}

impl CompiledScript {
    pub fn engine_id(&self) -> u64 {
        self.engine_id
    }

    pub fn source(&self) -> &ScriptSource {
        &self.source
    }

    pub fn ast(&self) -> &AST {
        &self.ast
    }

    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }
}

/// One engine with its builtins and compiled-script cache, owned by a single thread.
pub struct EngineInstance {
    id: u64,
    flavor: EngineFlavor,
    engine: Engine,
    builtins: Rc<BuiltinScope>,
    scripts: RefCell<HashMap<ScriptSource, CompiledScript>>,
    hits: Cell<u64>,
    misses: Cell<u64>,
}

impl EngineInstance {
    pub(crate) fn create(
        flavor: EngineFlavor,
        limits: EngineLimits,
        builtins: &HostMap,
    ) -> Result<Self, ScriptBridgeError> {
        let builtins = Rc::new(BuiltinScope::from_host(builtins));
        let mut engine = build_engine(flavor, limits)?;
        install_builtin_resolver(&mut engine, Rc::clone(&builtins));

        let id = NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed);
        debug!(
            engine_id = id,
            flavor = %flavor,
            builtins = builtins.len(),
            "created script engine instance"
        );
        Ok(Self {
            id,
            flavor,
            engine,
            builtins,
            scripts: RefCell::new(HashMap::new()),
            hits: Cell::new(0),
            misses: Cell::new(0),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn flavor(&self) -> EngineFlavor {
        self.flavor
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn builtins(&self) -> &Rc<BuiltinScope> {
        &self.builtins
    }

    pub fn compiled_scripts(&self) -> usize {
        self.scripts.borrow().len()
    }

    pub fn hits(&self) -> u64 {
        self.hits.get()
    }

    pub fn misses(&self) -> u64 {
        self.misses.get()
    }

    /// Returns the cached compilation of `source`, compiling it on a miss.
    /// Failed compilations are not cached.
    pub fn compile(&self, source: &ScriptSource) -> Result<CompiledScript, ScriptBridgeError> {
        if let Some(script) = self.scripts.borrow().get(source) {
            self.hits.set(self.hits.get() + 1);
            trace!(engine_id = self.id, "compiled script cache hit");
            return Ok(script.clone());
        }

        self.misses.set(self.misses.get() + 1);
        let ast = self
            .engine
            .compile(source.as_str())
            .map_err(compile_error)?;
        let script = CompiledScript {
            engine_id: self.id,
            source: source.clone(),
            ast: Rc::new(ast),
            identifiers: referenced_identifiers(source.as_str()).into(),
        };
        debug!(
            engine_id = self.id,
            identifiers = script.identifiers.len(),
            "compiled script"
        );
        self.scripts
            .borrow_mut()
            .insert(source.clone(), script.clone());
        Ok(script)
    }

    pub(crate) fn check_owns(&self, script: &CompiledScript) -> Result<(), ScriptBridgeError> {
        if script.engine_id == self.id {
            return Ok(());
        }
        Err(ScriptBridgeError::evaluation(
            "ENGINE_SCRIPT_FOREIGN",
            format!(
                "Script was compiled by engine {} and cannot run on engine {}.",
                script.engine_id, self.id
            ),
        ))
    }

    pub(crate) fn eval(
        &self,
        script: &CompiledScript,
        scope: &mut Scope<'static>,
    ) -> Result<Dynamic, ScriptBridgeError> {
        self.check_owns(script)?;
        self.engine
            .eval_ast_with_scope::<Dynamic>(scope, &script.ast)
            .map_err(|error| eval_error(&error))
    }
}

/// Picks the first flavor that passes the probe. `Auto` tries the richest
/// flavor first. Probes run without the configured limits.
pub(crate) fn negotiate_flavor(requested: EngineFlavor) -> Result<EngineFlavor, ScriptBridgeError> {
    let candidates: &[EngineFlavor] = match requested {
        EngineFlavor::Auto => &[EngineFlavor::Standard, EngineFlavor::Core],
        EngineFlavor::Standard => &[EngineFlavor::Standard],
        EngineFlavor::Core => &[EngineFlavor::Core],
    };
    for candidate in candidates {
        if probe_flavor(*candidate) {
            debug!(requested = %requested, resolved = %candidate, "negotiated engine flavor");
            return Ok(*candidate);
        }
        debug!(flavor = %candidate, "engine flavor failed probe");
    }
    Err(ScriptBridgeError::initialization(
        "ENGINE_INIT_UNAVAILABLE",
        format!("No usable script engine for flavor \"{}\".", requested),
    ))
}

fn probe_flavor(flavor: EngineFlavor) -> bool {
    let Ok(engine) = build_engine(flavor, EngineLimits::default()) else {
        return false;
    };
    match engine.eval::<Dynamic>(PROBE_SCRIPT) {
        Ok(value) => value.as_float().map_or(false, |number| number == 2.5 as FLOAT),
        Err(_) => false,
    }
}

fn build_engine(flavor: EngineFlavor, limits: EngineLimits) -> Result<Engine, ScriptBridgeError> {
    let mut engine = match flavor {
        EngineFlavor::Standard => Engine::new(),
        EngineFlavor::Core => {
            let mut engine = Engine::new_raw();
            engine.register_global_module(CorePackage::new().as_shared_module());
            engine
        }
        EngineFlavor::Auto => {
            return Err(ScriptBridgeError::initialization(
                "ENGINE_INIT_UNAVAILABLE",
                "Engine flavor must be resolved before building an engine.",
            ))
        }
    };
    if let Some(max_operations) = limits.max_operations {
        engine.set_max_operations(max_operations);
    }
    if let Some(max_depth) = limits.max_expr_depth {
        engine.set_max_expr_depths(max_depth, max_depth);
    }
    Ok(engine)
}

fn install_builtin_resolver(engine: &mut Engine, builtins: Rc<BuiltinScope>) {
    if builtins.is_empty() {
        return;
    }
    // Values handed back by the resolver are read-only to the script.
    engine.on_var(move |name, index, context| {
        if index > 0 || context.scope().contains(name) {
            return Ok(None);
        }
        Ok(builtins.get(name).cloned())
    });
}

fn source_position(position: Position) -> Option<SourcePosition> {
    Some(SourcePosition {
        line: position.line()?,
        column: position.position().unwrap_or(0),
    })
}

fn compile_error(error: ParseError) -> ScriptBridgeError {
    let message = error.0.to_string();
    match source_position(error.1) {
        Some(position) => ScriptBridgeError::with_position(
            ErrorKind::Compile,
            "SCRIPT_COMPILE_ERROR",
            message,
            position,
        ),
        None => ScriptBridgeError::new(ErrorKind::Compile, "SCRIPT_COMPILE_ERROR", message),
    }
}

fn eval_error(error: &EvalAltResult) -> ScriptBridgeError {
    let message = error.to_string();
    match source_position(error.position()) {
        Some(position) => ScriptBridgeError::with_position(
            ErrorKind::Evaluation,
            "SCRIPT_EVAL_ERROR",
            message,
            position,
        ),
        None => ScriptBridgeError::evaluation("SCRIPT_EVAL_ERROR", message),
    }
}

#[cfg(test)]
mod instance_tests {
    use super::*;
    use sb_core::HostValue;

    fn instance(flavor: EngineFlavor) -> EngineInstance {
        EngineInstance::create(flavor, EngineLimits::default(), &HostMap::new())
            .expect("engine should build")
    }

    #[test]
    fn auto_negotiates_standard_flavor() {
        let flavor = negotiate_flavor(EngineFlavor::Auto).expect("negotiate");
        assert_eq!(flavor, EngineFlavor::Standard);
        let core = negotiate_flavor(EngineFlavor::Core).expect("core flavor");
        assert_eq!(core, EngineFlavor::Core);
    }

    #[test]
    fn build_engine_rejects_unresolved_flavor() {
        let error = build_engine(EngineFlavor::Auto, EngineLimits::default())
            .err()
            .expect("auto is not buildable");
        assert_eq!(error.code, "ENGINE_INIT_UNAVAILABLE");
        assert!(error.is_fatal());
    }

    #[test]
    fn compile_caches_by_source_text() {
        let engine = instance(EngineFlavor::Standard);
        let source = ScriptSource::from("x + y");
        let first = engine.compile(&source).expect("compile");
        let second = engine.compile(&source).expect("compile again");
        assert_eq!(engine.compiled_scripts(), 1);
        assert_eq!((engine.hits(), engine.misses()), (1, 1));
        assert_eq!(first.identifiers(), ["x".to_string(), "y".to_string()]);
        assert!(Rc::ptr_eq(&first.ast, &second.ast));
        assert_eq!(first.engine_id(), engine.id());
        assert_eq!(first.source().as_str(), "x + y");
    }

    #[test]
    fn compile_errors_carry_position_and_are_not_cached() {
        let engine = instance(EngineFlavor::Standard);
        let source = ScriptSource::from("let a = ;");
        let error = engine.compile(&source).expect_err("bad script");
        assert_eq!(error.code, "SCRIPT_COMPILE_ERROR");
        assert_eq!(error.kind, ErrorKind::Compile);
        assert_eq!(error.position.map(|position| position.line), Some(1));
        assert_eq!(engine.compiled_scripts(), 0);

        engine.compile(&source).expect_err("still bad");
        assert_eq!(engine.misses(), 2);
    }

    #[test]
    fn eval_rejects_scripts_from_other_engines() {
        let first = instance(EngineFlavor::Standard);
        let second = instance(EngineFlavor::Standard);
        let script = first.compile(&ScriptSource::from("1")).expect("compile");
        let mut scope = Scope::new();
        let error = second.eval(&script, &mut scope).expect_err("foreign script");
        assert_eq!(error.code, "ENGINE_SCRIPT_FOREIGN");
        assert_eq!(
            first.eval(&script, &mut scope).expect("own script").as_int().ok(),
            Some(1)
        );
    }

    #[test]
    fn core_flavor_evaluates_basic_scripts() {
        let engine = instance(EngineFlavor::Core);
        let script = engine.compile(&ScriptSource::from("1 + 2")).expect("compile");
        let mut scope = Scope::new();
        let value = engine.eval(&script, &mut scope).expect("eval");
        assert_eq!(value.as_int().ok(), Some(3));
        assert_eq!(engine.flavor(), EngineFlavor::Core);
    }

    #[test]
    fn builtins_resolve_but_stay_read_only() {
        let mut definitions = HostMap::new();
        definitions.insert("limit".to_string(), HostValue::Int(10));
        let engine = EngineInstance::create(
            EngineFlavor::Standard,
            EngineLimits::default(),
            &definitions,
        )
        .expect("engine");
        assert!(engine.builtins().contains("limit"));
        assert_eq!(engine.builtins().names().collect::<Vec<_>>(), vec!["limit"]);

        let mut scope = Scope::new();
        let read = engine.compile(&ScriptSource::from("limit * 2")).expect("compile");
        let value = engine.eval(&read, &mut scope).expect("eval");
        assert_eq!(value.as_int().ok(), Some(20));

        let write = engine.compile(&ScriptSource::from("limit = 3; limit")).expect("compile");
        let error = engine.eval(&write, &mut scope).expect_err("builtins are read-only");
        assert_eq!(error.code, "SCRIPT_EVAL_ERROR");
    }

    #[test]
    fn max_operations_stops_runaway_scripts() {
        let engine = EngineInstance::create(
            EngineFlavor::Standard,
            EngineLimits {
                max_operations: Some(1_000),
                max_expr_depth: None,
            },
            &HostMap::new(),
        )
        .expect("engine");
        let script = engine
            .compile(&ScriptSource::from("let n = 0; loop { n += 1; }"))
            .expect("compile");
        let mut scope = Scope::new();
        let error = engine.eval(&script, &mut scope).expect_err("limit should trip");
        assert_eq!(error.code, "SCRIPT_EVAL_ERROR");
    }

    #[test]
    fn engine_ids_are_unique() {
        let first = instance(EngineFlavor::Standard);
        let second = instance(EngineFlavor::Standard);
        assert_ne!(first.id(), second.id());
    }
}
