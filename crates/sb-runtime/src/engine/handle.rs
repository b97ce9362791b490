use std::rc::Rc;

use rhai::{Dynamic, FLOAT};
use sb_core::{HostMap, HostValue, ScriptBridgeError};
use tracing::warn;

use super::bindings::LazyVariableBindings;
use super::instance::{CompiledScript, EngineInstance};
use super::lookup::{DocumentLookup, NoLookup};
use super::scope::ScopeChain;
use crate::helpers::rhai_bridge::ValueBridge;

pub const SCORE_VAR: &str = "_score";

/// A compiled script bound to one engine and one set of variables.
///
/// Handles are reused across runs: failures leave them usable, and variables
/// set between runs are visible to the next one. They hold engine values and
/// therefore stay on the thread that bound them:
///
/// ```compile_fail
/// fn assert_send<T: Send>() {}
/// assert_send::<sb_runtime::ExecutableHandle>();
/// ```
pub struct ScriptHandle<L = NoLookup> {
    engine: Rc<EngineInstance>,
    script: CompiledScript,
    scope: ScopeChain<L>,
}

pub type ExecutableHandle = ScriptHandle<NoLookup>;

impl<L: DocumentLookup> ScriptHandle<L> {
    pub fn bind(
        engine: Rc<EngineInstance>,
        script: CompiledScript,
        variables: LazyVariableBindings<L>,
    ) -> Result<Self, ScriptBridgeError> {
        engine.check_owns(&script)?;
        let scope = ScopeChain::new(Rc::clone(engine.builtins()), variables);
        Ok(Self {
            engine,
            script,
            scope,
        })
    }

    /// Runs the script; a failure is logged and reads as null.
    pub fn run(&mut self) -> HostValue {
        match self.try_run() {
            Ok(value) => value,
            Err(error) => {
                warn!(
                    engine_id = self.engine.id(),
                    code = %error.code,
                    message = %error.message,
                    "script run failed"
                );
                HostValue::Null
            }
        }
    }

    pub fn try_run(&mut self) -> Result<HostValue, ScriptBridgeError> {
        let value = self.scope.evaluate(&self.engine, &self.script)?;
        Ok(ValueBridge::unwrap(value))
    }

    pub fn run_as_double(&mut self) -> Result<f64, ScriptBridgeError> {
        let value = self.run();
        numeric(&value)?
            .as_f64()
            .ok_or_else(|| not_numeric(&value))
    }

    pub fn run_as_float(&mut self) -> Result<f32, ScriptBridgeError> {
        self.run_as_double().map(|number| number as f32)
    }

    /// Floats are truncated toward zero.
    pub fn run_as_long(&mut self) -> Result<i64, ScriptBridgeError> {
        let value = self.run();
        numeric(&value)?
            .as_i64()
            .ok_or_else(|| not_numeric(&value))
    }

    pub fn set_next_var(&mut self, name: &str, value: Dynamic) {
        self.scope.set_next_var(name, value);
    }

    pub fn var(&mut self, name: &str) -> Option<HostValue> {
        self.scope.var(name)
    }

    pub fn unwrap(&self, value: Dynamic) -> HostValue {
        ValueBridge::unwrap(value)
    }

    pub fn engine(&self) -> &Rc<EngineInstance> {
        &self.engine
    }

    pub fn script(&self) -> &CompiledScript {
        &self.script
    }

    pub fn scope(&self) -> &ScopeChain<L> {
        &self.scope
    }

    pub fn scope_mut(&mut self) -> &mut ScopeChain<L> {
        &mut self.scope
    }
}

/// Script handle driven per document by the host's search loop.
pub struct SearchHandle<L: DocumentLookup> {
    handle: ScriptHandle<L>,
}

impl<L: DocumentLookup> SearchHandle<L> {
    pub fn new(handle: ScriptHandle<L>) -> Self {
        Self { handle }
    }

    pub fn set_next_reader(&mut self, reader: L::Reader) {
        self.with_lookup(|lookup| lookup.set_next_reader(reader));
    }

    pub fn set_scorer(&mut self, scorer: L::Scorer) {
        self.with_lookup(|lookup| lookup.set_scorer(scorer));
    }

    pub fn set_next_doc_id(&mut self, doc_id: u32) {
        self.with_lookup(|lookup| lookup.set_next_doc_id(doc_id));
    }

    pub fn set_next_source(&mut self, source: HostMap) {
        self.with_lookup(|lookup| lookup.set_next_source(source));
    }

    pub fn set_next_score(&mut self, score: f32) {
        self.handle
            .set_next_var(SCORE_VAR, Dynamic::from_float(FLOAT::from(score)));
    }

    pub fn run(&mut self) -> HostValue {
        self.handle.run()
    }

    pub fn try_run(&mut self) -> Result<HostValue, ScriptBridgeError> {
        self.handle.try_run()
    }

    pub fn run_as_float(&mut self) -> Result<f32, ScriptBridgeError> {
        self.handle.run_as_float()
    }

    pub fn run_as_long(&mut self) -> Result<i64, ScriptBridgeError> {
        self.handle.run_as_long()
    }

    pub fn run_as_double(&mut self) -> Result<f64, ScriptBridgeError> {
        self.handle.run_as_double()
    }

    pub fn set_next_var(&mut self, name: &str, value: Dynamic) {
        self.handle.set_next_var(name, value);
    }

    pub fn var(&mut self, name: &str) -> Option<HostValue> {
        self.handle.var(name)
    }

    pub fn unwrap(&self, value: Dynamic) -> HostValue {
        self.handle.unwrap(value)
    }

    pub fn lookup(&self) -> Option<&L> {
        self.handle.scope().variables().lookup()
    }

    pub fn into_inner(self) -> ScriptHandle<L> {
        self.handle
    }

    fn with_lookup(&mut self, hook: impl FnOnce(&mut L)) {
        let variables = self.handle.scope_mut().variables_mut();
        if let Some(lookup) = variables.lookup_mut() {
            hook(lookup);
        }
        variables.mark_lookup_advanced();
    }
}

fn numeric(value: &HostValue) -> Result<&HostValue, ScriptBridgeError> {
    if value.is_number() {
        Ok(value)
    } else {
        Err(not_numeric(value))
    }
}

fn not_numeric(value: &HostValue) -> ScriptBridgeError {
    ScriptBridgeError::type_coercion(
        "SCRIPT_RESULT_NOT_NUMERIC",
        format!("Script result of type {} is not a number.", value.type_name()),
    )
}

#[cfg(test)]
mod handle_tests {
    use super::*;
    use crate::engine::runtime_test_support::*;
    use sb_core::ErrorKind;
    use tracing_test::traced_test;

    #[test]
    fn run_returns_unwrapped_result() {
        let mut handle = executable("x + y", &[("x", HostValue::Int(1)), ("y", HostValue::Int(2))]);
        assert_eq!(handle.run(), HostValue::Int(3));
        assert_eq!(handle.run(), HostValue::Int(3));
        assert_eq!(handle.script().source().as_str(), "x + y");
    }

    #[test]
    fn set_next_var_changes_the_next_run() {
        let mut handle = executable("x + y", &[("x", HostValue::Int(1)), ("y", HostValue::Int(2))]);
        handle.set_next_var("x", Dynamic::from_int(10));
        assert_eq!(handle.run(), HostValue::Int(12));
        handle.set_next_var("y", Dynamic::from_int(20));
        assert_eq!(handle.run(), HostValue::Int(30));
    }

    #[test]
    fn script_mutations_are_visible_through_var() {
        let ctx: HostValue = [(
            "doc",
            [("field1", HostValue::from("old"))]
                .into_iter()
                .collect::<HostValue>(),
        )]
        .into_iter()
        .collect();
        let mut handle = executable(r#"ctx.doc.field1 = ["value1", "value2"];"#, &[("ctx", ctx)]);
        assert_eq!(handle.run(), HostValue::Null);

        let ctx = handle.var("ctx").expect("ctx stays bound");
        assert_eq!(
            ctx.pointer(&["doc", "field1"]),
            Some(&HostValue::Seq(vec!["value1".into(), "value2".into()]))
        );
    }

    #[test]
    fn range_bounds_are_read_as_variables() {
        let mut handle = executable(
            "let s = 0; for i in 0..n { s += i; } s",
            &[("n", HostValue::Int(4))],
        );
        assert_eq!(handle.try_run().expect("exclusive range"), HostValue::Int(6));

        let mut handle = executable(
            "let s = 0; for i in lo .. hi { s += i; } s",
            &[("lo", HostValue::Int(2)), ("hi", HostValue::Int(5))],
        );
        assert_eq!(handle.try_run().expect("spaced range"), HostValue::Int(9));

        let mut handle = executable(
            "let s = 0; for i in lo..=hi { s += i; } s",
            &[("lo", HostValue::Int(1)), ("hi", HostValue::Int(4))],
        );
        assert_eq!(handle.try_run().expect("inclusive range"), HostValue::Int(10));
    }

    #[test]
    fn variables_read_only_inside_closures_are_bound() {
        let mut handle = executable(
            "let add = |x| x + offset; add.call(2)",
            &[("offset", HostValue::Int(40))],
        );
        assert_eq!(handle.try_run().expect("closure"), HostValue::Int(42));
        assert_eq!(handle.try_run().expect("closure again"), HostValue::Int(42));
    }

    #[test]
    fn variables_read_inside_interpolation_are_bound() {
        let mut handle = executable("`total: ${n}`", &[("n", HostValue::Int(4))]);
        assert_eq!(handle.try_run().expect("interpolation"), HostValue::from("total: 4"));
    }

    #[test]
    fn let_shadows_a_bound_variable_for_one_run() {
        let mut handle = executable(
            "let x = 10; x + y",
            &[("x", HostValue::Int(1)), ("y", HostValue::Int(2))],
        );
        assert_eq!(handle.try_run().expect("shadowed"), HostValue::Int(12));
        assert_eq!(handle.var("x"), Some(HostValue::Int(1)));
        assert_eq!(handle.try_run().expect("shadowed again"), HostValue::Int(12));
    }

    #[test]
    fn search_ranges_read_document_fields() {
        let mut handle = SearchHandle::new(search(
            "let s = 0; for i in 0..count { s += i; } s",
            &[],
            TestLookup::new(vec![
                docs(&[("count", HostValue::Int(3))]),
                docs(&[("count", HostValue::Int(5))]),
            ]),
        ));
        handle.set_next_doc_id(0);
        assert_eq!(handle.run_as_long().expect("first doc"), 3);
        handle.set_next_doc_id(1);
        assert_eq!(handle.run_as_long().expect("second doc"), 10);
    }

    #[test]
    #[traced_test]
    fn failed_run_logs_and_returns_null() {
        let mut handle = executable("if fail { throw \"boom\" } 7", &[("fail", HostValue::Bool(true))]);
        assert_eq!(handle.run(), HostValue::Null);
        assert!(logs_contain("script run failed"));
        assert!(logs_contain("SCRIPT_EVAL_ERROR"));

        let error = handle.try_run().expect_err("still failing");
        assert_eq!(error.code, "SCRIPT_EVAL_ERROR");
        assert_eq!(error.kind, ErrorKind::Evaluation);

        handle.set_next_var("fail", Dynamic::from_bool(false));
        assert_eq!(handle.run(), HostValue::Int(7));
    }

    #[test]
    fn run_as_number_coerces_or_reports() {
        let mut handle = executable("value", &[("value", HostValue::Float(2.75))]);
        assert_eq!(handle.run_as_double().expect("double"), 2.75);
        assert_eq!(handle.run_as_float().expect("float"), 2.75_f32);
        assert_eq!(handle.run_as_long().expect("long"), 2);

        handle.set_next_var("value", Dynamic::from_int(-4));
        assert_eq!(handle.run_as_long().expect("long"), -4);
        assert_eq!(handle.run_as_double().expect("double"), -4.0);

        handle.set_next_var("value", Dynamic::from("nope".to_string()));
        let error = handle.run_as_long().expect_err("string is not numeric");
        assert_eq!(error.code, "SCRIPT_RESULT_NOT_NUMERIC");
        assert_eq!(error.kind, ErrorKind::TypeCoercion);
        assert!(error.message.contains("string"));

        handle.set_next_var("value", Dynamic::from_float(1.5));
        assert_eq!(handle.run_as_double().expect("usable after coercion error"), 1.5);
    }

    #[test]
    fn bind_rejects_scripts_from_other_engines() {
        let first = instance_with_builtins(&[]);
        let second = Rc::new(instance_with_builtins(&[]));
        let script = first
            .compile(&sb_core::ScriptSource::from("1"))
            .expect("compile");
        let error = ScriptHandle::bind(second, script, LazyVariableBindings::new(vars(&[])))
            .err()
            .expect("foreign script");
        assert_eq!(error.code, "ENGINE_SCRIPT_FOREIGN");
    }

    #[test]
    fn search_handle_exposes_score_and_current_document() {
        let handle = search(
            "_score * factor + field",
            &[("factor", HostValue::Int(2))],
            TestLookup::new(vec![
                docs(&[("field", HostValue::Int(1))]),
                docs(&[("field", HostValue::Int(100))]),
            ]),
        );
        let mut handle = SearchHandle::new(handle);
        handle.set_next_reader("segment-0".to_string());
        handle.set_scorer(1.0);
        handle.set_next_doc_id(0);
        handle.set_next_score(1.5);
        assert_eq!(handle.run_as_double().expect("score"), 4.0);

        handle.set_next_doc_id(1);
        handle.set_next_score(0.5);
        assert_eq!(handle.run_as_double().expect("score"), 101.0);

        let lookup = handle.lookup().expect("lookup");
        assert_eq!(lookup.reader.as_deref(), Some("segment-0"));
        assert_eq!(lookup.doc_id, 1);
        assert_eq!(lookup.scorer, Some(1.0));
    }

    #[test]
    fn search_handle_reads_the_next_source() {
        let mut handle = SearchHandle::new(search("_source.title", &[], TestLookup::new(vec![])));
        let source: HostMap = [("title".to_string(), HostValue::from("first"))].into();
        handle.set_next_source(source);
        assert_eq!(handle.run(), HostValue::from("first"));

        let source: HostMap = [("title".to_string(), HostValue::from("second"))].into();
        handle.set_next_source(source);
        assert_eq!(handle.run(), HostValue::from("second"));
        assert_eq!(handle.unwrap(Dynamic::from_int(1)), HostValue::Int(1));
    }
}
