use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use rhai::{Array, Blob, Dynamic, ImmutableString, Map, FLOAT, INT};
use sb_core::HostValue;

/// Tagged view of an engine value, so conversion matches on a tag instead of
/// probing the `Dynamic` repeatedly.
#[derive(Debug, Clone)]
pub enum EngineValue {
    Null,
    Bool(bool),
    Int(INT),
    Float(FLOAT),
    String(ImmutableString),
    Array(Array),
    Object(Map),
    /// A host value stored in the engine without conversion.
    Host(HostValue),
    Opaque(Dynamic),
}

impl EngineValue {
    pub fn classify(value: Dynamic) -> Self {
        let value = value.flatten();
        if value.is_unit() {
            return Self::Null;
        }
        if let Ok(flag) = value.as_bool() {
            return Self::Bool(flag);
        }
        if let Ok(number) = value.as_int() {
            return Self::Int(number);
        }
        if let Ok(number) = value.as_float() {
            return Self::Float(number);
        }
        if let Ok(ch) = value.as_char() {
            return Self::String(ch.to_string().into());
        }
        if value.is_string() {
            return match value.into_immutable_string() {
                Ok(text) => Self::String(text),
                Err(_) => Self::Null,
            };
        }
        if value.is::<Array>() {
            return Self::Array(value.cast::<Array>());
        }
        if value.is::<Blob>() {
            let bytes = value.cast::<Blob>();
            return Self::Array(
                bytes
                    .into_iter()
                    .map(|byte| Dynamic::from_int(INT::from(byte)))
                    .collect(),
            );
        }
        if value.is::<Map>() {
            return Self::Object(value.cast::<Map>());
        }
        if value.is::<HostValue>() {
            return Self::Host(value.cast::<HostValue>());
        }
        Self::Opaque(value)
    }
}

/// Converts values between the host model and the engine. Both directions are
/// total: shapes without a counterpart pass through instead of failing.
pub struct ValueBridge;

impl ValueBridge {
    pub fn unwrap(value: Dynamic) -> HostValue {
        match EngineValue::classify(value) {
            EngineValue::Null => HostValue::Null,
            EngineValue::Bool(flag) => HostValue::Bool(flag),
            EngineValue::Int(number) => HostValue::Int(number),
            EngineValue::Float(number) => HostValue::Float(number),
            EngineValue::String(text) => HostValue::String(text.to_string()),
            EngineValue::Array(items) => {
                HostValue::Seq(items.into_iter().map(Self::unwrap).collect())
            }
            EngineValue::Object(entries) => HostValue::Map(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.to_string(), Self::unwrap(value)))
                    .collect(),
            ),
            // `cast` already handed us an owned copy.
            EngineValue::Host(value) => value,
            EngineValue::Opaque(value) => HostValue::Opaque(value.to_string()),
        }
    }

    pub fn unwrap_ref(value: &Dynamic) -> HostValue {
        Self::unwrap(value.clone())
    }

    pub fn wrap(value: &HostValue) -> Dynamic {
        match value {
            HostValue::Null => Dynamic::UNIT,
            HostValue::Bool(flag) => Dynamic::from_bool(*flag),
            HostValue::Int(number) => Dynamic::from_int(*number as INT),
            HostValue::Float(number) => Dynamic::from_float(*number as FLOAT),
            HostValue::String(text) | HostValue::Opaque(text) => Dynamic::from(text.clone()),
            HostValue::Seq(values) => {
                Dynamic::from_array(values.iter().map(Self::wrap).collect::<Array>())
            }
            HostValue::Map(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    map.insert(key.clone().into(), Self::wrap(value));
                }
                Dynamic::from_map(map)
            }
        }
    }
}

pub(crate) fn is_identifier_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

/// `before` is the source text up to the identifier. A single `.` (possibly
/// spaced) marks a property; `..` and `..=` are range operators whose right
/// operand is an ordinary read.
pub(crate) fn is_variable_left_boundary(before: &str) -> bool {
    if before.chars().next_back().map_or(false, is_identifier_char) {
        return false;
    }
    let mut rest = before.trim_end().chars().rev();
    match rest.next() {
        Some('.') => rest.next() == Some('.'),
        _ => true,
    }
}

pub(crate) fn is_call_suffix(rest: &str) -> bool {
    rest.trim_start().starts_with('(')
}

/// Words the engine reserves; they never name a variable.
const KEYWORDS: &[&str] = &[
    "as", "break", "catch", "const", "continue", "do", "else", "export", "false", "fn",
    "for", "global", "if", "import", "in", "let", "loop", "private", "return", "switch",
    "this", "throw", "true", "try", "until", "while",
];

pub(crate) fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

fn identifier_regex() -> &'static Regex {
    static IDENTIFIER: OnceLock<Regex> = OnceLock::new();
    IDENTIFIER.get_or_init(|| {
        Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("identifier regex should compile")
    })
}

/// Names the source may read as variables, sorted and deduplicated.
///
/// Property names (`a.b`), function names (`f(...)`), keywords and identifiers
/// glued to a numeric literal are skipped. Anything else that looks like an
/// identifier is kept, so the result over-approximates: script locals, string
/// contents and comments may show up too.
pub(crate) fn referenced_identifiers(source: &str) -> Vec<String> {
    let mut names = BTreeSet::new();
    for found in identifier_regex().find_iter(source) {
        if is_keyword(found.as_str()) || !is_variable_left_boundary(&source[..found.start()]) {
            continue;
        }
        if is_call_suffix(&source[found.end()..]) {
            continue;
        }
        names.insert(found.as_str().to_string());
    }
    names.into_iter().collect()
}
