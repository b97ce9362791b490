use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ScriptBridgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcePosition {
    pub line: usize,
    pub column: usize,
}

/// Script text. Identity is the exact text, which makes it the compile cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScriptSource(Arc<str>);

impl ScriptSource {
    pub fn new(text: impl Into<Arc<str>>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ScriptSource {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScriptSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScriptSource {
    fn from(text: &str) -> Self {
        Self::new(text)
    }
}

impl From<String> for ScriptSource {
    fn from(text: String) -> Self {
        Self::new(text)
    }
}

/// Which engine build a host runs its scripts on.
///
/// `Auto` is resolved once, when the host starts, to the richest flavor the
/// runtime supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineFlavor {
    #[default]
    Auto,
    /// Full standard library.
    Standard,
    /// Raw engine with only the core package registered.
    Core,
}

impl EngineFlavor {
    pub const NAMES: [&'static str; 3] = ["auto", "standard", "core"];

    pub fn name(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Standard => "standard",
            Self::Core => "core",
        }
    }
}

impl fmt::Display for EngineFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EngineFlavor {
    type Err = ScriptBridgeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "" | "auto" => Ok(Self::Auto),
            "standard" => Ok(Self::Standard),
            "core" => Ok(Self::Core),
            _ => Err(ScriptBridgeError::config(
                "CONFIG_ENGINE_INVALID",
                format!(
                    "Invalid engine flavor \"{}\", expected one of: {}.",
                    raw,
                    Self::NAMES.join(", ")
                ),
            )),
        }
    }
}
