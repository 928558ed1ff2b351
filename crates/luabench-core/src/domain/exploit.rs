//! Exploit payloads and the side effect each one tries to cause.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::interpreter::InterpreterFamily;

/// Replaced with the absolute side-effect path when a payload is rendered.
pub const TARGET_PLACEHOLDER: &str = "{{TARGET}}";

/// Replaced with the expected marker when a payload is rendered.
pub const MARKER_PLACEHOLDER: &str = "{{MARKER}}";

/// Declarative side-effect predicate: "file `file` exists and contains
/// `marker`". Evaluation happens in the runner, against a concrete directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SideEffect {
    /// File name of the unauthorized write, relative to the effect directory.
    pub file: PathBuf,

    /// Content the exploit writes on success.
    pub marker: String,
}

impl SideEffect {
    pub fn new(file: impl Into<PathBuf>, marker: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            marker: marker.into(),
        }
    }

    /// Declared expected-write path inside `effect_dir`.
    pub fn path_in(&self, effect_dir: &Path) -> PathBuf {
        effect_dir.join(&self.file)
    }

    /// Whether `contents` satisfies the predicate.
    pub fn matches(&self, contents: &str) -> bool {
        contents.contains(&self.marker)
    }
}

/// An exploit from the static catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExploitSpec {
    /// Catalog identifier, e.g. `std_os_execute`.
    pub id: String,

    /// One-line description for listings.
    pub description: String,

    /// Families the exploit is meaningful for.
    pub families: Vec<InterpreterFamily>,

    /// Lua source with `{{TARGET}}` / `{{MARKER}}` placeholders.
    pub payload: String,

    /// What a successful run leaves behind.
    pub effect: SideEffect,
}

impl ExploitSpec {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        families: &[InterpreterFamily],
        payload: impl Into<String>,
        effect: SideEffect,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            families: families.to_vec(),
            payload: payload.into(),
            effect,
        }
    }

    /// Applicability predicate over the interpreter family.
    pub fn applies_to(&self, family: InterpreterFamily) -> bool {
        self.families.contains(&family)
    }

    /// Render the payload for a concrete side-effect path.
    pub fn render(&self, target: &Path) -> String {
        self.payload
            .replace(TARGET_PLACEHOLDER, &lua_escape(&target.to_string_lossy()))
            .replace(MARKER_PLACEHOLDER, &lua_escape(&self.effect.marker))
    }
}

/// Escape a string for use inside a double-quoted Lua string literal.
fn lua_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out
}
