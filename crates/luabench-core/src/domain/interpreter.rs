//! Interpreter identities and their native build recipes.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Implementation family of a Lua interpreter.
///
/// Patch and exploit applicability is decided on the family, never on the
/// concrete version.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum InterpreterFamily {
    /// Reference implementation from lua.org.
    PucLua,
    /// LuaJIT (has an FFI).
    LuaJit,
    /// Roblox Luau.
    Luau,
}

impl InterpreterFamily {
    /// All families, in catalog order.
    pub const ALL: [InterpreterFamily; 3] = [
        InterpreterFamily::PucLua,
        InterpreterFamily::LuaJit,
        InterpreterFamily::Luau,
    ];

    /// Stable short name.
    pub fn name(&self) -> &'static str {
        match self {
            InterpreterFamily::PucLua => "puc_lua",
            InterpreterFamily::LuaJit => "luajit",
            InterpreterFamily::Luau => "luau",
        }
    }

}

impl fmt::Display for InterpreterFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Placeholder in a build command that is replaced by the variant tree path.
pub const TREE_PLACEHOLDER: &str = "{tree}";

/// How to compile an interpreter source tree.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildRecipe {
    /// Command to execute (first element is the executable). `{tree}` is
    /// replaced with the absolute path of the materialized tree.
    pub command: Vec<String>,

    /// Executable produced by the build, relative to the tree root.
    pub executable: PathBuf,

    /// Make variable that receives extra compiler flags contributed by
    /// patches (`MYCFLAGS`, `XCFLAGS`, ...). `None` if the build has no such
    /// hook, in which case flag-contributing patches cannot be applied.
    pub flags_var: Option<String>,

    /// Flags always passed through `flags_var`, ahead of patch flags. Needed
    /// where setting the variable on the command line replaces a value the
    /// build would otherwise provide itself.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub base_flags: Vec<String>,

    /// Make variable that receives force-include flags, when the build needs
    /// them kept apart from `flags_var`. LuaJIT compiles its host tools with
    /// `XCFLAGS` too, and those must not see the wrapper header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_var: Option<String>,
}

/// Compiler flags contributed by a patch set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildFlags {
    /// Plain flags (`-D...`), passed through the flags variable.
    pub cflags: Vec<String>,
    /// `-include <header>` flags.
    pub includes: Vec<String>,
}

impl BuildRecipe {
    /// Create a recipe from a command template and the produced executable.
    pub fn new<I, S>(command: I, executable: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            command: command.into_iter().map(Into::into).collect(),
            executable: executable.into(),
            flags_var: None,
            base_flags: Vec::new(),
            include_var: None,
        }
    }

    /// Set the make variable that receives patch-contributed flags.
    pub fn with_flags_var(mut self, var: impl Into<String>) -> Self {
        self.flags_var = Some(var.into());
        self
    }

    /// Set flags that are always passed through the flags variable.
    pub fn with_base_flags<I, S>(mut self, flags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base_flags = flags.into_iter().map(Into::into).collect();
        self
    }

    /// Route force-include flags through their own make variable.
    pub fn with_include_var(mut self, var: impl Into<String>) -> Self {
        self.include_var = Some(var.into());
        self
    }

    /// Render the final argv for a given tree and collected patch flags.
    ///
    /// Base and patch flags are appended as a single `VAR=flag1 flag2`
    /// argument. Includes join them unless `include_var` is set.
    pub fn render(&self, tree: &Path, flags: &BuildFlags) -> Vec<String> {
        let tree = tree.to_string_lossy();
        let mut argv: Vec<String> = self
            .command
            .iter()
            .map(|arg| arg.replace(TREE_PLACEHOLDER, &tree))
            .collect();
        let Some(var) = &self.flags_var else {
            return argv;
        };

        let separate = self.include_var.as_ref().filter(|v| *v != var);
        let mut all: Vec<&str> = self
            .base_flags
            .iter()
            .chain(flags.cflags.iter())
            .map(String::as_str)
            .collect();
        if separate.is_none() {
            all.extend(flags.includes.iter().map(String::as_str));
        }
        if !all.is_empty() {
            argv.push(format!("{}={}", var, all.join(" ")));
        }
        if let Some(include_var) = separate {
            if !flags.includes.is_empty() {
                argv.push(format!("{}={}", include_var, flags.includes.join(" ")));
            }
        }
        argv
    }
}

/// A buildable interpreter from the static catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InterpreterSpec {
    /// Catalog identifier, e.g. `lua-5.4.6`.
    pub id: String,

    /// Implementation family.
    pub family: InterpreterFamily,

    /// Directory name of the canonical source checkout, relative to the
    /// configured interpreters directory.
    pub source_dir: PathBuf,

    /// Native build recipe.
    pub recipe: BuildRecipe,
}

impl InterpreterSpec {
    pub fn new(id: impl Into<String>, family: InterpreterFamily, recipe: BuildRecipe) -> Self {
        let id = id.into();
        Self {
            source_dir: PathBuf::from(&id),
            id,
            family,
            recipe,
        }
    }

    /// Override the source directory name.
    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = dir.into();
        self
    }
}
