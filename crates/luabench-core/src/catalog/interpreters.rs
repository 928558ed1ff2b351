//! Builtin interpreter catalog.

use crate::domain::{BuildRecipe, InterpreterFamily, InterpreterSpec};

fn puc_lua(id: &str, target: &str) -> InterpreterSpec {
    InterpreterSpec::new(
        id,
        InterpreterFamily::PucLua,
        BuildRecipe::new(["make", "-C", "{tree}", target], "src/lua").with_flags_var("MYCFLAGS"),
    )
}

fn luajit(id: &str) -> InterpreterSpec {
    InterpreterSpec::new(
        id,
        InterpreterFamily::LuaJit,
        BuildRecipe::new(["make", "-C", "{tree}/src"], "src/luajit")
            .with_flags_var("XCFLAGS")
            .with_include_var("TARGET_CFLAGS"),
    )
}

/// Interpreters known to the benchmark, in listing order.
pub fn builtin_interpreters() -> Vec<InterpreterSpec> {
    vec![
        // 5.1's platform targets set MYCFLAGS themselves, so build `all`
        // directly and carry the platform define as a base flag.
        InterpreterSpec::new(
            "lua-5.1.5",
            InterpreterFamily::PucLua,
            BuildRecipe::new(["make", "-C", "{tree}/src", "all"], "src/lua")
                .with_flags_var("MYCFLAGS")
                .with_base_flags(["-DLUA_USE_POSIX"]),
        ),
        puc_lua("lua-5.2.4", "posix"),
        puc_lua("lua-5.3.6", "posix"),
        puc_lua("lua-5.4.6", "linux"),
        luajit("LuaJIT-4f8736"),
        luajit("LuaJIT-rolling"),
        luajit("LuaJIT-v2.1.0-beta3"),
        InterpreterSpec::new(
            "luau",
            InterpreterFamily::Luau,
            BuildRecipe::new(
                ["make", "-C", "{tree}", "config=release", "luau"],
                "build/release/luau",
            ),
        ),
    ]
}
