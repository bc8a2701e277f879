//! Assembly of the environment and shell snippets handed to the executor.

use crate::recipe::{BuildRecipe, Package, Recipe};
use crate::runtime::Env;

/// Container-side mount point of `srcdir`.
pub const CONTAINER_SRC_DIR: &str = "/src";
/// Container-side mount point of the current package's `pkgdir`.
pub const CONTAINER_PKG_DIR: &str = "/pkg";

/// Environment every executed script sees. `pkgname`/`pkgver` name the
/// package being staged, or the first declared package during the prepare
/// and build steps.
pub fn phase_env(recipe: &Recipe, variant: &BuildRecipe, package: Option<&Package>) -> Env {
    let mut env = Env::new();
    env.insert("srcdir", CONTAINER_SRC_DIR);
    env.insert("pkgdir", CONTAINER_PKG_DIR);
    env.insert("recipe", &recipe.name);
    env.insert("arch", &variant.arch);
    env.insert("HOST", arch_triplet(&variant.arch));

    if let Some(package) = package.or_else(|| variant.packages.first()) {
        env.insert("pkgname", &package.name);
        env.insert("pkgver", package.version.to_string());
    }

    for flag in &variant.flags {
        match flag.split_once('=') {
            Some((key, value)) => env.insert(key, value),
            None => env.insert(flag, "1"),
        };
    }

    env
}

/// Wraps a recipe function body into a runnable snippet: define the function
/// verbatim, then call it under strict shell options.
pub fn function_script(name: &str, body: &str) -> String {
    format!("set -euo pipefail\n{name}() {{\n{body}\n}}\n{name}\n")
}

/// Cross-compilation triplet for an architecture tag. The reMarkable tags
/// all run the same ARM hard-float userspace.
pub fn arch_triplet(arch: &str) -> String {
    match arch {
        "rm1" | "rm2" | "rmall" | "rmallos2" | "rmallos3" => "arm-linux-gnueabihf".to_owned(),
        other => format!("{other}-linux-gnu"),
    }
}
