//! Evaluator bridge between recipe scripts and the typed model. The recipe
//! is authored in bash; a child shell sources it and dumps its symbol table
//! with `declare -p` / `declare -f`, and only that textual dump crosses back
//! into the core. The child runs with a scrubbed environment and executes no
//! commands besides the declarations themselves.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{trace, warn};

use crate::recipe::symbols::SymbolTable;
use crate::{Error, Result};

const VARIABLES_MARK: &str = "---8<--- variables ---8<---";
const FUNCTIONS_MARK: &str = "---8<--- functions ---8<---";

/// Placeholder bindings visible to the recipe while it is being evaluated.
/// The real directories only exist at build time.
const PARSE_SRCDIR: &str = "/nonexistent/src";
const PARSE_PKGDIR: &str = "/nonexistent/pkg";

pub struct Evaluator {
    arch: String,
}

impl Evaluator {
    pub fn new() -> Self {
        Evaluator {
            arch: String::new(),
        }
    }

    /// Architecture tag exported as `arch` to the evaluated script.
    pub fn arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = arch.into();
        self
    }

    /// Evaluates the recipe and returns its symbol table. When `entry` is
    /// given, that function is invoked after sourcing; assignments in a bash
    /// function body land in the global scope, so the returned table carries
    /// the per-package overrides of a split recipe.
    pub async fn evaluate(
        &self,
        recipe: &str,
        recipe_file: &Path,
        entry: Option<&str>,
    ) -> Result<SymbolTable> {
        let driver = format!(
            concat!(
                "set -euo pipefail\n",
                "source \"$1\"\n",
                "if [[ -n \"${{2:-}}\" ]]; then \"$2\"; fi\n",
                "printf '%s\\n' '{vars}'\n",
                "declare -p || true\n",
                "printf '%s\\n' '{funcs}'\n",
                "declare -f || true\n",
            ),
            vars = VARIABLES_MARK,
            funcs = FUNCTIONS_MARK,
        );

        let mut command = Command::new("bash");
        command
            .arg("--noprofile")
            .arg("--norc")
            .arg("-c")
            .arg(&driver)
            .arg("bash")
            .arg(recipe_file);
        if let Some(entry) = entry {
            command.arg(entry);
        }
        command
            .env_clear()
            .env("PATH", "/usr/local/bin:/usr/bin:/bin")
            .env("srcdir", PARSE_SRCDIR)
            .env("pkgdir", PARSE_PKGDIR)
            .env("arch", &self.arch)
            .env("parse_phase", "1")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        trace!(recipe, entry, "evaluating recipe script");
        let output = command
            .output()
            .await
            .map_err(|e| Error::shell_evaluation(recipe, format!("failed to spawn bash: {e}")))?;

        if !output.stderr.is_empty() {
            warn!(
                recipe,
                "recipe evaluation wrote to stderr: {}",
                String::from_utf8_lossy(&output.stderr).trim_end()
            );
        }
        if !output.status.success() {
            return Err(Error::shell_evaluation(
                recipe,
                format!(
                    "bash exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim_end()
                ),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let mut table = parse_dump(recipe, &stdout)?;

        // The base bindings are exported variables and come back in the
        // dump; they are not part of the recipe.
        for binding in ["srcdir", "pkgdir", "arch", "parse_phase"] {
            table.remove(binding);
        }

        Ok(table)
    }
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_dump(recipe: &str, stdout: &str) -> Result<SymbolTable> {
    let variables_mark = format!("{VARIABLES_MARK}\n");
    let functions_mark = format!("{FUNCTIONS_MARK}\n");

    let (_, tail) = stdout
        .split_once(&variables_mark)
        .ok_or_else(|| Error::shell_evaluation(recipe, "variable dump marker missing"))?;
    let (variables, functions) = tail
        .split_once(&functions_mark)
        .ok_or_else(|| Error::shell_evaluation(recipe, "function dump marker missing"))?;

    SymbolTable::from_dump(variables, functions)
        .map_err(|reason| Error::shell_evaluation(recipe, reason))
}
