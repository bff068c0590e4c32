#![forbid(unsafe_code)]

use serde::Deserialize;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Deepest allowed nesting of traced sub-programs (e.g. `run_scoped` inside `run_scoped`).
    pub max_scope_depth: usize,
    /// Upper bound on equations recorded in a single (sub-)program.
    pub max_equations: usize,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            max_scope_depth: 64,
            max_equations: 100_000,
        }
    }
}
