//! Compiler configuration
//!
//! Backend policy knobs. Defaults are the portable choices; a caller that
//! knows its target engine can relax them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// Wrap an aggregate as a subquery before applying ORDER BY on one of
    /// its computed metrics. Referencing a select-list alias inside the same
    /// statement's ORDER BY is rejected by some backends, so the portable
    /// form sorts on the subquery's exposed column instead.
    pub wrap_sort_on_aggregate_metric: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            wrap_sort_on_aggregate_metric: true,
        }
    }
}
