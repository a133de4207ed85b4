//! Run configuration.
//!
//! A [`Settings`] value is built once at process start and threaded through
//! the drivers explicitly; nothing in the crate reads hidden global state.

/// Path-condition simplification policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimplifyLevel {
    /// Keep the path condition as accumulated.
    Off,
    /// `ctx-simplify`: cheap, local rewriting.
    #[default]
    Cheap,
    /// `ctx-solver-simplify`: solver-assisted, expensive.
    Full,
}

/// Behavioural knobs of a checking run.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Path-condition simplification applied after every new conjunct.
    pub simplify: SimplifyLevel,
    /// Apply the dynamic per-query solver timeout.
    pub timeout: bool,
    /// Memoise subsumption queries by syntactic fingerprint.
    pub caching: bool,
    /// Emit the statistics dump after a run.
    pub statistics: bool,
    /// Seed for the randomised successor ordering.
    pub seed: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            simplify: SimplifyLevel::Cheap,
            timeout: true,
            caching: true,
            statistics: false,
            seed: 0x5eed_cafe,
        }
    }
}
