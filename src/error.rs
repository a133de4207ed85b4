//! Checker error variants.

use thiserror::Error;

use crate::db::StateId;

/// Fatal conditions that terminate a search.
///
/// Unsupported program features abort rather than degrade: silently dropping
/// them would make a "Safe" verdict unsound.
#[derive(Debug, Error)]
pub enum CheckError {
    /// A pointer whose value is symbolic was dereferenced or offset.
    #[error("symbolic pointers are not supported")]
    SymbolicPointer,
    /// A `select` instruction with a symbolic condition.
    #[error("select on a symbolic condition is not supported")]
    SymbolicSelect,
    /// `alloca` with a non-constant element count.
    #[error("variable-length stack arrays are not supported")]
    VariableLenArray,
    /// The module has no `main` function to start from.
    #[error("module defines no `main` function")]
    MissingMain,
    /// A call to an external function the evaluator does not model.
    #[error("call to unknown external function `{0}`")]
    UnknownExtern(String),
    /// An ill-formed module slipped past the loader.
    #[error("malformed program: {0}")]
    MalformedProgram(String),
    /// An atomic proposition that cannot be translated.
    #[error("cannot translate atomic proposition `{0}`")]
    AtomicProposition(String),
    /// State database lookups that fail indicate a driver bug.
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Recoverable database failures.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("state {0} is not in the database")]
    UnknownState(StateId),
}

/// Failures raised by the formula → solver translation.
///
/// Inside `simplify` these are masked (the unsimplified formula is kept);
/// inside `subseteq` they degrade to `unknown`, which callers promote to the
/// sound side.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("operand widths do not match: {0}")]
    WidthMismatch(String),
    #[error("term not expressible as a formula: {0}")]
    Unrepresentable(String),
}
