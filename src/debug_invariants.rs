//! Invariant checking for tracker state.
//!
//! Checks run in debug builds, or in release builds with the
//! `check-invariants` / `strict-invariants` features enabled.

use crate::mesh_error::DecompositionError;

/// Trait for validating data structure invariants.
pub trait DebugInvariants {
    /// Assert invariants in debug builds or when invariant checking is enabled.
    fn debug_assert_invariants(&self);
    /// Validate invariants and return the first error encountered.
    fn validate_invariants(&self) -> Result<(), DecompositionError>;
}

/// Run a fallible check and panic on error when invariant checking is enabled.
#[macro_export]
macro_rules! debug_invariants {
    ($expr:expr, $($ctx:tt)*) => {
        #[cfg(any(debug_assertions, feature = "strict-invariants", feature = "check-invariants"))]
        if let Err(e) = $expr {
            panic!(concat!("[invariants] ", $($ctx)*, ": {}"), e);
        }
    };
}

/// Fails unless `values` is strictly ascending.
pub fn check_strictly_ascending(
    rank: usize,
    operation: &'static str,
    what: &str,
    values: &[usize],
) -> Result<(), DecompositionError> {
    match values.windows(2).position(|w| w[0] >= w[1]) {
        None => Ok(()),
        Some(at) => Err(DecompositionError::consistency(
            rank,
            operation,
            format!(
                "{what} not strictly ascending at position {at}: {} then {}",
                values[at],
                values[at + 1]
            ),
        )),
    }
}

/// Fails if any `Some` value occurs twice in `mapping`.
pub fn check_injective(
    rank: usize,
    operation: &'static str,
    what: &str,
    mapping: &[Option<usize>],
) -> Result<(), DecompositionError> {
    let mut seen: Vec<usize> = mapping.iter().flatten().copied().collect();
    seen.sort_unstable();
    match seen.windows(2).find(|w| w[0] == w[1]) {
        None => Ok(()),
        Some(w) => Err(DecompositionError::consistency(
            rank,
            operation,
            format!("{what}: value {} mapped twice", w[0]),
        )),
    }
}
