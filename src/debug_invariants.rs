//! Self-checks for the long-lived run state (topology, exchange buffers).
//!
//! Checks run in debug builds, or in release builds with the
//! `check-invariants` feature; otherwise they compile away.

use crate::pattern_error::PatternError;

/// A structure that can check its own consistency.
pub trait DebugInvariants {
    /// First violated invariant, if any.
    fn validate_invariants(&self) -> Result<(), PatternError>;

    /// Panic on a violated invariant when checks are enabled.
    fn debug_assert_invariants(&self) {
        crate::debug_invariants!(self.validate_invariants(), std::any::type_name::<Self>());
    }
}

/// Panic naming `$what` if `$check` returns an error and checks are enabled.
#[macro_export]
macro_rules! debug_invariants {
    ($check:expr, $what:expr) => {
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        if let Err(e) = $check {
            panic!("[invariants] {} violated: {}", $what, e);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Lopsided;

    impl DebugInvariants for Lopsided {
        fn validate_invariants(&self) -> Result<(), PatternError> {
            Err(PatternError::InvalidParameters("+x and -x buffers differ".into()))
        }
    }

    #[test]
    #[cfg(any(debug_assertions, feature = "check-invariants"))]
    #[should_panic(expected = "Lopsided violated")]
    fn violation_panics_with_the_type_name() {
        Lopsided.debug_assert_invariants();
    }
}
