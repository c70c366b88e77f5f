//! Structural self-checks for layouts and engines.
//!
//! [`DebugInvariants::validate_invariants`] is always available. The
//! asserting forms only fire in debug builds or with the `check-invariants`
//! feature, so release builds pay nothing for them.

use crate::patch_error::PatchError;

/// `true` when invariant assertions are compiled in.
pub const CHECKS_ENABLED: bool = cfg!(any(debug_assertions, feature = "check-invariants"));

pub trait DebugInvariants {
    /// First broken invariant, if any.
    fn validate_invariants(&self) -> Result<(), PatchError>;

    /// Panic on a broken invariant when checks are enabled.
    fn debug_assert_invariants(&self) {
        if CHECKS_ENABLED {
            if let Err(e) = self.validate_invariants() {
                panic!("[invariants] {}: {e}", std::any::type_name::<Self>());
            }
        }
    }
}

/// Run a fallible check at a mutation site and panic with `ctx` on error
/// when checks are enabled.
#[macro_export]
macro_rules! debug_invariants {
    ($expr:expr, $($ctx:tt)*) => {
        if $crate::debug_invariants::CHECKS_ENABLED {
            if let Err(e) = $expr {
                panic!(concat!("[invariants] ", $($ctx)*, ": {}"), e);
            }
        }
    };
}
