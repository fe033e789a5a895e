//! Error handling foundation for the tripwire trigger engine.
//!
//! This module provides only the `Result` type alias using rootcause.
//! Each crate defines its own domain-specific error enums, and the
//! orchestrator surfaces them wrapped in a `Report` so callers can attach
//! context as errors propagate up the stack.

use rootcause::Report;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Rejected;

    impl std::fmt::Display for Rejected {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "rejected")
        }
    }

    impl std::error::Error for Rejected {}

    #[test]
    fn result_type_works() {
        let ok: Result<i32> = Ok(42);
        assert_eq!(ok.expect("should be ok"), 42);
    }

    #[test]
    fn typed_context_is_preserved() {
        fn fails() -> Result<(), Rejected> {
            Err(Rejected)?;
            Ok(())
        }

        let report = fails().unwrap_err();
        assert_eq!(report.current_context(), &Rejected);
    }
}
