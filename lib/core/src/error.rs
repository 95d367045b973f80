//! Error handling foundation for the mibo relay.
//!
//! Crates define their own domain error enums in an `error` module and
//! wrap them in rootcause reports at service boundaries, where a failure
//! crosses from one collaborator into another.

use rootcause::Report;

/// Result alias over rootcause's [`Report`].
pub type Result<T, C = ()> = std::result::Result<T, Report<C>>;
