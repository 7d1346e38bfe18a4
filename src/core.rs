//! Core abstractions and types.
//!
//! *Users* are mainly interested in implementing the [`Function`] or
//! [`Constrained`] trait together with [`Problem`], optionally specifying
//! the [domain](Domain).

mod base;
mod constrained;
mod domain;
mod function;
mod status;

pub use base::*;
pub use constrained::*;
pub use domain::*;
pub use function::*;
pub use status::*;
