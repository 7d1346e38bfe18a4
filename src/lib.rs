#![allow(clippy::many_single_char_names)]
#![allow(clippy::type_complexity)]
#![warn(missing_docs)]

//! # Kobyla
//!
//! A pure Rust implementation of Powell's derivative-free trust-region
//! interpolation methods: the COBYLA solver for inequality-constrained
//! minimization and the working-set engine of LINCOA.
//!
//! COBYLA minimizes a scalar objective `f(x)` subject to inequality
//! constraints `c_i(x) >= 0` using only function values, which makes it
//! suitable for simulations, legacy codes and other black boxes where
//! derivatives are unavailable or unreliable. The objective and every
//! constraint are interpolated by linear models on a simplex of `n + 1`
//! points; a trust-region step on the models proposes the next evaluation
//! and a merit function with an adaptive penalty arbitrates between
//! objective decrease and constraint violation.
//!
//! ## Problem
//!
//! A problem is any type implementing [`Problem`] together with either
//! [`Function`] (no constraints) or [`Constrained`]:
//!
//! ```rust
//! // Kobyla is based on `nalgebra` crate.
//! use kobyla::nalgebra as na;
//! use kobyla::{Domain, Function, Problem};
//! use na::{Dyn, IsContiguous};
//!
//! struct Rosenbrock;
//!
//! impl Problem for Rosenbrock {
//!     // The numeric type. Usually f64 or f32.
//!     type Field = f64;
//!
//!     // Specification for the domain. At the very least, the dimension
//!     // must be known.
//!     fn domain(&self) -> Domain<Self::Field> {
//!         Domain::unconstrained(2)
//!     }
//! }
//!
//! impl Function for Rosenbrock {
//!     fn apply<Sx>(&self, x: &na::Vector<Self::Field, Dyn, Sx>) -> Self::Field
//!     where
//!         Sx: na::storage::Storage<Self::Field, Dyn> + IsContiguous,
//!     {
//!         100.0 * (x[1] - x[0].powi(2)).powi(2) + (1.0 - x[0]).powi(2)
//!     }
//! }
//! ```
//!
//! There is no need for defining gradients; the solver is derivative-free
//! by construction. Finite bounds given through [`Domain::rect`] are
//! honored as additional linear constraints.
//!
//! ## Solving
//!
//! The [`CobylaDriver`] runs the whole minimization and reports the
//! outcome, including the reason for stopping and the number of
//! evaluations spent:
//!
//! ```rust
//! use kobyla::CobylaDriver;
//! # use kobyla::nalgebra as na;
//! # use kobyla::{Domain, Function, Problem};
//! # use na::{Dyn, IsContiguous};
//! #
//! # struct Rosenbrock;
//! #
//! # impl Problem for Rosenbrock {
//! #     type Field = f64;
//! #
//! #     fn domain(&self) -> Domain<Self::Field> {
//! #         Domain::unconstrained(2)
//! #     }
//! # }
//! #
//! # impl Function for Rosenbrock {
//! #     fn apply<Sx>(&self, x: &na::Vector<Self::Field, Dyn, Sx>) -> Self::Field
//! #     where
//! #         Sx: na::storage::Storage<Self::Field, Dyn> + IsContiguous,
//! #     {
//! #         100.0 * (x[1] - x[0].powi(2)).powi(2) + (1.0 - x[0]).powi(2)
//! #     }
//! # }
//!
//! let f = Rosenbrock;
//!
//! let mut driver = CobylaDriver::builder(&f)
//!     .with_initial(vec![-1.2, 1.0])
//!     .build();
//!
//! let optimum = driver.run().expect("invalid arguments");
//!
//! println!(
//!     "{} after {} evaluations: f = {}",
//!     optimum.status(),
//!     optimum.nf(),
//!     optimum.f()
//! );
//! ```
//!
//! Runtime difficulties (exhausted budget, damaging rounding, a callback
//! returning NaN) are never panics or errors; they are reported through
//! the [`Status`] of the returned [`Optimum`], together with the best
//! point seen. Only violations of the argument contract surface as
//! errors, before the first evaluation.
//!
//! ## License
//!
//! Licensed under MIT.

pub mod activeset;
pub mod algo;
mod core;
pub mod driver;
pub mod eval;
pub mod linalg;

pub use core::*;
pub use driver::{CobylaBuilder, CobylaDriver};

pub use algo::{Cobyla, CobylaError, CobylaOptions, Optimum};

#[cfg(feature = "testing")]
pub mod testing;

#[cfg(not(feature = "testing"))]
pub(crate) mod testing;

pub use nalgebra;
