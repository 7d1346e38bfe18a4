//! High-level API for running the solver.
//!
//! The driver encapsulates the solver state and provides a simple API for
//! the whole minimization run.
//!
//! The simplest way of using the driver is to initialize it with the
//! defaults:
//!
//! ```rust
//! use kobyla::CobylaDriver;
//! # use kobyla::{Domain, Function, Problem};
//! # use kobyla::nalgebra as na;
//! # use na::{Dyn, IsContiguous};
//! #
//! # struct MyProblem;
//! #
//! # impl MyProblem {
//! #     fn new() -> Self {
//! #         Self
//! #     }
//! # }
//! #
//! # impl Problem for MyProblem {
//! #     type Field = f64;
//! #
//! #     fn domain(&self) -> Domain<Self::Field> {
//! #         Domain::unconstrained(2)
//! #     }
//! # }
//! #
//! # impl Function for MyProblem {
//! #     fn apply<Sx>(&self, x: &na::Vector<Self::Field, Dyn, Sx>) -> Self::Field
//! #     where
//! #         Sx: na::storage::Storage<Self::Field, Dyn> + IsContiguous,
//! #     {
//! #         x[0] * x[0] + x[1] * x[1]
//! #     }
//! # }
//!
//! let f = MyProblem::new();
//!
//! let mut driver = CobylaDriver::new(&f);
//! ```
//!
//! If you need to specify the initial point or tune the solver, use the
//! builder:
//!
//! ```rust
//! use kobyla::{CobylaDriver, CobylaOptions};
//! # use kobyla::{Domain, Function, Problem};
//! # use kobyla::nalgebra as na;
//! # use na::{Dyn, IsContiguous};
//! #
//! # struct MyProblem;
//! #
//! # impl MyProblem {
//! #     fn new() -> Self {
//! #         Self
//! #     }
//! # }
//! #
//! # impl Problem for MyProblem {
//! #     type Field = f64;
//! #
//! #     fn domain(&self) -> Domain<Self::Field> {
//! #         Domain::unconstrained(2)
//! #     }
//! # }
//! #
//! # impl Function for MyProblem {
//! #     fn apply<Sx>(&self, x: &na::Vector<Self::Field, Dyn, Sx>) -> Self::Field
//! #     where
//! #         Sx: na::storage::Storage<Self::Field, Dyn> + IsContiguous,
//! #     {
//! #         x[0] * x[0] + x[1] * x[1]
//! #     }
//! # }
//!
//! let f = MyProblem::new();
//!
//! let mut options = CobylaOptions::default();
//! options.set_rhobeg(0.5).set_rhoend(1e-8);
//!
//! let mut driver = CobylaDriver::builder(&f)
//!     .with_initial(vec![10.0, -10.0])
//!     .with_options(options)
//!     .build();
//! ```
//!
//! Once you have the driver, run it to completion and inspect the outcome:
//!
//! ```rust
//! # use kobyla::{CobylaDriver, Domain, Function, Problem};
//! # use kobyla::nalgebra as na;
//! # use na::{Dyn, IsContiguous};
//! #
//! # struct MyProblem;
//! #
//! # impl Problem for MyProblem {
//! #     type Field = f64;
//! #
//! #     fn domain(&self) -> Domain<Self::Field> {
//! #         Domain::unconstrained(2)
//! #     }
//! # }
//! #
//! # impl Function for MyProblem {
//! #     fn apply<Sx>(&self, x: &na::Vector<Self::Field, Dyn, Sx>) -> Self::Field
//! #     where
//! #         Sx: na::storage::Storage<Self::Field, Dyn> + IsContiguous,
//! #     {
//! #         x[0] * x[0] + x[1] * x[1]
//! #     }
//! # }
//! #
//! # let f = MyProblem;
//! # let mut driver = CobylaDriver::new(&f);
//! let optimum = driver.run().expect("invalid arguments");
//!
//! println!("{} after {} evaluations: f = {}", optimum.status(), optimum.nf(), optimum.f());
//! ```

use nalgebra::{convert, DimName, Dyn, OVector, U1};

use crate::algo::{Cobyla, CobylaError, CobylaOptions, Optimum};
use crate::core::{Constrained, Domain, Problem};

/// Builder for the [`CobylaDriver`].
pub struct CobylaBuilder<'a, F: Constrained> {
    f: &'a F,
    dom: Domain<F::Field>,
    options: CobylaOptions<F>,
    x0: OVector<F::Field, Dyn>,
}

impl<'a, F: Constrained> CobylaBuilder<'a, F> {
    fn new(f: &'a F) -> Self {
        let dom = f.domain();
        let dim = Dyn(dom.dim());
        let x0 = OVector::from_element_generic(dim, U1::name(), convert(0.0));

        Self {
            f,
            dom,
            options: CobylaOptions::default(),
            x0,
        }
    }

    /// Sets the initial point from which the iterative process starts.
    pub fn with_initial(mut self, x0: Vec<F::Field>) -> Self {
        let dim = Dyn(self.dom.dim());
        self.x0 = OVector::from_vec_generic(dim, U1::name(), x0);
        self
    }

    /// Sets the solver options.
    pub fn with_options(mut self, options: CobylaOptions<F>) -> Self {
        self.options = options;
        self
    }

    /// Builds the [`CobylaDriver`].
    pub fn build(mut self) -> CobylaDriver<'a, F> {
        self.dom.project(&mut self.x0);
        let algo = Cobyla::with_options(self.f, &self.dom, self.options);

        CobylaDriver {
            f: self.f,
            dom: self.dom,
            algo,
            x: self.x0,
        }
    }
}

/// The driver for the whole minimization run.
///
/// For default settings, use [`CobylaDriver::new`]. For more flexibility,
/// use [`CobylaDriver::builder`]. For the usage of the driver, see
/// [module](self) documentation.
pub struct CobylaDriver<'a, F: Constrained> {
    f: &'a F,
    dom: Domain<F::Field>,
    algo: Cobyla<F>,
    x: OVector<F::Field, Dyn>,
}

impl<'a, F: Constrained> CobylaDriver<'a, F> {
    /// Returns the builder for specifying additional settings.
    pub fn builder(f: &'a F) -> CobylaBuilder<'a, F> {
        CobylaBuilder::new(f)
    }

    /// Initializes the driver with the default settings.
    pub fn new(f: &'a F) -> Self {
        CobylaDriver::builder(f).build()
    }

    /// Returns reference to the current point.
    pub fn x(&self) -> &[F::Field] {
        self.x.as_slice()
    }

    /// Runs the minimization to completion.
    ///
    /// On success the current point of the driver holds the best point
    /// found, which is also part of the returned [`Optimum`]. The run can
    /// be repeated; it restarts from the current point.
    pub fn run(&mut self) -> Result<Optimum<F::Field>, CobylaError> {
        self.algo.minimize(self.f, &self.dom, &mut self.x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::core::Status;
    use crate::testing::{Sphere, UnitDisc};

    struct WithDomain(pub Domain<f64>);

    impl Problem for WithDomain {
        type Field = f64;

        fn domain(&self) -> Domain<Self::Field> {
            self.0.clone()
        }
    }

    impl crate::core::Function for WithDomain {
        fn apply<Sx>(&self, x: &nalgebra::Vector<Self::Field, Dyn, Sx>) -> Self::Field
        where
            Sx: nalgebra::storage::Storage<Self::Field, Dyn> + nalgebra::IsContiguous,
        {
            x.iter().map(|xi| xi * xi).sum()
        }
    }

    #[test]
    fn basic_use_case() {
        let f = Sphere::new(4);
        let mut driver = CobylaDriver::builder(&f)
            // Zeros are the minimum for sphere, there would be no point in
            // such test.
            .with_initial(vec![10.0; 4])
            .build();

        let optimum = driver.run().unwrap();

        assert_eq!(optimum.status(), Status::SmallTrustRadius);
        assert!(optimum.f() < 1e-4);
        assert_eq!(driver.x(), optimum.x());
    }

    #[test]
    fn constrained_use_case() {
        let f = UnitDisc;
        let mut driver = CobylaDriver::builder(&f)
            .with_initial(vec![0.0, 0.0])
            .build();

        let optimum = driver.run().unwrap();

        assert!(optimum.status().is_success());
        assert!(optimum.cstrv() <= 1e-6);
        assert!((optimum.f() + 2f64.sqrt()).abs() <= 1e-3);
    }

    #[test]
    fn initial_point_is_kept() {
        let x0 = vec![10.0; 4];

        let f = Sphere::new(4);
        let driver = CobylaDriver::builder(&f).with_initial(x0.clone()).build();

        assert_eq!(driver.x(), &x0);
    }

    #[test]
    fn initial_point_is_projected_into_domain() {
        let f = WithDomain(Domain::rect(vec![0.0, 0.0], vec![10.0, 10.0]));
        let driver = CobylaDriver::builder(&f)
            .with_initial(vec![20.0, -10.0])
            .build();

        assert_eq!(driver.x(), &[10.0, 0.0]);
    }

    #[test]
    fn precomputed_initial_values_save_one_evaluation() {
        let f = Sphere::new(2);

        let mut options = CobylaOptions::default();
        options.set_maxfun(40).set_initial_values(200.0, Vec::new());

        let mut driver = CobylaDriver::builder(&f)
            .with_initial(vec![10.0, -10.0])
            .with_options(options)
            .build();

        let optimum = driver.run().unwrap();

        // The supplied values count as the first evaluation without the
        // callback being invoked for it.
        assert_eq!(optimum.nf(), 40);
        assert_eq!(optimum.status(), Status::MaxFunReached);
    }
}
