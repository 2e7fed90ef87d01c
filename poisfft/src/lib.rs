//! # poisfft
//!
//! A distributed solver for the three-dimensional Poisson equation on regular
//! Cartesian grids, built on one-dimensional FFTW transforms composed with a
//! precomputed Green's function.
//!
//! Notable features of this library are:
//! * Per-direction boundary conditions: periodic, symmetric (even/odd) and
//!   unbounded, in any combination.
//! * Pencil decompositions over MPI with a block-based all-to-all transpose
//!   engine, available as a single collective or as overlapped non-blocking
//!   point-to-point exchanges.
//! * Scalar and rotational (curl producing) solves, the latter with spectral
//!   or second-order finite-difference derivative factors.
//! * Optional rank reordering driven by the measured communication graph.
//!
//! The right-hand side is supplied in the caller's pencil layout; the solution
//! is returned in the same layout.
#![cfg_attr(feature = "strict", deny(warnings))]
#![warn(missing_docs)]

#[macro_use]
pub mod fftw;

pub mod convolution;
pub mod green;
pub mod indexing;
pub mod planner;
pub mod profiler;
pub mod reorder;
pub mod solver;
pub mod special;
pub mod topology;
pub mod transform;
pub mod transpose;
pub mod types;

// Public API
#[doc(inline)]
pub use solver::Solver;
#[doc(inline)]
pub use topology::Topology;
#[doc(inline)]
pub use types::{BoundaryKind, CommStrategy, DiffOrder, GreenKind, SolveMode};
