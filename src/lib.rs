//! A constraint solver core for non-smooth multibody dynamics: assembly
//! of the local dynamics graph from a contact/joint set, and block
//! Gauss-Seidel and Newton smoothing solvers over the resulting
//! complementarity problem.
//!
//! The solver is agnostic of time integration and collision detection;
//! callers own a `Body` implementation, drive `LocDyn::insert`/`remove`
//! from their own broad/narrow phase, and run `SerialBgs`, `ParallelBgs`
//! or `NewtonSolver` over the assembled graph each step.

extern crate nalgebra as na;

pub mod body;
pub mod cohesion;
pub mod constraint;
pub mod counters;
pub mod error;
pub mod locdyn;
pub mod math;
pub mod merit;
pub mod solver;
pub mod sparsify;

pub use body::{Body, BodyHandle, BodyKind, BodySet, Jacobian};
pub use constraint::{Constraint, ConstraintKind, ConState, Scratch, SurfaceMaterial, SurfaceModel};
pub use counters::{Counters, Region, Stats};
pub use error::{ErrorCode, FailurePolicy, KernelError, SolverError};
pub use locdyn::{Diab, DiabId, LocDyn, Offb, OffbId, UpdateKind};
pub use solver::{GaussSeidelState, NewtonSolver, NewtonState, ParallelBgs, SerialBgs};
