//! Scalar/vector aliases shared by every module.
//!
//! Mirrors the teacher's `nphysics3d::math` convention of exposing small
//! type aliases over `nalgebra` rather than spelling out `Vector3<N>`
//! everywhere.

use na::{Matrix3, Real, Vector3};

/// Dimension of a local contact frame (two tangents + one normal).
pub const SPATIAL_DIM: usize = 3;

/// A local-frame vector: two tangential components followed by the normal one.
pub type Local<N> = Vector3<N>;

/// A 3x3 row-major local-frame operator (the Delassus block `W`, its
/// inverse `A`, or an off-diagonal cross term `W_ij`).
pub type Local3x3<N> = Matrix3<N>;

/// Shorthand used throughout for the generic scalar bound.
pub trait Scalar: Real {}
impl<N: Real> Scalar for N {}
