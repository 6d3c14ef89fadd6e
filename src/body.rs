//! External collaborator interface for bodies (spec §3 "Body (external)",
//! §9 "Body handles"). The core never owns a body; it holds an opaque
//! handle and calls back into the domain for `H`, `H^T` and `M^{-1}`,
//! keeping the solver integration-scheme agnostic the way the teacher
//! keeps `nphysics3d::solver` agnostic of `RigidBody` vs. `Multibody` vs.
//! FEM bodies behind the `Body` trait.

use na::Real;
use slab::Slab;

use crate::math::Local;

/// Opaque reference to a body owned by the outer domain. `Copy` small
/// index, same shape as the teacher's `BodyHandle`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct BodyHandle(pub usize);

/// What kind of integration scheme owns a body. Only the FEM/explicit
/// case changes the constraint-adjacency test (spec §4.2 step 1) and the
/// `rowupdate` caching rule (spec §4.2 "Update cost is amortised").
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BodyKind {
    Obstacle,
    Rigid,
    PseudoRigid,
    FiniteElement { explicit: bool },
}

impl BodyKind {
    /// Whether a configuration change forces this body's rows to be
    /// reassembled every step (spec §4.2): rigid and pseudo-rigid always,
    /// explicit FEM never, implicit FEM yes.
    pub fn always_needs_row_update(self) -> bool {
        match self {
            BodyKind::Obstacle => false,
            BodyKind::Rigid | BodyKind::PseudoRigid => true,
            BodyKind::FiniteElement { explicit } => !explicit,
        }
    }
}

/// The three operators the core ever invokes on a body (spec §9 "Body
/// handles"): generalized inverse mass action, and the `H`/`H^T` Jacobian
/// maps between generalized velocities and a constraint's local frame.
/// Kept as a trait rather than function pointers (spec §9 "Kernel
/// dispatch" applies the same reasoning) since the hot loop dispatches
/// through a concrete `BodySet` implementation, not a vtable per call.
pub trait Body<N: Real> {
    /// Number of generalized degrees of freedom.
    fn ndofs(&self) -> usize;

    /// Applies `M^{-1}` to a generalized force/impulse vector of length
    /// `ndofs()`, returning the resulting generalized velocity.
    fn apply_inv_mass(&self, generalized: &[N]) -> Vec<N>;

    /// Whether this body's configuration (hence its `H` Jacobians) changed
    /// since the previous step; drives `rowupdate` (spec §4.2).
    fn configuration_changed(&self) -> bool;

    fn kind(&self) -> BodyKind;
}

/// A per-constraint Jacobian block `H`: maps a body's generalized velocity
/// to the constraint's local 3-D frame and back. Dense and small (at most
/// a handful of columns per body-DOF) so it is stored as a flat row-major
/// buffer rather than a `nalgebra` matrix type, mirroring the teacher's
/// flat `jacobians: Vec<N>` buffer in `MoreauJeanSolver`.
#[derive(Clone, Debug)]
pub struct Jacobian<N: Real> {
    /// `3 x ndofs`, row-major: row 0/1 are the tangents, row 2 the normal.
    pub rows: Vec<N>,
    pub ndofs: usize,
}

impl<N: Real> Jacobian<N> {
    pub fn zeros(ndofs: usize) -> Self {
        Jacobian {
            rows: vec![N::zero(); 3 * ndofs],
            ndofs,
        }
    }

    fn row(&self, i: usize) -> &[N] {
        &self.rows[i * self.ndofs..(i + 1) * self.ndofs]
    }

    /// `H * v`.
    pub fn apply(&self, v: &[N]) -> Local<N> {
        debug_assert_eq!(v.len(), self.ndofs);
        let mut out = Local::zeros();
        for i in 0..3 {
            let row = self.row(i);
            let mut acc = N::zero();
            for k in 0..self.ndofs {
                acc += row[k] * v[k];
            }
            out[i] = acc;
        }
        out
    }

    /// `H^T * u`, scattering a local-frame vector back into generalized
    /// coordinates.
    pub fn apply_transpose(&self, u: &Local<N>) -> Vec<N> {
        let mut out = vec![N::zero(); self.ndofs];
        for i in 0..3 {
            let row = self.row(i);
            let ui = u[i];
            for k in 0..self.ndofs {
                out[k] += row[k] * ui;
            }
        }
        out
    }
}

/// Storage for the bodies participating in the current local dynamics
/// graph, keyed by `BodyHandle` (spec §9 "Body handles": "opaque
/// identifiers").
pub struct BodySet<N: Real> {
    bodies: Slab<Box<dyn Body<N>>>,
}

impl<N: Real> BodySet<N> {
    pub fn new() -> Self {
        BodySet { bodies: Slab::new() }
    }

    pub fn insert(&mut self, body: Box<dyn Body<N>>) -> BodyHandle {
        BodyHandle(self.bodies.insert(body))
    }

    pub fn remove(&mut self, handle: BodyHandle) -> Option<Box<dyn Body<N>>> {
        if self.bodies.contains(handle.0) {
            Some(self.bodies.remove(handle.0))
        } else {
            None
        }
    }

    pub fn get(&self, handle: BodyHandle) -> Option<&dyn Body<N>> {
        self.bodies.get(handle.0).map(|b| b.as_ref())
    }
}

impl<N: Real> Default for BodySet<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FreeBody {
        inv_mass: f64,
    }

    impl Body<f64> for FreeBody {
        fn ndofs(&self) -> usize {
            3
        }

        fn apply_inv_mass(&self, generalized: &[f64]) -> Vec<f64> {
            generalized.iter().map(|g| g * self.inv_mass).collect()
        }

        fn configuration_changed(&self) -> bool {
            false
        }

        fn kind(&self) -> BodyKind {
            BodyKind::Rigid
        }
    }

    #[test]
    fn jacobian_identity_round_trips() {
        let mut jac = Jacobian::<f64>::zeros(3);
        for i in 0..3 {
            jac.rows[i * 3 + i] = 1.0;
        }
        let v = [1.0, 2.0, 3.0];
        let u = jac.apply(&v);
        assert_eq!([u[0], u[1], u[2]], v);
        let back = jac.apply_transpose(&u);
        assert_eq!(back, v);
    }

    #[test]
    fn body_set_insert_get_remove() {
        let mut bodies = BodySet::<f64>::new();
        let handle = bodies.insert(Box::new(FreeBody { inv_mass: 2.0 }));
        assert_eq!(bodies.get(handle).unwrap().ndofs(), 3);
        assert!(bodies.remove(handle).is_some());
        assert!(bodies.get(handle).is_none());
    }

    #[test]
    fn body_kind_row_update_rules() {
        assert!(BodyKind::Rigid.always_needs_row_update());
        assert!(!BodyKind::Obstacle.always_needs_row_update());
        assert!(!BodyKind::FiniteElement { explicit: true }.always_needs_row_update());
        assert!(BodyKind::FiniteElement { explicit: false }.always_needs_row_update());
    }
}
