//! The constraint data model (spec §3 "Constraint (CON)") and the per-
//! constraint diagonal kernels (C1, spec §4.1), grounded on
//! `original_source/ldy.h`'s `struct constraint` / cohesion fields and on
//! the teacher's `UnilateralConstraint`/`BilateralConstraint` split in
//! `solver/sor_prox.rs`.

pub mod kernel;

use bitflags::bitflags;
use na::Real;

use crate::body::BodyHandle;
use crate::math::Local;

/// `CON::kind` (spec §3).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConstraintKind {
    Contact,
    FixPnt,
    FixDir,
    VeloDir,
    RigLnk,
    Glue,
}

/// Surface law selector (spec §6 "Surface-material database").
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SurfaceModel {
    SignoriniCoulomb,
    SpringDashpot,
}

/// `μ, e, c, model` (spec §6).
#[derive(Copy, Clone, Debug)]
pub struct SurfaceMaterial<N: Real> {
    pub friction: N,
    pub restitution: N,
    pub cohesion: N,
    /// Value cohesion decays to, and the relative threshold used by the
    /// decohesion test (spec §4.8), mirrors `COHESION_EPSILON` in
    /// `original_source/ldy.c`.
    pub cohesion_release_eps: N,
    pub model: SurfaceModel,
}

impl<N: Real> SurfaceMaterial<N> {
    pub fn new(friction: N, restitution: N, cohesion: N, eps: N, model: SurfaceModel) -> Self {
        SurfaceMaterial {
            friction,
            restitution,
            cohesion,
            cohesion_release_eps: eps,
            model,
        }
    }
}

bitflags::bitflags! {
    /// `CON`'s bitmask state field (spec §3).
    pub struct ConState: u32 {
        const STICKING        = 0b0000_0001;
        const OPEN            = 0b0000_0010;
        const COHESIVE        = 0b0000_0100;
        const FRESHLY_CREATED = 0b0000_1000;
        const ID_LOCKED       = 0b0001_0000;
        const EXTERNAL        = 0b0010_0000;
    }
}

/// The scratch slot `Z` (spec §3): holds whichever of VELODIR's sampled
/// target or RIGLNK's (vector, length) pair applies to this constraint's
/// kind.
#[derive(Copy, Clone, Debug)]
pub enum Scratch<N: Real> {
    None,
    /// VELODIR: prescribed normal velocity sample `z(t)`.
    VeloDir(N),
    /// RIGLNK: reference vector and its preserved length.
    RigLnk { vector: na::Vector3<N>, length: N },
}

/// A single constraint (spec §3 "Constraint (CON)").
#[derive(Clone)]
pub struct Constraint<N: Real> {
    pub kind: ConstraintKind,
    pub master: BodyHandle,
    pub slave: Option<BodyHandle>,
    pub material: SurfaceMaterial<N>,
    /// Spatial point of application.
    pub point: na::Point3<N>,
    /// Referential points on master/slave, used to recompute `point` and
    /// `gap` as the bodies move (owned by the domain in a full
    /// implementation; kept here so assembly has something to read).
    pub ref_point_master: na::Point3<N>,
    pub ref_point_slave: na::Point3<N>,
    /// Local orthonormal base, columns `t1, t2, n`.
    pub base: na::Matrix3<N>,
    pub area: N,
    pub gap: N,
    pub scratch: Scratch<N>,
    pub reaction: Local<N>,
    pub velocity: Local<N>,
    pub previous_velocity: Local<N>,
    pub state: ConState,
}

impl<N: Real> Constraint<N> {
    pub fn new(
        kind: ConstraintKind,
        master: BodyHandle,
        slave: Option<BodyHandle>,
        material: SurfaceMaterial<N>,
        point: na::Point3<N>,
        base: na::Matrix3<N>,
        area: N,
        gap: N,
    ) -> Self {
        Constraint {
            kind,
            master,
            slave,
            material,
            point,
            ref_point_master: point,
            ref_point_slave: point,
            base,
            area,
            gap,
            scratch: Scratch::None,
            reaction: Local::zeros(),
            velocity: Local::zeros(),
            previous_velocity: Local::zeros(),
            state: ConState::FRESHLY_CREATED,
        }
    }

    pub fn is_cohesive(&self) -> bool {
        self.state.contains(ConState::COHESIVE) && self.material.cohesion > N::zero()
    }

    pub fn is_open(&self) -> bool {
        self.state.contains(ConState::OPEN)
    }
}
