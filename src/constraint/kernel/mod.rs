//! Per-constraint diagonal kernels (C1, spec §4.1). Each kernel solves
//! the small (at most 3x3) local sub-problem for one constraint given its
//! free-motion term `B`, Delassus block `W` and scaling `rho`, producing
//! an updated `(U, R)` pair. Dispatch is a `match` on `ConstraintKind`
//! rather than function-pointer indirection (spec §9 "Kernel dispatch").

mod contact;
mod fixdir;
mod fixpnt;
mod riglnk;
mod velodir;

pub use contact::{de_saxce_feng, projected_gradient, semismooth_newton, ContactKernel};
pub use fixdir::fixdir;
pub use fixpnt::fixpnt;
pub use riglnk::{riglnk, riglnk_explicit};
pub use velodir::velodir;

use na::Real;

use crate::constraint::{Constraint, ConstraintKind, SurfaceModel};
use crate::error::KernelError;
use crate::math::{Local, Local3x3};

/// Inputs a kernel needs beyond what lives on the `Constraint` itself: the
/// assembled Delassus block and the local free velocity accumulated from
/// neighbour reactions (spec §4.5 step (b), `B_loc`).
pub struct KernelInput<'a, N: Real> {
    pub dynamic: bool,
    pub eps: N,
    pub maxiter: u32,
    pub step: N,
    pub w: &'a Local3x3<N>,
    pub rho: N,
    pub b: Local<N>,
}

/// Output of a kernel call: updated local velocity/reaction and the
/// number of inner iterations it took.
pub struct KernelOutput<N: Real> {
    pub u: Local<N>,
    pub r: Local<N>,
    pub iterations: u32,
}

/// "Dashed normal velocity" (spec §4.1 common auxiliaries, Glossary).
pub fn dashed_normal_velocity<N: Real>(dynamic: bool, u_n: N, v_n: N, e: N, gap: N, step: N) -> N {
    if dynamic {
        u_n + e * v_n.min(N::zero())
    } else {
        gap.max(N::zero()) / step + u_n
    }
}

/// Relative-error stop test shared by every iterative kernel (spec §4.1).
pub fn relative_error<N: Real>(dr: &Local<N>, r: &Local<N>) -> N {
    dr.norm() / r.norm().max(N::one())
}

/// Selects and runs the kernel appropriate for `con.kind`, the per-
/// constraint dispatch named in spec §4.1 and §9.
pub fn solve<N: Real>(
    con: &mut Constraint<N>,
    selector: ContactKernel,
    dynamic: bool,
    eps: N,
    maxiter: u32,
    step: N,
    w: &Local3x3<N>,
    b: Local<N>,
) -> Result<u32, KernelError> {
    // Open dynamic contact: the contact is free (spec §4.1 preamble).
    if con.kind == ConstraintKind::Contact && dynamic && con.gap > N::zero() {
        con.reaction = Local::zeros();
        con.velocity = b;
        return Ok(0);
    }

    let rho = {
        let eigen = w.symmetric_eigen();
        let lambda_max = eigen
            .eigenvalues
            .iter()
            .cloned()
            .fold(N::zero(), |a, b| if b > a { b } else { a });
        if lambda_max > N::zero() {
            N::one() / lambda_max
        } else {
            N::one()
        }
    };

    let input = KernelInput {
        dynamic,
        eps,
        maxiter,
        step,
        w,
        rho,
        b,
    };

    let out = match con.kind {
        ConstraintKind::Contact => match con.material.model {
            SurfaceModel::SpringDashpot => contact::spring_dashpot(con, &input)?,
            SurfaceModel::SignoriniCoulomb => match selector {
                ContactKernel::ProjectedGradient => projected_gradient(con, &input)?,
                ContactKernel::DeSaxceFeng => de_saxce_feng(con, &input)?,
                ContactKernel::SemismoothNewton => semismooth_newton(con, &input)?,
            },
        },
        ConstraintKind::FixPnt | ConstraintKind::Glue => fixpnt(con, &input)?,
        ConstraintKind::FixDir => fixdir(con, &input)?,
        ConstraintKind::VeloDir => velodir(con, &input)?,
        ConstraintKind::RigLnk => riglnk(con, &input)?,
    };

    con.velocity = out.u;
    con.reaction = out.r;
    Ok(out.iterations)
}
