//! Merit function (C3, spec §4.3): the normalised quadratic residual used
//! as the outer stopping test for both BGS and Newton.

use na::Real;

use crate::constraint::kernel::dashed_normal_velocity;
use crate::constraint::ConstraintKind;
use crate::locdyn::LocDyn;
use crate::math::Local;

/// Per-constraint residual `g` (spec §4.3 table).
pub fn residual<N: Real>(ldy: &LocDyn<N>, dia: crate::locdyn::DiabId, dynamic: bool, step: N) -> Local<N> {
    let con = ldy.constraint(dia);

    match con.kind {
        ConstraintKind::Contact => {
            if dynamic && con.gap > N::zero() {
                return Local::zeros();
            }
            let u = con.velocity;
            let mu = con.material.friction;
            let e = con.material.restitution;
            let u_hat_n = dashed_normal_velocity(dynamic, u[2], con.previous_velocity[2], e, con.gap, step);
            let u_t_norm = (u[0] * u[0] + u[1] * u[1]).sqrt();
            let raw = Local::new(u[0], u[1], u_hat_n + mu * u_t_norm);
            // Project onto the real-cone normal (spec §4.7 `m(S)`): the
            // normal-ray projection of `R - U` onto the Coulomb cone.
            let s = con.reaction - u;
            let cone = cone_normal_projection(s, mu);
            raw - cone
        }
        ConstraintKind::FixPnt | ConstraintKind::Glue => {
            if dynamic {
                con.velocity + con.previous_velocity
            } else {
                con.velocity
            }
        }
        ConstraintKind::FixDir => {
            let g = if dynamic {
                con.velocity + con.previous_velocity
            } else {
                con.velocity
            };
            Local::new(N::zero(), N::zero(), g[2])
        }
        ConstraintKind::VeloDir => {
            let z = match con.scratch {
                crate::constraint::Scratch::VeloDir(z) => z,
                _ => N::zero(),
            };
            Local::new(N::zero(), N::zero(), z - con.velocity[2])
        }
        ConstraintKind::RigLnk => {
            Local::new(N::zero(), N::zero(), con.gap / step + con.velocity[2])
        }
    }
}

/// The `F_cone`/`m()` normal-ray projection onto the Coulomb cone (spec
/// §4.7): `m(S) = <S, n_hat(S)> n_hat(S)`.
fn cone_normal_projection<N: Real>(s: Local<N>, mu: N) -> Local<N> {
    let t_norm = (s[0] * s[0] + s[1] * s[1]).sqrt();
    let n = Local::new(N::zero(), N::zero(), N::one());
    let axis_norm = (N::one() + mu * mu).sqrt();
    let n_hat = if axis_norm > N::zero() {
        Local::new(mu * if t_norm > N::zero() { s[0] / t_norm } else { N::zero() } / axis_norm,
                   mu * if t_norm > N::zero() { s[1] / t_norm } else { N::zero() } / axis_norm,
                   N::one() / axis_norm)
    } else {
        n
    };
    let proj = s.dot(&n_hat);
    n_hat * proj
}

/// Per-constraint merit term `m_i = 0.5 <A g, g>` (spec §4.3).
pub fn term<N: Real>(ldy: &LocDyn<N>, dia: crate::locdyn::DiabId, dynamic: bool, step: N) -> N {
    let g = residual(ldy, dia, dynamic, step);
    let a = ldy.diab(dia).a;
    (a * g).dot(&g) * N::from_subset(&0.5)
}

/// Global merit `M = (sum m_i) / max(free_energy, 1)` (spec §4.3).
pub fn global<N: Real>(ldy: &LocDyn<N>, dynamic: bool, step: N) -> N {
    let mut sum = N::zero();
    for id in ldy.iter_ids() {
        sum += term(ldy, id, dynamic, step);
    }
    sum / ldy.free_energy.max(N::one())
}
