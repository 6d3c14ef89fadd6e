//! Serial block Gauss-Seidel sweep (C5, spec §4.5): single-thread
//! forward/backward sweep over the local dynamics graph, grounded on the
//! teacher's `SORProx::step` per-constraint update loop in
//! `solver/sor_prox.rs`, generalised from per-kind constraint slices to a
//! single `match`-dispatched sweep over every `DIAB`.

use na::Real;

use crate::constraint::kernel;
use crate::error::{ErrorCode, FailurePolicy, SolverError};
use crate::locdyn::{DiabId, LocDyn};
use crate::math::Local;

use super::GaussSeidelState;

pub struct SerialBgs;

impl SerialBgs {
    /// `GAUSS_SEIDEL_Solve` (spec §4.5): sweeps until `maxiter` or until
    /// the relative error drops below `eps`.
    pub fn solve<N: Real>(
        state: &mut GaussSeidelState<N>,
        ldy: &mut LocDyn<N>,
        dynamic: bool,
        step: N,
    ) -> Result<u32, SolverError> {
        state.error_history.clear();
        let ids: Vec<DiabId> = ldy.iter_ids().collect();

        for outer in 0..state.maxiter {
            let forward = !(state.reverse && outer % 2 == 1);
            let order: Vec<DiabId> = if forward {
                ids.clone()
            } else {
                ids.iter().rev().cloned().collect()
            };

            let (mut sum_dr2, mut sum_r2) = (N::zero(), N::zero());

            for id in order {
                let prev_r = ldy.constraint(id).reaction;
                let b_loc = local_free_velocity(ldy, id);
                let w = ldy.diab(id).w;

                let con = ldy.constraint_mut(id);
                let result = kernel::solve(
                    con,
                    state.kernel,
                    dynamic,
                    state.kernel_eps,
                    state.kernel_maxiter,
                    step,
                    &w,
                    b_loc,
                );

                match result {
                    Ok(_) => {}
                    Err(kernel_err) => match &mut state.failure {
                        FailurePolicy::Continue => {
                            con.reaction = prev_r;
                        }
                        FailurePolicy::Exit => {
                            return Err(SolverError::kernel(id, kernel_err));
                        }
                        FailurePolicy::Callback(cb) => {
                            let err = SolverError::kernel(id, kernel_err);
                            cb(&err);
                            con.reaction = prev_r;
                        }
                    },
                }

                let dr: Local<N> = con.reaction - prev_r;
                sum_dr2 += dr.norm_squared();
                sum_r2 += con.reaction.norm_squared();
            }

            let err_rel = sum_dr2.sqrt() / sum_r2.sqrt().max(N::one());
            state.error_history.push(err_rel);

            if state.verbose {
                log::info!("GAUSS_SEIDEL: iteration: {}  error: {:?}", outer, err_rel);
            }

            if err_rel < state.eps {
                return Ok(outer + 1);
            }
        }

        match state.failure {
            FailurePolicy::Exit => Err(SolverError::new(
                ErrorCode::Diverged,
                None,
                "serial BGS outer iteration cap reached",
            )),
            _ => Ok(state.maxiter),
        }
    }
}

/// `B_loc = B + sum_j W_ij R_j` (spec §4.5 step (b)).
pub(crate) fn local_free_velocity<N: Real>(ldy: &LocDyn<N>, id: DiabId) -> Local<N> {
    let dia = ldy.diab(id);
    let mut b_loc = dia.b;
    for &edge in dia.adj.iter().chain(dia.adjext.iter()) {
        let offb = ldy.offb(edge);
        let r_j = ldy.constraint(offb.neighbour).reaction;
        b_loc += offb.w * r_j;
    }
    b_loc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodyHandle;
    use crate::constraint::{Constraint, ConstraintKind, SurfaceMaterial, SurfaceModel};
    use crate::math::Local3x3;

    fn state() -> GaussSeidelState<f64> {
        GaussSeidelState::new(1e-10, 20, 1e-10, 100)
    }

    #[test]
    fn single_fixpnt_converges_in_one_outer_sweep() {
        let material = SurfaceMaterial::new(0.0, 0.0, 0.0, 0.01, SurfaceModel::SignoriniCoulomb);
        let con = Constraint::new(
            ConstraintKind::FixPnt,
            BodyHandle(0),
            None,
            material,
            na::Point3::origin(),
            na::Matrix3::identity(),
            1.0,
            0.0,
        );
        let mut ldy = LocDyn::<f64>::new();
        let id = ldy.insert(con, |_, _| true);
        ldy.diab_mut(id).w = Local3x3::identity();
        ldy.diab_mut(id).b = Local::new(1.0, 2.0, 3.0);

        let mut st = state();
        let iters = SerialBgs::solve(&mut st, &mut ldy, false, 0.01).unwrap();
        assert_eq!(iters, 1);
        assert!(ldy.constraint(id).velocity.norm() < 1e-9);
    }

    #[test]
    fn coupled_constraints_converge_via_off_diagonal_feedback() {
        let material = SurfaceMaterial::new(0.0, 0.0, 0.0, 0.01, SurfaceModel::SignoriniCoulomb);
        let mut ldy = LocDyn::<f64>::new();

        let con_a = Constraint::new(
            ConstraintKind::FixPnt,
            BodyHandle(0),
            Some(BodyHandle(1)),
            material,
            na::Point3::origin(),
            na::Matrix3::identity(),
            1.0,
            0.0,
        );
        let a = ldy.insert(con_a, |_, _| true);
        let con_b = Constraint::new(
            ConstraintKind::FixPnt,
            BodyHandle(1),
            None,
            material,
            na::Point3::origin(),
            na::Matrix3::identity(),
            1.0,
            0.0,
        );
        let b = ldy.insert(con_b, |_, _| true);

        ldy.diab_mut(a).w = Local3x3::identity();
        ldy.diab_mut(a).b = Local::new(1.0, 0.0, 0.0);
        ldy.diab_mut(b).w = Local3x3::identity();
        ldy.diab_mut(b).b = Local::new(0.5, 0.0, 0.0);

        for &edge in &ldy.diab(a).adj.clone() {
            ldy.offbs[edge.0].w = Local3x3::identity() * 0.1;
        }
        for &edge in &ldy.diab(b).adj.clone() {
            ldy.offbs[edge.0].w = Local3x3::identity() * 0.1;
        }

        let mut st = state();
        let iters = SerialBgs::solve(&mut st, &mut ldy, false, 0.01).unwrap();
        assert!(iters >= 1);
        assert!(ldy.constraint(a).velocity.norm() < 1e-6);
        assert!(ldy.constraint(b).velocity.norm() < 1e-6);
    }
}
