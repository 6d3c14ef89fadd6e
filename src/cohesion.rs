//! Cohesion hook (C8, spec §4.8), grounded line-for-line on
//! `original_source/ldy.c`'s `variables_change_begin`/`variables_change_end`:
//! a forward change of variables turns a cohesive contact into a standard
//! cone LCP by shifting the normal reaction by `c = cohesion * area`, and
//! a backward change restores it while testing for decohesion.

use na::Real;

use crate::constraint::{ConState, ConstraintKind, SurfaceModel};
use crate::locdyn::LocDyn;

/// Forward change (spec §4.8 "Forward change"): for each cohesive
/// CONTACT, `R[2] += c` and `c * W[:,2]` is subtracted from `B`, both on
/// the diagonal and on every neighbour sharing an off-diagonal block.
pub fn forward<N: Real>(ldy: &mut LocDyn<N>) {
    let ids: Vec<_> = ldy.iter_ids().collect();

    for id in &ids {
        let con_idx = ldy.dias[id.0].con;
        let (kind, model, cohesive, c) = {
            let con = &ldy.constraints[con_idx];
            (
                con.kind,
                con.material.model,
                con.is_cohesive(),
                con.material.cohesion * con.area,
            )
        };
        if kind != ConstraintKind::Contact || model == SurfaceModel::SpringDashpot {
            continue;
        }

        if cohesive {
            let w = ldy.dias[id.0].w;
            ldy.constraints[con_idx].reaction[2] += c;
            ldy.dias[id.0].b[0] -= w[(0, 2)] * c;
            ldy.dias[id.0].b[1] -= w[(1, 2)] * c;
            ldy.dias[id.0].b[2] -= w[(2, 2)] * c;
        }

        let edges = ldy.dias[id.0].adj.clone();
        for edge in edges {
            let neighbour = ldy.offb(edge).neighbour;
            let neigh_con = ldy.dias[neighbour.0].con;
            let neigh_cohesive = ldy.constraints[neigh_con].is_cohesive();
            if neigh_cohesive {
                let nc = {
                    let con = &ldy.constraints[neigh_con];
                    con.material.cohesion * con.area
                };
                let w = ldy.offb(edge).w;
                ldy.dias[id.0].b[0] -= w[(0, 2)] * nc;
                ldy.dias[id.0].b[1] -= w[(1, 2)] * nc;
                ldy.dias[id.0].b[2] -= w[(2, 2)] * nc;
            }
        }
    }
}

/// Backward change (spec §4.8 "Backward change"): restore `R[2] -= c`,
/// then test for mode-I / mode-II decohesion.
pub fn backward<N: Real>(ldy: &mut LocDyn<N>) {
    let ids: Vec<_> = ldy.iter_ids().collect();

    for id in &ids {
        let con_idx = ldy.dias[id.0].con;
        let con = &mut ldy.constraints[con_idx];
        if con.kind != ConstraintKind::Contact || con.material.model == SurfaceModel::SpringDashpot {
            continue;
        }
        if !con.is_cohesive() {
            continue;
        }

        let c = con.material.cohesion * con.area;
        let f = con.material.friction;
        let eps = con.material.cohesion_release_eps * c;
        let r = con.reaction;

        let mode_i = r[2] < eps;
        let tangential = (r[0] * r[0] + r[1] * r[1]).sqrt();
        let mode_ii = tangential + eps >= f * r[2];

        if mode_i || mode_ii {
            con.state.remove(ConState::COHESIVE);
            con.material.cohesion = N::zero();
        }

        con.reaction[2] -= c;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodyHandle;
    use crate::constraint::{Constraint, SurfaceMaterial};
    use crate::locdyn::LocDyn;

    fn cohesive_contact(cohesion: f64) -> Constraint<f64> {
        let material = SurfaceMaterial::new(0.3, 0.0, cohesion, 0.01, SurfaceModel::SignoriniCoulomb);
        let mut con = Constraint::new(
            ConstraintKind::Contact,
            BodyHandle(0),
            Some(BodyHandle(1)),
            material,
            na::Point3::origin(),
            na::Matrix3::identity(),
            1.0,
            0.0,
        );
        con.state.insert(ConState::COHESIVE);
        con
    }

    #[test]
    fn forward_shifts_normal_reaction_by_cohesion_times_area() {
        let mut ldy = LocDyn::<f64>::new();
        let id = ldy.insert(cohesive_contact(2.0), |_, _| true);
        ldy.dias[id.0].w = na::Matrix3::identity();

        forward(&mut ldy);

        assert!((ldy.constraint(id).reaction[2] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn forward_and_backward_round_trip_without_decohesion() {
        let mut ldy = LocDyn::<f64>::new();
        let id = ldy.insert(cohesive_contact(2.0), |_, _| true);
        ldy.dias[id.0].w = na::Matrix3::identity();

        forward(&mut ldy);
        ldy.constraint_mut(id).reaction[2] = 2.0 + 5.0; // well inside mode-I/II thresholds
        backward(&mut ldy);

        assert!((ldy.constraint(id).reaction[2] - 5.0).abs() < 1e-12);
        assert!(ldy.constraint(id).is_cohesive());
    }

    #[test]
    fn backward_releases_cohesion_on_mode_i_violation() {
        let mut ldy = LocDyn::<f64>::new();
        let id = ldy.insert(cohesive_contact(2.0), |_, _| true);
        ldy.dias[id.0].w = na::Matrix3::identity();

        forward(&mut ldy);
        // Leave the shifted normal reaction near zero: after the forward
        // shift by `c = 2.0` it sits below `eps * c`, tripping mode-I.
        ldy.constraint_mut(id).reaction[2] = 0.0;
        backward(&mut ldy);

        assert!(!ldy.constraint(id).is_cohesive());
        assert_eq!(ldy.constraint(id).material.cohesion, 0.0);
    }

    #[test]
    fn non_contact_kinds_are_left_untouched() {
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
        forward(&mut ldy);
        assert_eq!(ldy.constraint(id).reaction[2], 0.0);
    }
}
