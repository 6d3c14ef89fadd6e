//! Sparsifier (C4, spec §4.4): prunes redundant contact points the broad
//! phase produced, before they are inserted into `LOCDYN`.

use na::Real;

use crate::constraint::Constraint;

/// Default area-ratio threshold (spec §4.4).
pub fn default_threshold<N: Real>() -> N {
    N::from_subset(&0.01)
}

/// A candidate contact paired with the identity of the geometric objects
/// on each side, used for the topological-adjacency test (spec §4.4: "the
/// two local geometric objects are topologically adjacent").
pub struct Candidate<'a, N: Real> {
    pub con: &'a Constraint<N>,
    pub geom_master: usize,
    pub geom_slave: usize,
}

/// Decide whether `new` should be dropped in favour of `existing` (spec
/// §4.4): both must act on the same pair of bodies, `new`'s area must be
/// below `threshold * existing.area`, and the two geometric objects must
/// be topologically adjacent.
pub fn should_drop<N: Real>(
    new: &Candidate<N>,
    existing: &Candidate<N>,
    threshold: N,
    topologically_adjacent: impl FnOnce(usize, usize) -> bool,
) -> bool {
    let same_pair = (new.con.master == existing.con.master && new.con.slave == existing.con.slave)
        || (Some(new.con.master) == existing.con.slave && new.con.slave == Some(existing.con.master));

    same_pair
        && new.con.area < threshold * existing.con.area
        && topologically_adjacent(new.geom_master, new.geom_slave)
}

/// Runs the sparsifier over a batch of fresh candidates against the
/// already-accepted contacts, returning the indices of `candidates` kept
/// and recording how many were dropped (spec §4.4 "diagnostics").
pub fn sparsify<N: Real>(
    candidates: &[Candidate<N>],
    accepted: &[Candidate<N>],
    threshold: N,
    mut topologically_adjacent: impl FnMut(usize, usize) -> bool,
) -> (Vec<usize>, usize) {
    let mut kept = Vec::with_capacity(candidates.len());
    let mut dropped = 0;

    'candidate: for (i, cand) in candidates.iter().enumerate() {
        for existing in accepted.iter().chain(candidates[..i].iter()) {
            if should_drop(cand, existing, threshold, |a, b| topologically_adjacent(a, b)) {
                dropped += 1;
                continue 'candidate;
            }
        }
        kept.push(i);
    }

    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodyHandle;
    use crate::constraint::{ConstraintKind, SurfaceMaterial, SurfaceModel};

    fn con(master: BodyHandle, slave: Option<BodyHandle>, area: f64) -> Constraint<f64> {
        let material = SurfaceMaterial::new(0.3, 0.0, 0.0, 0.01, SurfaceModel::SignoriniCoulomb);
        Constraint::new(
            ConstraintKind::Contact,
            master,
            slave,
            material,
            na::Point3::origin(),
            na::Matrix3::identity(),
            area,
            0.0,
        )
    }

    #[test]
    fn small_adjacent_contact_is_dropped() {
        let big = con(BodyHandle(0), Some(BodyHandle(1)), 1.0);
        let small = con(BodyHandle(0), Some(BodyHandle(1)), 0.001);
        let new = Candidate { con: &small, geom_master: 0, geom_slave: 1 };
        let existing = Candidate { con: &big, geom_master: 0, geom_slave: 1 };
        assert!(should_drop(&new, &existing, default_threshold(), |_, _| true));
    }

    #[test]
    fn unrelated_body_pair_is_never_dropped() {
        let big = con(BodyHandle(0), Some(BodyHandle(1)), 1.0);
        let small = con(BodyHandle(2), Some(BodyHandle(3)), 0.001);
        let new = Candidate { con: &small, geom_master: 0, geom_slave: 1 };
        let existing = Candidate { con: &big, geom_master: 0, geom_slave: 1 };
        assert!(!should_drop(&new, &existing, default_threshold(), |_, _| true));
    }

    #[test]
    fn non_adjacent_geometry_is_kept_even_if_small() {
        let big = con(BodyHandle(0), Some(BodyHandle(1)), 1.0);
        let small = con(BodyHandle(0), Some(BodyHandle(1)), 0.001);
        let new = Candidate { con: &small, geom_master: 0, geom_slave: 1 };
        let existing = Candidate { con: &big, geom_master: 0, geom_slave: 1 };
        assert!(!should_drop(&new, &existing, default_threshold(), |_, _| false));
    }

    #[test]
    fn sparsify_drops_redundant_candidates_against_accepted_set() {
        let accepted_con = con(BodyHandle(0), Some(BodyHandle(1)), 1.0);
        let accepted = vec![Candidate { con: &accepted_con, geom_master: 0, geom_slave: 1 }];

        let cand_a = con(BodyHandle(0), Some(BodyHandle(1)), 0.0001);
        let cand_b = con(BodyHandle(4), Some(BodyHandle(5)), 1.0);
        let candidates = vec![
            Candidate { con: &cand_a, geom_master: 0, geom_slave: 1 },
            Candidate { con: &cand_b, geom_master: 2, geom_slave: 3 },
        ];

        let (kept, dropped) = sparsify(&candidates, &accepted, default_threshold(), |_, _| true);
        assert_eq!(dropped, 1);
        assert_eq!(kept, vec![1]);
    }
}
