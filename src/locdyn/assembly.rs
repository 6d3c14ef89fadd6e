//! Assembly algorithm (spec §4.2 "Assembly algorithm"): builds `W`, `A`,
//! `B`, `V`, `rho` for every diagonal block and the cross terms `W_ij` for
//! every off-diagonal edge, accumulating the free energy (spec §4.2
//! "Free energy") used as the merit denominator (C3).

use na::Real;

use crate::body::{Body, BodyHandle, BodySet, Jacobian};
use crate::constraint::{Constraint, ConstraintKind};
use crate::math::{Local, Local3x3};

use super::{DiabId, LocDyn, OffbId};

/// `update_kind` (spec §4.2 "update_begin"): controls how much of the row
/// gets rebuilt.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum UpdateKind {
    /// Body-space solver: nothing to rebuild.
    Nothing,
    /// Penalty solver: `W`/`A` only.
    Penalty,
    /// Gauss-Seidel / Newton: everything.
    All,
}

/// Jacobians callback: given a constraint and one of its master/slave
/// handles, returns the `H` operator mapping that body's generalized
/// velocities into `con`'s own local contact frame (spec §9 "Body
/// handles"). Takes the constraint rather than just the body because two
/// constraints sharing a body generally disagree about the local frame
/// (each has its own `point`/`base`), so `H` is a property of the
/// (constraint, body) pair, not of the body alone -- this matters most for
/// the off-diagonal cross term `W_ij = H_i * M^{-1} * H_j^T`, where `H_i`
/// and `H_j` must come from `i` and `j`'s own frames respectively.
pub trait JacobianProvider<N: Real> {
    fn jacobian(&self, con: &Constraint<N>, body: BodyHandle) -> Jacobian<N>;
    fn free_velocity(&self, body: BodyHandle) -> Vec<N>;
    fn velocity(&self, body: BodyHandle) -> Vec<N>;
}

impl<N: Real> LocDyn<N> {
    /// `LOCDYN_Update_Begin` (spec §4.2): rebuild `W`/`A`, and depending on
    /// `kind`, `V`/`B` and the off-diagonal cross blocks.
    pub fn update_begin<J: JacobianProvider<N>>(
        &mut self,
        kind: UpdateKind,
        bodies: &BodySet<N>,
        jac: &J,
        step: N,
    ) {
        if kind == UpdateKind::Nothing {
            return;
        }

        self.free_energy = N::zero();

        let ids: Vec<DiabId> = self.iter_ids().collect();
        for id in &ids {
            self.assemble_row(*id, bodies, jac, step, kind);
        }

        if kind == UpdateKind::All {
            self.assemble_off_diagonal(&ids, bodies, jac, step);
            self.accumulate_free_energy(&ids);
        }
    }

    /// `LOCDYN_Update_End` (spec §4.2): run the cohesion backward change
    /// and mark the graph unchanged.
    pub fn update_end(&mut self, kind: UpdateKind) {
        if kind == UpdateKind::All {
            crate::cohesion::backward(self);
        }
        self.modified = false;
    }

    fn assemble_row<J: JacobianProvider<N>>(
        &mut self,
        id: DiabId,
        bodies: &BodySet<N>,
        jac: &J,
        step: N,
        kind: UpdateKind,
    ) {
        let con_idx = self.dias[id.0].con;
        let con = self.constraints[con_idx].clone();
        let (master, slave, is_self) = (con.master, con.slave, con.slave == Some(con.master));

        let needs_update = {
            let body_changed = |h: BodyHandle| {
                bodies
                    .get(h)
                    .map(|b| b.configuration_changed() || b.kind().always_needs_row_update())
                    .unwrap_or(true)
            };
            body_changed(master) || slave.map(body_changed).unwrap_or(false)
        };

        if !needs_update && !self.dias[id.0].rowupdate {
            return;
        }

        let h_m = jac.jacobian(&con, master);
        let h_s = slave.map(|s| jac.jacobian(&con, s));

        let w = if is_self {
            assemble_self_w(&h_m, master, bodies, step)
        } else {
            let mut w = assemble_diag_term(&h_m, master, bodies, step);
            if let (Some(h_s), Some(s)) = (&h_s, slave) {
                w += assemble_diag_term(h_s, s, bodies, step);
            }
            w
        };

        self.dias[id.0].w = w;
        self.dias[id.0].a = w.try_inverse().unwrap_or_else(Local3x3::identity);
        self.dias[id.0].rowupdate = true;

        if kind == UpdateKind::All {
            let v_m = to_local(&h_m, &jac.velocity(master));
            let free_m = to_local(&h_m, &jac.free_velocity(master));
            let (v, free) = if let (Some(h_s), Some(s)) = (&h_s, slave) {
                let v_s = to_local(h_s, &jac.velocity(s));
                let free_s = to_local(h_s, &jac.free_velocity(s));
                (v_m - v_s, free_m - free_s)
            } else {
                (v_m, free_m)
            };

            self.constraints[con_idx].previous_velocity = v;
            self.dias[id.0].b = free;
        }

        self.dias[id.0].rho = {
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
    }

    fn assemble_off_diagonal<J: JacobianProvider<N>>(
        &mut self,
        ids: &[DiabId],
        bodies: &BodySet<N>,
        jac: &J,
        step: N,
    ) {
        for &id in ids {
            let edges: Vec<OffbId> = self.dias[id.0].adj.clone();
            for edge in edges {
                // Only assemble the forward direction; its mirror reuses
                // the transpose (spec §4.2 step 5 "symmetric-copy tagging").
                let partner = self.offbs[edge.0].symmetric_partner;
                let already_done = partner
                    .map(|p| p.0 < edge.0) // lower-indexed edge assembles first.
                    .unwrap_or(false);
                if already_done {
                    let w = self.offbs[partner.unwrap().0].w.transpose();
                    self.offbs[edge.0].w = w;
                    continue;
                }

                let through = self.offbs[edge.0].through;
                let neighbour = self.offbs[edge.0].neighbour;

                let owner_con = self.constraints[self.dias[id.0].con].clone();
                let neighbour_con = self.constraints[self.dias[neighbour.0].con].clone();

                let h_i = jac.jacobian(&owner_con, through);
                let h_j = jac.jacobian(&neighbour_con, through);
                self.offbs[edge.0].w = assemble_cross_term(&h_i, &h_j, through, bodies, step);
            }
        }
    }

    fn accumulate_free_energy(&mut self, ids: &[DiabId]) {
        let mut energy = N::zero();
        for &id in ids {
            let con_idx = self.dias[id.0].con;
            let con = &self.constraints[con_idx];
            if con.kind == ConstraintKind::Contact && con.is_open() {
                continue;
            }
            let dia = &self.dias[id.0];
            let ab = dia.a * dia.b;
            energy += ab.dot(&dia.b) * N::from_subset(&0.5);
        }
        self.free_energy = energy;
    }
}

fn to_local<N: Real>(h: &Jacobian<N>, v: &[N]) -> Local<N> {
    h.apply(v)
}

/// `h * M^{-1} * h^T`, scaled by the step, for a single body's
/// contribution to the diagonal Delassus block (spec §4.2 step 3).
fn assemble_diag_term<N: Real>(h: &Jacobian<N>, body: BodyHandle, bodies: &BodySet<N>, step: N) -> Local3x3<N> {
    let ndofs = match bodies.get(body) {
        Some(b) => b.ndofs(),
        None => return Local3x3::zeros(),
    };
    let mut w = Local3x3::zeros();
    for col in 0..3 {
        let mut e = vec![N::zero(); ndofs];
        for k in 0..ndofs {
            e[k] = h.rows[col * ndofs + k];
        }
        let minv_col = bodies.get(body).map(|b| b.apply_inv_mass(&e)).unwrap_or_else(|| vec![N::zero(); ndofs]);
        let result = h.apply(&minv_col);
        for row in 0..3 {
            w[(row, col)] = result[row] * step;
        }
    }
    w
}

/// Cross term `h_i * M^{-1}_bod * h_j^T` for a shared body (spec §4.2
/// step 5).
fn assemble_cross_term<N: Real>(
    h_i: &Jacobian<N>,
    h_j: &Jacobian<N>,
    body: BodyHandle,
    bodies: &BodySet<N>,
    step: N,
) -> Local3x3<N> {
    let ndofs = match bodies.get(body) {
        Some(b) => b.ndofs(),
        None => return Local3x3::zeros(),
    };
    let mut w = Local3x3::zeros();
    for col in 0..3 {
        let mut e = vec![N::zero(); ndofs];
        for k in 0..ndofs {
            e[k] = h_j.rows[col * ndofs + k];
        }
        let minv_col = bodies.get(body).map(|b| b.apply_inv_mass(&e)).unwrap_or_else(|| vec![N::zero(); ndofs]);
        let result = h_i.apply(&minv_col);
        for row in 0..3 {
            w[(row, col)] = result[row] * step;
        }
    }
    w
}

/// Self-contact: `H = H_m - H_s` collapses into a single combined
/// Jacobian (spec §4.2 step 1/3).
fn assemble_self_w<N: Real>(h: &Jacobian<N>, body: BodyHandle, bodies: &BodySet<N>, step: N) -> Local3x3<N> {
    assemble_diag_term(h, body, bodies, step)
}
