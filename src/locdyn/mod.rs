//! Local dynamics graph (C2, spec §3 "Local dynamics graph (LOCDYN)" and
//! §4.2). Owns the `DIAB`/`OFFB` pools with stable `slab`-backed indices
//! rather than raw pointers (spec §9 "Off-diagonal adjacency graph"),
//! grounded on the teacher's `Slab<Box<JointConstraint<N>>>` storage
//! pattern in `solver/moreau_jean_solver.rs`.

mod assembly;

pub use assembly::{JacobianProvider, UpdateKind};

use na::Real;
use slab::Slab;

use crate::body::BodyHandle;
use crate::constraint::Constraint;
use crate::math::{Local, Local3x3};

/// Stable index of a diagonal block, handed out by `LOCDYN::insert`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct DiabId(pub usize);

/// Stable index of an off-diagonal block within `LOCDYN::offblocks`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct OffbId(pub usize);

/// Off-diagonal block (spec §3 "Off-diagonal block (OFFB)").
pub struct Offb<N: Real> {
    pub w: Local3x3<N>,
    /// Body through which the interaction exists.
    pub through: BodyHandle,
    /// The neighbour diagonal block this edge points at.
    pub neighbour: DiabId,
    /// The owning diagonal block (the row this edge lives on).
    pub owner: DiabId,
    /// The mirror block supplying `W^T` when this block reuses it instead
    /// of assembling its own (spec §4.2 step 5 "symmetric-copy tagging").
    pub symmetric_partner: Option<OffbId>,
}

/// Diagonal block (spec §3 "Diagonal block (DIAB)").
pub struct Diab<N: Real> {
    pub con: usize,
    pub w: Local3x3<N>,
    pub a: Local3x3<N>,
    pub b: Local<N>,
    pub rho: N,
    /// Off-diagonal edges owned by this row.
    pub adj: Vec<OffbId>,
    /// External mirrors of `adj`, populated under distributed execution.
    pub adjext: Vec<OffbId>,
    pub rowupdate: bool,
}

impl<N: Real> Diab<N> {
    fn new(con: usize) -> Self {
        Diab {
            con,
            w: Local3x3::zeros(),
            a: Local3x3::zeros(),
            b: Local::zeros(),
            rho: N::one(),
            adj: Vec::new(),
            adjext: Vec::new(),
            rowupdate: true,
        }
    }
}

/// The local dynamics graph itself (spec §3 "Local dynamics graph
/// (LOCDYN)"): a pool of `Diab` nodes plus the `Offb` edges between them,
/// and the constraints they belong to.
pub struct LocDyn<N: Real> {
    pub(crate) dias: Slab<Diab<N>>,
    pub(crate) offbs: Slab<Offb<N>>,
    pub(crate) constraints: Slab<Constraint<N>>,
    /// `dia.con` maps into `constraints`; this maps the other way, one
    /// `DiabId` per constraint slot (constraints without a row yet map to
    /// `None`, e.g. freshly inserted but not yet assembled).
    con_to_dia: Vec<Option<DiabId>>,
    pub modified: bool,
    pub free_energy: N,
}

impl<N: Real> LocDyn<N> {
    pub fn new() -> Self {
        LocDyn {
            dias: Slab::new(),
            offbs: Slab::new(),
            constraints: Slab::new(),
            con_to_dia: Vec::new(),
            modified: false,
            free_energy: N::zero(),
        }
    }

    pub fn diab(&self, id: DiabId) -> &Diab<N> {
        &self.dias[id.0]
    }

    pub fn diab_mut(&mut self, id: DiabId) -> &mut Diab<N> {
        &mut self.dias[id.0]
    }

    pub fn offb(&self, id: OffbId) -> &Offb<N> {
        &self.offbs[id.0]
    }

    pub fn constraint(&self, dia: DiabId) -> &Constraint<N> {
        &self.constraints[self.dias[dia.0].con]
    }

    pub fn constraint_mut(&mut self, dia: DiabId) -> &mut Constraint<N> {
        &mut self.constraints[self.dias[dia.0].con]
    }

    pub fn iter_ids(&self) -> impl Iterator<Item = DiabId> + '_ {
        self.dias.iter().map(|(i, _)| DiabId(i))
    }

    pub fn len(&self) -> usize {
        self.dias.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dias.is_empty()
    }

    /// `LOCDYN_Insert` (spec §4.2): allocate a diagonal row for `con`,
    /// linking off-diagonal blocks to every existing constraint sharing a
    /// body with `con` whenever the two constraints can interact.
    ///
    /// The adjacency test (`adjacent`) is supplied by the caller: explicit
    /// FEM requires node/element adjacency data this crate does not own;
    /// every other body kind admits all pairs (spec §4.2 step 1).
    pub fn insert(
        &mut self,
        con: Constraint<N>,
        mut adjacent: impl FnMut(&Constraint<N>, &Constraint<N>) -> bool,
    ) -> DiabId {
        let con_idx = self.constraints.insert(con);
        let dia_idx = self.dias.insert(Diab::new(con_idx));
        let dia_id = DiabId(dia_idx);

        if self.con_to_dia.len() <= con_idx {
            self.con_to_dia.resize(con_idx + 1, None);
        }
        self.con_to_dia[con_idx] = Some(dia_id);

        let existing: Vec<DiabId> = self.iter_ids().filter(|id| *id != dia_id).collect();

        for other in existing {
            let through = {
                let con_a = self.constraint(dia_id);
                let con_b = self.constraint(other);
                let hit = shared_body(con_a, con_b);
                if hit.is_none() {
                    continue;
                }
                if !adjacent(con_a, con_b) {
                    continue;
                }
                hit.unwrap()
            };
            self.link(dia_id, other, through);
        }

        self.modified = true;
        dia_id
    }

    /// Create a mirrored pair of off-diagonal edges between `a` and `b`
    /// through body `through` (spec §3 LOCDYN invariant 2: "if `W_ij != 0`
    /// then there exists a mirror block representing `W_ji`").
    fn link(&mut self, a: DiabId, b: DiabId, through: BodyHandle) {
        let edge_ab = self.offbs.insert(Offb {
            w: Local3x3::zeros(),
            through,
            neighbour: b,
            owner: a,
            symmetric_partner: None,
        });
        let edge_ba = self.offbs.insert(Offb {
            w: Local3x3::zeros(),
            through,
            neighbour: a,
            owner: b,
            symmetric_partner: Some(OffbId(edge_ab)),
        });
        self.offbs[edge_ab].symmetric_partner = Some(OffbId(edge_ba));

        self.dias[a.0].adj.push(OffbId(edge_ab));
        self.dias[b.0].adj.push(OffbId(edge_ba));
    }

    /// `LOCDYN_Remove` (spec §4.2): unlink and deallocate all OFFBs
    /// pointing at `dia`, including external ones.
    pub fn remove(&mut self, dia: DiabId) {
        let removed_edges: Vec<OffbId> = self.dias[dia.0]
            .adj
            .iter()
            .chain(self.dias[dia.0].adjext.iter())
            .cloned()
            .collect();

        for edge in removed_edges {
            let neighbour = self.offbs[edge.0].neighbour;
            if let Some(nb) = self.dias.get_mut(neighbour.0) {
                nb.adj.retain(|e| e.0 != edge.0);
                if let Some(partner) = self.offbs[edge.0].symmetric_partner {
                    nb.adj.retain(|e| e.0 != partner.0);
                    self.offbs.remove(partner.0);
                }
            }
            if self.offbs.contains(edge.0) {
                self.offbs.remove(edge.0);
            }
        }

        let con_idx = self.dias[dia.0].con;
        self.con_to_dia[con_idx] = None;
        self.dias.remove(dia.0);
        self.constraints.remove(con_idx);
        self.modified = true;
    }
}

impl<N: Real> Default for LocDyn<N> {
    fn default() -> Self {
        Self::new()
    }
}

fn shared_body<N: Real>(a: &Constraint<N>, b: &Constraint<N>) -> Option<BodyHandle> {
    let a_bodies = [Some(a.master), a.slave];
    let b_bodies = [Some(b.master), b.slave];
    for x in a_bodies.iter().flatten() {
        for y in b_bodies.iter().flatten() {
            if x == y {
                return Some(*x);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::{ConstraintKind, SurfaceMaterial, SurfaceModel};

    fn contact(master: BodyHandle, slave: Option<BodyHandle>) -> Constraint<f64> {
        let material = SurfaceMaterial::new(0.3, 0.0, 0.0, 0.01, SurfaceModel::SignoriniCoulomb);
        Constraint::new(
            ConstraintKind::Contact,
            master,
            slave,
            material,
            na::Point3::origin(),
            na::Matrix3::identity(),
            1.0,
            0.0,
        )
    }

    #[test]
    fn insert_links_constraints_sharing_a_body() {
        let mut ldy = LocDyn::<f64>::new();
        let a = ldy.insert(contact(BodyHandle(0), Some(BodyHandle(1))), |_, _| true);
        let b = ldy.insert(contact(BodyHandle(1), Some(BodyHandle(2))), |_, _| true);

        assert_eq!(ldy.len(), 2);
        assert_eq!(ldy.diab(a).adj.len(), 1);
        assert_eq!(ldy.diab(b).adj.len(), 1);
    }

    #[test]
    fn insert_skips_unrelated_constraints() {
        let mut ldy = LocDyn::<f64>::new();
        ldy.insert(contact(BodyHandle(0), None), |_, _| true);
        let b = ldy.insert(contact(BodyHandle(1), None), |_, _| true);
        assert!(ldy.diab(b).adj.is_empty());
    }

    #[test]
    fn insert_respects_adjacency_predicate() {
        let mut ldy = LocDyn::<f64>::new();
        ldy.insert(contact(BodyHandle(0), Some(BodyHandle(1))), |_, _| true);
        let b = ldy.insert(contact(BodyHandle(1), Some(BodyHandle(2))), |_, _| false);
        assert!(ldy.diab(b).adj.is_empty());
    }

    #[test]
    fn remove_unlinks_neighbours() {
        let mut ldy = LocDyn::<f64>::new();
        let a = ldy.insert(contact(BodyHandle(0), Some(BodyHandle(1))), |_, _| true);
        let b = ldy.insert(contact(BodyHandle(1), Some(BodyHandle(2))), |_, _| true);

        ldy.remove(a);
        assert_eq!(ldy.len(), 1);
        assert!(ldy.diab(b).adj.is_empty());
    }
}
