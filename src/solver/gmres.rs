//! Flexible GMRES inner linear solver, used by the Newton smoothing
//! solver (C7, spec §4.7) to solve `J * dR = -C` each outer step.
//! Grounded on HYPRE's generic GMRES interface
//! (`original_source/ext/krylov/gmres.h`): a fixed Krylov-subspace
//! dimension (`k_dim`), a relative tolerance, modified Gram-Schmidt
//! Arnoldi with Givens rotations tracked incrementally rather than via a
//! full `QR` re-factorisation each step, and right preconditioning
//! through an opaque `apply`/`solve` pair rather than a concrete matrix
//! type, mirroring `hypre_GMRESFunctions`'s function-pointer table.

use na::{DMatrix, DVector, Real};

/// A linear operator: either the system matrix `A` or the preconditioner
/// `T` from spec §4.7 (`HYPRE`'s `Matvec`/`precond` pair).
pub trait LinearOperator<N: Real> {
    fn apply(&self, x: &DVector<N>) -> DVector<N>;
}

/// Right-preconditioned solve: `x` such that `M x ~= b` (`HYPRE`'s
/// `precond`).
pub trait Preconditioner<N: Real> {
    fn solve(&self, b: &DVector<N>) -> DVector<N>;
}

/// No preconditioning (`M = I`).
pub struct Identity;

impl<N: Real> Preconditioner<N> for Identity {
    fn solve(&self, b: &DVector<N>) -> DVector<N> {
        b.clone()
    }
}

pub struct FlexibleGmres<N: Real> {
    /// Krylov subspace dimension before a restart (`k_dim`).
    pub restart: usize,
    pub tol: N,
    pub max_iter: u32,
}

impl<N: Real> FlexibleGmres<N> {
    pub fn new(restart: usize, tol: N, max_iter: u32) -> Self {
        FlexibleGmres { restart, tol, max_iter }
    }

    /// Solves `A x = b` via restarted FGMRES with right preconditioner
    /// `precond`, returning the solution and the number of matvecs spent.
    pub fn solve<A, P>(&self, a: &A, precond: &P, b: &DVector<N>) -> (DVector<N>, u32)
    where
        A: LinearOperator<N>,
        P: Preconditioner<N>,
    {
        let n = b.len();
        let mut x = DVector::zeros(n);
        let b_norm = b.norm().max(N::one());
        let mut total_matvecs = 0u32;

        'restart: loop {
            let r0 = b - a.apply(&x);
            let beta = r0.norm();
            if beta / b_norm < self.tol || total_matvecs >= self.max_iter {
                return (x, total_matvecs);
            }

            let m = self.restart.min(n.max(1));
            let mut v: Vec<DVector<N>> = Vec::with_capacity(m + 1);
            let mut z: Vec<DVector<N>> = Vec::with_capacity(m);
            v.push(r0 / beta);

            let mut h = DMatrix::<N>::zeros(m + 1, m);
            let mut g = DVector::<N>::zeros(m + 1);
            g[0] = beta;
            let mut cs = vec![N::zero(); m];
            let mut sn = vec![N::zero(); m];

            let mut k_used = 0;

            for k in 0..m {
                // Flexible GMRES: precondition per Krylov vector rather
                // than once up front, so `precond` may itself vary
                // between calls (spec §4.7 inner-linear-solve note).
                let z_k = precond.solve(&v[k]);
                let mut w = a.apply(&z_k);
                total_matvecs += 1;
                z.push(z_k);

                for i in 0..=k {
                    h[(i, k)] = w.dot(&v[i]);
                    w -= &v[i] * h[(i, k)];
                }
                let h_next = w.norm();
                h[(k + 1, k)] = h_next;

                for i in 0..k {
                    let (c, s) = (cs[i], sn[i]);
                    let h_ik = h[(i, k)];
                    let h_i1k = h[(i + 1, k)];
                    h[(i, k)] = c * h_ik + s * h_i1k;
                    h[(i + 1, k)] = -s * h_ik + c * h_i1k;
                }

                let denom = (h[(k, k)] * h[(k, k)] + h[(k + 1, k)] * h[(k + 1, k)]).sqrt();
                let (c, s) = if denom > N::zero() {
                    (h[(k, k)] / denom, h[(k + 1, k)] / denom)
                } else {
                    (N::one(), N::zero())
                };
                cs[k] = c;
                sn[k] = s;
                h[(k, k)] = c * h[(k, k)] + s * h[(k + 1, k)];
                h[(k + 1, k)] = N::zero();

                let g_k = g[k];
                g[k] = c * g_k;
                g[k + 1] = -s * g_k;

                k_used = k + 1;

                if h_next > N::zero() {
                    v.push(w / h_next);
                } else {
                    break;
                }

                if g[k + 1].abs() / b_norm < self.tol || total_matvecs >= self.max_iter {
                    break;
                }
            }

            // Back-substitute for the Krylov coefficients, then form
            // `x += sum_i y_i z_i` (flexible variant uses the
            // preconditioned basis `z`, not `v`).
            let mut y = DVector::<N>::zeros(k_used);
            for i in (0..k_used).rev() {
                let mut sum = g[i];
                for j in (i + 1)..k_used {
                    sum -= h[(i, j)] * y[j];
                }
                y[i] = sum / h[(i, i)];
            }
            for i in 0..k_used {
                x += &z[i] * y[i];
            }

            if total_matvecs >= self.max_iter {
                return (x, total_matvecs);
            }
            continue 'restart;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dense(DMatrix<f64>);

    impl LinearOperator<f64> for Dense {
        fn apply(&self, x: &DVector<f64>) -> DVector<f64> {
            &self.0 * x
        }
    }

    #[test]
    fn solves_identity_system_in_one_matvec() {
        let a = Dense(DMatrix::identity(3, 3));
        let b = DVector::from_vec(vec![1.0, 2.0, 3.0]);
        let gmres = FlexibleGmres::new(3, 1e-10, 10);
        let (x, _) = gmres.solve(&a, &Identity, &b);
        assert!((x - b).norm() < 1e-8);
    }

    #[test]
    fn solves_small_spd_system() {
        let a = Dense(DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]));
        let b = DVector::from_vec(vec![1.0, 2.0]);
        let gmres = FlexibleGmres::new(2, 1e-12, 50);
        let (x, _) = gmres.solve(&a, &Identity, &b);
        let residual = &b - &a.0 * &x;
        assert!(residual.norm() < 1e-8);
    }

    struct JacobiPrecond(DVector<f64>);

    impl Preconditioner<f64> for JacobiPrecond {
        fn solve(&self, b: &DVector<f64>) -> DVector<f64> {
            DVector::from_iterator(b.len(), b.iter().zip(self.0.iter()).map(|(v, d)| v / d))
        }
    }

    #[test]
    fn flexible_preconditioner_still_converges() {
        let a = Dense(DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]));
        let b = DVector::from_vec(vec![1.0, 2.0]);
        let precond = JacobiPrecond(DVector::from_vec(vec![4.0, 3.0]));
        let gmres = FlexibleGmres::new(2, 1e-12, 50);
        let (x, _) = gmres.solve(&a, &precond, &b);
        let residual = &b - &a.0 * &x;
        assert!(residual.norm() < 1e-8);
    }
}
