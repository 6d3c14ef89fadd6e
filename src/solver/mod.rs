//! Outer solvers: serial BGS (C5), parallel BGS (C6) and the Newton
//! smoothing solver (C7), plus the shared `GaussSeidelState`/`NewtonState`
//! configuration objects (spec §3).

pub mod gmres;
mod newton;
mod parallel_bgs;
mod serial_bgs;

pub use newton::{NewtonSolver, NewtonState};
pub use parallel_bgs::{Band, CommBackend, LocalCommBackend, ParallelBgs, ParallelVariant, ThreadCommBackend};
pub use serial_bgs::SerialBgs;

use na::Real;

use crate::constraint::kernel::ContactKernel;
use crate::error::FailurePolicy;

/// `GAUSS_SEIDEL` solver state (spec §3).
pub struct GaussSeidelState<N: Real> {
    pub eps: N,
    pub maxiter: u32,
    pub kernel_eps: N,
    pub kernel_maxiter: u32,
    pub kernel: ContactKernel,
    pub failure: FailurePolicy,
    pub error_history: Vec<N>,
    pub reverse: bool,
    pub variant: ParallelVariant,
    pub verbose: bool,
}

impl<N: Real> GaussSeidelState<N> {
    pub fn new(eps: N, maxiter: u32, kernel_eps: N, kernel_maxiter: u32) -> Self {
        GaussSeidelState {
            eps,
            maxiter,
            kernel_eps,
            kernel_maxiter,
            kernel: ContactKernel::ProjectedGradient,
            failure: FailurePolicy::Continue,
            error_history: Vec::new(),
            reverse: false,
            variant: ParallelVariant::MidLoop,
            verbose: false,
        }
    }
}
