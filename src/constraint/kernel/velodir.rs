//! VELODIR kernel (spec §4.1): prescribed normal velocity `U_n = z`
//! sampled from the time-series reference stored in `Constraint::scratch`.

use na::Real;

use crate::constraint::{Constraint, Scratch};
use crate::error::KernelError;
use crate::math::Local;

use super::{KernelInput, KernelOutput};

pub fn velodir<N: Real + Float>(
    con: &mut Constraint<N>,
    input: &KernelInput<N>,
) -> Result<KernelOutput<N>, KernelError> {
    let z = match con.scratch {
        Scratch::VeloDir(z) => z,
        _ => return Err(KernelError::Failed),
    };

    let w_nn = input.w[(2, 2)];
    if w_nn.abs() < N::default_epsilon() {
        return Err(KernelError::Failed);
    }

    let b_n = input.b[2];
    let r_n = (z - b_n) / w_nn;

    if r_n.is_nan() {
        return Err(KernelError::Failed);
    }

    let r = Local::new(N::zero(), N::zero(), r_n);
    let u = input.b + input.w * r;
    Ok(KernelOutput { u, r, iterations: 1 })
}
