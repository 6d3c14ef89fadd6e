//! FIXPNT / GLUE kernel (spec §4.1): solve `W.R = -V-B` (dynamic) or `-B`
//! (static) via a symmetric solve, then set `U` from the residual.

use na::Real;

use crate::constraint::Constraint;
use crate::error::KernelError;

use super::{KernelInput, KernelOutput};

pub fn fixpnt<N: Real + Float>(
    con: &mut Constraint<N>,
    input: &KernelInput<N>,
) -> Result<KernelOutput<N>, KernelError> {
    let rhs = if input.dynamic {
        -(con.previous_velocity + input.b)
    } else {
        -input.b
    };

    let r = match input.w.cholesky() {
        Some(chol) => chol.solve(&rhs),
        None => return Err(KernelError::Failed),
    };

    if r.iter().any(|c| c.is_nan()) {
        return Err(KernelError::Failed);
    }

    let u = input.b + input.w * r;
    Ok(KernelOutput { u, r, iterations: 1 })
}
