//! FIXDIR kernel (spec §4.1): only the normal row participates.

use na::Real;

use crate::constraint::Constraint;
use crate::error::KernelError;
use crate::math::Local;

use super::{KernelInput, KernelOutput};

pub fn fixdir<N: Real + Float>(
    con: &mut Constraint<N>,
    input: &KernelInput<N>,
) -> Result<KernelOutput<N>, KernelError> {
    let w_nn = input.w[(2, 2)];
    if w_nn.abs() < N::default_epsilon() {
        return Err(KernelError::Failed);
    }

    let v_n = con.previous_velocity[2];
    let b_n = input.b[2];

    let r_n = if input.dynamic {
        -(v_n + b_n) / w_nn
    } else {
        -b_n / w_nn
    };

    if r_n.is_nan() {
        return Err(KernelError::Failed);
    }

    let r = Local::new(N::zero(), N::zero(), r_n);
    let u = input.b + input.w * r;
    Ok(KernelOutput { u, r, iterations: 1 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::BodyHandle;
    use crate::constraint::{ConstraintKind, SurfaceMaterial, SurfaceModel};
    use crate::math::Local3x3;

    #[test]
    fn normal_velocity_is_driven_to_zero() {
        let material = SurfaceMaterial::new(0.0, 0.0, 0.0, 0.01, SurfaceModel::SignoriniCoulomb);
        let mut con = Constraint::new(
            ConstraintKind::FixDir,
            BodyHandle(0),
            None,
            material,
            na::Point3::origin(),
            na::Matrix3::identity(),
            1.0,
            0.0,
        );
        let w = Local3x3::identity();
        let input = KernelInput {
            dynamic: false,
            eps: 1e-8,
            maxiter: 1,
            step: 0.01,
            w: &w,
            rho: 1.0,
            b: Local::new(0.0, 0.0, 4.0),
        };
        let out = fixdir(&mut con, &input).unwrap();
        assert!(out.u[2].abs() < 1e-10);
        assert_eq!(out.r[0], 0.0);
        assert_eq!(out.r[1], 0.0);
    }
}
