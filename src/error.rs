//! Error taxonomy (spec §7): kernel non-convergence/failure, global
//! non-convergence, and the handful of deliberately-unsupported modes.

use std::error::Error;
use std::fmt;

use crate::locdyn::DiabId;

/// The error codes exposed to front-ends (spec §6 "Error codes").
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ErrorCode {
    /// No error.
    Ok,
    /// Outer iteration cap reached without satisfying the merit target.
    Diverged,
    /// A per-constraint kernel exceeded its inner iteration cap.
    DiagonalDiverged,
    /// A per-constraint kernel hit a singular system or produced NaN.
    DiagonalFailed,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCode::Ok => "OK",
            ErrorCode::Diverged => "DIVERGED",
            ErrorCode::DiagonalDiverged => "DIAGONAL_DIVERGED",
            ErrorCode::DiagonalFailed => "DIAGONAL_FAILED",
        };
        f.write_str(s)
    }
}

/// A kernel-level failure (C1), surfaced at the nearest sweep boundary
/// rather than inside the tight inner loop (spec §7 "Propagation").
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum KernelError {
    /// The kernel's inner iteration cap was exceeded.
    Diverged,
    /// The kernel hit a singular linear system or produced NaN.
    Failed,
}

impl From<KernelError> for ErrorCode {
    fn from(e: KernelError) -> Self {
        match e {
            KernelError::Diverged => ErrorCode::DiagonalDiverged,
            KernelError::Failed => ErrorCode::DiagonalFailed,
        }
    }
}

/// An error produced by one of the outer solvers, carrying enough context
/// to be reported or handed to a `FailurePolicy::Callback`.
#[derive(Debug)]
pub struct SolverError {
    pub code: ErrorCode,
    /// The diagonal block that triggered the error, if any (kernel errors
    /// always have one; a global `Diverged` does not point at a single
    /// constraint).
    pub dia: Option<DiabId>,
    pub message: String,
}

impl SolverError {
    pub fn new(code: ErrorCode, dia: Option<DiabId>, message: impl Into<String>) -> Self {
        SolverError {
            code,
            dia,
            message: message.into(),
        }
    }

    pub fn kernel(dia: DiabId, err: KernelError) -> Self {
        let code = ErrorCode::from(err);
        SolverError::new(code, Some(dia), format!("kernel {} at {:?}", code, dia))
    }

    pub fn diverged(message: impl Into<String>) -> Self {
        SolverError::new(ErrorCode::Diverged, None, message)
    }

    /// The "unsupported mode" class of spec §7: RIGLNK inside Newton is
    /// deliberately unimplemented and must raise rather than silently
    /// degrade (spec §9 Open Questions).
    pub fn unsupported(message: impl Into<String>) -> Self {
        SolverError::new(ErrorCode::DiagonalFailed, None, message)
    }
}

impl fmt::Display for SolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl Error for SolverError {}

/// What happens when a kernel or outer solver fails (spec §3, §7).
pub enum FailurePolicy {
    /// Restore the previous reaction and let the sweep continue.
    Continue,
    /// Raise the error at the next safe point.
    Exit,
    /// Hand the error to an external routine instead of raising.
    Callback(Box<dyn FnMut(&SolverError) + Send>),
}

impl fmt::Debug for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Continue => f.write_str("Continue"),
            FailurePolicy::Exit => f.write_str("Exit"),
            FailurePolicy::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kernel_error_maps_to_diagonal_codes() {
        assert_eq!(ErrorCode::from(KernelError::Diverged), ErrorCode::DiagonalDiverged);
        assert_eq!(ErrorCode::from(KernelError::Failed), ErrorCode::DiagonalFailed);
    }

    #[test]
    fn solver_error_display_includes_code() {
        let err = SolverError::kernel(DiabId(3), KernelError::Failed);
        assert!(err.to_string().starts_with("DIAGONAL_FAILED"));
    }

    #[test]
    fn failure_policy_defaults_to_continue() {
        assert!(matches!(FailurePolicy::default(), FailurePolicy::Continue));
    }
}
