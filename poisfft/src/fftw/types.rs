//! FFTW plan handles and process-wide state.

use std::sync::Mutex;

use fftw_sys as ffi;
use lazy_static::lazy_static;

/// A wrapper for an FFTW plan operating on double precision data.
///
/// The raw plan is owned: dropping the wrapper destroys the plan under the
/// FFTW mutex.
#[derive(Debug)]
pub struct Plan64(pub ffi::fftw_plan);

impl Drop for Plan64 {
    fn drop(&mut self) {
        let _lock = FFTW_MUTEX.lock().expect("Cannot get lock");
        unsafe {
            ffi::fftw_destroy_plan(self.0);
        }
    }
}

// An fftw_plan is only ever executed through the new-array interface, which
// is thread safe once planning is done.
unsafe impl Send for Plan64 {}
unsafe impl Sync for Plan64 {}

/// Error type for the FFTW wrapper.
#[derive(Debug)]
pub enum FftError {
    /// Failed to create a valid plan using the FFTW library.
    InvalidPlanError,

    /// The buffer is too small for the requested batch of transforms.
    InvalidDimensionError,
}

impl std::fmt::Display for FftError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FftError::InvalidPlanError => write!(f, "FFTW returned a NULL plan"),
            FftError::InvalidDimensionError => {
                write!(f, "buffer too small for the requested transform batch")
            }
        }
    }
}

impl std::error::Error for FftError {}

/// FFTW in 'estimate' mode. A sub-optimal heuristic is used to create the FFT
/// plan; input/output arrays are not overwritten during planning.
pub const FFTW_ESTIMATE: u32 = 1 << 6;

lazy_static! {
    /// Mutex for FFTW planner calls.
    ///
    /// This mutex is necessary because the FFTW planner is not thread-safe.
    /// See the [FFTW documentation](http://www.fftw.org/fftw3_doc/Thread-safety.html) for detail.
    pub static ref FFTW_MUTEX: Mutex<()> = Mutex::new(());
}

/// Exclusive call of the FFTW planner interface.
#[macro_export]
macro_rules! excall {
    ($call:expr) => {{
        let _lock = $crate::fftw::FFTW_MUTEX.lock().expect("Cannot get lock");
        unsafe { $call }
    }};
}

/// Direction of a complex-to-complex transform.
#[repr(i32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Sign {
    /// Forward transform
    Forward = -1,

    /// Backward transform
    Backward = 1,
}

/// Validate a plan created with FFTW.
pub fn validate_plan(plan: ffi::fftw_plan) -> Result<ffi::fftw_plan, FftError> {
    if plan.is_null() {
        Err(FftError::InvalidPlanError)
    } else {
        Ok(plan)
    }
}
