//! Batched pencil plans and their new-array execution.
//!
//! Every transform of the solver is a batch of 1-D transforms along the fast
//! axis of a pencil topology: unit stride, one transform per pencil, with the
//! pencil-to-pencil distance padded for alignment. Plans are created once per
//! `(direction, component)` during setup and executed through the new-array
//! interface so the same plan serves every solve.

use fftw_sys as ffi;

pub use ffi::fftw_r2r_kind_do_not_use_me as R2RKind;

use super::types::{validate_plan, FftError, Plan64, Sign, FFTW_ESTIMATE};
use crate::excall;

/// Geometry of a batch of 1-D transforms over one pencil set.
#[derive(Debug, Copy, Clone)]
pub struct PencilShape {
    /// Logical size of each 1-D transform, in elements of the transform's
    /// input domain (real values for r2r/r2c, complex values for c2c).
    pub n: usize,

    /// Number of pencils in the batch.
    pub howmany: usize,

    /// Distance between the first elements of two consecutive pencils, in
    /// input elements (the padded fast-axis memory size).
    pub idist: usize,

    /// Same distance in output elements. Equal to `idist` except for
    /// real-to-complex transforms where the output is counted in complex.
    pub odist: usize,
}

fn check_len(len: usize, shape: &PencilShape, per_pencil: usize) -> Result<(), FftError> {
    if shape.howmany == 0 {
        return Err(FftError::InvalidDimensionError);
    }
    let needed = (shape.howmany - 1) * shape.idist + per_pencil;
    if len < needed {
        Err(FftError::InvalidDimensionError)
    } else {
        Ok(())
    }
}

/// Plan an in-place batch of real-to-real transforms of the given kind.
pub fn plan_many_r2r(
    data: &mut [f64],
    shape: &PencilShape,
    kind: R2RKind,
) -> Result<Plan64, FftError> {
    check_len(data.len(), shape, shape.n)?;
    let mut n = [shape.n as i32];
    let kinds = [kind];
    let ptr = data.as_mut_ptr();
    let plan = validate_plan(excall!(ffi::fftw_plan_many_r2r(
        1,
        n.as_mut_ptr(),
        shape.howmany as i32,
        ptr,
        std::ptr::null(),
        1,
        shape.idist as i32,
        ptr,
        std::ptr::null(),
        1,
        shape.odist as i32,
        kinds.as_ptr(),
        FFTW_ESTIMATE,
    )))?;
    Ok(Plan64(plan))
}

/// Plan an in-place batch of complex-to-complex transforms.
///
/// `data` is the interleaved storage; `shape` counts complex elements.
pub fn plan_many_c2c(
    data: &mut [f64],
    shape: &PencilShape,
    sign: Sign,
) -> Result<Plan64, FftError> {
    check_len(data.len() / 2, shape, shape.n)?;
    let mut n = [shape.n as i32];
    let ptr = data.as_mut_ptr() as *mut ffi::fftw_complex;
    let plan = validate_plan(excall!(ffi::fftw_plan_many_dft(
        1,
        n.as_mut_ptr(),
        shape.howmany as i32,
        ptr,
        std::ptr::null(),
        1,
        shape.idist as i32,
        ptr,
        std::ptr::null(),
        1,
        shape.odist as i32,
        sign as i32,
        FFTW_ESTIMATE,
    )))?;
    Ok(Plan64(plan))
}

/// Plan an in-place batch of real-to-complex transforms.
///
/// The input pencil holds `n` reals padded to `idist`; the output pencil
/// holds `n/2 + 1` complex values within the same memory, `odist` apart.
pub fn plan_many_r2c(data: &mut [f64], shape: &PencilShape) -> Result<Plan64, FftError> {
    // input pencils are counted in reals, so the generic check applies
    check_len(data.len(), shape, 2 * (shape.n / 2 + 1))?;
    let mut n = [shape.n as i32];
    let rptr = data.as_mut_ptr();
    let cptr = rptr as *mut ffi::fftw_complex;
    let plan = validate_plan(excall!(ffi::fftw_plan_many_dft_r2c(
        1,
        n.as_mut_ptr(),
        shape.howmany as i32,
        rptr,
        std::ptr::null(),
        1,
        shape.idist as i32,
        cptr,
        std::ptr::null(),
        1,
        shape.odist as i32,
        FFTW_ESTIMATE,
    )))?;
    Ok(Plan64(plan))
}

/// Plan an in-place batch of complex-to-real transforms (inverse of
/// [`plan_many_r2c`]).
pub fn plan_many_c2r(data: &mut [f64], shape: &PencilShape) -> Result<Plan64, FftError> {
    // input pencils are counted in complex elements
    check_len(data.len() / 2, shape, shape.n / 2 + 1)?;
    let mut n = [shape.n as i32];
    let rptr = data.as_mut_ptr();
    let cptr = rptr as *mut ffi::fftw_complex;
    let plan = validate_plan(excall!(ffi::fftw_plan_many_dft_c2r(
        1,
        n.as_mut_ptr(),
        shape.howmany as i32,
        cptr,
        std::ptr::null(),
        1,
        shape.idist as i32,
        rptr,
        std::ptr::null(),
        1,
        shape.odist as i32,
        FFTW_ESTIMATE,
    )))?;
    Ok(Plan64(plan))
}

/// Execute a real-to-real plan in place at `ptr`.
///
/// # Safety contract
/// `ptr` must point to a buffer with the same geometry and alignment as the
/// one the plan was created on; new-array execution is thread safe.
pub fn execute_r2r(plan: &Plan64, ptr: *mut f64) {
    unsafe {
        ffi::fftw_execute_r2r(plan.0, ptr, ptr);
    }
}

/// Execute a complex-to-complex plan in place at `ptr` (interleaved storage).
pub fn execute_c2c(plan: &Plan64, ptr: *mut f64) {
    let cptr = ptr as *mut ffi::fftw_complex;
    unsafe {
        ffi::fftw_execute_dft(plan.0, cptr, cptr);
    }
}

/// Execute a real-to-complex plan in place at `ptr`.
pub fn execute_r2c(plan: &Plan64, ptr: *mut f64) {
    let cptr = ptr as *mut ffi::fftw_complex;
    unsafe {
        ffi::fftw_execute_dft_r2c(plan.0, ptr, cptr);
    }
}

/// Execute a complex-to-real plan in place at `ptr`.
pub fn execute_c2r(plan: &Plan64, ptr: *mut f64) {
    let cptr = ptr as *mut ffi::fftw_complex;
    unsafe {
        ffi::fftw_execute_dft_c2r(plan.0, cptr, ptr);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::fftw::array::AlignedBuffer;

    #[test]
    fn test_r2c_c2r_round_trip() {
        // one pencil of 8 reals, padded in-place layout of 2*(8/2+1) = 10
        let n = 8;
        let shape = PencilShape {
            n,
            howmany: 1,
            idist: 10,
            odist: 5,
        };
        let mut data = AlignedBuffer::new(10);
        let fwd = plan_many_r2c(&mut data, &shape).unwrap();
        let shape_back = PencilShape {
            n,
            howmany: 1,
            idist: 5,
            odist: 10,
        };
        let bwd = plan_many_c2r(&mut data, &shape_back).unwrap();

        let reference: Vec<f64> = (0..n).map(|i| (i as f64 * 0.7).sin()).collect();
        data[..n].copy_from_slice(&reference);

        execute_r2c(&fwd, data.as_mut_ptr());
        execute_c2r(&bwd, data.as_mut_ptr());

        for i in 0..n {
            assert!(
                (data[i] / n as f64 - reference[i]).abs() < 1e-12,
                "mismatch at {}",
                i
            );
        }
    }

    #[test]
    fn test_dct_round_trip() {
        let n = 16;
        let shape = PencilShape {
            n,
            howmany: 2,
            idist: n,
            odist: n,
        };
        let mut data = AlignedBuffer::new(2 * n);
        let fwd = plan_many_r2r(&mut data, &shape, R2RKind::FFTW_REDFT10).unwrap();
        let bwd = plan_many_r2r(&mut data, &shape, R2RKind::FFTW_REDFT01).unwrap();

        let reference: Vec<f64> = (0..2 * n).map(|i| (i as f64 * 0.3).cos()).collect();
        data[..].copy_from_slice(&reference);

        execute_r2r(&fwd, data.as_mut_ptr());
        execute_r2r(&bwd, data.as_mut_ptr());

        // REDFT10 followed by REDFT01 scales by 2n
        for i in 0..2 * n {
            assert!((data[i] / (2.0 * n as f64) - reference[i]).abs() < 1e-12);
        }
    }
}
