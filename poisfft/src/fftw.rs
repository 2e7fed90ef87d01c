//! Thin wrapper over the FFTW C library.
//!
//! Only the pieces the solver needs are exposed: batched ("many") plans over
//! pencils for real-to-real, complex-to-complex and real-to-complex
//! transforms, the new-array execute functions, and FFTW-aligned buffers.

pub mod array;
pub mod plan;
pub mod types;

pub use array::AlignedBuffer;
pub use plan::{
    execute_c2c, execute_c2r, execute_r2c, execute_r2r, plan_many_c2c, plan_many_c2r,
    plan_many_r2c, plan_many_r2r, PencilShape,
};
pub use types::{FftError, Plan64, Sign, FFTW_ESTIMATE, FFTW_MUTEX};
