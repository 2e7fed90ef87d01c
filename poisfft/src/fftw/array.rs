//! FFTW-aligned owned buffers.

use std::ops::{Deref, DerefMut};

use fftw_sys as ffi;

use super::types::FFTW_MUTEX;

/// An owned `f64` buffer allocated with `fftw_alloc_real`.
///
/// FFTW guarantees the allocation is aligned for SIMD; this is the backing
/// storage for the field, the Green's function and the transpose staging
/// areas. The buffer is zero-initialized.
#[derive(Debug)]
pub struct AlignedBuffer {
    ptr: *mut f64,
    len: usize,
}

unsafe impl Send for AlignedBuffer {}
unsafe impl Sync for AlignedBuffer {}

impl AlignedBuffer {
    /// Allocate a zeroed buffer of `len` doubles.
    pub fn new(len: usize) -> Self {
        assert!(len > 0, "cannot allocate an empty aligned buffer");
        let ptr = {
            let _lock = FFTW_MUTEX.lock().expect("Cannot get lock");
            unsafe { ffi::fftw_alloc_real(len) }
        };
        assert!(!ptr.is_null(), "fftw_alloc_real failed for {} doubles", len);
        unsafe {
            std::ptr::write_bytes(ptr, 0, len);
        }
        Self { ptr, len }
    }

    /// Number of doubles in the buffer.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer is empty (never true for a live buffer).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reset the whole buffer to zero.
    pub fn fill_zero(&mut self) {
        unsafe {
            std::ptr::write_bytes(self.ptr, 0, self.len);
        }
    }

    /// Raw pointer to the first element.
    pub fn as_mut_ptr(&mut self) -> *mut f64 {
        self.ptr
    }
}

impl Deref for AlignedBuffer {
    type Target = [f64];

    fn deref(&self) -> &[f64] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl DerefMut for AlignedBuffer {
    fn deref_mut(&mut self) -> &mut [f64] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

impl Drop for AlignedBuffer {
    fn drop(&mut self) {
        let _lock = FFTW_MUTEX.lock().expect("Cannot get lock");
        unsafe {
            ffi::fftw_free(self.ptr as *mut std::ffi::c_void);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_aligned_buffer_zeroed() {
        let mut buf = AlignedBuffer::new(129);
        assert_eq!(buf.len(), 129);
        assert!(buf.iter().all(|&x| x == 0.0));
        buf[128] = 1.5;
        assert_eq!(buf[128], 1.5);
        buf.fill_zero();
        assert!(buf.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_aligned_buffer_alignment() {
        let buf = AlignedBuffer::new(16);
        // fftw_malloc aligns at least to 16 bytes
        assert_eq!(buf.as_ptr() as usize % 16, 0);
    }
}
