//! Raw CUDA runtime, driver and cuBLAS bindings.
//!
//! Only compiled with the `cuda` feature. Every declaration mirrors the C
//! prototype in `cuda_runtime_api.h` / `cublas_api.h`; higher layers must go
//! through the safe wrappers in [`super::cuda`].

#![allow(non_snake_case)]

use std::ffi::CStr;
use std::os::raw::{c_char, c_float, c_int, c_uint, c_void};

pub type CudaErrorT = c_int;
pub type CublasStatusT = c_int;
pub type CuResultT = c_int;
pub type CudaStreamT = *mut c_void;
pub type CublasHandleT = *mut c_void;

pub const CUDA_SUCCESS: CudaErrorT = 0;
pub const CUBLAS_STATUS_SUCCESS: CublasStatusT = 0;

pub const CUDA_MEMCPY_HOST_TO_DEVICE: c_int = 1;
pub const CUDA_MEMCPY_DEVICE_TO_HOST: c_int = 2;
pub const CUDA_MEMCPY_DEVICE_TO_DEVICE: c_int = 3;

pub const CUDA_DEV_ATTR_COMPUTE_CAPABILITY_MAJOR: c_int = 75;
pub const CUDA_DEV_ATTR_COMPUTE_CAPABILITY_MINOR: c_int = 76;

pub const CUBLAS_OP_T: c_int = 1;

#[link(name = "cudart")]
unsafe extern "C" {
    pub fn cudaGetDeviceCount(count: *mut c_int) -> CudaErrorT;
    pub fn cudaSetDevice(device: c_int) -> CudaErrorT;
    pub fn cudaDeviceGetAttribute(value: *mut c_int, attr: c_int, device: c_int) -> CudaErrorT;
    pub fn cudaMemGetInfo(free: *mut usize, total: *mut usize) -> CudaErrorT;

    pub fn cudaMalloc(dev_ptr: *mut *mut c_void, size: usize) -> CudaErrorT;
    pub fn cudaMallocHost(ptr: *mut *mut c_void, size: usize) -> CudaErrorT;
    pub fn cudaFree(dev_ptr: *mut c_void) -> CudaErrorT;
    pub fn cudaFreeHost(ptr: *mut c_void) -> CudaErrorT;
    pub fn cudaMemcpy(dst: *mut c_void, src: *const c_void, count: usize, kind: c_int)
    -> CudaErrorT;

    pub fn cudaStreamCreate(stream: *mut CudaStreamT) -> CudaErrorT;
    pub fn cudaStreamDestroy(stream: CudaStreamT) -> CudaErrorT;
    pub fn cudaStreamSynchronize(stream: CudaStreamT) -> CudaErrorT;

    pub fn cudaGetErrorString(error: CudaErrorT) -> *const c_char;
}

#[link(name = "cublas")]
unsafe extern "C" {
    pub fn cublasCreate_v2(handle: *mut CublasHandleT) -> CublasStatusT;
    pub fn cublasDestroy_v2(handle: CublasHandleT) -> CublasStatusT;
    pub fn cublasSetStream_v2(handle: CublasHandleT, stream: CudaStreamT) -> CublasStatusT;

    pub fn cublasSnrm2_v2(
        handle: CublasHandleT,
        n: c_int,
        x: *const c_float,
        incx: c_int,
        result: *mut c_float,
    ) -> CublasStatusT;

    pub fn cublasSscal_v2(
        handle: CublasHandleT,
        n: c_int,
        alpha: *const c_float,
        x: *mut c_float,
        incx: c_int,
    ) -> CublasStatusT;

    pub fn cublasSgemv_v2(
        handle: CublasHandleT,
        trans: c_int,
        m: c_int,
        n: c_int,
        alpha: *const c_float,
        a: *const c_float,
        lda: c_int,
        x: *const c_float,
        incx: c_int,
        beta: *const c_float,
        y: *mut c_float,
        incy: c_int,
    ) -> CublasStatusT;
}

#[link(name = "cuda")]
unsafe extern "C" {
    pub fn cuInit(flags: c_uint) -> CuResultT;
    pub fn cuDeviceGetName(name: *mut c_char, len: c_int, device: c_int) -> CuResultT;
}

/// Human readable text for a runtime error code.
pub fn error_string(code: CudaErrorT) -> String {
    // SAFETY: cudaGetErrorString returns a pointer to a static string for
    // every input, including unknown codes.
    unsafe {
        let ptr = cudaGetErrorString(code);
        if ptr.is_null() {
            format!("cuda error {code}")
        } else {
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
        }
    }
}
