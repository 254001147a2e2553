//! CUDA backend built on cudart + cuBLAS.
//!
//! Without the `cuda` feature the types still exist so higher layers can
//! name them, but [`CudaDevice::new`] always fails with
//! [`GpuError::CudaNotAvailable`] and [`is_available`] reports `false`.

use super::device::{Buffer, Device, DeviceInfo, MemoryKind, TopK};
use super::error::{GpuError, GpuResult};

pub use imp::{CudaBuffer, CudaDevice, device_count, is_available};

#[cfg(feature = "cuda")]
mod imp {
    use std::os::raw::{c_char, c_int, c_void};
    use std::ptr::{self, NonNull};
    use std::sync::OnceLock;

    use parking_lot::Mutex;
    use tracing::{debug, warn};

    use super::super::cpu::NORM_EPSILON;
    use super::super::device::{check_matrix, select_top_k};
    use super::super::ffi;
    use super::*;

    fn check_cuda(code: ffi::CudaErrorT, operation: &'static str) -> GpuResult<()> {
        if code == ffi::CUDA_SUCCESS {
            Ok(())
        } else {
            Err(GpuError::kernel(operation, ffi::error_string(code)))
        }
    }

    fn check_cublas(status: ffi::CublasStatusT, operation: &'static str) -> GpuResult<()> {
        if status == ffi::CUBLAS_STATUS_SUCCESS {
            Ok(())
        } else {
            Err(GpuError::kernel(operation, format!("cublas status {status}")))
        }
    }

    fn to_c_int(value: usize, what: &str) -> GpuResult<c_int> {
        c_int::try_from(value)
            .map_err(|_| GpuError::invalid_buffer(format!("{what} {value} exceeds the cuBLAS range")))
    }

    fn set_device(id: usize) -> GpuResult<()> {
        let ordinal = to_c_int(id, "device id")?;
        // SAFETY: plain FFI call, the ordinal was range checked above.
        check_cuda(unsafe { ffi::cudaSetDevice(ordinal) }, "cudaSetDevice")
    }

    /// Number of CUDA devices visible to the runtime, cached after the first probe.
    pub fn device_count() -> usize {
        static COUNT: OnceLock<usize> = OnceLock::new();
        *COUNT.get_or_init(|| {
            let mut count: c_int = 0;
            // SAFETY: valid out pointer.
            let code = unsafe { ffi::cudaGetDeviceCount(&mut count) };
            if code != ffi::CUDA_SUCCESS {
                debug!("cudaGetDeviceCount failed: {}", ffi::error_string(code));
                return 0;
            }
            usize::try_from(count).unwrap_or(0)
        })
    }

    pub fn is_available() -> bool {
        device_count() > 0
    }

    /// Device or pinned allocation owned by exactly one handle.
    pub struct CudaBuffer {
        ptr: NonNull<f32>,
        len: usize,
        kind: MemoryKind,
        device_id: usize,
    }

    // SAFETY: the allocation is only reachable through this handle, and
    // every device call serializes on the owning device's context lock.
    unsafe impl Send for CudaBuffer {}

    impl CudaBuffer {
        fn allocate(device_id: usize, len: usize, kind: MemoryKind) -> GpuResult<Self> {
            let bytes = len.max(1) * std::mem::size_of::<f32>();
            let mut raw: *mut c_void = ptr::null_mut();
            // SAFETY: valid out pointer; the result is checked below.
            let code = unsafe {
                match kind {
                    MemoryKind::Device => ffi::cudaMalloc(&mut raw, bytes),
                    MemoryKind::Pinned => ffi::cudaMallocHost(&mut raw, bytes),
                }
            };
            if code != ffi::CUDA_SUCCESS {
                return Err(GpuError::BufferCreation {
                    bytes,
                    reason: ffi::error_string(code),
                });
            }
            let ptr = NonNull::new(raw.cast::<f32>()).ok_or_else(|| GpuError::BufferCreation {
                bytes,
                reason: "allocator returned null".to_string(),
            })?;
            Ok(Self {
                ptr,
                len,
                kind,
                device_id,
            })
        }

        fn as_ptr(&self) -> *const f32 {
            self.ptr.as_ptr()
        }

        fn as_mut_ptr(&mut self) -> *mut f32 {
            self.ptr.as_ptr()
        }
    }

    impl Buffer for CudaBuffer {
        fn len(&self) -> usize {
            self.len
        }

        fn kind(&self) -> MemoryKind {
            self.kind
        }

        fn read(&self) -> GpuResult<Vec<f32>> {
            match self.kind {
                MemoryKind::Device => {
                    set_device(self.device_id)?;
                    let mut host = vec![0.0f32; self.len];
                    // SAFETY: both regions hold `len` floats.
                    let code = unsafe {
                        ffi::cudaMemcpy(
                            host.as_mut_ptr().cast(),
                            self.as_ptr().cast(),
                            self.size_bytes(),
                            ffi::CUDA_MEMCPY_DEVICE_TO_HOST,
                        )
                    };
                    check_cuda(code, "cudaMemcpy")?;
                    Ok(host)
                }
                // SAFETY: pinned memory is host addressable and every kernel
                // writing to it synchronizes its stream before returning.
                MemoryKind::Pinned => {
                    Ok(unsafe { std::slice::from_raw_parts(self.as_ptr(), self.len) }.to_vec())
                }
            }
        }
    }

    impl Drop for CudaBuffer {
        fn drop(&mut self) {
            let _ = set_device(self.device_id);
            // SAFETY: the pointer came from the matching allocator and is
            // freed only here.
            let code = unsafe {
                match self.kind {
                    MemoryKind::Device => ffi::cudaFree(self.ptr.as_ptr().cast()),
                    MemoryKind::Pinned => ffi::cudaFreeHost(self.ptr.as_ptr().cast()),
                }
            };
            if code != ffi::CUDA_SUCCESS {
                warn!(
                    "Failed to free {} buffer on device {}: {}",
                    self.kind,
                    self.device_id,
                    ffi::error_string(code)
                );
            }
        }
    }

    impl std::fmt::Debug for CudaBuffer {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("CudaBuffer")
                .field("len", &self.len)
                .field("kind", &self.kind)
                .field("device_id", &self.device_id)
                .finish()
        }
    }

    struct Context {
        handle: ffi::CublasHandleT,
        stream: ffi::CudaStreamT,
    }

    impl Context {
        fn sync(&self, operation: &'static str) -> GpuResult<()> {
            // SAFETY: the stream was created by this context.
            check_cuda(unsafe { ffi::cudaStreamSynchronize(self.stream) }, operation)
        }
    }

    /// A cuBLAS handle bound to its own execution stream.
    pub struct CudaDevice {
        info: DeviceInfo,
        context: Mutex<Context>,
    }

    // SAFETY: the cuBLAS handle and stream are only touched while holding
    // the context mutex.
    unsafe impl Send for CudaDevice {}
    unsafe impl Sync for CudaDevice {}

    impl CudaDevice {
        pub fn new(device_id: usize) -> GpuResult<Self> {
            if !is_available() {
                return Err(GpuError::CudaNotAvailable);
            }
            if device_id >= device_count() {
                return Err(GpuError::DeviceCreation {
                    device_id,
                    reason: format!("only {} device(s) present", device_count()),
                });
            }
            let creation = |reason: String| GpuError::DeviceCreation { device_id, reason };
            set_device(device_id).map_err(|e| creation(e.to_string()))?;
            let ordinal = to_c_int(device_id, "device id")?;

            let mut stream: ffi::CudaStreamT = ptr::null_mut();
            // SAFETY: valid out pointer.
            let code = unsafe { ffi::cudaStreamCreate(&mut stream) };
            if code != ffi::CUDA_SUCCESS {
                return Err(creation(ffi::error_string(code)));
            }

            let mut handle: ffi::CublasHandleT = ptr::null_mut();
            // SAFETY: valid out pointer.
            let status = unsafe { ffi::cublasCreate_v2(&mut handle) };
            if status != ffi::CUBLAS_STATUS_SUCCESS {
                // SAFETY: the stream was created above and is not shared.
                unsafe { ffi::cudaStreamDestroy(stream) };
                return Err(creation(format!("cublasCreate failed with status {status}")));
            }
            // Owned from here on, so any early return below releases both.
            let context = Context { handle, stream };
            // SAFETY: handle and stream are live.
            check_cublas(
                unsafe { ffi::cublasSetStream_v2(handle, stream) },
                "cublasSetStream",
            )
            .map_err(|e| creation(e.to_string()))?;

            let info = DeviceInfo {
                id: device_id,
                name: device_name(ordinal),
                memory_bytes: total_memory(),
                compute_capability: compute_capability(ordinal),
            };
            debug!(
                "Created CUDA device {} ({}, cc {}.{})",
                info.id, info.name, info.compute_capability.0, info.compute_capability.1
            );

            Ok(Self {
                info,
                context: Mutex::new(context),
            })
        }

        fn check_owner(&self, buffer: &CudaBuffer) -> GpuResult<()> {
            if buffer.device_id == self.info.id {
                Ok(())
            } else {
                Err(GpuError::invalid_buffer(format!(
                    "buffer belongs to device {}, not {}",
                    buffer.device_id, self.info.id
                )))
            }
        }
    }

    impl Drop for Context {
        fn drop(&mut self) {
            // SAFETY: both were created in CudaDevice::new and are released
            // only here.
            unsafe {
                ffi::cublasDestroy_v2(self.handle);
                ffi::cudaStreamDestroy(self.stream);
            }
        }
    }

    impl Drop for CudaDevice {
        fn drop(&mut self) {
            let _ = set_device(self.info.id);
            debug!("Releasing CUDA device {}", self.info.id);
        }
    }

    impl std::fmt::Debug for CudaDevice {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("CudaDevice").field("info", &self.info).finish()
        }
    }

    fn device_name(ordinal: c_int) -> String {
        let mut name = [0 as c_char; 256];
        // SAFETY: the buffer length is passed alongside the pointer.
        let ok = unsafe {
            ffi::cuInit(0) == 0 && ffi::cuDeviceGetName(name.as_mut_ptr(), 256, ordinal) == 0
        };
        if !ok {
            return format!("CUDA device {ordinal}");
        }
        // SAFETY: cuDeviceGetName writes a NUL terminated string.
        unsafe { std::ffi::CStr::from_ptr(name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    fn total_memory() -> u64 {
        let (mut free, mut total) = (0usize, 0usize);
        // SAFETY: valid out pointers.
        if unsafe { ffi::cudaMemGetInfo(&mut free, &mut total) } == ffi::CUDA_SUCCESS {
            total as u64
        } else {
            0
        }
    }

    fn compute_capability(ordinal: c_int) -> (u32, u32) {
        let attr = |which| {
            let mut value: c_int = 0;
            // SAFETY: valid out pointer.
            let code = unsafe { ffi::cudaDeviceGetAttribute(&mut value, which, ordinal) };
            if code == ffi::CUDA_SUCCESS {
                u32::try_from(value).unwrap_or(0)
            } else {
                0
            }
        };
        (
            attr(ffi::CUDA_DEV_ATTR_COMPUTE_CAPABILITY_MAJOR),
            attr(ffi::CUDA_DEV_ATTR_COMPUTE_CAPABILITY_MINOR),
        )
    }

    impl Device for CudaDevice {
        type Buffer = CudaBuffer;

        fn info(&self) -> &DeviceInfo {
            &self.info
        }

        fn new_buffer(&self, data: &[f32], kind: MemoryKind) -> GpuResult<CudaBuffer> {
            set_device(self.info.id)?;
            let mut buffer = CudaBuffer::allocate(self.info.id, data.len(), kind)?;
            if data.is_empty() {
                return Ok(buffer);
            }
            match kind {
                MemoryKind::Device => {
                    // SAFETY: the allocation holds `data.len()` floats.
                    let code = unsafe {
                        ffi::cudaMemcpy(
                            buffer.as_mut_ptr().cast(),
                            data.as_ptr().cast(),
                            std::mem::size_of_val(data),
                            ffi::CUDA_MEMCPY_HOST_TO_DEVICE,
                        )
                    };
                    // `buffer` drops (and frees) if the copy fails
                    check_cuda(code, "cudaMemcpy")?;
                }
                MemoryKind::Pinned => {
                    // SAFETY: pinned memory is host addressable and sized for `data`.
                    unsafe {
                        ptr::copy_nonoverlapping(data.as_ptr(), buffer.as_mut_ptr(), data.len())
                    };
                }
            }
            Ok(buffer)
        }

        fn new_empty_buffer(&self, count: usize, kind: MemoryKind) -> GpuResult<CudaBuffer> {
            set_device(self.info.id)?;
            CudaBuffer::allocate(self.info.id, count, kind)
        }

        fn normalize(&self, vectors: &mut CudaBuffer, n: usize, dims: usize) -> GpuResult<()> {
            self.check_owner(vectors)?;
            check_matrix(vectors.len(), n, dims)?;
            let dims_c = to_c_int(dims, "dims")?;
            if n == 0 || dims == 0 {
                return Ok(());
            }

            set_device(self.info.id)?;
            let ctx = self.context.lock();
            let base = vectors.as_mut_ptr();
            for row in 0..n {
                // SAFETY: row * dims + dims <= len was checked above.
                let row_ptr = unsafe { base.add(row * dims) };
                let mut norm = 0.0f32;
                // SAFETY: handle is live; result is a host pointer.
                check_cublas(
                    unsafe { ffi::cublasSnrm2_v2(ctx.handle, dims_c, row_ptr, 1, &mut norm) },
                    "cublasSnrm2",
                )?;
                if norm > NORM_EPSILON {
                    let scale = 1.0 / norm;
                    // SAFETY: same row pointer as above.
                    check_cublas(
                        unsafe { ffi::cublasSscal_v2(ctx.handle, dims_c, &scale, row_ptr, 1) },
                        "cublasSscal",
                    )?;
                }
            }
            ctx.sync("normalize")
        }

        fn cosine_similarity(
            &self,
            embeddings: &CudaBuffer,
            query: &CudaBuffer,
            scores: &mut CudaBuffer,
            n: usize,
            dims: usize,
            normalized: bool,
        ) -> GpuResult<()> {
            for buffer in [embeddings, query, &*scores] {
                self.check_owner(buffer)?;
            }
            check_matrix(embeddings.len(), n, dims)?;
            if query.len() != dims {
                return Err(GpuError::DimensionMismatch {
                    expected: dims,
                    actual: query.len(),
                });
            }
            if scores.len() < n {
                return Err(GpuError::invalid_buffer(format!(
                    "score buffer holds {} floats, {n} required",
                    scores.len()
                )));
            }
            if n == 0 {
                return Ok(());
            }

            if !normalized {
                // cuBLAS only gives us dot products, so work on unit copies.
                let mut unit_embeddings = self.copy_buffer(embeddings, n * dims)?;
                let mut unit_query = self.copy_buffer(query, dims)?;
                self.normalize(&mut unit_embeddings, n, dims)?;
                self.normalize(&mut unit_query, 1, dims)?;
                return self.cosine_similarity(
                    &unit_embeddings,
                    &unit_query,
                    scores,
                    n,
                    dims,
                    true,
                );
            }

            let (m_c, n_c) = (to_c_int(dims, "dims")?, to_c_int(n, "rows")?);
            let (alpha, beta) = (1.0f32, 0.0f32);
            set_device(self.info.id)?;
            let ctx = self.context.lock();
            // Row-major n x dims is column-major dims x n, so y = A^T x.
            // SAFETY: all three buffers were sized and owner checked above.
            check_cublas(
                unsafe {
                    ffi::cublasSgemv_v2(
                        ctx.handle,
                        ffi::CUBLAS_OP_T,
                        m_c,
                        n_c,
                        &alpha,
                        embeddings.as_ptr(),
                        m_c,
                        query.as_ptr(),
                        1,
                        &beta,
                        scores.as_mut_ptr(),
                        1,
                    )
                },
                "cublasSgemv",
            )?;
            ctx.sync("cosine_similarity")
        }

        fn top_k(&self, scores: &CudaBuffer, n: usize, k: usize) -> GpuResult<TopK> {
            self.check_owner(scores)?;
            if scores.len() < n {
                return Err(GpuError::invalid_buffer(format!(
                    "score buffer holds {} floats, {n} requested",
                    scores.len()
                )));
            }
            let host = scores.read()?;
            Ok(select_top_k(&host[..n], k))
        }
    }

    impl CudaDevice {
        fn copy_buffer(&self, source: &CudaBuffer, len: usize) -> GpuResult<CudaBuffer> {
            let mut copy = self.new_empty_buffer(len, MemoryKind::Device)?;
            if len == 0 {
                return Ok(copy);
            }
            let direction = match source.kind {
                MemoryKind::Device => ffi::CUDA_MEMCPY_DEVICE_TO_DEVICE,
                MemoryKind::Pinned => ffi::CUDA_MEMCPY_HOST_TO_DEVICE,
            };
            // SAFETY: both allocations hold at least `len` floats.
            let code = unsafe {
                ffi::cudaMemcpy(
                    copy.as_mut_ptr().cast(),
                    source.as_ptr().cast(),
                    len * std::mem::size_of::<f32>(),
                    direction,
                )
            };
            check_cuda(code, "cudaMemcpy")?;
            Ok(copy)
        }
    }
}

#[cfg(not(feature = "cuda"))]
mod imp {
    use std::convert::Infallible;

    use super::*;

    pub fn device_count() -> usize {
        0
    }

    pub fn is_available() -> bool {
        false
    }

    /// Placeholder that can never be constructed without the `cuda` feature.
    #[derive(Debug)]
    pub struct CudaBuffer {
        never: Infallible,
    }

    impl Buffer for CudaBuffer {
        fn len(&self) -> usize {
            match self.never {}
        }

        fn kind(&self) -> MemoryKind {
            match self.never {}
        }

        fn read(&self) -> GpuResult<Vec<f32>> {
            match self.never {}
        }
    }

    /// Placeholder that can never be constructed without the `cuda` feature.
    #[derive(Debug)]
    pub struct CudaDevice {
        never: Infallible,
    }

    impl CudaDevice {
        pub fn new(_device_id: usize) -> GpuResult<Self> {
            Err(GpuError::CudaNotAvailable)
        }
    }

    impl Device for CudaDevice {
        type Buffer = CudaBuffer;

        fn info(&self) -> &DeviceInfo {
            match self.never {}
        }

        fn new_buffer(&self, _data: &[f32], _kind: MemoryKind) -> GpuResult<CudaBuffer> {
            match self.never {}
        }

        fn new_empty_buffer(&self, _count: usize, _kind: MemoryKind) -> GpuResult<CudaBuffer> {
            match self.never {}
        }

        fn normalize(&self, _vectors: &mut CudaBuffer, _n: usize, _dims: usize) -> GpuResult<()> {
            match self.never {}
        }

        fn cosine_similarity(
            &self,
            _embeddings: &CudaBuffer,
            _query: &CudaBuffer,
            _scores: &mut CudaBuffer,
            _n: usize,
            _dims: usize,
            _normalized: bool,
        ) -> GpuResult<()> {
            match self.never {}
        }

        fn top_k(&self, _scores: &CudaBuffer, _n: usize, _k: usize) -> GpuResult<TopK> {
            match self.never {}
        }
    }
}
