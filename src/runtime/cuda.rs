//! CUDA runtime backend.
//!
//! Forwards every call to `libcudart` through `cudarc`'s runtime bindings.
//! Only compiled with the `cuda` feature.

use std::ffi::{c_int, c_void, CStr};
use std::mem::MaybeUninit;

use cudarc::runtime::sys::{self, cudaError_t, cudaMemcpyKind, cudaStream_t};
use tracing::debug;

use super::device::DeviceProperties;
use super::{
    Copy2d, DevicePtr, HostPtr, RtResult, Runtime, RuntimeError, StreamHandle, Symbol,
    SymbolSource,
};

/// The process-wide CUDA runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct CudaRuntime;

impl CudaRuntime {
    pub fn new() -> Self {
        Self
    }
}

fn check(err: cudaError_t) -> RtResult<()> {
    if err == cudaError_t::cudaSuccess {
        return Ok(());
    }
    // SAFETY: cudaGetErrorString returns a static NUL-terminated string for
    // every status code.
    let description = unsafe { CStr::from_ptr(sys::cudaGetErrorString(err)) }
        .to_string_lossy()
        .into_owned();
    Err(RuntimeError::new(err as i32, description))
}

fn raw_stream(stream: StreamHandle) -> cudaStream_t {
    stream.raw() as cudaStream_t
}

fn c_chars_to_string(chars: &[std::ffi::c_char]) -> String {
    let bytes: Vec<u8> = chars
        .iter()
        .take_while(|&&c| c != 0)
        .map(|&c| c as u8)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

fn dims(raw: [c_int; 3]) -> [u32; 3] {
    raw.map(|v| v as u32)
}

impl Runtime for CudaRuntime {
    fn malloc(&self, bytes: usize) -> RtResult<DevicePtr> {
        let mut ptr: *mut c_void = std::ptr::null_mut();
        check(unsafe { sys::cudaMalloc(&mut ptr, bytes) })?;
        Ok(DevicePtr::from_addr(ptr as usize))
    }

    fn malloc_pitch(&self, width: usize, height: usize) -> RtResult<(DevicePtr, usize)> {
        let mut ptr: *mut c_void = std::ptr::null_mut();
        let mut pitch = 0usize;
        check(unsafe { sys::cudaMallocPitch(&mut ptr, &mut pitch, width, height) })?;
        Ok((DevicePtr::from_addr(ptr as usize), pitch))
    }

    fn free(&self, ptr: DevicePtr) -> RtResult<()> {
        check(unsafe { sys::cudaFree(ptr.as_raw()) })
    }

    fn malloc_host(&self, bytes: usize) -> RtResult<HostPtr> {
        let mut ptr: *mut c_void = std::ptr::null_mut();
        check(unsafe { sys::cudaMallocHost(&mut ptr, bytes) })?;
        Ok(HostPtr::from_raw(ptr.cast()))
    }

    fn free_host(&self, ptr: HostPtr) -> RtResult<()> {
        check(unsafe { sys::cudaFreeHost(ptr.as_raw().cast()) })
    }

    fn copy_to_device(
        &self,
        dst: DevicePtr,
        src: &[u8],
        stream: Option<StreamHandle>,
    ) -> RtResult<()> {
        let kind = cudaMemcpyKind::cudaMemcpyHostToDevice;
        let (dst, count) = (dst.as_raw(), src.len());
        let src = src.as_ptr().cast();
        check(unsafe {
            match stream {
                None => sys::cudaMemcpy(dst, src, count, kind),
                Some(s) => sys::cudaMemcpyAsync(dst, src, count, kind, raw_stream(s)),
            }
        })
    }

    unsafe fn copy_to_host(
        &self,
        dst: &mut [u8],
        src: DevicePtr,
        stream: Option<StreamHandle>,
    ) -> RtResult<()> {
        let kind = cudaMemcpyKind::cudaMemcpyDeviceToHost;
        let count = dst.len();
        let dst = dst.as_mut_ptr().cast();
        check(match stream {
            None => sys::cudaMemcpy(dst, src.as_raw(), count, kind),
            Some(s) => sys::cudaMemcpyAsync(dst, src.as_raw(), count, kind, raw_stream(s)),
        })
    }

    fn copy_2d_to_device(
        &self,
        dst: DevicePtr,
        src: &[u8],
        shape: Copy2d,
        stream: Option<StreamHandle>,
    ) -> RtResult<()> {
        if src.len() < shape.src_span()? {
            return Err(RuntimeError::from_code(RuntimeError::INVALID_VALUE));
        }
        let kind = cudaMemcpyKind::cudaMemcpyHostToDevice;
        let Copy2d {
            dst_pitch,
            src_pitch,
            width,
            height,
        } = shape;
        let (dst, src) = (dst.as_raw(), src.as_ptr().cast());
        check(unsafe {
            match stream {
                None => sys::cudaMemcpy2D(dst, dst_pitch, src, src_pitch, width, height, kind),
                Some(s) => sys::cudaMemcpy2DAsync(
                    dst,
                    dst_pitch,
                    src,
                    src_pitch,
                    width,
                    height,
                    kind,
                    raw_stream(s),
                ),
            }
        })
    }

    unsafe fn copy_2d_to_host(
        &self,
        dst: &mut [u8],
        src: DevicePtr,
        shape: Copy2d,
        stream: Option<StreamHandle>,
    ) -> RtResult<()> {
        if dst.len() < shape.dst_span()? {
            return Err(RuntimeError::from_code(RuntimeError::INVALID_VALUE));
        }
        let kind = cudaMemcpyKind::cudaMemcpyDeviceToHost;
        let Copy2d {
            dst_pitch,
            src_pitch,
            width,
            height,
        } = shape;
        let (dst, src) = (dst.as_mut_ptr().cast(), src.as_raw());
        check(match stream {
            None => sys::cudaMemcpy2D(dst, dst_pitch, src, src_pitch, width, height, kind),
            Some(s) => sys::cudaMemcpy2DAsync(
                dst,
                dst_pitch,
                src,
                src_pitch,
                width,
                height,
                kind,
                raw_stream(s),
            ),
        })
    }

    fn memset(
        &self,
        dst: DevicePtr,
        value: u8,
        bytes: usize,
        stream: Option<StreamHandle>,
    ) -> RtResult<()> {
        let value = value as c_int;
        check(unsafe {
            match stream {
                None => sys::cudaMemset(dst.as_raw(), value, bytes),
                Some(s) => sys::cudaMemsetAsync(dst.as_raw(), value, bytes, raw_stream(s)),
            }
        })
    }

    fn copy_to_symbol(
        &self,
        symbol: Symbol,
        offset: usize,
        src: SymbolSource<'_>,
        stream: Option<StreamHandle>,
    ) -> RtResult<()> {
        let (src_ptr, kind): (*const c_void, _) = match src {
            SymbolSource::Host(bytes) => {
                (bytes.as_ptr().cast(), cudaMemcpyKind::cudaMemcpyHostToDevice)
            }
            SymbolSource::Device { ptr, .. } => {
                (ptr.as_raw().cast_const(), cudaMemcpyKind::cudaMemcpyDeviceToDevice)
            }
        };
        let count = src.len();
        check(unsafe {
            match stream {
                None => sys::cudaMemcpyToSymbol(symbol.as_raw(), src_ptr, count, offset, kind),
                Some(s) => sys::cudaMemcpyToSymbolAsync(
                    symbol.as_raw(),
                    src_ptr,
                    count,
                    offset,
                    kind,
                    raw_stream(s),
                ),
            }
        })
    }

    fn stream_create(&self) -> RtResult<StreamHandle> {
        let mut stream: cudaStream_t = std::ptr::null_mut();
        check(unsafe { sys::cudaStreamCreate(&mut stream) })?;
        Ok(StreamHandle::from_raw(stream as usize))
    }

    fn stream_destroy(&self, stream: StreamHandle) -> RtResult<()> {
        check(unsafe { sys::cudaStreamDestroy(raw_stream(stream)) })
    }

    fn stream_synchronize(&self, stream: StreamHandle) -> RtResult<()> {
        check(unsafe { sys::cudaStreamSynchronize(raw_stream(stream)) })
    }

    fn device_synchronize(&self) -> RtResult<()> {
        check(unsafe { sys::cudaDeviceSynchronize() })
    }

    fn get_last_error(&self) -> RtResult<()> {
        check(unsafe { sys::cudaGetLastError() })
    }

    fn device_count(&self) -> RtResult<usize> {
        let mut count: c_int = 0;
        check(unsafe { sys::cudaGetDeviceCount(&mut count) })?;
        Ok(count.max(0) as usize)
    }

    fn device_properties(&self, device: usize) -> RtResult<DeviceProperties> {
        let mut raw = MaybeUninit::<sys::cudaDeviceProp>::zeroed();
        check(unsafe { sys::cudaGetDeviceProperties_v2(raw.as_mut_ptr(), device as c_int) })?;
        // SAFETY: the runtime filled the record on success.
        let p = unsafe { raw.assume_init() };
        debug!(device, "Queried device properties");

        Ok(DeviceProperties {
            name: c_chars_to_string(&p.name),
            compute_capability: (p.major as u32, p.minor as u32),
            total_global_mem: p.totalGlobalMem,
            total_const_mem: p.totalConstMem,
            shared_mem_per_block: p.sharedMemPerBlock,
            regs_per_block: p.regsPerBlock as u32,
            warp_size: p.warpSize as u32,
            mem_pitch: p.memPitch,
            max_threads_per_block: p.maxThreadsPerBlock as u32,
            max_threads_dim: dims(p.maxThreadsDim),
            max_grid_size: dims(p.maxGridSize),
            max_threads_per_multiprocessor: p.maxThreadsPerMultiProcessor as u32,
            multi_processor_count: p.multiProcessorCount as u32,
            clock_rate_khz: p.clockRate as u32,
            memory_clock_rate_khz: p.memoryClockRate as u32,
            memory_bus_width: p.memoryBusWidth as u32,
            l2_cache_size: p.l2CacheSize as u32,
            texture_alignment: p.textureAlignment,
            texture_pitch_alignment: p.texturePitchAlignment,
            async_engine_count: p.asyncEngineCount as u32,
            concurrent_kernels: p.concurrentKernels != 0,
            kernel_exec_timeout_enabled: p.kernelExecTimeoutEnabled != 0,
            integrated: p.integrated != 0,
            can_map_host_memory: p.canMapHostMemory != 0,
            unified_addressing: p.unifiedAddressing != 0,
            ecc_enabled: p.ECCEnabled != 0,
            compute_mode: p.computeMode as u32,
            pci_location: (
                p.pciDomainID as u32,
                p.pciBusID as u32,
                p.pciDeviceID as u32,
            ),
        })
    }

    fn set_device(&self, device: usize) -> RtResult<()> {
        check(unsafe { sys::cudaSetDevice(device as c_int) })
    }
}
