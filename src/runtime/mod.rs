//! Native GPU runtime abstraction.
//!
//! - [`Runtime`]: the set of runtime calls the checked layer forwards to
//! - [`device`]: device capability descriptors
//! - [`mock`]: in-process simulated device for CPU-only builds and tests
//! - `cuda`: the real CUDA runtime (feature `cuda`)

pub mod device;
pub mod mock;

#[cfg(feature = "cuda")]
pub mod cuda;

use std::ffi::c_void;
use std::fmt;

use thiserror::Error;

pub use device::DeviceProperties;

/// A non-success status returned by the native runtime.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{description}")]
pub struct RuntimeError {
    /// Native status code (never the success sentinel).
    pub code: i32,

    /// Human-readable description as reported by the runtime.
    pub description: String,
}

impl RuntimeError {
    pub const INVALID_VALUE: i32 = 1;
    pub const MEMORY_ALLOCATION: i32 = 2;
    pub const INVALID_PITCH_VALUE: i32 = 12;
    pub const INVALID_SYMBOL: i32 = 13;
    pub const INVALID_DEVICE_POINTER: i32 = 17;
    pub const NO_DEVICE: i32 = 100;
    pub const INVALID_DEVICE: i32 = 101;
    pub const INVALID_RESOURCE_HANDLE: i32 = 400;
    pub const ILLEGAL_ADDRESS: i32 = 700;
    pub const LAUNCH_FAILURE: i32 = 719;

    pub fn new(code: i32, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    /// Builds an error from a well-known status code, using the runtime's
    /// standard wording.
    pub fn from_code(code: i32) -> Self {
        let description = match code {
            Self::INVALID_VALUE => "invalid argument",
            Self::MEMORY_ALLOCATION => "out of memory",
            Self::INVALID_PITCH_VALUE => "invalid pitch argument",
            Self::INVALID_SYMBOL => "invalid device symbol",
            Self::INVALID_DEVICE_POINTER => "invalid device pointer",
            Self::NO_DEVICE => "no CUDA-capable device is detected",
            Self::INVALID_DEVICE => "invalid device ordinal",
            Self::INVALID_RESOURCE_HANDLE => "invalid resource handle",
            Self::ILLEGAL_ADDRESS => "an illegal memory access was encountered",
            Self::LAUNCH_FAILURE => "unspecified launch failure",
            _ => "unrecognized error code",
        };
        Self::new(code, description)
    }
}

pub type RtResult<T> = Result<T, RuntimeError>;

/// Address of device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DevicePtr(usize);

impl DevicePtr {
    pub const fn null() -> Self {
        Self(0)
    }

    pub const fn from_addr(addr: usize) -> Self {
        Self(addr)
    }

    pub const fn addr(self) -> usize {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Pointer `bytes` past this one.
    pub const fn offset(self, bytes: usize) -> Self {
        Self(self.0 + bytes)
    }

    pub fn as_raw(self) -> *mut c_void {
        self.0 as *mut c_void
    }
}

impl fmt::Display for DevicePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Page-locked host memory returned by [`Runtime::malloc_host`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HostPtr(*mut u8);

// SAFETY: a `HostPtr` is only an address; dereferencing it goes through the
// unsafe accessors below.
unsafe impl Send for HostPtr {}
unsafe impl Sync for HostPtr {}

impl HostPtr {
    pub const fn null() -> Self {
        Self(std::ptr::null_mut())
    }

    pub fn from_raw(ptr: *mut u8) -> Self {
        Self(ptr)
    }

    pub fn as_raw(self) -> *mut u8 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    /// # Safety
    /// `len` must not exceed the size passed to `malloc_host`, and the
    /// allocation must not have been freed. Asynchronous host-to-device
    /// copies from page-locked memory read the source after the call
    /// returns, so a slice passed to one must not be written until its
    /// stream is synchronized.
    pub unsafe fn as_slice<'a>(self, len: usize) -> &'a [u8] {
        std::slice::from_raw_parts(self.0, len)
    }

    /// # Safety
    /// Same as [`HostPtr::as_slice`], and no other reference to the region
    /// may be alive.
    pub unsafe fn as_mut_slice<'a>(self, len: usize) -> &'a mut [u8] {
        std::slice::from_raw_parts_mut(self.0, len)
    }
}

/// Opaque execution-queue identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(usize);

impl StreamHandle {
    /// The runtime's default (null) stream.
    pub const DEFAULT: StreamHandle = StreamHandle(0);

    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> usize {
        self.0
    }

    pub const fn is_default(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_default() {
            write!(f, "default")
        } else {
            write!(f, "{:#x}", self.0)
        }
    }
}

/// Address of a `__device__` global variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol(usize);

impl Symbol {
    /// # Safety
    /// `addr` must be the host-side shadow address of a device symbol
    /// registered with the runtime.
    pub unsafe fn from_raw(addr: *const c_void) -> Self {
        Self(addr as usize)
    }

    pub(crate) const fn from_addr(addr: usize) -> Self {
        Self(addr)
    }

    pub const fn addr(self) -> usize {
        self.0
    }

    pub fn as_raw(self) -> *const c_void {
        self.0 as *const c_void
    }
}

/// Where a symbol copy reads from.
#[derive(Debug, Clone, Copy)]
pub enum SymbolSource<'a> {
    /// Host-to-device.
    Host(&'a [u8]),
    /// Device-to-device.
    Device { ptr: DevicePtr, len: usize },
}

impl SymbolSource<'_> {
    pub fn len(&self) -> usize {
        match self {
            SymbolSource::Host(bytes) => bytes.len(),
            SymbolSource::Device { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shape of a 2-D (pitched) copy. Widths and pitches are in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Copy2d {
    pub dst_pitch: usize,
    pub src_pitch: usize,
    pub width: usize,
    pub height: usize,
}

impl Copy2d {
    /// Bytes a buffer with `pitch` must span to hold `height` rows of
    /// `width` bytes. A span that overflows the address space is an
    /// invalid value.
    pub fn span(pitch: usize, width: usize, height: usize) -> RtResult<usize> {
        match height {
            0 => Ok(0),
            h => pitch
                .checked_mul(h - 1)
                .and_then(|rows| rows.checked_add(width))
                .ok_or_else(|| RuntimeError::from_code(RuntimeError::INVALID_VALUE)),
        }
    }

    pub fn src_span(&self) -> RtResult<usize> {
        Self::span(self.src_pitch, self.width, self.height)
    }

    pub fn dst_span(&self) -> RtResult<usize> {
        Self::span(self.dst_pitch, self.width, self.height)
    }

    /// Checks the pitches against the row width, as the runtime does.
    pub fn validate(&self) -> RtResult<()> {
        if self.width > self.dst_pitch || self.width > self.src_pitch {
            return Err(RuntimeError::from_code(RuntimeError::INVALID_PITCH_VALUE));
        }
        Ok(())
    }
}

/// The native runtime calls the checked layer forwards to.
///
/// `stream: None` issues a blocking call; `Some(stream)` enqueues the work
/// on that stream and returns immediately.
pub trait Runtime {
    fn malloc(&self, bytes: usize) -> RtResult<DevicePtr>;

    /// Returns the allocation and its row pitch in bytes.
    fn malloc_pitch(&self, width: usize, height: usize) -> RtResult<(DevicePtr, usize)>;

    fn free(&self, ptr: DevicePtr) -> RtResult<()>;

    fn malloc_host(&self, bytes: usize) -> RtResult<HostPtr>;

    fn free_host(&self, ptr: HostPtr) -> RtResult<()>;

    fn copy_to_device(
        &self,
        dst: DevicePtr,
        src: &[u8],
        stream: Option<StreamHandle>,
    ) -> RtResult<()>;

    /// # Safety
    /// With `Some(stream)`, `dst` is written after this call returns; it must
    /// stay valid and unaliased until the stream is synchronized.
    unsafe fn copy_to_host(
        &self,
        dst: &mut [u8],
        src: DevicePtr,
        stream: Option<StreamHandle>,
    ) -> RtResult<()>;

    fn copy_2d_to_device(
        &self,
        dst: DevicePtr,
        src: &[u8],
        shape: Copy2d,
        stream: Option<StreamHandle>,
    ) -> RtResult<()>;

    /// # Safety
    /// See [`Runtime::copy_to_host`].
    unsafe fn copy_2d_to_host(
        &self,
        dst: &mut [u8],
        src: DevicePtr,
        shape: Copy2d,
        stream: Option<StreamHandle>,
    ) -> RtResult<()>;

    fn memset(
        &self,
        dst: DevicePtr,
        value: u8,
        bytes: usize,
        stream: Option<StreamHandle>,
    ) -> RtResult<()>;

    fn copy_to_symbol(
        &self,
        symbol: Symbol,
        offset: usize,
        src: SymbolSource<'_>,
        stream: Option<StreamHandle>,
    ) -> RtResult<()>;

    fn stream_create(&self) -> RtResult<StreamHandle>;

    fn stream_destroy(&self, stream: StreamHandle) -> RtResult<()>;

    fn stream_synchronize(&self, stream: StreamHandle) -> RtResult<()>;

    fn device_synchronize(&self) -> RtResult<()>;

    /// Returns and clears the runtime's sticky last error.
    fn get_last_error(&self) -> RtResult<()>;

    fn device_count(&self) -> RtResult<usize>;

    fn device_properties(&self, device: usize) -> RtResult<DeviceProperties>;

    fn set_device(&self, device: usize) -> RtResult<()>;
}
