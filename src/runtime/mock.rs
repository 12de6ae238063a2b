//! In-process simulated GPU runtime.
//!
//! Device memory is backed by host buffers at synthetic addresses. Work
//! issued on a stream is queued and only applied when that stream (or the
//! whole device) is synchronized, so asynchronous ordering is observable in
//! tests. Failures can be injected per operation, and every call is logged.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use tracing::trace;

use super::device::{stub_devices_molly, DeviceProperties};
use super::{
    Copy2d, DevicePtr, HostPtr, RtResult, Runtime, RuntimeError, StreamHandle, Symbol,
    SymbolSource,
};

/// First synthetic device address handed out.
const DEVICE_BASE: usize = 0x7_0000_0000;

/// Allocation granularity for linear allocations.
const ALLOC_ALIGNMENT: usize = 256;

/// Row alignment used by pitched allocations.
pub const PITCH_ALIGNMENT: usize = 512;

/// First synthetic symbol address.
const SYMBOL_BASE: usize = 0x5_0000_0000;

/// Runtime entry points, used to target failure injection and to read the
/// call log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Malloc,
    MallocPitch,
    Free,
    MallocHost,
    FreeHost,
    CopyToDevice,
    CopyToHost,
    Copy2dToDevice,
    Copy2dToHost,
    Memset,
    CopyToSymbol,
    StreamCreate,
    StreamDestroy,
    StreamSynchronize,
    DeviceSynchronize,
    GetLastError,
    DeviceCount,
    DeviceProperties,
    SetDevice,
}

/// One logged runtime call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockCall {
    pub op: MockOp,

    /// Stream the work was enqueued on; `None` for blocking calls.
    pub stream: Option<StreamHandle>,
}

/// Deferred work waiting on a stream.
#[derive(Debug)]
enum Pending {
    Write { addr: usize, bytes: Vec<u8> },
    Fill { addr: usize, value: u8, len: usize },
    Write2d { addr: usize, pitch: usize, rows: Vec<Vec<u8>> },
    SymbolWrite { symbol: usize, offset: usize, bytes: Vec<u8> },
}

#[derive(Debug)]
struct State {
    devices: Vec<DeviceProperties>,
    current: usize,

    device_mem: BTreeMap<usize, Vec<u8>>,
    device_used: usize,
    next_addr: usize,

    host_mem: HashMap<usize, Box<[u8]>>,

    symbols: HashMap<usize, Vec<u8>>,
    next_symbol: usize,

    default_queue: VecDeque<Pending>,
    streams: HashMap<usize, VecDeque<Pending>>,
    next_stream: usize,

    injected: HashMap<MockOp, RuntimeError>,
    /// Error raised by deferred work; reported by every synchronize call.
    fault: Option<RuntimeError>,
    /// Error from the most recent failing direct call.
    last_error: Option<RuntimeError>,

    calls: Vec<MockCall>,
}

/// Simulated GPU runtime.
#[derive(Debug)]
pub struct MockRuntime {
    state: Mutex<State>,
}

impl Default for MockRuntime {
    fn default() -> Self {
        Self::with_devices(stub_devices_molly())
    }
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the given devices. An empty list behaves like a host
    /// without GPUs.
    pub fn with_devices(devices: Vec<DeviceProperties>) -> Self {
        Self {
            state: Mutex::new(State {
                devices,
                current: 0,
                device_mem: BTreeMap::new(),
                device_used: 0,
                next_addr: DEVICE_BASE,
                host_mem: HashMap::new(),
                symbols: HashMap::new(),
                next_symbol: SYMBOL_BASE,
                default_queue: VecDeque::new(),
                streams: HashMap::new(),
                next_stream: 1,
                injected: HashMap::new(),
                fault: None,
                last_error: None,
                calls: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next call to `op` fail with `code`.
    pub fn fail_next(&self, op: MockOp, code: i32) {
        self.lock()
            .injected
            .insert(op, RuntimeError::from_code(code));
    }

    /// Simulate an asynchronous fault (e.g. a crashed kernel): reported by
    /// the next synchronize and by `get_last_error`.
    pub fn inject_fault(&self, code: i32) {
        self.lock().fault = Some(RuntimeError::from_code(code));
    }

    /// Register a device global of `size` zeroed bytes.
    pub fn define_symbol(&self, size: usize) -> Symbol {
        let mut st = self.lock();
        let addr = st.next_symbol;
        st.next_symbol += round_up(size.max(1), ALLOC_ALIGNMENT);
        st.symbols.insert(addr, vec![0; size]);
        Symbol::from_addr(addr)
    }

    /// Current contents of a symbol, without synchronizing.
    pub fn read_symbol(&self, symbol: Symbol) -> Option<Vec<u8>> {
        self.lock().symbols.get(&symbol.addr()).cloned()
    }

    /// Current contents of device memory, without synchronizing.
    pub fn read_device(&self, ptr: DevicePtr, len: usize) -> RtResult<Vec<u8>> {
        let mut st = self.lock();
        Ok(st.device_region(ptr.addr(), len)?.to_vec())
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Number of logged calls to `op`.
    pub fn count(&self, op: MockOp) -> usize {
        self.lock().calls.iter().filter(|c| c.op == op).count()
    }

    pub fn live_allocations(&self) -> usize {
        self.lock().device_mem.len()
    }

    pub fn live_host_allocations(&self) -> usize {
        self.lock().host_mem.len()
    }

    pub fn live_streams(&self) -> usize {
        self.lock().streams.len()
    }

    /// Queued work across all streams.
    pub fn pending_ops(&self) -> usize {
        let st = self.lock();
        st.default_queue.len() + st.streams.values().map(VecDeque::len).sum::<usize>()
    }

    pub fn current_device(&self) -> usize {
        self.lock().current
    }

    fn call<T>(
        &self,
        op: MockOp,
        stream: Option<StreamHandle>,
        f: impl FnOnce(&mut State) -> RtResult<T>,
    ) -> RtResult<T> {
        let mut st = self.lock();
        st.calls.push(MockCall { op, stream });
        let result = match st.injected.remove(&op) {
            Some(err) => Err(err),
            None => f(&mut *st),
        };
        if let Err(err) = &result {
            trace!(?op, code = err.code, "mock runtime call failed");
            st.last_error = Some(err.clone());
        }
        result
    }
}

fn round_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

fn invalid_value() -> RuntimeError {
    RuntimeError::from_code(RuntimeError::INVALID_VALUE)
}

impl State {
    fn device_region(&mut self, addr: usize, len: usize) -> RtResult<&mut [u8]> {
        if len == 0 {
            return Ok(&mut []);
        }
        let (&base, buf) = self
            .device_mem
            .range_mut(..=addr)
            .next_back()
            .ok_or_else(invalid_value)?;
        let start = addr - base;
        let end = start.checked_add(len).ok_or_else(invalid_value)?;
        if end > buf.len() {
            return Err(invalid_value());
        }
        Ok(&mut buf[start..end])
    }

    fn symbol_region(&mut self, symbol: usize, offset: usize, len: usize) -> RtResult<&mut [u8]> {
        let buf = self
            .symbols
            .get_mut(&symbol)
            .ok_or_else(|| RuntimeError::from_code(RuntimeError::INVALID_SYMBOL))?;
        match offset.checked_add(len) {
            Some(end) if end <= buf.len() => Ok(&mut buf[offset..end]),
            _ => Err(invalid_value()),
        }
    }

    fn queue_mut(&mut self, stream: StreamHandle) -> RtResult<&mut VecDeque<Pending>> {
        if stream.is_default() {
            return Ok(&mut self.default_queue);
        }
        self.streams
            .get_mut(&stream.raw())
            .ok_or_else(|| RuntimeError::from_code(RuntimeError::INVALID_RESOURCE_HANDLE))
    }

    /// Run `op` now for blocking calls, or queue it on the stream.
    fn submit(&mut self, op: Pending, stream: Option<StreamHandle>) -> RtResult<()> {
        match stream {
            None => {
                self.drain_all();
                self.apply(op)
            }
            Some(stream) => {
                self.queue_mut(stream)?.push_back(op);
                Ok(())
            }
        }
    }

    fn apply(&mut self, op: Pending) -> RtResult<()> {
        match op {
            Pending::Write { addr, bytes } => {
                self.device_region(addr, bytes.len())?.copy_from_slice(&bytes);
            }
            Pending::Fill { addr, value, len } => {
                self.device_region(addr, len)?.fill(value);
            }
            Pending::Write2d { addr, pitch, rows } => {
                for (r, row) in rows.iter().enumerate() {
                    self.device_region(addr + r * pitch, row.len())?
                        .copy_from_slice(row);
                }
            }
            Pending::SymbolWrite {
                symbol,
                offset,
                bytes,
            } => {
                self.symbol_region(symbol, offset, bytes.len())?
                    .copy_from_slice(&bytes);
            }
        }
        Ok(())
    }

    fn drain_queue(&mut self, queue: VecDeque<Pending>) {
        for op in queue {
            if self.apply(op).is_err() && self.fault.is_none() {
                self.fault = Some(RuntimeError::from_code(RuntimeError::ILLEGAL_ADDRESS));
            }
        }
    }

    fn drain(&mut self, stream: StreamHandle) -> RtResult<()> {
        let queue = std::mem::take(self.queue_mut(stream)?);
        self.drain_queue(queue);
        Ok(())
    }

    /// Work a device read must wait for: everything for blocking calls,
    /// otherwise the default stream and then `stream`.
    fn drain_for_read(&mut self, stream: Option<StreamHandle>) -> RtResult<()> {
        match stream {
            None => self.drain_all(),
            Some(stream) => {
                self.queue_mut(stream)?;
                let default = std::mem::take(&mut self.default_queue);
                self.drain_queue(default);
                self.drain(stream)?;
            }
        }
        Ok(())
    }

    fn drain_all(&mut self) {
        let mut queues = vec![std::mem::take(&mut self.default_queue)];
        queues.extend(self.streams.values_mut().map(std::mem::take));
        for queue in queues {
            self.drain_queue(queue);
        }
    }

    fn check_fault(&self) -> RtResult<()> {
        match &self.fault {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn capacity(&self) -> RtResult<usize> {
        self.devices
            .get(self.current)
            .map(|d| d.total_global_mem)
            .ok_or_else(|| RuntimeError::from_code(RuntimeError::NO_DEVICE))
    }

    fn allocate(&mut self, bytes: usize) -> RtResult<DevicePtr> {
        if bytes == 0 {
            return Ok(DevicePtr::null());
        }
        let capacity = self.capacity()?;
        if self.device_used + bytes > capacity {
            return Err(RuntimeError::from_code(RuntimeError::MEMORY_ALLOCATION));
        }
        let addr = self.next_addr;
        self.next_addr += round_up(bytes, ALLOC_ALIGNMENT);
        self.device_used += bytes;
        self.device_mem.insert(addr, vec![0xcd; bytes]);
        Ok(DevicePtr::from_addr(addr))
    }
}

impl Runtime for MockRuntime {
    fn malloc(&self, bytes: usize) -> RtResult<DevicePtr> {
        self.call(MockOp::Malloc, None, |st| st.allocate(bytes))
    }

    fn malloc_pitch(&self, width: usize, height: usize) -> RtResult<(DevicePtr, usize)> {
        self.call(MockOp::MallocPitch, None, |st| {
            if width == 0 || height == 0 {
                return Ok((DevicePtr::null(), 0));
            }
            let pitch = round_up(width, PITCH_ALIGNMENT);
            let bytes = pitch.checked_mul(height).ok_or_else(invalid_value)?;
            Ok((st.allocate(bytes)?, pitch))
        })
    }

    fn free(&self, ptr: DevicePtr) -> RtResult<()> {
        self.call(MockOp::Free, None, |st| {
            if ptr.is_null() {
                return Ok(());
            }
            st.drain_all();
            let buf = st.device_mem.remove(&ptr.addr()).ok_or_else(invalid_value)?;
            st.device_used -= buf.len();
            Ok(())
        })
    }

    fn malloc_host(&self, bytes: usize) -> RtResult<HostPtr> {
        self.call(MockOp::MallocHost, None, |st| {
            if bytes == 0 {
                return Ok(HostPtr::null());
            }
            let mut buf = vec![0u8; bytes].into_boxed_slice();
            let ptr = HostPtr::from_raw(buf.as_mut_ptr());
            st.host_mem.insert(ptr.as_raw() as usize, buf);
            Ok(ptr)
        })
    }

    fn free_host(&self, ptr: HostPtr) -> RtResult<()> {
        self.call(MockOp::FreeHost, None, |st| {
            if ptr.is_null() {
                return Ok(());
            }
            st.host_mem
                .remove(&(ptr.as_raw() as usize))
                .map(drop)
                .ok_or_else(invalid_value)
        })
    }

    fn copy_to_device(
        &self,
        dst: DevicePtr,
        src: &[u8],
        stream: Option<StreamHandle>,
    ) -> RtResult<()> {
        self.call(MockOp::CopyToDevice, stream, |st| {
            // Validate the destination at issue time, like the runtime does.
            st.device_region(dst.addr(), src.len())?;
            let op = Pending::Write {
                addr: dst.addr(),
                bytes: src.to_vec(),
            };
            st.submit(op, stream)
        })
    }

    unsafe fn copy_to_host(
        &self,
        dst: &mut [u8],
        src: DevicePtr,
        stream: Option<StreamHandle>,
    ) -> RtResult<()> {
        self.call(MockOp::CopyToHost, stream, |st| {
            st.drain_for_read(stream)?;
            dst.copy_from_slice(st.device_region(src.addr(), dst.len())?);
            Ok(())
        })
    }

    fn copy_2d_to_device(
        &self,
        dst: DevicePtr,
        src: &[u8],
        shape: Copy2d,
        stream: Option<StreamHandle>,
    ) -> RtResult<()> {
        self.call(MockOp::Copy2dToDevice, stream, |st| {
            shape.validate()?;
            if src.len() < shape.src_span()? {
                return Err(invalid_value());
            }
            st.device_region(dst.addr(), shape.dst_span()?)?;
            let rows = (0..shape.height)
                .map(|r| {
                    let start = r * shape.src_pitch;
                    src[start..start + shape.width].to_vec()
                })
                .collect();
            let op = Pending::Write2d {
                addr: dst.addr(),
                pitch: shape.dst_pitch,
                rows,
            };
            st.submit(op, stream)
        })
    }

    unsafe fn copy_2d_to_host(
        &self,
        dst: &mut [u8],
        src: DevicePtr,
        shape: Copy2d,
        stream: Option<StreamHandle>,
    ) -> RtResult<()> {
        self.call(MockOp::Copy2dToHost, stream, |st| {
            shape.validate()?;
            if dst.len() < shape.dst_span()? {
                return Err(invalid_value());
            }
            st.drain_for_read(stream)?;
            let region = st.device_region(src.addr(), shape.src_span()?)?;
            for r in 0..shape.height {
                let from = r * shape.src_pitch;
                let to = r * shape.dst_pitch;
                dst[to..to + shape.width].copy_from_slice(&region[from..from + shape.width]);
            }
            Ok(())
        })
    }

    fn memset(
        &self,
        dst: DevicePtr,
        value: u8,
        bytes: usize,
        stream: Option<StreamHandle>,
    ) -> RtResult<()> {
        self.call(MockOp::Memset, stream, |st| {
            st.device_region(dst.addr(), bytes)?;
            let op = Pending::Fill {
                addr: dst.addr(),
                value,
                len: bytes,
            };
            st.submit(op, stream)
        })
    }

    fn copy_to_symbol(
        &self,
        symbol: Symbol,
        offset: usize,
        src: SymbolSource<'_>,
        stream: Option<StreamHandle>,
    ) -> RtResult<()> {
        self.call(MockOp::CopyToSymbol, stream, |st| {
            st.symbol_region(symbol.addr(), offset, src.len())?;
            let bytes = match src {
                SymbolSource::Host(bytes) => bytes.to_vec(),
                SymbolSource::Device { ptr, len } => {
                    st.drain_for_read(stream)?;
                    st.device_region(ptr.addr(), len)?.to_vec()
                }
            };
            let op = Pending::SymbolWrite {
                symbol: symbol.addr(),
                offset,
                bytes,
            };
            st.submit(op, stream)
        })
    }

    fn stream_create(&self) -> RtResult<StreamHandle> {
        self.call(MockOp::StreamCreate, None, |st| {
            let id = st.next_stream;
            st.next_stream += 1;
            st.streams.insert(id, VecDeque::new());
            Ok(StreamHandle::from_raw(id))
        })
    }

    fn stream_destroy(&self, stream: StreamHandle) -> RtResult<()> {
        self.call(MockOp::StreamDestroy, None, |st| {
            // Work already queued still completes.
            let queue = st
                .streams
                .remove(&stream.raw())
                .ok_or_else(|| RuntimeError::from_code(RuntimeError::INVALID_RESOURCE_HANDLE))?;
            st.drain_queue(queue);
            Ok(())
        })
    }

    fn stream_synchronize(&self, stream: StreamHandle) -> RtResult<()> {
        self.call(MockOp::StreamSynchronize, None, |st| {
            st.drain(stream)?;
            st.check_fault()
        })
    }

    fn device_synchronize(&self) -> RtResult<()> {
        self.call(MockOp::DeviceSynchronize, None, |st| {
            st.drain_all();
            st.check_fault()
        })
    }

    fn get_last_error(&self) -> RtResult<()> {
        let mut st = self.lock();
        st.calls.push(MockCall {
            op: MockOp::GetLastError,
            stream: None,
        });
        let injected = st.injected.remove(&MockOp::GetLastError);
        let fault = st.fault.take();
        let last = st.last_error.take();
        match injected.or(fault).or(last) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn device_count(&self) -> RtResult<usize> {
        self.call(MockOp::DeviceCount, None, |st| Ok(st.devices.len()))
    }

    fn device_properties(&self, device: usize) -> RtResult<DeviceProperties> {
        self.call(MockOp::DeviceProperties, None, |st| {
            st.devices
                .get(device)
                .cloned()
                .ok_or_else(|| RuntimeError::from_code(RuntimeError::INVALID_DEVICE))
        })
    }

    fn set_device(&self, device: usize) -> RtResult<()> {
        self.call(MockOp::SetDevice, None, |st| {
            if device >= st.devices.len() {
                return Err(RuntimeError::from_code(RuntimeError::INVALID_DEVICE));
            }
            st.current = device;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malloc_and_free() {
        let rt = MockRuntime::new();
        let a = rt.malloc(100).unwrap();
        let b = rt.malloc(100).unwrap();
        assert_ne!(a, b);
        assert_eq!(b.addr() - a.addr(), ALLOC_ALIGNMENT);
        assert_eq!(rt.live_allocations(), 2);

        rt.free(a).unwrap();
        rt.free(b).unwrap();
        assert_eq!(rt.live_allocations(), 0);

        // Double free is rejected.
        assert_eq!(rt.free(a).unwrap_err().code, RuntimeError::INVALID_VALUE);
    }

    #[test]
    fn test_zero_sized_malloc_returns_null() {
        let rt = MockRuntime::new();
        assert!(rt.malloc(0).unwrap().is_null());
        rt.free(DevicePtr::null()).unwrap();
    }

    #[test]
    fn test_zero_length_ops_accept_null() {
        let rt = MockRuntime::new();
        let ptr = rt.malloc(0).unwrap();
        rt.memset(ptr, 0, 0, None).unwrap();
        rt.copy_to_device(ptr, &[], None).unwrap();
        unsafe { rt.copy_to_host(&mut [], ptr, None).unwrap() };
        assert!(rt.read_device(ptr, 0).unwrap().is_empty());

        // Non-empty access through null is still rejected.
        let err = rt.memset(ptr, 0, 1, None).unwrap_err();
        assert_eq!(err.code, RuntimeError::INVALID_VALUE);
    }

    #[test]
    fn test_copy_2d_span_overflow_is_invalid_value() {
        let rt = MockRuntime::new();
        let ptr = rt.malloc(64).unwrap();
        let shape = Copy2d {
            dst_pitch: usize::MAX,
            src_pitch: 8,
            width: 8,
            height: 3,
        };
        let err = rt.copy_2d_to_device(ptr, &[0u8; 24], shape, None).unwrap_err();
        assert_eq!(err.code, RuntimeError::INVALID_VALUE);

        let mut dst = [0u8; 24];
        let shape = Copy2d {
            dst_pitch: 8,
            src_pitch: usize::MAX,
            width: 8,
            height: 3,
        };
        let err = unsafe { rt.copy_2d_to_host(&mut dst, ptr, shape, None) }.unwrap_err();
        assert_eq!(err.code, RuntimeError::INVALID_VALUE);
    }

    #[test]
    fn test_stream_read_waits_for_default_stream() {
        let rt = MockRuntime::new();
        let ptr = rt.malloc(8).unwrap();
        let stream = rt.stream_create().unwrap();
        rt.memset(ptr, 0x2a, 8, Some(StreamHandle::DEFAULT)).unwrap();

        let mut out = [0u8; 8];
        unsafe { rt.copy_to_host(&mut out, ptr, Some(stream)).unwrap() };
        assert_eq!(out, [0x2a; 8]);
        assert_eq!(rt.pending_ops(), 0);

        rt.memset(ptr, 0x11, 8, Some(StreamHandle::DEFAULT)).unwrap();
        let shape = Copy2d {
            dst_pitch: 4,
            src_pitch: 4,
            width: 4,
            height: 2,
        };
        unsafe { rt.copy_2d_to_host(&mut out, ptr, shape, Some(stream)).unwrap() };
        assert_eq!(out, [0x11; 8]);
    }

    #[test]
    fn test_out_of_memory() {
        let mut dev = stub_devices_molly().remove(0);
        dev.total_global_mem = 1024;
        let rt = MockRuntime::with_devices(vec![dev]);

        rt.malloc(1000).unwrap();
        let err = rt.malloc(100).unwrap_err();
        assert_eq!(err.code, RuntimeError::MEMORY_ALLOCATION);
    }

    #[test]
    fn test_no_device() {
        let rt = MockRuntime::with_devices(vec![]);
        assert_eq!(rt.device_count().unwrap(), 0);
        assert_eq!(rt.malloc(16).unwrap_err().code, RuntimeError::NO_DEVICE);
    }

    #[test]
    fn test_async_work_is_deferred_until_sync() {
        let rt = MockRuntime::new();
        let ptr = rt.malloc(8).unwrap();
        let stream = rt.stream_create().unwrap();

        rt.memset(ptr, 0, 8, None).unwrap();
        rt.copy_to_device(ptr, &[7; 8], Some(stream)).unwrap();
        assert_eq!(rt.read_device(ptr, 8).unwrap(), vec![0; 8]);
        assert_eq!(rt.pending_ops(), 1);

        rt.stream_synchronize(stream).unwrap();
        assert_eq!(rt.read_device(ptr, 8).unwrap(), vec![7; 8]);
        assert_eq!(rt.pending_ops(), 0);

        rt.stream_destroy(stream).unwrap();
        rt.free(ptr).unwrap();
    }

    #[test]
    fn test_pitched_allocation() {
        let rt = MockRuntime::new();
        let (ptr, pitch) = rt.malloc_pitch(100, 4).unwrap();
        assert_eq!(pitch, PITCH_ALIGNMENT);
        rt.read_device(ptr, pitch * 4).unwrap();
        assert!(rt.read_device(ptr, pitch * 4 + 1).is_err());
    }

    #[test]
    fn test_copy_2d_round_trip() {
        let rt = MockRuntime::new();
        let (ptr, pitch) = rt.malloc_pitch(3, 2).unwrap();
        let src = [1u8, 2, 3, 0, 4, 5, 6, 0];
        let up = Copy2d {
            dst_pitch: pitch,
            src_pitch: 4,
            width: 3,
            height: 2,
        };
        rt.copy_2d_to_device(ptr, &src, up, None).unwrap();

        let mut out = [9u8; 6];
        let down = Copy2d {
            dst_pitch: 3,
            src_pitch: pitch,
            width: 3,
            height: 2,
        };
        unsafe { rt.copy_2d_to_host(&mut out, ptr, down, None).unwrap() };
        assert_eq!(out, [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_injected_failure_sets_last_error() {
        let rt = MockRuntime::new();
        rt.fail_next(MockOp::Malloc, RuntimeError::MEMORY_ALLOCATION);
        assert!(rt.malloc(16).is_err());
        assert!(rt.malloc(16).is_ok());

        let err = rt.get_last_error().unwrap_err();
        assert_eq!(err.code, RuntimeError::MEMORY_ALLOCATION);
        assert!(rt.get_last_error().is_ok());
    }

    #[test]
    fn test_fault_reported_by_synchronize() {
        let rt = MockRuntime::new();
        rt.inject_fault(RuntimeError::LAUNCH_FAILURE);
        assert_eq!(
            rt.device_synchronize().unwrap_err().code,
            RuntimeError::LAUNCH_FAILURE
        );
        assert!(rt.get_last_error().is_err());
        assert!(rt.device_synchronize().is_ok());
    }

    #[test]
    fn test_destroyed_stream_is_invalid() {
        let rt = MockRuntime::new();
        let stream = rt.stream_create().unwrap();
        rt.stream_destroy(stream).unwrap();
        let err = rt.stream_synchronize(stream).unwrap_err();
        assert_eq!(err.code, RuntimeError::INVALID_RESOURCE_HANDLE);
        assert!(rt.stream_destroy(StreamHandle::DEFAULT).is_err());
    }

    #[test]
    fn test_host_allocation() {
        let rt = MockRuntime::new();
        let host = rt.malloc_host(64).unwrap();
        unsafe { host.as_mut_slice(64).fill(3) };
        assert_eq!(unsafe { host.as_slice(64) }[63], 3);
        assert_eq!(rt.live_host_allocations(), 1);
        rt.free_host(host).unwrap();
        assert_eq!(rt.live_host_allocations(), 0);
    }

    #[test]
    fn test_symbol_copy() {
        let rt = MockRuntime::new();
        let sym = rt.define_symbol(8);
        rt.copy_to_symbol(sym, 4, SymbolSource::Host(&[1, 2, 3, 4]), None)
            .unwrap();
        assert_eq!(rt.read_symbol(sym).unwrap(), vec![0, 0, 0, 0, 1, 2, 3, 4]);

        let err = rt
            .copy_to_symbol(sym, 6, SymbolSource::Host(&[1, 2, 3]), None)
            .unwrap_err();
        assert_eq!(err.code, RuntimeError::INVALID_VALUE);
    }

    #[test]
    fn test_set_device() {
        let rt = MockRuntime::new();
        rt.set_device(1).unwrap();
        assert_eq!(rt.current_device(), 1);
        assert_eq!(
            rt.set_device(2).unwrap_err().code,
            RuntimeError::INVALID_DEVICE
        );
    }
}
