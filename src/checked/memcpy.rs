//! Checked host/device copies.
//!
//! Host-to-device copies from pageable memory read the source slice before
//! returning, so they are safe even when asynchronous. A slice over
//! page-locked memory (see [`HostPtr::as_slice`]) is read later and must be
//! left untouched until the stream is synchronized. Asynchronous
//! device-to-host copies write their destination later and are therefore
//! `unsafe`.
//!
//! [`HostPtr::as_slice`]: crate::runtime::HostPtr::as_slice

use bytemuck::Pod;

use super::{CallSite, CheckResult, DebugContext};
use crate::runtime::{Copy2d, DevicePtr, Runtime, StreamHandle, Symbol, SymbolSource};

impl<R: Runtime> DebugContext<R> {
    /// Blocking host-to-device copy of `src` to `dst`.
    #[track_caller]
    pub fn memcpy_to_device<T: Pod>(&mut self, dst: DevicePtr, src: &[T]) -> CheckResult<()> {
        let site = CallSite::caller();
        self.copy_to_device_at(site, dst, bytemuck::cast_slice(src), None)
    }

    /// Host-to-device copy enqueued on `stream`.
    #[track_caller]
    pub fn memcpy_to_device_async<T: Pod>(
        &mut self,
        dst: DevicePtr,
        src: &[T],
        stream: StreamHandle,
    ) -> CheckResult<()> {
        let site = CallSite::caller();
        self.copy_to_device_at(site, dst, bytemuck::cast_slice(src), Some(stream))
    }

    /// Blocking device-to-host copy filling `dst` from `src`.
    #[track_caller]
    pub fn memcpy_to_host<T: Pod>(&mut self, dst: &mut [T], src: DevicePtr) -> CheckResult<()> {
        let site = CallSite::caller();
        // SAFETY: blocking copy; `dst` is fully written before return.
        let result = unsafe {
            self.runtime
                .copy_to_host(bytemuck::cast_slice_mut(dst), src, None)
        };
        self.check(site, "cudaMemcpy to host failed: ", result)
    }

    /// Device-to-host copy enqueued on `stream`.
    ///
    /// # Safety
    /// `dst` must stay valid and must not be read or written until `stream`
    /// has been synchronized.
    #[track_caller]
    pub unsafe fn memcpy_to_host_async<T: Pod>(
        &mut self,
        dst: &mut [T],
        src: DevicePtr,
        stream: StreamHandle,
    ) -> CheckResult<()> {
        let site = CallSite::caller();
        let result = self
            .runtime
            .copy_to_host(bytemuck::cast_slice_mut(dst), src, Some(stream));
        self.check(site, "cudaMemcpyAsync to host failed: ", result)?;
        self.check_if_sync_at(site)
    }

    /// Blocking 2-D host-to-device copy of `shape.height` rows.
    #[track_caller]
    pub fn memcpy2d_to_device(
        &mut self,
        dst: DevicePtr,
        src: &[u8],
        shape: Copy2d,
    ) -> CheckResult<()> {
        let site = CallSite::caller();
        let result = self.runtime.copy_2d_to_device(dst, src, shape, None);
        self.check(site, "cudaMemcpy2D to device failed: ", result)
    }

    #[track_caller]
    pub fn memcpy2d_to_device_async(
        &mut self,
        dst: DevicePtr,
        src: &[u8],
        shape: Copy2d,
        stream: StreamHandle,
    ) -> CheckResult<()> {
        let site = CallSite::caller();
        let result = self.runtime.copy_2d_to_device(dst, src, shape, Some(stream));
        self.check(site, "cudaMemcpy2DAsync to device failed: ", result)?;
        self.check_if_sync_at(site)
    }

    #[track_caller]
    pub fn memcpy2d_to_host(
        &mut self,
        dst: &mut [u8],
        src: DevicePtr,
        shape: Copy2d,
    ) -> CheckResult<()> {
        let site = CallSite::caller();
        // SAFETY: blocking copy.
        let result = unsafe { self.runtime.copy_2d_to_host(dst, src, shape, None) };
        self.check(site, "cudaMemcpy2D to host failed: ", result)
    }

    /// # Safety
    /// See [`DebugContext::memcpy_to_host_async`].
    #[track_caller]
    pub unsafe fn memcpy2d_to_host_async(
        &mut self,
        dst: &mut [u8],
        src: DevicePtr,
        shape: Copy2d,
        stream: StreamHandle,
    ) -> CheckResult<()> {
        let site = CallSite::caller();
        let result = self.runtime.copy_2d_to_host(dst, src, shape, Some(stream));
        self.check(site, "cudaMemcpy2DAsync to host failed: ", result)?;
        self.check_if_sync_at(site)
    }

    /// Blocking copy into the device global `symbol`, starting `offset`
    /// bytes in.
    #[track_caller]
    pub fn memcpy_to_symbol(
        &mut self,
        symbol: Symbol,
        offset: usize,
        src: SymbolSource<'_>,
    ) -> CheckResult<()> {
        let site = CallSite::caller();
        let result = self.runtime.copy_to_symbol(symbol, offset, src, None);
        self.check(site, "cudaMemcpyToSymbol failed: ", result)
    }

    #[track_caller]
    pub fn memcpy_to_symbol_async(
        &mut self,
        symbol: Symbol,
        offset: usize,
        src: SymbolSource<'_>,
        stream: StreamHandle,
    ) -> CheckResult<()> {
        let site = CallSite::caller();
        let result = self.runtime.copy_to_symbol(symbol, offset, src, Some(stream));
        self.check(site, "cudaMemcpyToSymbolAsync failed: ", result)?;
        self.check_if_sync_at(site)
    }

    pub(crate) fn copy_to_device_at(
        &mut self,
        site: CallSite,
        dst: DevicePtr,
        src: &[u8],
        stream: Option<StreamHandle>,
    ) -> CheckResult<()> {
        let result = self.runtime.copy_to_device(dst, src, stream);
        match stream {
            None => self.check(site, "cudaMemcpy to device failed: ", result),
            Some(_) => {
                self.check(site, "cudaMemcpyAsync to device failed: ", result)?;
                self.check_if_sync_at(site)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::checked::report::MemorySink;
    use crate::checked::{DebugContext, FailurePolicy};
    use crate::runtime::mock::MockRuntime;
    use crate::runtime::{Copy2d, DevicePtr, SymbolSource};

    fn ctx() -> (DebugContext<MockRuntime>, MemorySink) {
        let sink = MemorySink::new();
        let ctx = DebugContext::new(MockRuntime::new())
            .with_policy(FailurePolicy::Return)
            .with_diagnostics(sink.clone());
        (ctx, sink)
    }

    #[test]
    fn test_async_upload_from_pinned_memory() {
        let (mut ctx, sink) = ctx();
        let ptr = ctx.malloc(8).unwrap();
        let host = ctx.malloc_host(8).unwrap();
        let stream = ctx.stream_create().unwrap();

        // SAFETY: 8 bytes were allocated and are only touched after the
        // stream is synchronized.
        let staging = unsafe { host.as_mut_slice(8) };
        staging.fill(5);
        ctx.memcpy_to_device_async(ptr, &staging[..], stream).unwrap();
        ctx.stream_synchronize(stream).unwrap();
        staging.fill(9);

        assert_eq!(ctx.runtime().read_device(ptr, 8).unwrap(), vec![5u8; 8]);
        ctx.free_host(host).unwrap();
        assert!(sink.is_empty());
    }

    #[test]
    fn test_typed_round_trip() {
        let (mut ctx, sink) = ctx();
        let data = [1.5f32, -2.0, 3.25, 0.0];
        let ptr = ctx.malloc(16).unwrap();
        ctx.memcpy_to_device(ptr, &data).unwrap();

        let mut back = [0f32; 4];
        ctx.memcpy_to_host(&mut back, ptr).unwrap();
        assert_eq!(back, data);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_async_copy_lands_after_sync() {
        let (mut ctx, _sink) = ctx();
        let ptr = ctx.malloc_init0(4).unwrap();
        let stream = ctx.stream_create().unwrap();

        ctx.memcpy_to_device_async(ptr, &[9u8; 4], stream).unwrap();
        assert_eq!(ctx.runtime().read_device(ptr, 4).unwrap(), vec![0; 4]);

        ctx.stream_synchronize(stream).unwrap();
        assert_eq!(ctx.runtime().read_device(ptr, 4).unwrap(), vec![9; 4]);
        ctx.stream_destroy(stream).unwrap();
    }

    #[test]
    fn test_async_read_back_follows_stream_order() {
        let (mut ctx, _sink) = ctx();
        let ptr = ctx.malloc(4).unwrap();
        let stream = ctx.stream_create().unwrap();

        ctx.memcpy_to_device_async(ptr, &[1u8, 2, 3, 4], stream).unwrap();
        let mut out = [0u8; 4];
        unsafe { ctx.memcpy_to_host_async(&mut out, ptr, stream).unwrap() };
        ctx.stream_synchronize(stream).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn test_out_of_bounds_copy_reports() {
        let (mut ctx, sink) = ctx();
        let ptr = ctx.malloc(4).unwrap();
        let err = ctx.memcpy_to_device(ptr, &[0u8; 8]).unwrap_err();
        assert!(err.to_string().contains("cudaMemcpy to device failed"));
        assert_eq!(sink.contents().lines().count(), 2);
    }

    #[test]
    fn test_pitched_2d_copy() {
        let (mut ctx, _sink) = ctx();
        let (ptr, pitch) = ctx.malloc_pitch(3, 3).unwrap();
        let host: Vec<u8> = (1..=9).collect();
        let up = Copy2d {
            dst_pitch: pitch,
            src_pitch: 3,
            width: 3,
            height: 3,
        };
        ctx.memcpy2d_to_device(ptr, &host, up).unwrap();
        assert_eq!(
            ctx.runtime().read_device(ptr.offset(pitch), 3).unwrap(),
            vec![4, 5, 6]
        );

        let mut back = vec![0u8; 9];
        let down = Copy2d {
            dst_pitch: 3,
            src_pitch: pitch,
            width: 3,
            height: 3,
        };
        ctx.memcpy2d_to_host(&mut back, ptr, down).unwrap();
        assert_eq!(back, host);
    }

    #[test]
    fn test_2d_rejects_bad_pitch() {
        let (mut ctx, sink) = ctx();
        let (ptr, _) = ctx.malloc_pitch(8, 2).unwrap();
        let shape = Copy2d {
            dst_pitch: 4,
            src_pitch: 8,
            width: 8,
            height: 2,
        };
        assert!(ctx.memcpy2d_to_device(ptr, &[0u8; 16], shape).is_err());
        assert!(sink.contents().contains("invalid pitch argument"));
    }

    #[test]
    fn test_symbol_copies() {
        let (mut ctx, _sink) = ctx();
        let sym = ctx.runtime().define_symbol(8);
        ctx.memcpy_to_symbol(sym, 0, SymbolSource::Host(&[5, 6, 7, 8]))
            .unwrap();

        let ptr = ctx.malloc(4).unwrap();
        ctx.memcpy_to_device(ptr, &[1u8, 1, 1, 1]).unwrap();
        let stream = ctx.stream_create().unwrap();
        ctx.memcpy_to_symbol_async(sym, 4, SymbolSource::Device { ptr, len: 4 }, stream)
            .unwrap();
        ctx.stream_synchronize(stream).unwrap();

        assert_eq!(
            ctx.runtime().read_symbol(sym).unwrap(),
            vec![5, 6, 7, 8, 1, 1, 1, 1]
        );
    }

    #[test]
    fn test_copy_to_unknown_pointer() {
        let (mut ctx, sink) = ctx();
        assert!(ctx
            .memcpy_to_device(DevicePtr::from_addr(0x10), &[0u32; 1])
            .is_err());
        assert!(!sink.is_empty());
    }
}
