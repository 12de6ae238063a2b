//! Checked byte fills and typed fills.

use bytemuck::Pod;

use super::{CallSite, CheckResult, DebugContext};
use crate::runtime::{DevicePtr, Runtime, StreamHandle};

impl<R: Runtime> DebugContext<R> {
    /// Blocking fill of `bytes` bytes at `ptr` with `value`.
    #[track_caller]
    pub fn memset(&mut self, ptr: DevicePtr, value: u8, bytes: usize) -> CheckResult<()> {
        let site = CallSite::caller();
        self.memset_at(site, ptr, value, bytes, None)
    }

    /// Fill enqueued on `stream`.
    #[track_caller]
    pub fn memset_async(
        &mut self,
        ptr: DevicePtr,
        value: u8,
        bytes: usize,
        stream: StreamHandle,
    ) -> CheckResult<()> {
        let site = CallSite::caller();
        self.memset_at(site, ptr, value, bytes, Some(stream))
    }

    /// Zero exactly one `T` at `ptr`.
    #[track_caller]
    pub fn set_zero_async<T: Pod>(&mut self, ptr: DevicePtr, stream: StreamHandle) -> CheckResult<()> {
        let site = CallSite::caller();
        self.memset_at(site, ptr, 0, std::mem::size_of::<T>(), Some(stream))
    }

    /// Store `value` at `ptr` by copying its bytes. The bytes are staged
    /// from pageable memory, so `value` is free once this returns.
    #[track_caller]
    pub fn set_value_async<T: Pod>(
        &mut self,
        ptr: DevicePtr,
        value: T,
        stream: StreamHandle,
    ) -> CheckResult<()> {
        let site = CallSite::caller();
        self.copy_to_device_at(site, ptr, bytemuck::bytes_of(&value), Some(stream))
    }

    pub(crate) fn memset_at(
        &mut self,
        site: CallSite,
        ptr: DevicePtr,
        value: u8,
        bytes: usize,
        stream: Option<StreamHandle>,
    ) -> CheckResult<()> {
        let result = self.runtime.memset(ptr, value, bytes, stream);
        match stream {
            None => self.check(site, "cudaMemset failed: ", result),
            Some(_) => {
                self.check(site, "cudaMemsetAsync failed: ", result)?;
                self.check_if_sync_at(site)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytemuck::{Pod, Zeroable};

    use crate::checked::report::MemorySink;
    use crate::checked::{DebugContext, FailurePolicy};
    use crate::runtime::mock::MockRuntime;
    use crate::runtime::StreamHandle;

    #[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
    #[repr(C)]
    struct Extremum {
        x: f32,
        y: f32,
        scale: u32,
    }

    fn ctx() -> (DebugContext<MockRuntime>, MemorySink) {
        let sink = MemorySink::new();
        let ctx = DebugContext::new(MockRuntime::new())
            .with_policy(FailurePolicy::Return)
            .with_diagnostics(sink.clone());
        (ctx, sink)
    }

    #[test]
    fn test_set_zero_writes_exactly_size_of() {
        let (mut ctx, _sink) = ctx();
        let ptr = ctx.malloc(16).unwrap();
        ctx.memset(ptr, 0xff, 16).unwrap();

        ctx.set_zero_async::<Extremum>(ptr, StreamHandle::DEFAULT).unwrap();
        ctx.stream_synchronize(StreamHandle::DEFAULT).unwrap();

        let bytes = ctx.runtime().read_device(ptr, 16).unwrap();
        assert_eq!(&bytes[..12], &[0; 12]);
        assert_eq!(&bytes[12..], &[0xff; 4]);
    }

    #[test]
    fn test_set_zero_matches_byte_fill() {
        let (mut ctx, _sink) = ctx();
        let a = ctx.malloc(8).unwrap();
        let b = ctx.malloc(8).unwrap();
        ctx.memset(a, 0x55, 8).unwrap();
        ctx.memset(b, 0x55, 8).unwrap();

        ctx.set_zero_async::<u32>(a, StreamHandle::DEFAULT).unwrap();
        ctx.memset_async(b, 0, std::mem::size_of::<u32>(), StreamHandle::DEFAULT)
            .unwrap();
        ctx.stream_synchronize(StreamHandle::DEFAULT).unwrap();

        assert_eq!(
            ctx.runtime().read_device(a, 8).unwrap(),
            ctx.runtime().read_device(b, 8).unwrap()
        );
    }

    #[test]
    fn test_set_value() {
        let (mut ctx, _sink) = ctx();
        let ptr = ctx.malloc(12).unwrap();
        let stream = ctx.stream_create().unwrap();
        let value = Extremum {
            x: 1.0,
            y: 2.0,
            scale: 3,
        };
        ctx.set_value_async(ptr, value, stream).unwrap();
        ctx.stream_synchronize(stream).unwrap();

        let mut back = [Extremum::zeroed()];
        ctx.memcpy_to_host(&mut back, ptr).unwrap();
        assert_eq!(back[0], value);
    }

    #[test]
    fn test_memset_out_of_range() {
        let (mut ctx, sink) = ctx();
        let ptr = ctx.malloc(4).unwrap();
        let err = ctx.memset_async(ptr, 0, 5, StreamHandle::DEFAULT).unwrap_err();
        assert!(err.message().starts_with("cudaMemsetAsync"));
        assert!(sink.contents().contains("invalid argument"));
    }
}
