//! Checked device and pinned-host allocation.
//!
//! Every allocation must be paired with exactly one matching free. This is
//! not tracked; it is the caller's job.

use tracing::trace;

use super::{CallSite, CheckResult, DebugContext};
use crate::runtime::{DevicePtr, HostPtr, Runtime};

impl<R: Runtime> DebugContext<R> {
    /// Allocate `bytes` of device memory. Contents are undefined.
    #[track_caller]
    pub fn malloc(&mut self, bytes: usize) -> CheckResult<DevicePtr> {
        let site = CallSite::caller();
        self.malloc_at(site, bytes)
    }

    /// Allocate `bytes` of device memory and zero it synchronously.
    #[track_caller]
    pub fn malloc_init0(&mut self, bytes: usize) -> CheckResult<DevicePtr> {
        let site = CallSite::caller();
        let ptr = self.malloc_at(site, bytes)?;
        self.memset_at(site, ptr, 0, bytes, None)?;
        Ok(ptr)
    }

    /// Allocate `height` rows of `width` bytes, padded for alignment.
    /// Returns the allocation and its row pitch in bytes.
    #[track_caller]
    pub fn malloc_pitch(&mut self, width: usize, height: usize) -> CheckResult<(DevicePtr, usize)> {
        let site = CallSite::caller();
        let result = self.runtime.malloc_pitch(width, height);
        let (ptr, pitch) = self.check(site, "cudaMallocPitch failed: ", result)?;
        trace!(%ptr, width, height, pitch, "Allocated pitched device memory");
        Ok((ptr, pitch))
    }

    #[track_caller]
    pub fn free(&mut self, ptr: DevicePtr) -> CheckResult<()> {
        let site = CallSite::caller();
        let result = self.runtime.free(ptr);
        self.check(site, "cudaFree failed: ", result)?;
        trace!(%ptr, "Freed device memory");
        Ok(())
    }

    /// Allocate `bytes` of page-locked host memory.
    #[track_caller]
    pub fn malloc_host(&mut self, bytes: usize) -> CheckResult<HostPtr> {
        let site = CallSite::caller();
        let result = self.runtime.malloc_host(bytes);
        let ptr = self.check(site, "cudaMallocHost failed: ", result)?;
        trace!(bytes, "Allocated pinned host memory");
        Ok(ptr)
    }

    #[track_caller]
    pub fn free_host(&mut self, ptr: HostPtr) -> CheckResult<()> {
        let site = CallSite::caller();
        let result = self.runtime.free_host(ptr);
        self.check(site, "cudaFreeHost failed: ", result)
    }

    pub(crate) fn malloc_at(&mut self, site: CallSite, bytes: usize) -> CheckResult<DevicePtr> {
        let result = self.runtime.malloc(bytes);
        let ptr = self.check(site, "cudaMalloc failed: ", result)?;
        trace!(%ptr, bytes, "Allocated device memory");
        Ok(ptr)
    }
}

#[cfg(test)]
mod tests {
    use crate::checked::report::MemorySink;
    use crate::checked::{DebugContext, FailurePolicy};
    use crate::runtime::mock::{MockOp, MockRuntime, PITCH_ALIGNMENT};
    use crate::runtime::RuntimeError;

    fn ctx() -> (DebugContext<MockRuntime>, MemorySink) {
        let sink = MemorySink::new();
        let ctx = DebugContext::new(MockRuntime::new())
            .with_policy(FailurePolicy::Return)
            .with_diagnostics(sink.clone());
        (ctx, sink)
    }

    #[test]
    fn test_malloc_init0_zeroes() {
        let (mut ctx, sink) = ctx();
        let ptr = ctx.malloc_init0(32).unwrap();
        assert_eq!(ctx.runtime().read_device(ptr, 32).unwrap(), vec![0; 32]);
        ctx.free(ptr).unwrap();
        assert!(sink.is_empty());
    }

    #[test]
    fn test_malloc_init0_reports_memset_failure() {
        let (mut ctx, sink) = ctx();
        ctx.runtime().fail_next(MockOp::Memset, RuntimeError::INVALID_VALUE);
        let line = line!() + 1;
        let err = ctx.malloc_init0(32).unwrap_err();
        assert_eq!(err.site().line, line);
        assert!(sink.contents().contains("cudaMemset failed: invalid argument"));
    }

    #[test]
    fn test_malloc_pitch() {
        let (mut ctx, _sink) = ctx();
        let (ptr, pitch) = ctx.malloc_pitch(100, 10).unwrap();
        assert!(!ptr.is_null());
        assert_eq!(pitch, PITCH_ALIGNMENT);
        ctx.free(ptr).unwrap();
        assert_eq!(ctx.runtime().live_allocations(), 0);
    }

    #[test]
    fn test_host_alloc_pairing() {
        let (mut ctx, _sink) = ctx();
        let host = ctx.malloc_host(128).unwrap();
        assert_eq!(ctx.runtime().live_host_allocations(), 1);
        ctx.free_host(host).unwrap();
        assert_eq!(ctx.runtime().live_host_allocations(), 0);
        assert!(ctx.free_host(host).is_err());
    }
}
