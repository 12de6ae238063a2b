//! Checked stream lifecycle and error inspection.

use tracing::trace;

use super::{CallSite, CheckResult, DebugContext};
use crate::runtime::{Runtime, StreamHandle};

impl<R: Runtime> DebugContext<R> {
    /// Create a stream. Must be paired with one [`DebugContext::stream_destroy`].
    #[track_caller]
    pub fn stream_create(&mut self) -> CheckResult<StreamHandle> {
        let site = CallSite::caller();
        let result = self.runtime.stream_create();
        let stream = self.check(site, "cudaStreamCreate failed: ", result)?;
        trace!(%stream, "Created stream");
        Ok(stream)
    }

    #[track_caller]
    pub fn stream_destroy(&mut self, stream: StreamHandle) -> CheckResult<()> {
        let site = CallSite::caller();
        let result = self.runtime.stream_destroy(stream);
        self.check(site, "cudaStreamDestroy failed: ", result)?;
        trace!(%stream, "Destroyed stream");
        Ok(())
    }

    /// Block until all work on `stream` has completed.
    #[track_caller]
    pub fn stream_synchronize(&mut self, stream: StreamHandle) -> CheckResult<()> {
        let site = CallSite::caller();
        let result = self.runtime.stream_synchronize(stream);
        self.check(site, "cudaStreamSynchronize failed: ", result)
    }

    /// Inspect (and clear) the runtime's last error, typically after a
    /// kernel launch.
    #[track_caller]
    pub fn check_last_error(&mut self) -> CheckResult<()> {
        let site = CallSite::caller();
        let result = self.runtime.get_last_error();
        self.check(site, "cudaGetLastError failed: ", result)
    }

    /// Wait for the whole device, then inspect the last error.
    #[track_caller]
    pub fn sync_and_check_last_error(&mut self) -> CheckResult<()> {
        let site = CallSite::caller();
        let result = self.runtime.device_synchronize();
        self.check(site, "cudaDeviceSynchronize failed: ", result)?;
        let result = self.runtime.get_last_error();
        self.check(site, "cudaGetLastError failed: ", result)
    }

    /// Same as [`DebugContext::sync_and_check_last_error`], but only when sync
    /// mode is on.
    #[track_caller]
    pub fn check_if_sync(&mut self) -> CheckResult<()> {
        let site = CallSite::caller();
        self.check_if_sync_at(site)
    }
}
