//! Call-site checked wrappers around the runtime.
//!
//! Every wrapper captures its caller's file and line with `#[track_caller]`,
//! forwards to the [`Runtime`], and inspects the returned status. A failure
//! writes one diagnostic message to the context's sink and then applies the
//! context's [`FailurePolicy`].
//!
//! - [`alloc`]: device, pitched and pinned host allocation
//! - [`memcpy`]: 1-D, 2-D and symbol copies
//! - [`memset`]: byte fills and typed fills
//! - [`stream`]: stream lifecycle and last-error inspection
//! - [`report`]: diagnostic sinks and launch-geometry reporting

pub mod alloc;
pub mod memcpy;
pub mod memset;
pub mod report;
pub mod stream;

use std::fmt;
use std::io::Write;
use std::panic::Location;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::config::DebugConfig;
use crate::runtime::{DevicePtr, RtResult, Runtime, RuntimeError};

use report::write_diagnostic;

/// Source location of a checked call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSite {
    pub file: &'static str,
    pub line: u32,
    pub column: u32,
}

impl CallSite {
    /// Location of the (outermost `#[track_caller]`) caller.
    #[track_caller]
    pub fn caller() -> Self {
        Self::from(Location::caller())
    }

    pub const fn new(file: &'static str, line: u32) -> Self {
        Self {
            file,
            line,
            column: 0,
        }
    }

    /// Exit code used by [`FailurePolicy::Exit`]: the negated line number.
    pub fn exit_code(&self) -> i32 {
        -(self.line as i32)
    }
}

impl From<&'static Location<'static>> for CallSite {
    fn from(loc: &'static Location<'static>) -> Self {
        Self {
            file: loc.file(),
            line: loc.line(),
            column: loc.column(),
        }
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// A failed checked call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckError {
    #[error("{site}: {message}{source}")]
    Runtime {
        site: CallSite,
        message: String,
        source: RuntimeError,
    },

    #[error("{site}: {message}")]
    Failed { site: CallSite, message: String },
}

impl CheckError {
    pub fn site(&self) -> CallSite {
        match self {
            CheckError::Runtime { site, .. } | CheckError::Failed { site, .. } => *site,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            CheckError::Runtime { message, .. } | CheckError::Failed { message, .. } => message,
        }
    }

    /// The native status behind the failure, if any.
    pub fn runtime_error(&self) -> Option<&RuntimeError> {
        match self {
            CheckError::Runtime { source, .. } => Some(source),
            CheckError::Failed { .. } => None,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.site().exit_code()
    }

    /// Text printed on the indented diagnostic line.
    fn detail(&self) -> String {
        match self {
            CheckError::Runtime {
                message, source, ..
            } => format!("{message}{source}"),
            CheckError::Failed { message, .. } => message.clone(),
        }
    }
}

pub type CheckResult<T> = Result<T, CheckError>;

/// What a context does after reporting a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Terminate the process with the negated call-site line as exit code.
    Exit,
    /// Panic with the formatted error.
    Panic,
    /// Hand the error back to the caller.
    Return,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            FailurePolicy::Panic
        } else {
            FailurePolicy::Return
        }
    }
}

/// Handle through which all checked calls are made.
///
/// Owns the runtime, the forced-synchronous flag, the failure policy and the
/// diagnostic sink (stderr unless replaced).
pub struct DebugContext<R> {
    runtime: R,
    sync_mode: bool,
    policy: FailurePolicy,
    diagnostics: Box<dyn Write + Send>,
}

impl<R: fmt::Debug> fmt::Debug for DebugContext<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugContext")
            .field("runtime", &self.runtime)
            .field("sync_mode", &self.sync_mode)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl<R: Runtime> DebugContext<R> {
    pub fn new(runtime: R) -> Self {
        Self {
            runtime,
            sync_mode: false,
            policy: FailurePolicy::default(),
            diagnostics: Box::new(std::io::stderr()),
        }
    }

    pub fn from_config(runtime: R, config: &DebugConfig) -> Self {
        let mut ctx = Self::new(runtime).with_policy(config.policy);
        ctx.set_sync_mode(config.sync_mode);
        ctx
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Redirect diagnostics (e.g. to a [`report::MemorySink`] in tests).
    pub fn with_diagnostics(mut self, sink: impl Write + Send + 'static) -> Self {
        self.diagnostics = Box::new(sink);
        self
    }

    /// Force every asynchronous wrapper to wait for the device and check the
    /// last error before returning. Very slow; meant for fault localization.
    pub fn set_sync_mode(&mut self, on: bool) {
        if on != self.sync_mode {
            tracing::info!(on, "Synchronous debug mode changed");
        }
        self.sync_mode = on;
    }

    pub fn sync_mode(&self) -> bool {
        self.sync_mode
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: FailurePolicy) {
        self.policy = policy;
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn into_runtime(self) -> R {
        self.runtime
    }

    /// Report `message` as a failure at the caller's location and apply the
    /// policy. Under [`FailurePolicy::Return`] the error is handed back.
    #[track_caller]
    pub fn fatal(&mut self, message: impl Into<String>) -> CheckError {
        let err = CheckError::Failed {
            site: CallSite::caller(),
            message: message.into(),
        };
        self.fail(err)
    }

    /// Fail with `message` if `ptr` is null.
    #[track_caller]
    pub fn check_non_null(&mut self, ptr: DevicePtr, message: &str) -> CheckResult<DevicePtr> {
        if ptr.is_null() {
            return Err(self.fatal(message));
        }
        Ok(ptr)
    }

    /// Inspect a runtime status on behalf of the call at `site`.
    pub(crate) fn check<T>(
        &mut self,
        site: CallSite,
        message: &str,
        result: RtResult<T>,
    ) -> CheckResult<T> {
        result.map_err(|source| {
            self.fail(CheckError::Runtime {
                site,
                message: message.to_string(),
                source,
            })
        })
    }

    /// After an asynchronous call: when sync mode is on, wait for the device
    /// and inspect the last error.
    pub(crate) fn check_if_sync_at(&mut self, site: CallSite) -> CheckResult<()> {
        if !self.sync_mode {
            return Ok(());
        }
        let result = self.runtime.device_synchronize();
        self.check(site, "cudaDeviceSynchronize failed: ", result)?;
        let result = self.runtime.get_last_error();
        self.check(site, "cudaGetLastError after sync: ", result)
    }

    fn fail(&mut self, err: CheckError) -> CheckError {
        let site = err.site();
        let detail = err.detail();
        error!(
            file = site.file,
            line = site.line,
            code = err.runtime_error().map(|e| e.code),
            "{detail}"
        );
        write_diagnostic(&mut self.diagnostics, site, &detail);

        match self.policy {
            FailurePolicy::Exit => std::process::exit(err.exit_code()),
            FailurePolicy::Panic => panic!("{err}"),
            FailurePolicy::Return => err,
        }
    }
}
