//! Diagnostic output.
//!
//! Diagnostics are human-readable, not meant for parsing:
//!
//! ```text
//! src/solver.rs:118
//!     cudaMemcpy failed: invalid argument
//! ```

use std::fmt;
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use super::{CallSite, DebugContext};
use crate::runtime::Runtime;

/// Write one diagnostic message: the call site, then the indented text.
///
/// Diagnostics are best effort; a broken sink never masks the failure
/// being reported.
pub fn write_diagnostic(out: &mut dyn Write, site: CallSite, text: &str) {
    let _ = writeln!(out, "{site}\n    {text}");
    let _ = out.flush();
}

/// Kernel launch dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dim3 {
    pub x: u32,
    pub y: u32,
    pub z: u32,
}

impl Dim3 {
    pub const fn new(x: u32, y: u32, z: u32) -> Self {
        Self { x, y, z }
    }

    /// Total number of elements (blocks or threads).
    pub fn volume(&self) -> u64 {
        self.x as u64 * self.y as u64 * self.z as u64
    }
}

impl Default for Dim3 {
    fn default() -> Self {
        Self::new(1, 1, 1)
    }
}

impl From<u32> for Dim3 {
    fn from(x: u32) -> Self {
        Self::new(x, 1, 1)
    }
}

impl From<(u32, u32)> for Dim3 {
    fn from((x, y): (u32, u32)) -> Self {
        Self::new(x, y, 1)
    }
}

impl From<(u32, u32, u32)> for Dim3 {
    fn from((x, y, z): (u32, u32, u32)) -> Self {
        Self::new(x, y, z)
    }
}

impl fmt::Display for Dim3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}

impl<R: Runtime> DebugContext<R> {
    /// Print the launch geometry of `kernel` to the diagnostic sink unless
    /// `silent`. Has no other effect.
    #[track_caller]
    pub fn info_gridsize(
        &mut self,
        silent: bool,
        grid: impl Into<Dim3>,
        block: impl Into<Dim3>,
        kernel: &str,
    ) {
        if silent {
            return;
        }
        let site = CallSite::caller();
        let (grid, block) = (grid.into(), block.into());
        let text = format!("kernel {kernel} grid={grid} block={block}");
        write_diagnostic(&mut self.diagnostics, site, &text);
    }
}

/// Cloneable in-memory sink; every clone appends to the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything written so far.
    pub fn contents(&self) -> String {
        let buf = self.buf.lock().unwrap_or_else(|p| p.into_inner());
        String::from_utf8_lossy(&buf).into_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.lock().unwrap_or_else(|p| p.into_inner()).is_empty()
    }

    pub fn clear(&self) {
        self.buf.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

impl Write for MemorySink {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checked::FailurePolicy;
    use crate::runtime::mock::MockRuntime;

    #[test]
    fn test_write_diagnostic_format() {
        let mut out = Vec::new();
        write_diagnostic(&mut out, CallSite::new("src/a.rs", 12), "boom");
        assert_eq!(String::from_utf8(out).unwrap(), "src/a.rs:12\n    boom\n");
    }

    #[test]
    fn test_info_gridsize() {
        let sink = MemorySink::new();
        let mut ctx = DebugContext::new(MockRuntime::new())
            .with_policy(FailurePolicy::Return)
            .with_diagnostics(sink.clone());

        ctx.info_gridsize(true, 4, 128, "silent_kernel");
        assert!(sink.is_empty());

        let line = line!() + 1;
        ctx.info_gridsize(false, (8, 2), (32, 4, 1), "extrema");
        assert_eq!(
            sink.contents(),
            format!(
                "{}:{}\n    kernel extrema grid=(8,2,1) block=(32,4,1)\n",
                file!(),
                line
            )
        );
    }

    #[test]
    fn test_dim3_volume() {
        assert_eq!(Dim3::new(4, 3, 2).volume(), 24);
        assert_eq!(Dim3::default().volume(), 1);
    }
}
