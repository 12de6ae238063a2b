//! Device property reporter.
//!
//! Enumerates every compute device once at construction, keeps their
//! capability descriptors, and prints them on request. Unlike the checked
//! layer, runtime failures are returned unchanged: no diagnostics, no
//! failure policy.

use std::io::{self, Write};

use thiserror::Error;
use tracing::{debug, info};

use crate::runtime::{DeviceProperties, Runtime, RuntimeError};

#[derive(Error, Debug)]
pub enum ReporterError {
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("failed to write device report: {0}")]
    Io(#[from] io::Error),
}

/// Owns one descriptor per device for its lifetime.
#[derive(Debug)]
pub struct DevicePropReporter<R> {
    runtime: R,
    properties: Vec<DeviceProperties>,
}

impl<R: Runtime> DevicePropReporter<R> {
    /// Query all devices; print them to stdout when `output` is set.
    pub fn new(runtime: R, output: bool) -> Result<Self, ReporterError> {
        let reporter = Self::query(runtime)?;
        if output {
            reporter.print()?;
        }
        Ok(reporter)
    }

    /// Like [`DevicePropReporter::new`], printing to `out` instead.
    pub fn new_with_writer(
        runtime: R,
        output: bool,
        out: &mut dyn Write,
    ) -> Result<Self, ReporterError> {
        let reporter = Self::query(runtime)?;
        if output {
            reporter.print_to(out)?;
        }
        Ok(reporter)
    }

    fn query(runtime: R) -> Result<Self, RuntimeError> {
        let count = runtime.device_count()?;
        let properties = (0..count)
            .map(|device| runtime.device_properties(device))
            .collect::<Result<Vec<_>, _>>()?;
        info!(devices = count, "Enumerated GPU devices");
        Ok(Self {
            runtime,
            properties,
        })
    }

    /// Print every device to stdout.
    pub fn print(&self) -> io::Result<()> {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        self.print_to(&mut out)
    }

    /// Print one block per device.
    pub fn print_to(&self, out: &mut dyn Write) -> io::Result<()> {
        for (index, props) in self.properties.iter().enumerate() {
            write_device(out, index, props)?;
        }
        out.flush()
    }

    /// Make device `n` active for subsequent runtime calls. The index is not
    /// validated here; the runtime's answer is returned as-is.
    pub fn set(&self, n: usize) -> Result<(), RuntimeError> {
        self.runtime.set_device(n)?;
        debug!(device = n, "Selected active device");
        Ok(())
    }

    pub fn devices(&self) -> &[DeviceProperties] {
        &self.properties
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    /// Release the descriptors and hand back the runtime.
    pub fn into_runtime(self) -> R {
        self.runtime
    }
}

const MIB: usize = 1024 * 1024;

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

fn write_device(out: &mut dyn Write, index: usize, p: &DeviceProperties) -> io::Result<()> {
    let (major, minor) = p.compute_capability;
    let (domain, bus, device) = p.pci_location;
    let [tx, ty, tz] = p.max_threads_dim;
    let [gx, gy, gz] = p.max_grid_size;

    writeln!(out, "Device {index}: \"{}\"", p.name)?;
    writeln!(out, "    Compute capability:           {major}.{minor}")?;
    writeln!(
        out,
        "    Total global memory:          {} MiB ({} bytes)",
        p.total_global_mem / MIB,
        p.total_global_mem
    )?;
    writeln!(out, "    Total constant memory:        {} bytes", p.total_const_mem)?;
    writeln!(out, "    Shared memory per block:      {} bytes", p.shared_mem_per_block)?;
    writeln!(out, "    Registers per block:          {}", p.regs_per_block)?;
    writeln!(out, "    Warp size:                    {}", p.warp_size)?;
    writeln!(out, "    Maximum memory pitch:         {} bytes", p.mem_pitch)?;
    writeln!(out, "    Max threads per block:        {}", p.max_threads_per_block)?;
    writeln!(out, "    Max block dimensions:         {tx} x {ty} x {tz}")?;
    writeln!(out, "    Max grid dimensions:          {gx} x {gy} x {gz}")?;
    writeln!(
        out,
        "    Max threads per multiproc:    {}",
        p.max_threads_per_multiprocessor
    )?;
    writeln!(out, "    Multiprocessors:              {}", p.multi_processor_count)?;
    writeln!(
        out,
        "    Clock rate:                   {:.0} MHz",
        p.clock_rate_khz as f64 / 1000.0
    )?;
    writeln!(
        out,
        "    Memory clock rate:            {:.0} MHz",
        p.memory_clock_rate_khz as f64 / 1000.0
    )?;
    writeln!(out, "    Memory bus width:             {} bits", p.memory_bus_width)?;
    writeln!(
        out,
        "    Peak memory bandwidth:        {:.1} GB/s",
        p.peak_memory_bandwidth() as f64 / 1e9
    )?;
    writeln!(out, "    L2 cache size:                {} bytes", p.l2_cache_size)?;
    writeln!(out, "    Texture alignment:            {} bytes", p.texture_alignment)?;
    writeln!(
        out,
        "    Texture pitch alignment:      {} bytes",
        p.texture_pitch_alignment
    )?;
    writeln!(out, "    Async copy engines:           {}", p.async_engine_count)?;
    writeln!(out, "    Concurrent kernels:           {}", yes_no(p.concurrent_kernels))?;
    writeln!(
        out,
        "    Kernel run time limit:        {}",
        yes_no(p.kernel_exec_timeout_enabled)
    )?;
    writeln!(out, "    Integrated:                   {}", yes_no(p.integrated))?;
    writeln!(out, "    Can map host memory:          {}", yes_no(p.can_map_host_memory))?;
    writeln!(out, "    Unified addressing:           {}", yes_no(p.unified_addressing))?;
    writeln!(out, "    ECC enabled:                  {}", yes_no(p.ecc_enabled))?;
    writeln!(out, "    Compute mode:                 {}", p.compute_mode_name())?;
    writeln!(out, "    PCI domain/bus/device:        {domain}/{bus}/{device}")?;
    Ok(())
}
