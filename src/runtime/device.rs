//! GPU device capability descriptors.
//!
//! Mirrors the subset of the runtime's device property record that the
//! reporter prints. When compiled without the `cuda` feature, preset
//! descriptors stand in for real hardware.

use serde::{Deserialize, Serialize};

/// Capabilities of a single GPU device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceProperties {
    /// Device name (e.g., "NVIDIA GeForce GTX 1070").
    pub name: String,

    /// Compute capability (major, minor).
    pub compute_capability: (u32, u32),

    /// Total global memory in bytes.
    pub total_global_mem: usize,

    /// Total constant memory in bytes.
    pub total_const_mem: usize,

    /// Shared memory available per block in bytes.
    pub shared_mem_per_block: usize,

    /// 32-bit registers available per block.
    pub regs_per_block: u32,

    /// Threads per warp.
    pub warp_size: u32,

    /// Maximum pitch in bytes allowed by memory copies.
    pub mem_pitch: usize,

    /// Maximum threads per block.
    pub max_threads_per_block: u32,

    /// Maximum size of each block dimension.
    pub max_threads_dim: [u32; 3],

    /// Maximum size of each grid dimension.
    pub max_grid_size: [u32; 3],

    /// Maximum resident threads per multiprocessor.
    pub max_threads_per_multiprocessor: u32,

    /// Number of multiprocessors.
    pub multi_processor_count: u32,

    /// Core clock in kHz.
    pub clock_rate_khz: u32,

    /// Memory clock in kHz.
    pub memory_clock_rate_khz: u32,

    /// Global memory bus width in bits.
    pub memory_bus_width: u32,

    /// L2 cache size in bytes.
    pub l2_cache_size: u32,

    /// Alignment requirement for textures.
    pub texture_alignment: usize,

    /// Pitch alignment requirement for texture references bound to pitched memory.
    pub texture_pitch_alignment: usize,

    /// Number of asynchronous copy engines.
    pub async_engine_count: u32,

    /// Device can run multiple kernels concurrently.
    pub concurrent_kernels: bool,

    /// Kernels are subject to a run time limit.
    pub kernel_exec_timeout_enabled: bool,

    /// Device is integrated with host memory.
    pub integrated: bool,

    /// Device can map host memory into its address space.
    pub can_map_host_memory: bool,

    /// Device shares a unified address space with the host.
    pub unified_addressing: bool,

    /// ECC is enabled.
    pub ecc_enabled: bool,

    /// Compute mode (0 = default, 1 = exclusive, 2 = prohibited, 3 = exclusive process).
    pub compute_mode: u32,

    /// PCI domain, bus and device IDs.
    pub pci_location: (u32, u32, u32),
}

impl DeviceProperties {
    /// Peak memory bandwidth in bytes/sec (double data rate).
    pub fn peak_memory_bandwidth(&self) -> u64 {
        2 * self.memory_clock_rate_khz as u64 * 1000 * (self.memory_bus_width as u64 / 8)
    }

    /// Human-readable compute mode.
    pub fn compute_mode_name(&self) -> &'static str {
        match self.compute_mode {
            0 => "default",
            1 => "exclusive",
            2 => "prohibited",
            3 => "exclusive process",
            _ => "unknown",
        }
    }
}

/// Create stub descriptors for a pair of consumer Pascal cards
/// (2x GTX 1070, 8 GB each).
pub fn stub_devices_molly() -> Vec<DeviceProperties> {
    (0..2).map(|bus| gtx_1070(bus + 1)).collect()
}

/// Create stub descriptors for a pair of Maxwell workstation cards
/// (2x Quadro M6000, 24 GB each).
pub fn stub_devices_wintermute() -> Vec<DeviceProperties> {
    (0..2).map(|bus| quadro_m6000(bus + 3)).collect()
}

fn gtx_1070(pci_bus: u32) -> DeviceProperties {
    DeviceProperties {
        name: "NVIDIA GeForce GTX 1070".to_string(),
        compute_capability: (6, 1),
        total_global_mem: 8 * 1024 * 1024 * 1024, // 8 GB
        total_const_mem: 64 * 1024,
        shared_mem_per_block: 48 * 1024,
        regs_per_block: 65536,
        warp_size: 32,
        mem_pitch: 2_147_483_647,
        max_threads_per_block: 1024,
        max_threads_dim: [1024, 1024, 64],
        max_grid_size: [2_147_483_647, 65535, 65535],
        max_threads_per_multiprocessor: 2048,
        multi_processor_count: 15,
        clock_rate_khz: 1_683_000,
        memory_clock_rate_khz: 4_004_000,
        memory_bus_width: 256,
        l2_cache_size: 2 * 1024 * 1024,
        texture_alignment: 512,
        texture_pitch_alignment: 32,
        async_engine_count: 2,
        concurrent_kernels: true,
        kernel_exec_timeout_enabled: false,
        integrated: false,
        can_map_host_memory: true,
        unified_addressing: true,
        ecc_enabled: false,
        compute_mode: 0,
        pci_location: (0, pci_bus, 0),
    }
}

fn quadro_m6000(pci_bus: u32) -> DeviceProperties {
    DeviceProperties {
        name: "NVIDIA Quadro M6000".to_string(),
        compute_capability: (5, 2),
        total_global_mem: 24 * 1024 * 1024 * 1024, // 24 GB
        total_const_mem: 64 * 1024,
        shared_mem_per_block: 48 * 1024,
        regs_per_block: 65536,
        warp_size: 32,
        mem_pitch: 2_147_483_647,
        max_threads_per_block: 1024,
        max_threads_dim: [1024, 1024, 64],
        max_grid_size: [2_147_483_647, 65535, 65535],
        max_threads_per_multiprocessor: 2048,
        multi_processor_count: 24,
        clock_rate_khz: 1_114_000,
        memory_clock_rate_khz: 3_305_000,
        memory_bus_width: 384,
        l2_cache_size: 3 * 1024 * 1024,
        texture_alignment: 512,
        texture_pitch_alignment: 32,
        async_engine_count: 2,
        concurrent_kernels: true,
        kernel_exec_timeout_enabled: false,
        integrated: false,
        can_map_host_memory: true,
        unified_addressing: true,
        ecc_enabled: true,
        compute_mode: 0,
        pci_location: (0, pci_bus, 0),
    }
}
