//! End-to-end tests of the `gpu-debug` binary against the simulated runtime.

use std::process::Command;

fn gpu_debug() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_gpu-debug"));
    cmd.env_remove("GPU_DEBUG_SYNC").env_remove("RUST_LOG");
    cmd.args(["--mock", "--config", "does-not-exist.json"]);
    cmd
}

#[test]
fn test_selftest_passes() {
    let out = gpu_debug().args(["selftest", "--sync"]).output().unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(String::from_utf8_lossy(&out.stdout).contains("selftest passed"));
    assert!(out.stderr.is_empty());
}

#[test]
fn test_selftest_with_empty_buffer() {
    let out = gpu_debug()
        .args(["selftest", "--bytes", "0"])
        .output()
        .unwrap();
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    assert!(String::from_utf8_lossy(&out.stdout).contains("selftest passed (0 bytes)"));
}

#[test]
fn test_injected_failure_exits_with_call_site() {
    let out = gpu_debug()
        .args(["selftest", "--fail-at", "malloc"])
        .output()
        .unwrap();
    assert!(!out.status.success());

    let stderr = String::from_utf8_lossy(&out.stderr);
    let mut lines = stderr.lines();
    let site = lines.next().unwrap();
    assert!(site.starts_with("src/main.rs:"), "{stderr}");
    assert_eq!(lines.next(), Some("    cudaMalloc failed: invalid argument"));

    // Exit code is the negated line number, truncated by the OS.
    let line: i32 = site.rsplit(':').next().unwrap().parse().unwrap();
    #[cfg(unix)]
    assert_eq!(out.status.code(), Some((-line) & 0xff));
}

#[test]
fn test_return_policy_reports_error() {
    let out = gpu_debug()
        .args(["selftest", "--policy", "return", "--fail-at", "copy-to-host"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("cudaMemcpy to host failed: invalid argument"));
}

#[test]
fn test_devices_json() {
    let out = gpu_debug().args(["devices", "--json"]).output().unwrap();
    assert!(out.status.success());
    let devices: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(devices.as_array().map(Vec::len), Some(2));
}

#[test]
fn test_select_invalid_device_fails() {
    let out = gpu_debug().args(["select", "9"]).output().unwrap();
    assert!(!out.status.success());
}
