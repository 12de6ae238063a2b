//! Build script for gpu-debug.
//!
//! The CUDA runtime is loaded through `cudarc`, so nothing is compiled or
//! linked here; the script only reports the toolkit location in use.

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=CUDA_PATH");

    #[cfg(feature = "cuda")]
    {
        let cuda_path =
            std::env::var("CUDA_PATH").unwrap_or_else(|_| "/usr/local/cuda".to_string());
        println!("cargo:warning=CUDA feature enabled, expecting the toolkit at {cuda_path}");
    }
}
