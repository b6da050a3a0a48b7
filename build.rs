// CLASSIFICATION: COMMUNITY
// Filename: build.rs v0.6
// Author: Lukas Bower
// Date Modified: 2026-10-17

fn main() {
    use std::env;

    println!("cargo:rerun-if-env-changed=CUDA_HOME");
    println!("cargo:rerun-if-env-changed=PATH");

    let mut search = env::var("PATH").unwrap_or_default();
    if let Ok(home) = env::var("CUDA_HOME") {
        search = format!("{home}/bin:{search}");
    } else {
        search = format!("/usr/local/cuda/bin:/usr/bin:{search}");
    }

    let cwd = env::current_dir().unwrap_or_default();
    match which::which_in("nvcc", Some(&search), cwd) {
        Ok(path) => {
            println!("cargo:rustc-env=CUDRV_BUILD_NVCC={}", path.display());
        }
        Err(_) => {
            println!("cargo:warning=nvcc missing; runtime compilation falls back to PATH lookup");
            println!("cargo:rustc-env=CUDRV_BUILD_NVCC=nvcc");
        }
    }
}
