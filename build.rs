use std::env;

fn main() {
    println!("cargo:rerun-if-changed=kernels");
    println!("cargo:rerun-if-env-changed=ROCM_PATH");
    println!("cargo:rerun-if-env-changed=HIPCC");
    println!("cargo:rerun-if-env-changed=ROCm_ARCH");
    println!("cargo:rustc-check-cfg=cfg(hip_bindings)");

    // The software device needs nothing from ROCm
    if env::var_os("CARGO_FEATURE_ROCM").is_none() {
        return;
    }

    #[cfg(feature = "rocm")]
    rocm::build();
}

#[cfg(feature = "rocm")]
mod rocm {
    use std::env;
    use std::path::{Path, PathBuf};
    use std::process::Command;

    // (source, env var exported to the crate)
    const KERNELS: &[(&str, &str)] = &[("kernels/statistics.hip", "ROCMSTAT_STATISTICS_HSACO")];

    fn rocm_root() -> String {
        env::var("ROCM_PATH").unwrap_or_else(|_| "/opt/rocm".to_string())
    }

    pub fn build() {
        println!("cargo:rustc-link-search=native={}/lib", rocm_root());
        println!("cargo:rustc-link-lib=dylib=amdhip64");

        compile_hip_kernels();
        generate_hip_bindings();
    }

    fn compile_hip_kernels() {
        let hipcc = env::var("HIPCC").unwrap_or_else(|_| format!("{}/bin/hipcc", rocm_root()));
        let Some(out_dir) = env::var_os("OUT_DIR").map(PathBuf::from) else {
            println!("cargo:warning=OUT_DIR not set, skipping kernel compilation");
            return;
        };

        if !Path::new(&hipcc).exists() {
            println!(
                "cargo:warning=hipcc not found at {}. Set ROCMSTAT_STATISTICS_HSACO at runtime instead.",
                hipcc
            );
            return;
        }

        // RDNA3 by default; override with e.g. ROCm_ARCH=gfx942
        let target_arch = env::var("ROCm_ARCH").unwrap_or_else(|_| "gfx1100".to_string());

        for (src_file, env_name) in KERNELS {
            if !Path::new(src_file).exists() {
                println!("cargo:warning=Kernel source not found: {}", src_file);
                continue;
            }

            let stem = Path::new(src_file)
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("kernels");
            let hsaco_path = out_dir.join(format!("{}.hsaco", stem));

            let status = Command::new(&hipcc)
                .arg("-c")
                .arg("--genco")
                .arg(format!("--offload-arch={}", target_arch))
                .arg("-O3")
                .arg(src_file)
                .arg("-o")
                .arg(&hsaco_path)
                .status();

            match status {
                Ok(code) if code.success() => {
                    println!("cargo:rustc-env={}={}", env_name, hsaco_path.display());
                }
                Ok(code) => {
                    println!(
                        "cargo:warning=Failed to compile {}: exit code {:?}",
                        src_file,
                        code.code()
                    );
                }
                Err(e) => {
                    println!("cargo:warning=Failed to execute hipcc for {}: {:?}", src_file, e);
                }
            }
        }
    }

    /// Bindings for `hipDeviceProp_t`, used to verify the hand-written field offsets
    fn generate_hip_bindings() {
        let rocm_root = rocm_root();
        let hip_header = format!("{}/include/hip/hip_runtime_api.h", rocm_root);
        let Some(out_dir) = env::var_os("OUT_DIR").map(PathBuf::from) else {
            return;
        };
        let out_file = out_dir.join("hip_device_bindings.rs");

        if !Path::new(&hip_header).exists() {
            println!("cargo:warning=HIP header not found at {}, skipping FFI generation", hip_header);
            return;
        }

        let generated = bindgen::Builder::default()
            .header(&hip_header)
            .clang_arg("-D__HIP_PLATFORM_AMD__")
            .clang_arg(format!("-I{}/include", rocm_root))
            .allowlist_type("hipDeviceProp.*")
            .allowlist_type("hipUUID.*")
            .use_core()
            .derive_debug(true)
            .parse_callbacks(Box::new(bindgen::CargoCallbacks::new()))
            .generate();

        match generated {
            Ok(bindings) => {
                match bindings.write_to_file(&out_file) {
                    Ok(()) => println!("cargo:rustc-cfg=hip_bindings"),
                    Err(e) => println!("cargo:warning=Couldn't write HIP bindings: {}", e),
                }
            }
            Err(e) => {
                println!("cargo:warning=Unable to generate HIP bindings: {:?}", e);
            }
        }
    }
}
