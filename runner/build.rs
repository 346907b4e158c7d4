//! Link settings for the fixed-base launcher.
//!
//! The fixed-base launcher must itself sit at the address its payload was
//! linked for, with no relocations, so the payload can take over the same
//! address range. The base comes from `PEFRM_FIXED_BASE` at build time and
//! is also exported to the crate so dry runs can check against it.

use std::env;

const DEFAULT_FIXED_BASE: &str = "0x400000";

fn main() {
    println!("cargo:rerun-if-env-changed=PEFRM_FIXED_BASE");
    println!("cargo:rerun-if-changed=build.rs");

    let base = env::var("PEFRM_FIXED_BASE").unwrap_or_else(|_| DEFAULT_FIXED_BASE.to_string());
    println!("cargo:rustc-env=PEFRM_FIXED_BASE={}", base);

    let target_os = env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let target_env = env::var("CARGO_CFG_TARGET_ENV").unwrap_or_default();
    if target_os == "windows" && target_env == "msvc" {
        println!("cargo:rustc-link-arg-bin=pefrm-run-fixed=/BASE:{}", base);
        println!("cargo:rustc-link-arg-bin=pefrm-run-fixed=/DYNAMICBASE:NO");
        println!("cargo:rustc-link-arg-bin=pefrm-run-fixed=/FIXED");
    }
}
