//! Build script for allergen-bridge.
//!
//! The llama.cpp sources are compiled by the `llama-cpp-2` crate's own build
//! script when the `llamacpp` feature is enabled. This script only surfaces
//! which engine the artifact was built against.

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=ANDROID_NDK_HOME");

    // Android hosts load the bridge as a shared library next to
    // libllama/libggml; the NDK toolchain is picked up by llama-cpp-2's cmake.
    let target = std::env::var("TARGET").unwrap_or_default();
    if target.contains("android") && std::env::var("ANDROID_NDK_HOME").is_err() {
        println!("cargo:warning=ANDROID_NDK_HOME is not set; cross-compiling llama.cpp will likely fail");
    }

    #[cfg(feature = "llamacpp")]
    {
        println!("cargo:warning=llamacpp feature enabled, llama.cpp will be compiled from source");
    }
}
