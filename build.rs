use std::env;
use std::fs;
use std::path::Path;

fn main() {
    println!("cargo:rerun-if-changed=memory.x");
    println!("cargo:rerun-if-changed=build.rs");

    // The library and its tests build on the host; only bare-metal builds need the linker scripts
    if env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("none") {
        return;
    }

    // Copy memory.x next to the build output so `link.x` can include it
    let out_dir = env::var("OUT_DIR").unwrap();
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();
    fs::copy(
        Path::new(&manifest_dir).join("memory.x"),
        Path::new(&out_dir).join("memory.x"),
    )
    .unwrap();
    println!("cargo:rustc-link-search={}", out_dir);

    println!("cargo:rustc-link-arg-bins=--nmagic");

    // Main linker script, uses the memory layout from above
    println!("cargo:rustc-link-arg-bins=-Tlink.x");

    // Only link defmt if the feature is enabled
    if env::var("CARGO_FEATURE_DEFMT").is_ok() {
        println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
    }
}
