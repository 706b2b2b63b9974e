fn main() {
    let arch = std::env::var("CARGO_CFG_TARGET_ARCH").unwrap();
    let os = std::env::var("CARGO_CFG_TARGET_OS").unwrap_or_default();
    let manifest_dir = std::env::var("CARGO_MANIFEST_DIR").unwrap();
    let script_path = std::path::Path::new(&manifest_dir).join(format!("linker-{}.ld", arch));
    println!("cargo:rerun-if-changed={}", script_path.display());

    // Host builds (unit tests) link normally.
    if os == "none" && script_path.exists() {
        println!("cargo:rustc-link-arg-bins=-T{}", script_path.display());
    }
}
