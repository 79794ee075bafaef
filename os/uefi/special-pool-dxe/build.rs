use std::env;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Boot-services drivers stay resident after their entry point returns;
    // applications are unloaded.
    if env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("uefi") {
        println!("cargo:rustc-link-arg-bins=/subsystem:efi_boot_service_driver");
    }
}
