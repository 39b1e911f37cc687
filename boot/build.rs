use std::path::PathBuf;
use bootloader::{BiosBoot, UefiBoot};

/// Kernel binary name, as set by `[[bin]]` in `os/Cargo.toml`.
const KERNEL_NAME: &str = "bastion";

fn main() {
    let workspace_root = PathBuf::from(std::env::var("CARGO_MANIFEST_DIR").unwrap())
        .parent()
        .unwrap()
        .to_path_buf();

    // Kernel profile to package; "debug" unless BASTION_PROFILE says otherwise.
    let profile = std::env::var("BASTION_PROFILE").unwrap_or_else(|_| "debug".to_string());

    let kernel_path = workspace_root
        .join("target")
        .join("x86_64-unknown-none")
        .join(&profile)
        .join(KERNEL_NAME);

    if !kernel_path.exists() {
        eprintln!("  [boot] Kernel binary not found: {}", kernel_path.display());
        eprintln!("  [boot] Run: cargo build -p bastion --target x86_64-unknown-none");
        std::process::exit(1);
    }

    let bios_img_path = workspace_root.join("bastion-bios.img");
    eprintln!("  [boot] Creating BIOS disk image (bastion-bios.img)...");
    BiosBoot::new(&kernel_path)
        .create_disk_image(&bios_img_path)
        .expect("failed to create BIOS disk image");

    let uefi_img_path = workspace_root.join("bastion-uefi.img");
    eprintln!("  [boot] Creating UEFI disk image (bastion-uefi.img)...");
    UefiBoot::new(&kernel_path)
        .create_disk_image(&uefi_img_path)
        .expect("failed to create UEFI disk image");

    println!("cargo:rustc-env=BIOS_IMAGE={}", bios_img_path.display());
    println!("cargo:rustc-env=UEFI_IMAGE={}", uefi_img_path.display());

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=BASTION_PROFILE");
    println!("cargo:rerun-if-changed={}", kernel_path.display());
}
