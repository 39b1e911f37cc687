//! Boots the kernel image in QEMU with COM1 on stdio.
//!
//! `boot --uefi` prints the UEFI image path instead; it needs OVMF firmware
//! the host has to provide.

use std::process::{exit, Command};

const BIOS_IMAGE: &str = env!("BIOS_IMAGE");
const UEFI_IMAGE: &str = env!("UEFI_IMAGE");

fn main() {
    if std::env::args().any(|arg| arg == "--uefi") {
        println!("{}", UEFI_IMAGE);
        return;
    }

    let status = Command::new("qemu-system-x86_64")
        .arg("-drive")
        .arg(format!("format=raw,file={}", BIOS_IMAGE))
        .args(["-serial", "stdio", "-display", "none", "-no-reboot", "-m", "256M"])
        .status();

    match status {
        Ok(status) => exit(status.code().unwrap_or(1)),
        Err(err) => {
            eprintln!("  [boot] failed to launch qemu-system-x86_64: {}", err);
            eprintln!("  [boot] BIOS image: {}", BIOS_IMAGE);
            exit(1);
        }
    }
}
