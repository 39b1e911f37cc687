#![no_std]
#![no_main]

use core::panic::PanicInfo;

use bastion::config::BOOTLOADER_CONFIG;
use bastion::kernel;

bootloader_api::entry_point!(kernel_main, config = &BOOTLOADER_CONFIG);

fn kernel_main(boot_info: &'static mut bootloader_api::BootInfo) -> ! {
    match kernel::early_init(boot_info) {
        Ok(state) => kernel::kernel_loop(state),
        Err(err) => {
            log::error!("bastion: {}", err);
            halt_forever()
        }
    }
}

fn halt_forever() -> ! {
    x86_64::instructions::interrupts::disable();
    loop {
        x86_64::instructions::hlt();
    }
}

#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    log::error!("KERNEL PANIC: {}", info);
    halt_forever()
}
