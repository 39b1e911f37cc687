//! 8259 PIC pair: remap IRQ 0-15 to vectors 32-47 and mask every line.
//!
//! No IRQ consumer exists yet, so nothing is unmasked and no EOI is sent.

use x86_64::instructions::port::Port;

use crate::idt::vectors::IRQ_BASE_VECTOR;

const MASTER_CMD: u16 = 0x20;
const MASTER_DATA: u16 = 0x21;
const SLAVE_CMD: u16 = 0xA0;
const SLAVE_DATA: u16 = 0xA1;

const ICW1_INIT: u8 = 0x11;
const ICW4_8086: u8 = 0x01;
const MASTER_VECTOR: u8 = IRQ_BASE_VECTOR;
const SLAVE_VECTOR: u8 = IRQ_BASE_VECTOR + 8;
const MASTER_CASCADE: u8 = 0x04; // IR2 has slave
const SLAVE_CASCADE: u8 = 0x02; // connected to master's IR2
const MASK_ALL: u8 = 0xFF;

/// Remap both controllers and mask all IRQs.
///
/// Call once, with interrupts disabled, before they are enabled.
pub fn init() {
    let mut master_cmd = Port::<u8>::new(MASTER_CMD);
    let mut master_data = Port::<u8>::new(MASTER_DATA);
    let mut slave_cmd = Port::<u8>::new(SLAVE_CMD);
    let mut slave_data = Port::<u8>::new(SLAVE_DATA);

    // SAFETY: standard 8259 initialization sequence on the legacy ports.
    unsafe {
        master_cmd.write(ICW1_INIT);
        slave_cmd.write(ICW1_INIT);

        master_data.write(MASTER_VECTOR);
        slave_data.write(SLAVE_VECTOR);

        master_data.write(MASTER_CASCADE);
        slave_data.write(SLAVE_CASCADE);

        master_data.write(ICW4_8086);
        slave_data.write(ICW4_8086);

        master_data.write(MASK_ALL);
        slave_data.write(MASK_ALL);
    }

    log::info!("pic: IRQs remapped to vectors {}-{}, all masked", MASTER_VECTOR, SLAVE_VECTOR + 7);
}
