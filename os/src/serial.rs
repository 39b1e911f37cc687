//! Serial port (COM1 @ 0x3F8) used as the kernel log sink.
//!
//! Writes never take a lock: a fault raised halfway through a line must still
//! be able to print its own diagnostics.

use x86_64::instructions::port::Port;

const COM1: u16 = 0x3F8;

const IER_OFF: u16 = 1;
const LCR_OFF: u16 = 3;
const LCR_8N1: u8 = 0x03;
const MCR_OFF: u16 = 4;
const MCR_DTR_RTS: u8 = 0x03;
const LSR_OFF: u16 = 5;
const LSR_THRE: u8 = 0x20;

/// Initialize COM1 (8n1, no interrupts). Safe to call once at boot.
pub fn init() {
    unsafe {
        Port::<u8>::new(COM1 + IER_OFF).write(0x00);
        Port::<u8>::new(COM1 + LCR_OFF).write(LCR_8N1);
        Port::<u8>::new(COM1 + MCR_OFF).write(MCR_DTR_RTS);
    }
}

fn is_transmit_empty() -> bool {
    let mut lsr = Port::<u8>::new(COM1 + LSR_OFF);
    unsafe { lsr.read() & LSR_THRE != 0 }
}

/// Write one byte. Blocks until the transmit holding register is empty.
pub fn write_byte(b: u8) {
    while !is_transmit_empty() {
        core::hint::spin_loop();
    }
    unsafe { Port::<u8>::new(COM1).write(b) }
}

/// Write a string. `\n` is expanded to `\r\n` for terminal friendliness.
pub fn write_str(s: &str) {
    for b in s.bytes() {
        if b == b'\n' {
            write_byte(b'\r');
        }
        write_byte(b);
    }
}

/// `core::fmt::Write` adapter over COM1.
pub struct Writer;

impl core::fmt::Write for Writer {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        write_str(s);
        Ok(())
    }
}
