// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Boot console on the first SiFive UART.
//!
//! The base starts at the physical address and moves into the I/O window
//! once translation is on ([`rebase`]).

use core::fmt::{self, Write};
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Mutex;

use crate::hal::sifive_u::SifiveUart;
use crate::hal::Uart;
use crate::layout::MemoryLayout;

/// Global UART writer used for boot logs.
static UART0: Mutex<KernelUart> =
    Mutex::new(KernelUart::new(MemoryLayout::SIFIVE_U.uart_base));
/// Base used by the lock-free panic path.
static RAW_BASE: AtomicUsize = AtomicUsize::new(MemoryLayout::SIFIVE_U.uart_base);

/// UART implementation capable of formatted writes.
#[derive(Clone, Copy)]
pub struct KernelUart {
    port: SifiveUart,
}

impl KernelUart {
    /// Creates a UART abstraction rooted at `base`.
    pub const fn new(base: usize) -> Self {
        Self { port: SifiveUart::new(base) }
    }

    /// Returns a guard for the boot UART singleton.
    pub fn lock() -> spin::MutexGuard<'static, KernelUart> {
        UART0.lock()
    }

    pub fn base(&self) -> usize {
        self.port.base()
    }
}

impl Write for KernelUart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &byte in s.as_bytes() {
            if byte == b'\n' {
                self.port.write_byte(b'\r');
            }
            self.port.write_byte(byte);
        }
        Ok(())
    }
}

/// Enables the transmitter of the boot console.
pub fn init() {
    KernelUart::lock().port.enable();
}

/// Points both console paths at `base`, e.g. its alias in the I/O window.
pub fn rebase(base: usize) {
    let mut uart = KernelUart::lock();
    *uart = KernelUart::new(base);
    RAW_BASE.store(base, Ordering::Release);
}

/// Raw, lock-free UART emission for trap/panic contexts where the mutex may already be held.
pub struct RawUart;

impl Write for RawUart {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let port = SifiveUart::new(RAW_BASE.load(Ordering::Acquire));
        for &byte in s.as_bytes() {
            if byte == b'\n' {
                port.write_byte(b'\r');
            }
            port.write_byte(byte);
        }
        Ok(())
    }
}

pub fn raw_writer() -> RawUart {
    RawUart
}
