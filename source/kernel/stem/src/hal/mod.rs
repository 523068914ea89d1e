// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hardware abstraction layer traits.

pub mod sifive_u;

/// UART abstraction used for boot logging.
pub trait Uart {
    /// Writes a single byte to the UART.
    fn write_byte(&self, byte: u8);
}

/// Address-translation control for the running hart.
pub trait Mmu {
    /// Installs `satp` as the current translation root.
    fn set_root(&self, satp: usize);
    /// Flushes the entire translation cache.
    fn flush_tlb(&self);
}
