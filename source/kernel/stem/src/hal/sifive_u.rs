// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! HAL implementation for the SiFive-U machine (FU540 class).

use crate::arch::riscv;

use super::{Mmu, Uart};

const UART_TXDATA: usize = 0x00;
const UART_TXCTRL: usize = 0x08;
const TXDATA_FULL: u32 = 1 << 31;
const TXCTRL_TXEN: u32 = 1 << 0;

/// SiFive UART transmitter at `base`.
#[derive(Clone, Copy)]
pub struct SifiveUart {
    base: usize,
}

impl SifiveUart {
    pub const fn new(base: usize) -> Self {
        Self { base }
    }

    pub const fn base(&self) -> usize {
        self.base
    }

    /// Turns the transmitter on; the ROM normally leaves it enabled.
    pub fn enable(&self) {
        #[cfg(all(target_arch = "riscv64", target_os = "none"))]
        unsafe {
            let ctrl = (self.base + UART_TXCTRL) as *mut u32;
            core::ptr::write_volatile(ctrl, core::ptr::read_volatile(ctrl) | TXCTRL_TXEN);
        }
        #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
        let _ = (UART_TXCTRL, TXCTRL_TXEN);
    }
}

impl Uart for SifiveUart {
    fn write_byte(&self, byte: u8) {
        #[cfg(all(target_arch = "riscv64", target_os = "none"))]
        unsafe {
            let txdata = (self.base + UART_TXDATA) as *mut u32;
            while core::ptr::read_volatile(txdata) & TXDATA_FULL != 0 {}
            core::ptr::write_volatile(txdata, u32::from(byte));
        }
        #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
        let _ = (byte, UART_TXDATA, TXDATA_FULL);
    }
}

/// Sv39 control of the calling hart.
#[derive(Clone, Copy, Default)]
pub struct SifiveMmu;

impl Mmu for SifiveMmu {
    fn set_root(&self, satp: usize) {
        riscv::write_satp(satp);
    }

    fn flush_tlb(&self) {
        riscv::flush_tlb();
    }
}
