// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Fixed memory map of the machine; ground truth the boot image is checked against
//! OWNERS: @kernel-mm-team
//! PUBLIC API: MemoryLayout (SIFIVE_U), KERNEL_BASE, SYS_PD_PAGES
//! DEPENDS_ON: mm (page geometry)
//! INVARIANTS: Windows are directory aligned; PHY_MEM, IO and SYS share the kernel directory
//!
//! Virtual layout (Sv39, upper half):
//!
//! ```text
//! 0xffff_ffc0_0000_0000  PHY_MEM_WIDE  root slots 256.. (three-level RAM window)
//! 0xffff_ffff_c000_0000  KERNEL_BASE   root slot 511 -> kernel directory
//!   + 0x0000_0000        PHY_MEM       directory slots 0..256 (two-level RAM window)
//!   + 0x2000_0000        IO            directory slots 256..384
//!   + 0x3fe0_0000        SYS           directory slot 511 -> system leaf table
//! ```
//!
//! RAM is also identity mapped so the setup text stays valid across the
//! `satp` write.

use static_assertions::const_assert;

use crate::config::MAX_APPS;
use crate::info::BootMap;
use crate::mm::{directory_index, root_index, DIRECTORY_SPAN, PAGE_SIZE, PT_ENTRIES, ROOT_SPAN};

/// Base of the gigabyte holding the kernel directory.
pub const KERNEL_BASE: usize = 0xffff_ffff_c000_0000;
/// Pages reserved for the system page directory: root, kernel, identity.
pub const SYS_PD_PAGES: usize = 3;

const SYS_INFO_OFFSET: usize = 0;
const SYS_PT_OFFSET: usize = PAGE_SIZE;
const SYS_PD_OFFSET: usize = 2 * PAGE_SIZE;
const SYS_CODE_OFFSET: usize = 0x0000_8000;
const SYS_DATA_OFFSET: usize = 0x0010_0000;
const SYS_STACK_OFFSET: usize = 0x0018_0000;

/// Physical and virtual placement constants for one machine.
///
/// All `*_top` values are exclusive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryLayout {
    pub ram_base: usize,
    pub ram_top: usize,
    pub mio_base: usize,
    pub mio_top: usize,
    pub clint_base: usize,
    pub uart_base: usize,
    /// Where the ROM leaves the boot image; SETUP executes in place there.
    pub boot_image: usize,
    pub init_code: usize,
    pub init_data: usize,
    /// Code of application slot 0; slot `i` sits `i * app_stride` above.
    pub app_code: usize,
    pub app_data: usize,
    pub app_stride: usize,
    /// Two-level physical-memory window.
    pub phy_mem: usize,
    pub phy_mem_slots: usize,
    /// Three-level physical-memory window.
    pub phy_mem_wide: usize,
    pub phy_mem_wide_slots: usize,
    pub io: usize,
    pub io_slots: usize,
    /// System window: one leaf table worth of kernel pages.
    pub sys: usize,
}

impl MemoryLayout {
    pub const SIFIVE_U: Self = Self {
        ram_base: 0x8000_0000,
        ram_top: 0x8800_0000,
        mio_base: 0x0200_0000,
        mio_top: 0x1200_0000,
        clint_base: 0x0200_0000,
        uart_base: 0x1001_0000,
        boot_image: 0x8000_0000,
        init_code: 0x8100_0000,
        init_data: 0x8110_0000,
        app_code: 0x8120_0000,
        app_data: 0x8140_0000,
        app_stride: 0x0040_0000,
        phy_mem: KERNEL_BASE,
        phy_mem_slots: 256,
        phy_mem_wide: 0xffff_ffc0_0000_0000,
        phy_mem_wide_slots: 255,
        io: KERNEL_BASE + 0x2000_0000,
        io_slots: 128,
        sys: KERNEL_BASE + 0x3fe0_0000,
    };

    /// Same layout with RAM moved to `[base, top)`.
    pub const fn with_ram(self, base: usize, top: usize) -> Self {
        Self { ram_base: base, ram_top: top, ..self }
    }

    /// Page the machine-mode trap forwarder is relocated to.
    pub const fn mmode_forward(&self) -> usize {
        self.ram_top - PAGE_SIZE
    }

    pub const fn sys_info(&self) -> usize {
        self.sys + SYS_INFO_OFFSET
    }

    pub const fn sys_pt(&self) -> usize {
        self.sys + SYS_PT_OFFSET
    }

    pub const fn sys_pd(&self) -> usize {
        self.sys + SYS_PD_OFFSET
    }

    pub const fn sys_code(&self) -> usize {
        self.sys + SYS_CODE_OFFSET
    }

    pub const fn sys_data(&self) -> usize {
        self.sys + SYS_DATA_OFFSET
    }

    pub const fn sys_stack(&self) -> usize {
        self.sys + SYS_STACK_OFFSET
    }

    /// Bytes of the system window, all of them mapped by one leaf table.
    pub const fn sys_span(&self) -> usize {
        DIRECTORY_SPAN
    }

    pub const fn app_code(&self, slot: usize) -> usize {
        self.app_code + slot * self.app_stride
    }

    pub const fn app_data(&self, slot: usize) -> usize {
        self.app_data + slot * self.app_stride
    }

    /// Virtual address of the device address `pa` in the I/O window, which
    /// maps the descriptor's range rather than the board default.
    pub const fn io_alias(&self, bm: &BootMap, pa: usize) -> Option<usize> {
        if pa >= bm.mio_base && pa < bm.mio_top {
            Some(self.io + (pa - bm.mio_base))
        } else {
            None
        }
    }
}

const L: MemoryLayout = MemoryLayout::SIFIVE_U;

const_assert!(root_index(L.phy_mem) == root_index(KERNEL_BASE));
const_assert!(root_index(L.io) == root_index(KERNEL_BASE));
const_assert!(root_index(L.sys) == root_index(KERNEL_BASE));
const_assert!(L.phy_mem % DIRECTORY_SPAN == 0 && L.io % DIRECTORY_SPAN == 0);
const_assert!(L.sys % DIRECTORY_SPAN == 0);
const_assert!(directory_index(L.phy_mem) + L.phy_mem_slots <= directory_index(L.io));
const_assert!(directory_index(L.io) + L.io_slots <= directory_index(L.sys));
const_assert!(L.phy_mem_wide % ROOT_SPAN == 0);
const_assert!(root_index(L.phy_mem_wide) + L.phy_mem_wide_slots <= root_index(KERNEL_BASE));
const_assert!(L.mio_top - L.mio_base <= L.io_slots * DIRECTORY_SPAN);
const_assert!(L.ram_base % DIRECTORY_SPAN == 0);
const_assert!(L.init_code < L.init_data && L.init_data < L.app_code(0));
const_assert!(L.app_code(0) < L.app_data(0) && L.app_data(0) < L.app_code(1));
const_assert!(L.app_code(MAX_APPS) <= L.ram_top);
const_assert!(SYS_STACK_OFFSET < DIRECTORY_SPAN && PT_ENTRIES * PAGE_SIZE == DIRECTORY_SPAN);
const_assert!(SYS_PD_OFFSET + SYS_PD_PAGES * PAGE_SIZE <= SYS_CODE_OFFSET);
