// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Machine-mode trap forwarder relocated to the top page of RAM
//! OWNERS: @kernel-team
//! PUBLIC API: image(), relocate(mem,dest,image), save_slot(dest,hart), SAVE_AREA_OFFSET
//! DEPENDS_ON: mm::BootMemory, layout (CLINT)
//! INVARIANTS: Stub is position independent; code and per-hart save slots share one page
//!
//! Machine timer interrupts disarm the comparator and machine software
//! interrupts acknowledge the IPI. Either one is then raised as its
//! supervisor counterpart in `mip`, provided supervisor mode enabled it.

use static_assertions::const_assert;

use crate::config::MAX_HARTS;
use crate::error::SetupError;
use crate::mm::{BootMemory, PAGE_SIZE};

/// Offset of the save slots inside the forwarder page.
pub const SAVE_AREA_OFFSET: usize = 0x800;
/// Two scratch registers per hart.
pub const SAVE_SLOT_SIZE: usize = 16;

const_assert!(SAVE_AREA_OFFSET + MAX_HARTS * SAVE_SLOT_SIZE <= PAGE_SIZE);

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
core::arch::global_asm!(
    r#"
    .section .text.mmode_forward, "ax", @progbits
    .globl __mmode_forward_start
    .globl __mmode_forward_end
    .align 4
__mmode_forward_start:
    csrrw t0, mscratch, t0
    sd    t1, 0(t0)
    sd    t2, 8(t0)
    csrr  t1, mcause
    bgez  t1, 9f
    slli  t1, t1, 1
    srli  t1, t1, 1
    li    t2, 7
    beq   t1, t2, 2f
    li    t2, 3
    beq   t1, t2, 3f
    j     5f
2:
    csrr  t2, mhartid
    slli  t2, t2, 3
    li    t1, {mtimecmp}
    add   t2, t2, t1
    li    t1, -1
    sd    t1, 0(t2)
    li    t1, 7
    j     4f
3:
    csrr  t2, mhartid
    slli  t2, t2, 2
    li    t1, {msip}
    add   t2, t2, t1
    sw    zero, 0(t2)
    li    t1, 3
4:
    addi  t1, t1, -2
    li    t2, 1
    sll   t1, t2, t1
    csrr  t2, sie
    and   t2, t2, t1
    beqz  t2, 5f
    csrs  mip, t1
5:
    ld    t1, 0(t0)
    ld    t2, 8(t0)
    csrrw t0, mscratch, t0
    mret
9:
    wfi
    j     9b
__mmode_forward_end:
"#,
    mtimecmp = const crate::layout::MemoryLayout::SIFIVE_U.clint_base + 0x4000,
    msip = const crate::layout::MemoryLayout::SIFIVE_U.clint_base,
);

/// Machine code of the forwarder as linked into SETUP.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub fn image() -> &'static [u8] {
    extern "C" {
        static __mmode_forward_start: u8;
        static __mmode_forward_end: u8;
    }
    // SAFETY: both symbols delimit the stub emitted above, in read-only text.
    unsafe {
        let start = core::ptr::addr_of!(__mmode_forward_start);
        let end = core::ptr::addr_of!(__mmode_forward_end) as usize;
        core::slice::from_raw_parts(start, end - start as usize)
    }
}

#[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
pub fn image() -> &'static [u8] {
    &[]
}

/// Copies `image` to the page at `dest` and clears the save area.
pub fn relocate<M: BootMemory + ?Sized>(
    mem: &mut M,
    dest: usize,
    image: &[u8],
) -> Result<(), SetupError> {
    if image.len() > SAVE_AREA_OFFSET {
        return Err(SetupError::ForwarderTooLarge { size: image.len(), capacity: SAVE_AREA_OFFSET });
    }
    mem.write(dest, image);
    mem.fill(dest + image.len(), 0, PAGE_SIZE - image.len());
    Ok(())
}

/// `mscratch` value for `hart`.
pub const fn save_slot(dest: usize, hart: usize) -> usize {
    dest + SAVE_AREA_OFFSET + hart * SAVE_SLOT_SIZE
}
