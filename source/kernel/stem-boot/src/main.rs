// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Boot wrapper for STEM. Provides the `_entry` point every hart starts at
//! in machine mode, the per-hart boot stacks and the system information
//! record the image builder patches. The first hart to arrive clears
//! `.bss`, then every hart goes on to `stem::sequencer`.
#![no_std]
#![no_main]

use core::ptr::addr_of_mut;

use stem::arch::riscv;
use stem::config::{BOOT_STACK_SIZE, MAX_HARTS};
use stem::info::BootMap;
use stem::sequencer;
use stem::smp::OnceGate;
use stem::types::HartId;
use stem::{MemoryLayout, SetupConfig, SystemInfo};

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
core::arch::global_asm!(
    r#"
    .section .text._entry, "ax", @progbits
    .globl _entry
    .align 4
_entry:
    csrci mstatus, 8
    csrw  mie, zero
    csrr  t0, mhartid
    li    t1, {max_harts}
    bgeu  t0, t1, 2f
    /* sp = __boot_stacks + (hartid + 1) * BOOT_STACK_SIZE */
    la    sp, __boot_stacks
    addi  t2, t0, 1
    li    t3, {stack_size}
    mul   t2, t2, t3
    add   sp, sp, t2
    mv    tp, t0
    .option push
    .option norelax
    la    gp, __global_pointer$
    .option pop
    mv    a0, t0
    j     machine_start
2:
    wfi
    j     2b
"#,
    max_harts = const MAX_HARTS,
    stack_size = const BOOT_STACK_SIZE,
);

extern "C" {
    static mut __bss_start: u8;
    static mut __bss_end: u8;
}

#[repr(C, align(16))]
struct BootStack([u8; BOOT_STACK_SIZE]);

#[allow(non_upper_case_globals)]
#[no_mangle]
#[link_section = ".bss.boot_stacks"]
static mut __boot_stacks: [BootStack; MAX_HARTS] = [const { BootStack([0; BOOT_STACK_SIZE]) }; MAX_HARTS];

/// Filled in by the image builder; updated in place by the builder hart.
#[allow(non_upper_case_globals)]
#[no_mangle]
#[link_section = ".data.system_info"]
static mut __boot_time_system_info: SystemInfo = SystemInfo::new(BootMap::EMPTY);

/// Guards the clearing of `.bss`, so it must not live there itself.
#[link_section = ".data.bss_gate"]
static BSS_GATE: OnceGate = OnceGate::new();

#[no_mangle]
extern "C" fn machine_start(hart: usize) -> ! {
    BSS_GATE.pass(|| {
        // SAFETY: setup.ld keeps the boot stacks out of this range, and no
        // hart touches a `.bss` static before the gate opens.
        unsafe { riscv::clear_bss(addr_of_mut!(__bss_start), addr_of_mut!(__bss_end)) }
    });
    sequencer::machine_entry(
        HartId::from_raw(hart as u16),
        &MemoryLayout::SIFIVE_U,
        &SetupConfig::SIFIVE_U,
        supervisor_start,
    )
}

extern "C" fn supervisor_start(hart: usize) -> ! {
    // SAFETY: the record lives in .data for the whole boot and the
    // sequencer lets only the builder hart write it.
    unsafe {
        sequencer::supervisor_entry(
            HartId::from_raw(hart as u16),
            addr_of_mut!(__boot_time_system_info),
            &MemoryLayout::SIFIVE_U,
            &SetupConfig::SIFIVE_U,
        )
    }
}
