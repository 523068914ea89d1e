// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! RISC-V privileged register plumbing for the bring-up path.
//!
//! Helpers needed by host-testable code come with stubs for
//! `not(all(target_arch = "riscv64", target_os = "none"))`. The machine-
//! and supervisor-mode transitions only exist on the target.

pub mod forward;

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
use core::arch::asm;

/// Hart id of the caller, kept in `tp` from `_entry` on.
#[inline]
pub fn current_hart() -> usize {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    {
        let tp: usize;
        unsafe { asm!("mv {}, tp", out(reg) tp, options(nomem, nostack, preserves_flags)) };
        tp
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        0
    }
}

/// Issues a WFI instruction or yields on the host.
#[inline]
pub fn wait_for_interrupt() {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    unsafe {
        asm!("wfi", options(nomem, nostack, preserves_flags));
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    {
        core::hint::spin_loop();
    }
}

/// Stops the calling hart for good.
pub fn halt() -> ! {
    loop {
        wait_for_interrupt();
    }
}

/// Makes freshly copied code visible to instruction fetch on this hart.
#[inline]
pub fn fence_i() {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    unsafe {
        riscv::asm::fence_i();
    }
}

#[inline]
pub fn write_satp(satp: usize) {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    unsafe {
        asm!("csrw satp, {}", in(reg) satp, options(nostack));
    }
    #[cfg(not(all(target_arch = "riscv64", target_os = "none")))]
    let _ = satp;
}

#[inline]
pub fn flush_tlb() {
    #[cfg(all(target_arch = "riscv64", target_os = "none"))]
    unsafe {
        riscv::asm::sfence_vma_all();
    }
}

/// Clears the `.bss` region defined by the linker.
///
/// # Safety
///
/// `start..end` must be writable and hold nothing live, the caller's stack
/// included.
#[inline]
pub unsafe fn clear_bss(start: *mut u8, end: *mut u8) {
    let mut ptr = start;
    while ptr < end {
        // SAFETY: in bounds per the caller's contract.
        unsafe {
            core::ptr::write_volatile(ptr, 0);
            ptr = ptr.add(1);
        }
    }
}

/// Machine-mode configuration performed by every hart right after `_entry`.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub mod machine {
    use core::arch::asm;

    use riscv::register::{mepc, mideleg, mie, mscratch, mstatus, mtvec};

    const PMP_NAPOT_RWX: usize = 0x1f;
    const DELEGATED_EXCEPTIONS: usize = 0xffff;

    /// Translation off and no stale pending bits.
    pub fn reset_translation() {
        unsafe {
            asm!("csrw satp, zero", "csrw mip, zero", options(nostack));
        }
    }

    /// Supervisor software, timer and external interrupts and all
    /// synchronous exceptions are handled in supervisor mode.
    pub fn delegate_traps() {
        unsafe {
            mideleg::set_ssoft();
            mideleg::set_stimer();
            mideleg::set_sext();
            asm!("csrw medeleg, {}", in(reg) DELEGATED_EXCEPTIONS, options(nostack));
        }
    }

    /// Routes machine traps to the relocated forwarder and gives it its
    /// per-hart save slot.
    pub fn install_forwarder(vector: usize, save_slot: usize) {
        unsafe {
            mscratch::write(save_slot);
            mtvec::write(vector, mtvec::TrapMode::Direct);
        }
    }

    /// Machine software and timer interrupts feed the forwarder. External
    /// interrupts reach supervisor mode through the PLIC directly.
    pub fn enable_interrupts() {
        unsafe {
            mie::set_msoft();
            mie::set_mtimer();
        }
    }

    /// PMP entry 0 grants supervisor mode access to the whole address space.
    pub fn open_pmp() {
        unsafe {
            asm!(
                "csrw pmpaddr0, {addr}",
                "csrw pmpcfg0, {cfg}",
                addr = in(reg) usize::MAX >> 10,
                cfg = in(reg) PMP_NAPOT_RWX,
                options(nostack)
            );
        }
    }

    /// Drops to supervisor mode at `entry` with `a0 = hart`. Machine
    /// interrupts come back on with the `mret`.
    pub fn enter_supervisor(entry: usize, hart: usize) -> ! {
        unsafe {
            mstatus::set_mpp(mstatus::MPP::Supervisor);
            mstatus::set_mpie();
            mepc::write(entry);
            asm!("mret", in("a0") hart, options(noreturn));
        }
    }
}

/// Supervisor-mode setup of the bring-up hart and the final handoff.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub mod supervisor {
    use core::arch::asm;

    use riscv::register::{mtvec, sepc, sie, sstatus, stvec};

    core::arch::global_asm!(
        r#"
    .section .text.__setup_trap, "ax", @progbits
    .globl __setup_trap
    .align 4
__setup_trap:
    csrr  a0, scause
    csrr  a1, sepc
    csrr  a2, stval
    j     __setup_trap_rust
"#
    );

    extern "C" {
        fn __setup_trap();
    }

    /// Enables supervisor interrupt sources, keeps `sret` in supervisor
    /// mode, and routes traps taken during setup to the fault reporter.
    pub fn init() {
        unsafe {
            sie::set_ssoft();
            sie::set_stimer();
            sie::set_sext();
            sstatus::set_spp(sstatus::SPP::Supervisor);
            stvec::write(__setup_trap as usize, mtvec::TrapMode::Direct);
        }
    }

    /// Enters `entry` through `sret` with interrupts enabled there, passing
    /// the same `a0`/`a1` a direct call would.
    pub fn return_to(entry: usize, hart: usize, info: usize) -> ! {
        unsafe {
            sstatus::set_spp(sstatus::SPP::Supervisor);
            sstatus::set_spie();
            sepc::write(entry);
            asm!("sret", in("a0") hart, in("a1") info, options(noreturn));
        }
    }

    #[no_mangle]
    extern "C" fn __setup_trap_rust(scause: usize, sepc: usize, stval: usize) -> ! {
        use core::fmt::Write;

        let mut w = crate::uart::raw_writer();
        let _ = write!(
            w,
            "\nSETUP: unexpected trap scause={:#x} sepc={:#x} stval={:#x} hart={}\n",
            scause,
            sepc,
            stval,
            super::current_hart()
        );
        super::halt()
    }
}
