// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Panic handler of the bring-up stage
//! OWNERS: @kernel-team
//! PUBLIC API: panic handler (no_std)
//! DEPENDS_ON: uart::raw_writer(), smp::stage_of()
//! INVARIANTS: No allocation; the lock-free writer only; the hart halts afterwards

#[cfg(all(not(test), target_os = "none"))]
use core::{fmt::Write, panic::PanicInfo};

#[cfg(all(not(test), target_os = "none"))]
use crate::{arch::riscv, smp, types::HartId, uart};

/// Reports location, message, hart and bring-up stage, then halts.
#[cfg(all(not(test), target_os = "none"))]
#[panic_handler]
fn panic(info: &PanicInfo) -> ! {
    let mut w = uart::raw_writer();
    let hart = riscv::current_hart();

    let _ = w.write_str("\nSETUP PANIC: ");
    if let Some(location) = info.location() {
        let _ = write!(w, "{}:{}: ", location.file(), location.line());
    }
    match info.message().as_str() {
        Some(msg) => {
            let _ = w.write_str(msg);
        }
        None => {
            let _ = write!(w, "{}", info.message());
        }
    }
    let _ = write!(w, "\nSETUP PANIC: hart {}", hart);
    match smp::stage_of(HartId::from_raw(hart as u16)) {
        Some(stage) => {
            let _ = writeln!(w, " in {}", stage);
        }
        None => {
            let _ = w.write_str(" before entry\n");
        }
    }
    riscv::halt()
}
