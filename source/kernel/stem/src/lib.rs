// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! STEM: early bring-up for the SiFive-U class of RISC-V machines.
//!
//! Turns the flat boot image handed over by the ROM into a paged Sv39
//! address space, loads the INIT, OS and application payloads, and enters
//! the next stage in supervisor mode. Everything except the privileged
//! register plumbing in [`arch::riscv`] runs on the host as well, which is
//! how the planners and the page-table builder are tested.

#![cfg_attr(not(test), no_std)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

#[macro_use]
pub mod diag;
pub use diag::log;

pub mod arch;
#[cfg(feature = "boot_banner")]
pub mod banner;
pub mod config;
pub mod elf;
pub mod error;
pub mod hal;
pub mod info;
pub mod layout;
pub mod loader;
pub mod loadmap;
pub mod mm;
mod panic;
pub mod pmm;
pub mod sequencer;
pub mod smp;
pub mod types;
pub mod uart;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::SetupConfig;
pub use error::SetupError;
pub use info::SystemInfo;
pub use layout::MemoryLayout;
