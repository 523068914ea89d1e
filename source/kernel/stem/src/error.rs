// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Errors raised while bringing the machine up.
//!
//! Every variant is fatal. Components return them upward; only the boot
//! sequencer turns one into a console diagnostic and a halt.

use core::fmt;

use crate::elf::ElfError;

/// Payload a diagnostic refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Payload {
    Setup,
    Init,
    System,
    Application(u8),
    Extras,
}

impl fmt::Display for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Setup => f.write_str("SETUP"),
            Payload::Init => f.write_str("INIT"),
            Payload::System => f.write_str("OS"),
            Payload::Application(slot) => write!(f, "APP{}", slot),
            Payload::Extras => f.write_str("EXTRAS"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Region {
    Code,
    Data,
    Stack,
    Forwarder,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Region::Code => "code",
            Region::Data => "data",
            Region::Stack => "stack",
            Region::Forwarder => "trap forwarder",
        })
    }
}

/// Translation window a capacity check refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Window {
    PhysicalMemory,
    Identity,
    Io,
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Window::PhysicalMemory => "physical memory",
            Window::Identity => "identity",
            Window::Io => "I/O",
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetupError {
    /// ELF validation failed or the offset points outside the image.
    ImageCorrupted(Payload),
    /// A region does not start where the memory map puts it.
    LayoutMismatch { payload: Payload, region: Region, expected: usize, found: usize },
    /// A region is larger than the space reserved for it.
    SegmentTooLarge { payload: Payload, region: Region, size: usize, reserved: usize },
    /// RAM cannot hold the next planned region.
    OutOfMemory { needed_pages: usize, available_pages: usize },
    /// An address the window construction depends on is not aligned.
    Misaligned { what: &'static str, addr: usize, align: usize },
    /// An address lies outside what the identity mapping can reach.
    Unmappable { what: &'static str, addr: usize },
    /// A window needs more tables than its directory slots can point at.
    WindowOverflow { window: Window, tables: usize, capacity: usize },
    /// The planned structures would land on the running SETUP.
    SetupOverwritten { free_top: usize, setup_end: usize },
    FreeRegionEmpty { base: usize, top: usize },
    /// The physical memory map was not filled in before table construction.
    Unplanned,
    /// A built translation does not resolve to the planned frame.
    TranslationMismatch { va: usize, expected: usize },
    LoadFailed { payload: Payload, segment: usize, cause: ElfError },
    ForwarderTooLarge { size: usize, capacity: usize },
    /// Neither INIT nor OS is in the image.
    NothingToRun,
    /// The builder hart found its rendezvous latch already claimed.
    LatchTaken { latch: &'static str },
    /// The descriptor's I/O window does not reach the console.
    ConsoleUnmapped { uart: usize, mio_base: usize, mio_top: usize },
}

impl fmt::Display for SetupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            SetupError::ImageCorrupted(payload) => {
                write!(f, "{} ELF image is corrupted", payload)
            }
            SetupError::LayoutMismatch { payload, region, expected, found } => write!(
                f,
                "{} {} address ({:#x}) does not match the machine's memory map ({:#x})",
                payload, region, found, expected
            ),
            SetupError::SegmentTooLarge { payload, region, size, reserved } => write!(
                f,
                "{} {} segment is too large ({:#x} bytes, {:#x} reserved)",
                payload, region, size, reserved
            ),
            SetupError::OutOfMemory { needed_pages, available_pages } => write!(
                f,
                "physical memory exhausted ({} pages needed, {} left)",
                needed_pages, available_pages
            ),
            SetupError::Misaligned { what, addr, align } => {
                write!(f, "{} ({:#x}) is not aligned to {:#x}", what, addr, align)
            }
            SetupError::Unmappable { what, addr } => {
                write!(f, "{} ({:#x}) cannot be identity mapped", what, addr)
            }
            SetupError::WindowOverflow { window, tables, capacity } => write!(
                f,
                "{} window needs {} tables but only {} slots exist",
                window, tables, capacity
            ),
            SetupError::SetupOverwritten { free_top, setup_end } => write!(
                f,
                "SETUP would have been overwritten! (top {:#x} <= {:#x})",
                free_top, setup_end
            ),
            SetupError::FreeRegionEmpty { base, top } => {
                write!(f, "no free memory left ({:#x}..{:#x})", base, top)
            }
            SetupError::Unplanned => f.write_str("page tables requested before memory was planned"),
            SetupError::TranslationMismatch { va, expected } => {
                write!(f, "translation of {:#x} does not reach {:#x}", va, expected)
            }
            SetupError::LoadFailed { payload, segment, cause } => {
                write!(f, "{} segment {} could not be loaded: {}", payload, segment, cause)
            }
            SetupError::ForwarderTooLarge { size, capacity } => write!(
                f,
                "machine trap forwarder is {:#x} bytes, {:#x} available",
                size, capacity
            ),
            SetupError::NothingToRun => f.write_str("neither INIT nor OS in the boot image"),
            SetupError::LatchTaken { latch } => {
                write!(f, "{} latch was claimed before the builder hart", latch)
            }
            SetupError::ConsoleUnmapped { uart, mio_base, mio_top } => write!(
                f,
                "console ({:#x}) lies outside the I/O window {:#x}..{:#x}",
                uart, mio_base, mio_top
            ),
        }
    }
}
