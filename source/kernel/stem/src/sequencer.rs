// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Boot sequencer from `_entry` to the next stage
//! OWNERS: @kernel-team
//! PUBLIC API: BootStage, Setup::run() -> Handoff, next_entry(), machine_entry(), supervisor_entry()
//! DEPENDS_ON: loadmap, pmm, mm::radix, loader, smp latches, arch::riscv, hal::sifive_u
//! INVARIANTS: Only the builder hart writes memory; followers touch nothing before ROOT_LATCH is Ready;
//!             errors end in log_error! + halt here and nowhere else

use core::fmt;

use crate::config::SetupConfig;
use crate::elf::BootImage;
use crate::error::SetupError;
use crate::hal::Mmu;
use crate::info::{LoadMap, SystemInfo};
use crate::layout::MemoryLayout;
use crate::mm::radix::PageTableBuilder;
use crate::mm::BootMemory;
use crate::{loader, loadmap, pmm, uart};

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
use crate::{
    arch::riscv::{self, forward, machine, supervisor},
    config::HandoffMode,
    hal::sifive_u::SifiveMmu,
    mm::DirectMemory,
    smp::{enter_stage, FORWARDER_LATCH, ROOT_LATCH},
    types::HartId,
};


/// Progress of one hart through bring-up.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum BootStage {
    MachineEntry = 1,
    MachineSetup = 2,
    SupervisorEntry = 3,
    SupervisorRun = 4,
    Handoff = 5,
}

impl BootStage {
    pub const fn next(self) -> Option<Self> {
        match self {
            BootStage::MachineEntry => Some(BootStage::MachineSetup),
            BootStage::MachineSetup => Some(BootStage::SupervisorEntry),
            BootStage::SupervisorEntry => Some(BootStage::SupervisorRun),
            BootStage::SupervisorRun => Some(BootStage::Handoff),
            BootStage::Handoff => None,
        }
    }

    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(BootStage::MachineEntry),
            2 => Some(BootStage::MachineSetup),
            3 => Some(BootStage::SupervisorEntry),
            4 => Some(BootStage::SupervisorRun),
            5 => Some(BootStage::Handoff),
            _ => None,
        }
    }
}

impl fmt::Display for BootStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BootStage::MachineEntry => "machine entry",
            BootStage::MachineSetup => "machine setup",
            BootStage::SupervisorEntry => "supervisor entry",
            BootStage::SupervisorRun => "supervisor run",
            BootStage::Handoff => "handoff",
        };
        f.write_str(name)
    }
}

/// Where and how the next stage starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handoff {
    pub entry: usize,
    pub satp: usize,
}

/// Entry point of the next stage: INIT when present, else the OS.
pub fn next_entry(lm: &LoadMap) -> Result<usize, SetupError> {
    if lm.init.is_present() {
        Ok(lm.init.entry)
    } else if lm.system.is_present() {
        Ok(lm.system.entry)
    } else {
        Err(SetupError::NothingToRun)
    }
}

/// The builder hart's part of the supervisor stage.
pub struct Setup<'a, M: BootMemory + ?Sized, U: Mmu + ?Sized> {
    si: &'a mut SystemInfo,
    image: BootImage<'a>,
    layout: &'a MemoryLayout,
    config: &'a SetupConfig,
    mem: &'a mut M,
    mmu: &'a U,
}

impl<'a, M: BootMemory + ?Sized, U: Mmu + ?Sized> Setup<'a, M, U> {
    pub fn new(
        si: &'a mut SystemInfo,
        image: BootImage<'a>,
        layout: &'a MemoryLayout,
        config: &'a SetupConfig,
        mem: &'a mut M,
        mmu: &'a U,
    ) -> Self {
        Self { si, image, layout, config, mem, mmu }
    }

    /// Plans, maps, switches translation on and loads every payload.
    pub fn run(self) -> Result<Handoff, SetupError> {
        let Self { si, image, layout, config, mem, mmu } = self;

        let cpus = u32::try_from(config.cpus).unwrap_or(u32::MAX);
        si.bm.n_cpus = si.bm.n_cpus.clamp(1, cpus.max(1));

        si.lm = loadmap::build(&image, &si.bm, layout, config)?;
        si.pmm = pmm::build(&si.bm, &si.lm, layout)?;
        // Once translation is on, the console is only reachable through the I/O window.
        let console = layout.io_alias(&si.bm, layout.uart_base).ok_or(
            SetupError::ConsoleUnmapped {
                uart: layout.uart_base,
                mio_base: si.bm.mio_base,
                mio_top: si.bm.mio_top,
            },
        )?;
        #[cfg(feature = "boot_banner")]
        crate::banner::say_hi(si, config);
        let entry = next_entry(&si.lm)?;

        let satp = PageTableBuilder::new(&mut *mem, layout, config.svpbmt).build(si)?;
        si.pmm.satp = satp;

        #[cfg(feature = "debug_pt_verify")]
        crate::mm::radix::verify(&*mem, si, layout)?;
        #[cfg(feature = "debug_pt_dump")]
        crate::mm::radix::dump(&*mem, si.pmm.sys_pd);

        mmu.set_root(satp);
        mmu.flush_tlb();
        uart::rebase(console);
        log_info!(target: "setup", "paging on, satp={:#x}", satp);

        loader::load_parts(&image, si, layout, &mut *mem)?;
        mem.write(layout.sys_info(), si.as_bytes());

        log_info!(target: "setup", "handing off to {:#x}", entry);
        Ok(Handoff { entry, satp })
    }
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
fn fatal(err: SetupError) -> ! {
    log_error!(target: "setup", "{}", err);
    riscv::halt()
}

/// Machine-mode part of bring-up, entered by every hart from `_entry`.
/// Ends in supervisor mode at `supervisor` with `a0 = hart`.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub fn machine_entry(
    hart: HartId,
    layout: &MemoryLayout,
    config: &SetupConfig,
    supervisor: extern "C" fn(usize) -> !,
) -> ! {
    enter_stage(hart, BootStage::MachineEntry);
    if config.is_parked(hart) || !hart.is_supported() {
        riscv::halt();
    }
    machine::reset_translation();
    machine::delegate_traps();

    let forwarder = if Some(hart) == config.builder_hart() {
        uart::init();
        if let Err(err) = FORWARDER_LATCH.claim("forwarder") {
            fatal(err);
        }
        let dest = layout.mmode_forward();
        // SAFETY: the forwarder page is the last RAM page, reserved for it
        // by the planner and untouched by anything else this early.
        let mut mem = unsafe { DirectMemory::new() };
        if let Err(err) = forward::relocate(&mut mem, dest, forward::image()) {
            FORWARDER_LATCH.fail();
            fatal(err);
        }
        FORWARDER_LATCH.publish(dest);
        dest
    } else {
        match FORWARDER_LATCH.wait() {
            Some(dest) => dest,
            None => riscv::halt(),
        }
    };
    riscv::fence_i();

    machine::install_forwarder(forwarder, forward::save_slot(forwarder, hart.as_index()));
    machine::enable_interrupts();
    machine::open_pmp();
    enter_stage(hart, BootStage::MachineSetup);
    machine::enter_supervisor(supervisor as usize, hart.as_index())
}

/// Supervisor-mode part of bring-up.
///
/// # Safety
///
/// `info` must point at the record patched into the boot image, valid for
/// the whole boot. Only the builder hart may mutate it, which holds as
/// long as every hart passes the same `config`.
#[cfg(all(target_arch = "riscv64", target_os = "none"))]
pub unsafe fn supervisor_entry(
    hart: HartId,
    info: *mut SystemInfo,
    layout: &MemoryLayout,
    config: &SetupConfig,
) -> ! {
    enter_stage(hart, BootStage::SupervisorEntry);
    supervisor::init();

    let entry = if Some(hart) == config.builder_hart() {
        if let Err(err) = ROOT_LATCH.claim("root") {
            fatal(err);
        }
        enter_stage(hart, BootStage::SupervisorRun);
        // SAFETY: the caller guarantees `info`; followers only read it
        // after the latch below is Ready.
        let si = unsafe { &mut *info };
        // SAFETY: the image executes in place from `boot_image`.
        let image = unsafe { BootImage::from_raw(layout.boot_image, si.bm.img_size as usize) };
        // SAFETY: the builder is the only hart writing memory.
        let mut mem = unsafe { DirectMemory::new() };
        match Setup::new(si, image, layout, config, &mut mem, &SifiveMmu).run() {
            Ok(handoff) => {
                ROOT_LATCH.publish(handoff.satp);
                handoff.entry
            }
            Err(err) => {
                ROOT_LATCH.fail();
                fatal(err);
            }
        }
    } else {
        let Some(satp) = ROOT_LATCH.wait() else {
            riscv::halt();
        };
        SifiveMmu.set_root(satp);
        SifiveMmu.flush_tlb();
        // SAFETY: published before the latch turned Ready.
        let si = unsafe { &*info };
        match next_entry(&si.lm) {
            Ok(entry) => entry,
            Err(err) => fatal(err),
        }
    };

    enter_stage(hart, BootStage::Handoff);
    handoff(entry, hart, layout, config)
}

#[cfg(all(target_arch = "riscv64", target_os = "none"))]
fn handoff(entry: usize, hart: HartId, layout: &MemoryLayout, config: &SetupConfig) -> ! {
    match config.handoff {
        HandoffMode::DirectCall => {
            // SAFETY: `entry` is the loaded next stage; SETUP text stays
            // identity mapped, so returning here is possible.
            let next: extern "C" fn(usize, usize) =
                unsafe { core::mem::transmute::<usize, extern "C" fn(usize, usize)>(entry) };
            next(hart.as_index(), layout.sys_info());
            log_error!(target: "setup", "OS failed to init!");
            riscv::halt()
        }
        HandoffMode::ExceptionReturn => supervisor::return_to(entry, hart.as_index(), layout.sys_info()),
    }
}
