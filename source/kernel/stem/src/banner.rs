// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Boot banner with the machine facts the descriptor and the plan carry.

use crate::config::SetupConfig;
use crate::info::{BootMap, SystemInfo};

const MIB: usize = 1024 * 1024;

/// Prints the banner once memory has been planned.
pub fn say_hi(si: &SystemInfo, config: &SetupConfig) {
    let (bm, pmm) = (&si.bm, &si.pmm);
    log_info!(target: "boot", r" ___| |_ ___ _ __ ___");
    log_info!(target: "boot", r"/ __| __/ _ \ '_ ` _ \");
    log_info!(target: "boot", r"\__ \ ||  __/ | | | | |");
    log_info!(target: "boot", r"|___/\__\___|_| |_| |_|");
    log_info!(target: "boot", "Supervisor mode, Sv39 {}-level paging", pmm.levels);
    log_info!(target: "boot", "Harts: {} (at most {})", bm.n_cpus, config.cpus);
    log_info!(target: "boot", "Memory: {:#x}..{:#x} ({} MiB)", bm.mem_base, bm.mem_top, bm.ram_size() / MIB);
    log_info!(target: "boot", "User memory: {:#x}..{:#x}", pmm.usr_mem_base, pmm.usr_mem_top);
    log_info!(target: "boot", "I/O: {:#x}..{:#x}", bm.mio_base, bm.mio_top);
    match bm.node_id {
        -1 => log_info!(target: "boot", "Node id: will get from the network!"),
        id => log_info!(target: "boot", "Node id: {}", id),
    }
    log_info!(target: "boot", "Position: ({}, {}, {})", bm.space_x, bm.space_y, bm.space_z);
    match BootMap::offset(bm.extras_offset) {
        Some(offset) => log_info!(
            target: "boot",
            "Extras: {} bytes",
            (bm.img_size as usize).saturating_sub(offset)
        ),
        None => log_info!(target: "boot", "Extras: none"),
    }
    if !bm.has_application() {
        log_error!(target: "boot", "No APPLICATION in boot image");
    }
}
