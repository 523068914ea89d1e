// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Build configuration of the bring-up stage.
//!
//! Cargo features pick the defaults baked into [`SetupConfig::SIFIVE_U`];
//! tests construct their own values.

use crate::types::{HartId, HartMask};

/// Harts the boot stacks and per-hart tables are sized for (E51 + 4 x U54).
pub const MAX_HARTS: usize = 5;
/// Application slots in the boot descriptor and the load map.
pub const MAX_APPS: usize = 4;
/// Per-hart stack used from `_entry` until the next stage takes over.
pub const BOOT_STACK_SIZE: usize = 16 * 1024;

/// How control reaches the next stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandoffMode {
    /// Plain call; valid because RAM stays identity mapped.
    DirectCall,
    /// `sepc` + `sret`.
    ExceptionReturn,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetupConfig {
    /// Upper bound for the descriptor's hart count.
    pub cpus: usize,
    /// OS stack per hart.
    pub sys_stack_size: usize,
    pub app_stack_size: usize,
    pub app_heap_size: usize,
    /// Reserve stack and heap blocks behind every application's data.
    pub multiheap: bool,
    /// Application slots consulted (1 for single-application images).
    pub max_apps: usize,
    /// Tag device leaves with the Svpbmt IO attribute.
    pub svpbmt: bool,
    /// Harts without supervisor mode; they park in machine mode.
    pub parked_harts: HartMask,
    pub handoff: HandoffMode,
}

impl SetupConfig {
    pub const SIFIVE_U: Self = Self {
        cpus: 4,
        sys_stack_size: 64 * 1024,
        app_stack_size: 64 * 1024,
        app_heap_size: 1024 * 1024,
        multiheap: cfg!(feature = "multiheap"),
        max_apps: MAX_APPS,
        svpbmt: cfg!(feature = "svpbmt"),
        parked_harts: HartMask::EMPTY.with(HartId::from_raw(0)),
        handoff: if cfg!(feature = "handoff_sret") {
            HandoffMode::ExceptionReturn
        } else {
            HandoffMode::DirectCall
        },
    };

    /// Hart that builds the address space; every other hart waits for it.
    pub const fn builder_hart(&self) -> Option<HartId> {
        self.parked_harts.first_absent()
    }

    pub const fn is_parked(&self, hart: HartId) -> bool {
        self.parked_harts.contains(hart)
    }

    /// Application slots actually scanned.
    pub const fn app_slots(&self) -> usize {
        if self.max_apps < MAX_APPS {
            self.max_apps
        } else {
            MAX_APPS
        }
    }
}
