// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Boot-time system information record shared with the image builder and the next stage
//! OWNERS: @kernel-team
//! PUBLIC API: SystemInfo { bm, lm, pmm }, BootMap, LoadMap, PayloadMap, AppMap, PhysMemMap
//! DEPENDS_ON: config::MAX_APPS
//! INVARIANTS: repr(C) without padding; whole record fits in the info page; absent offsets are u32::MAX

use bitflags::bitflags;
use core::mem::size_of;
use static_assertions::{const_assert, const_assert_eq};

use crate::config::MAX_APPS;
use crate::mm::PAGE_SIZE;

/// Offset value marking a payload as not present in the image.
pub const ABSENT: u32 = u32::MAX;

/// Machine facts and payload offsets written by the image builder.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BootMap {
    pub mem_base: usize,
    /// Exclusive.
    pub mem_top: usize,
    pub mio_base: usize,
    /// Exclusive.
    pub mio_top: usize,
    pub n_cpus: u32,
    /// `-1` when the node learns its id from the network.
    pub node_id: i32,
    pub space_x: i32,
    pub space_y: i32,
    pub space_z: i32,
    pub img_size: u32,
    pub setup_offset: u32,
    pub init_offset: u32,
    pub system_offset: u32,
    pub application_offset: [u32; MAX_APPS],
    pub extras_offset: u32,
}

impl BootMap {
    /// Descriptor with no payloads and no memory.
    pub const EMPTY: Self = Self {
        mem_base: 0,
        mem_top: 0,
        mio_base: 0,
        mio_top: 0,
        n_cpus: 1,
        node_id: -1,
        space_x: -1,
        space_y: -1,
        space_z: -1,
        img_size: 0,
        setup_offset: ABSENT,
        init_offset: ABSENT,
        system_offset: ABSENT,
        application_offset: [ABSENT; MAX_APPS],
        extras_offset: ABSENT,
    };

    pub const fn ram_size(&self) -> usize {
        self.mem_top.saturating_sub(self.mem_base)
    }

    pub const fn io_size(&self) -> usize {
        self.mio_top.saturating_sub(self.mio_base)
    }

    /// Decodes a raw offset field.
    pub const fn offset(raw: u32) -> Option<usize> {
        if raw == ABSENT {
            None
        } else {
            Some(raw as usize)
        }
    }

    pub const fn has_application(&self) -> bool {
        let mut i = 0;
        while i < MAX_APPS {
            if self.application_offset[i] != ABSENT {
                return true;
            }
            i += 1;
        }
        false
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PayloadFlags: u32 {
        const PRESENT = 1 << 0;
        /// At least one loadable segment beyond the code segment.
        const HAS_DATA = 1 << 1;
    }
}

/// Where one payload's code and data live.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PayloadMap {
    pub entry: usize,
    pub code: usize,
    pub code_size: usize,
    pub data: usize,
    pub data_size: usize,
    /// Program-header entries in the payload's ELF image.
    pub segments: u32,
    /// Raw [`PayloadFlags`].
    pub flags: u32,
}

impl PayloadMap {
    pub fn flags(&self) -> PayloadFlags {
        PayloadFlags::from_bits_truncate(self.flags)
    }

    pub fn set_flags(&mut self, flags: PayloadFlags) {
        self.flags = flags.bits();
    }

    pub fn is_present(&self) -> bool {
        self.flags().contains(PayloadFlags::PRESENT)
    }

    pub fn has_data(&self) -> bool {
        self.flags().contains(PayloadFlags::HAS_DATA)
    }

    /// Saturates, so an oversized region still compares past every reservation.
    pub const fn code_end(&self) -> usize {
        self.code.saturating_add(self.code_size)
    }

    pub const fn data_end(&self) -> usize {
        self.data.saturating_add(self.data_size)
    }
}

/// Application payload plus the blocks reserved behind its data.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AppMap {
    pub image: PayloadMap,
    pub stack: usize,
    pub heap: usize,
    pub extra: usize,
    pub extra_size: usize,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadMap {
    pub setup: PayloadMap,
    pub init: PayloadMap,
    pub system: PayloadMap,
    pub apps: [AppMap; MAX_APPS],
    pub sys_stack: usize,
    /// Stack bytes for all harts together.
    pub sys_stack_size: usize,
}

impl LoadMap {
    /// First present application slot.
    pub fn first_app(&self) -> Option<usize> {
        self.apps.iter().position(|app| app.image.is_present())
    }
}

/// Physical placements chosen by the planner, top-down from the end of RAM.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhysMemMap {
    pub mmode_forward: usize,
    pub sys_info: usize,
    pub sys_pt: usize,
    /// Root table, kernel directory, identity directory.
    pub sys_pd: usize,
    pub sys_code: usize,
    pub sys_data: usize,
    pub sys_stack: usize,
    pub phy_mem_pts: usize,
    pub phy_mem_pt_count: usize,
    /// Second-level directories of the three-level window; zero otherwise.
    pub phy_mem_pds: usize,
    pub phy_mem_pd_count: usize,
    pub io_pts: usize,
    pub io_pt_count: usize,
    /// 2 or 3 once planned.
    pub levels: usize,
    /// Virtual base at which RAM is visible to the next stage.
    pub phy_mem_window: usize,
    pub satp: usize,
    pub usr_mem_base: usize,
    pub usr_mem_top: usize,
    pub free_base: usize,
    pub free_top: usize,
}

/// The record patched into the image, updated in place, then published.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SystemInfo {
    pub bm: BootMap,
    pub lm: LoadMap,
    pub pmm: PhysMemMap,
}

impl SystemInfo {
    pub const fn new(bm: BootMap) -> Self {
        Self {
            bm,
            lm: LoadMap {
                setup: EMPTY_PAYLOAD,
                init: EMPTY_PAYLOAD,
                system: EMPTY_PAYLOAD,
                apps: [EMPTY_APP; MAX_APPS],
                sys_stack: 0,
                sys_stack_size: 0,
            },
            pmm: EMPTY_PMM,
        }
    }

    /// Raw bytes, as copied into the info page.
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: repr(C), integer fields only, no padding (asserted below).
        unsafe { core::slice::from_raw_parts(self as *const Self as *const u8, size_of::<Self>()) }
    }
}

const EMPTY_PAYLOAD: PayloadMap = PayloadMap {
    entry: 0,
    code: 0,
    code_size: 0,
    data: 0,
    data_size: 0,
    segments: 0,
    flags: 0,
};

const EMPTY_APP: AppMap = AppMap { image: EMPTY_PAYLOAD, stack: 0, heap: 0, extra: 0, extra_size: 0 };

const EMPTY_PMM: PhysMemMap = PhysMemMap {
    mmode_forward: 0,
    sys_info: 0,
    sys_pt: 0,
    sys_pd: 0,
    sys_code: 0,
    sys_data: 0,
    sys_stack: 0,
    phy_mem_pts: 0,
    phy_mem_pt_count: 0,
    phy_mem_pds: 0,
    phy_mem_pd_count: 0,
    io_pts: 0,
    io_pt_count: 0,
    levels: 0,
    phy_mem_window: 0,
    satp: 0,
    usr_mem_base: 0,
    usr_mem_top: 0,
    free_base: 0,
    free_top: 0,
};

const_assert_eq!(size_of::<usize>(), 8);
const_assert_eq!(size_of::<BootMap>(), 4 * 8 + (10 + MAX_APPS) * 4);
const_assert_eq!(size_of::<PayloadMap>(), 5 * 8 + 2 * 4);
const_assert_eq!(size_of::<AppMap>(), size_of::<PayloadMap>() + 4 * 8);
const_assert_eq!(
    size_of::<LoadMap>(),
    3 * size_of::<PayloadMap>() + MAX_APPS * size_of::<AppMap>() + 2 * 8
);
const_assert_eq!(size_of::<PhysMemMap>(), 20 * 8);
const_assert_eq!(
    size_of::<SystemInfo>(),
    size_of::<BootMap>() + size_of::<LoadMap>() + size_of::<PhysMemMap>()
);
const_assert!(size_of::<SystemInfo>() <= PAGE_SIZE);
