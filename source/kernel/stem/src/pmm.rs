// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Physical memory plan for the boot address space
//! OWNERS: @kernel-mm-team
//! PUBLIC API: build(bm, lm, layout) -> PhysMemMap
//! DEPENDS_ON: info, layout, mm::radix::Geometry
//! INVARIANTS: Regions are page aligned, disjoint and handed out strictly top-down from the end of RAM;
//!             free_base < free_top; free_top lies above the running SETUP

use crate::error::{Payload, Region, SetupError, Window};
use crate::info::{BootMap, LoadMap, PhysMemMap};
use crate::layout::{MemoryLayout, SYS_PD_PAGES};
use crate::mm::radix::{window_tables, Geometry};
use crate::mm::{
    align_page, directory_index, is_aligned, pages, page_tables, DIRECTORY_SPAN, LOW_HALF_TOP,
    PAGE_SIZE, PT_ENTRIES, ROOT_SPAN,
};

#[cfg(test)]
mod tests;
#[cfg(test)]
mod tests_prop;

/// Bump allocator handing out pages downwards.
struct TopDown {
    floor: usize,
    top: usize,
}

impl TopDown {
    fn take(&mut self, count: usize) -> Result<usize, SetupError> {
        let available = (self.top - self.floor) / PAGE_SIZE;
        if count > available {
            return Err(SetupError::OutOfMemory { needed_pages: count, available_pages: available });
        }
        self.top -= count * PAGE_SIZE;
        Ok(self.top)
    }
}

/// Plans where the system, the page tables and the forwarder live.
pub fn build(bm: &BootMap, lm: &LoadMap, layout: &MemoryLayout) -> Result<PhysMemMap, SetupError> {
    check_bounds(bm)?;

    let mut pmm = PhysMemMap::default();
    let mut alloc = TopDown { floor: bm.mem_base, top: bm.mem_top };

    pmm.mmode_forward = alloc.take(1)?;
    if pmm.mmode_forward != layout.mmode_forward() {
        return Err(SetupError::LayoutMismatch {
            payload: Payload::Setup,
            region: Region::Forwarder,
            expected: layout.mmode_forward(),
            found: pmm.mmode_forward,
        });
    }
    pmm.sys_info = alloc.take(1)?;
    pmm.sys_pt = alloc.take(1)?;
    pmm.sys_pd = alloc.take(SYS_PD_PAGES)?;
    pmm.sys_code = alloc.take(pages(lm.system.code_size))?;
    pmm.sys_data = alloc.take(pages(lm.system.data_size))?;
    pmm.sys_stack = alloc.take(pages(lm.sys_stack_size))?;

    let leaf_tables = window_tables(bm.ram_size());
    let geometry = Geometry::select(leaf_tables, layout.phy_mem_slots);
    check_window(bm, layout, geometry, leaf_tables)?;
    pmm.levels = geometry.levels();
    pmm.phy_mem_pt_count = leaf_tables;
    pmm.phy_mem_pts = alloc.take(leaf_tables)?;
    pmm.phy_mem_pd_count = geometry.directories(leaf_tables);
    if pmm.phy_mem_pd_count > 0 {
        pmm.phy_mem_pds = alloc.take(pmm.phy_mem_pd_count)?;
    }
    pmm.phy_mem_window = match geometry {
        Geometry::TwoLevel => layout.phy_mem,
        Geometry::ThreeLevel => layout.phy_mem_wide,
    };

    pmm.io_pt_count = page_tables(pages(bm.io_size()));
    if pmm.io_pt_count > layout.io_slots {
        return Err(SetupError::WindowOverflow {
            window: Window::Io,
            tables: pmm.io_pt_count,
            capacity: layout.io_slots,
        });
    }
    if pmm.io_pt_count > 0 {
        pmm.io_pts = alloc.take(pmm.io_pt_count)?;
    }

    pmm.usr_mem_base = bm.mem_base;
    pmm.usr_mem_top = alloc.top;
    pmm.free_top = alloc.top;
    pmm.free_base = free_base(lm, bm.mem_base);

    if lm.setup.is_present() {
        let setup_end = lm.setup.code + lm.setup.code_size + lm.setup.data_size;
        if pmm.free_top <= setup_end {
            return Err(SetupError::SetupOverwritten { free_top: pmm.free_top, setup_end });
        }
    }
    if pmm.free_base >= pmm.free_top {
        return Err(SetupError::FreeRegionEmpty { base: pmm.free_base, top: pmm.free_top });
    }

    log_debug!(
        target: "pmm",
        "{}-level tree, {} leaf tables, {} directories, {} I/O tables, free {:#x}..{:#x}",
        pmm.levels,
        pmm.phy_mem_pt_count,
        pmm.phy_mem_pd_count,
        pmm.io_pt_count,
        pmm.free_base,
        pmm.free_top
    );
    Ok(pmm)
}

fn check_bounds(bm: &BootMap) -> Result<(), SetupError> {
    if !is_aligned(bm.mem_base, DIRECTORY_SPAN) {
        return Err(SetupError::Misaligned { what: "RAM base", addr: bm.mem_base, align: DIRECTORY_SPAN });
    }
    if !is_aligned(bm.mem_top, PAGE_SIZE) || bm.mem_top <= bm.mem_base {
        return Err(SetupError::Misaligned { what: "RAM top", addr: bm.mem_top, align: PAGE_SIZE });
    }
    if bm.mem_top > LOW_HALF_TOP {
        return Err(SetupError::Unmappable { what: "RAM top", addr: bm.mem_top });
    }
    if bm.io_size() > 0 {
        if !is_aligned(bm.mio_base, DIRECTORY_SPAN) {
            return Err(SetupError::Misaligned { what: "I/O base", addr: bm.mio_base, align: DIRECTORY_SPAN });
        }
        if !is_aligned(bm.mio_top, PAGE_SIZE) {
            return Err(SetupError::Misaligned { what: "I/O top", addr: bm.mio_top, align: PAGE_SIZE });
        }
    }
    Ok(())
}

fn check_window(
    bm: &BootMap,
    layout: &MemoryLayout,
    geometry: Geometry,
    leaf_tables: usize,
) -> Result<(), SetupError> {
    match geometry {
        Geometry::TwoLevel => {
            // The identity view of RAM lives in a single directory.
            let slots = directory_index(bm.mem_base) + leaf_tables;
            if slots > PT_ENTRIES {
                return Err(SetupError::WindowOverflow {
                    window: Window::Identity,
                    tables: leaf_tables,
                    capacity: PT_ENTRIES - directory_index(bm.mem_base),
                });
            }
        }
        Geometry::ThreeLevel => {
            if !is_aligned(bm.mem_base, ROOT_SPAN) {
                return Err(SetupError::Misaligned { what: "RAM base", addr: bm.mem_base, align: ROOT_SPAN });
            }
            let directories = geometry.directories(leaf_tables);
            if directories > layout.phy_mem_wide_slots {
                return Err(SetupError::WindowOverflow {
                    window: Window::PhysicalMemory,
                    tables: directories,
                    capacity: layout.phy_mem_wide_slots,
                });
            }
        }
    }
    Ok(())
}

/// First page past every payload placed in RAM by the loader.
fn free_base(lm: &LoadMap, mem_base: usize) -> usize {
    let init = lm.init.is_present().then(|| lm.init.code_end().max(lm.init.data_end()));
    let apps = lm
        .apps
        .iter()
        .filter(|app| app.image.is_present())
        .map(|app| app.image.code_end().max(app.image.data_end()));
    init.into_iter().chain(apps).max().map_or(mem_base, align_page).max(mem_base)
}
