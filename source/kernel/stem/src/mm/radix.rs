// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Construction of the boot address space in planner-reserved pages
//! OWNERS: @kernel-mm-team
//! PUBLIC API: Geometry, PageTableBuilder::build(si) -> satp, verify(), dump()
//! DEPENDS_ON: mm::page_table, info::SystemInfo, layout::MemoryLayout
//! INVARIANTS: Every RAM page has exactly one leaf, shared by the window and the identity view;
//!             tables are written once, before satp, and never freed
//!
//! The kernel directory (root slot of `KERNEL_BASE`) holds the system,
//! I/O and, for the two-level geometry, the physical-memory window. When
//! RAM needs more leaf tables than that window's slots, RAM moves to a
//! window of its own at root level and each root slot gets a second-level
//! directory.

use super::page_table::{
    entry_address, is_leaf, is_valid, leaf_entry, pointer_entry, translate, PageFlags,
    DEVICE_FLAGS, KERNEL_FLAGS, PBMT_IO,
};
use super::{
    directory_index, page_tables, pages, root_index, satp, BootMemory, PAGE_SIZE, PT_ENTRIES,
};
use crate::error::SetupError;
use crate::info::SystemInfo;
use crate::layout::{MemoryLayout, KERNEL_BASE, SYS_PD_PAGES};

/// Shape of the tree below the root for the physical-memory window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Geometry {
    /// Leaf tables hang off the kernel directory.
    TwoLevel,
    /// Leaf tables hang off dedicated second-level directories.
    ThreeLevel,
}

impl Geometry {
    /// Picks the geometry for `leaf_tables` tables given `capacity`
    /// directory slots in the two-level window.
    pub const fn select(leaf_tables: usize, capacity: usize) -> Self {
        if leaf_tables <= capacity {
            Geometry::TwoLevel
        } else {
            Geometry::ThreeLevel
        }
    }

    pub const fn levels(self) -> usize {
        match self {
            Geometry::TwoLevel => 2,
            Geometry::ThreeLevel => 3,
        }
    }

    pub const fn from_levels(levels: usize) -> Option<Self> {
        match levels {
            2 => Some(Geometry::TwoLevel),
            3 => Some(Geometry::ThreeLevel),
            _ => None,
        }
    }

    /// Second-level directories needed for `leaf_tables`.
    pub const fn directories(self, leaf_tables: usize) -> usize {
        match self {
            Geometry::TwoLevel => 0,
            Geometry::ThreeLevel => leaf_tables.div_ceil(PT_ENTRIES),
        }
    }
}

/// Writes the boot address space described by a planned [`SystemInfo`].
pub struct PageTableBuilder<'a, M: BootMemory + ?Sized> {
    mem: &'a mut M,
    layout: &'a MemoryLayout,
    device_attrs: usize,
}

impl<'a, M: BootMemory + ?Sized> PageTableBuilder<'a, M> {
    pub fn new(mem: &'a mut M, layout: &'a MemoryLayout, svpbmt: bool) -> Self {
        Self { mem, layout, device_attrs: if svpbmt { PBMT_IO } else { 0 } }
    }

    /// Builds the whole tree and returns the `satp` value selecting it.
    /// Nothing is activated here.
    pub fn build(&mut self, si: &SystemInfo) -> Result<usize, SetupError> {
        let pmm = &si.pmm;
        let geometry = Geometry::from_levels(pmm.levels).ok_or(SetupError::Unplanned)?;
        let root = pmm.sys_pd;
        let kernel_dir = root + PAGE_SIZE;
        let identity_dir = root + 2 * PAGE_SIZE;

        for table in [root, kernel_dir, identity_dir, pmm.sys_pt] {
            self.mem.table(table).clear();
        }

        self.map_system(si);
        self.link(kernel_dir, directory_index(self.layout.sys), pmm.sys_pt);
        self.link(root, root_index(KERNEL_BASE), kernel_dir);

        self.map_io(si, kernel_dir);

        match geometry {
            Geometry::TwoLevel => self.map_ram_two_level(si, root, kernel_dir, identity_dir),
            Geometry::ThreeLevel => self.map_ram_three_level(si, root),
        }

        Ok(satp(root))
    }

    fn map_system(&mut self, si: &SystemInfo) {
        let (lm, pmm, layout) = (&si.lm, &si.pmm, self.layout);
        let sys_pt = self.mem.table(pmm.sys_pt);
        let mut map = |va: usize, pa: usize, count: usize| {
            let first = (va - layout.sys) / PAGE_SIZE;
            for i in 0..count {
                sys_pt.entries[first + i] = leaf_entry(pa + i * PAGE_SIZE, KERNEL_FLAGS, 0);
            }
        };
        map(layout.sys_info(), pmm.sys_info, 1);
        map(layout.sys_pt(), pmm.sys_pt, 1);
        map(layout.sys_pd(), pmm.sys_pd, SYS_PD_PAGES);
        map(layout.sys_code(), pmm.sys_code, pages(lm.system.code_size));
        map(layout.sys_data(), pmm.sys_data, pages(lm.system.data_size));
        map(layout.sys_stack(), pmm.sys_stack, pages(lm.sys_stack_size));
    }

    fn map_io(&mut self, si: &SystemInfo, kernel_dir: usize) {
        let (bm, pmm) = (&si.bm, &si.pmm);
        let total = pages(bm.io_size());
        let first_slot = directory_index(self.layout.io);
        for j in 0..pmm.io_pt_count {
            let leaf = pmm.io_pts + j * PAGE_SIZE;
            let done = j * PT_ENTRIES;
            let count = (total - done).min(PT_ENTRIES);
            self.fill_leaf(leaf, bm.mio_base + done * PAGE_SIZE, count, DEVICE_FLAGS, self.device_attrs);
            self.link(kernel_dir, first_slot + j, leaf);
        }
    }

    fn map_ram_two_level(&mut self, si: &SystemInfo, root: usize, kernel_dir: usize, identity_dir: usize) {
        let (bm, pmm) = (&si.bm, &si.pmm);
        let total = pages(bm.ram_size());
        let window_slot = directory_index(self.layout.phy_mem);
        let identity_slot = directory_index(bm.mem_base);
        for j in 0..pmm.phy_mem_pt_count {
            let leaf = pmm.phy_mem_pts + j * PAGE_SIZE;
            let done = j * PT_ENTRIES;
            let count = (total - done).min(PT_ENTRIES);
            self.fill_leaf(leaf, bm.mem_base + done * PAGE_SIZE, count, KERNEL_FLAGS, 0);
            self.link(kernel_dir, window_slot + j, leaf);
            self.link(identity_dir, identity_slot + j, leaf);
        }
        self.link(root, root_index(bm.mem_base), identity_dir);
    }

    fn map_ram_three_level(&mut self, si: &SystemInfo, root: usize) {
        let (bm, pmm) = (&si.bm, &si.pmm);
        let mut cursor = bm.mem_base;
        let mut next_leaf = pmm.phy_mem_pts;
        let window_slot = root_index(self.layout.phy_mem_wide);
        let identity_slot = root_index(bm.mem_base);
        for d in 0..pmm.phy_mem_pd_count {
            let dir = pmm.phy_mem_pds + d * PAGE_SIZE;
            self.mem.table(dir).clear();
            self.link(root, window_slot + d, dir);
            self.link(root, identity_slot + d, dir);
            for slot in 0..PT_ENTRIES {
                if cursor >= bm.mem_top {
                    break;
                }
                let count = pages(bm.mem_top - cursor).min(PT_ENTRIES);
                self.fill_leaf(next_leaf, cursor, count, KERNEL_FLAGS, 0);
                self.link(dir, slot, next_leaf);
                next_leaf += PAGE_SIZE;
                cursor += count * PAGE_SIZE;
            }
        }
    }

    fn fill_leaf(&mut self, leaf: usize, first: usize, count: usize, flags: PageFlags, attrs: usize) {
        let table = self.mem.table(leaf);
        table.clear();
        for (i, entry) in table.entries.iter_mut().take(count).enumerate() {
            *entry = leaf_entry(first + i * PAGE_SIZE, flags, attrs);
        }
    }

    fn link(&mut self, table: usize, slot: usize, next: usize) {
        self.mem.table(table).entries[slot] = pointer_entry(next);
    }
}

/// Checks that every RAM page resolves through both the window and the
/// identity view to itself, and that every system page reaches its frame.
pub fn verify<M: BootMemory + ?Sized>(
    mem: &M,
    si: &SystemInfo,
    layout: &MemoryLayout,
) -> Result<(), SetupError> {
    let (bm, lm, pmm) = (&si.bm, &si.lm, &si.pmm);
    let root = pmm.sys_pd;
    let resolves = |va: usize, pa: usize| match translate(mem, root, va) {
        Some((found, _)) if found == pa => Ok(()),
        _ => Err(SetupError::TranslationMismatch { va, expected: pa }),
    };
    for page in 0..pages(bm.ram_size()) {
        let pa = bm.mem_base + page * PAGE_SIZE;
        resolves(pmm.phy_mem_window + page * PAGE_SIZE, pa)?;
        resolves(pa, pa)?;
    }
    for page in 0..pages(lm.system.code_size) {
        resolves(layout.sys_code() + page * PAGE_SIZE, pmm.sys_code + page * PAGE_SIZE)?;
    }
    for page in 0..pages(lm.sys_stack_size) {
        resolves(layout.sys_stack() + page * PAGE_SIZE, pmm.sys_stack + page * PAGE_SIZE)?;
    }
    resolves(layout.sys_info(), pmm.sys_info)
}

/// Logs the populated part of the tree, one line per table.
pub fn dump<M: BootMemory + ?Sized>(mem: &M, root: usize) {
    fn walk<M: BootMemory + ?Sized>(mem: &M, table: usize, level: usize) {
        let Some(page) = mem.table_ref(table) else {
            return;
        };
        let leaves = page.entries.iter().filter(|e| is_leaf(**e)).count();
        log_debug!(
            target: "pt",
            "L{} {:#x}: {} valid, {} leaves",
            level,
            table,
            page.valid_slots(),
            leaves
        );
        if level == 0 {
            return;
        }
        for entry in page.entries.iter().copied().filter(|e| is_valid(*e) && !is_leaf(*e)) {
            walk(mem, entry_address(entry), level - 1);
        }
    }
    walk(mem, root, 2);
}

/// Leaf tables the physical-memory window needs for `ram_bytes`.
pub const fn window_tables(ram_bytes: usize) -> usize {
    page_tables(pages(ram_bytes))
}
