// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Paging arithmetic, Sv39 table encoding and the tree builder.
//!
//! Tables are constructed in place at planner-chosen physical addresses
//! through [`BootMemory`]. On the machine that is [`DirectMemory`]; the
//! host tests substitute a sparse simulator.

pub mod page_table;
pub mod radix;

#[cfg(test)]
mod tests_prop;

pub use page_table::{PageFlags, PageTablePage};

/// Size of a single page in bytes.
pub const PAGE_SIZE: usize = 4096;
/// log2 of [`PAGE_SIZE`].
pub const PAGE_SHIFT: usize = 12;
/// Number of entries per Sv39 table page.
pub const PT_ENTRIES: usize = 512;
/// Bytes covered by one leaf table (one directory slot).
pub const DIRECTORY_SPAN: usize = PT_ENTRIES * PAGE_SIZE;
/// Bytes covered by one second-level directory (one root slot).
pub const ROOT_SPAN: usize = PT_ENTRIES * DIRECTORY_SPAN;
/// First address past the lower canonical Sv39 half.
pub const LOW_HALF_TOP: usize = 1 << 38;

const SATP_MODE_SV39: usize = 8 << 60;

/// Number of pages needed to hold `bytes`.
#[inline]
pub const fn pages(bytes: usize) -> usize {
    bytes.div_ceil(PAGE_SIZE)
}

/// Number of leaf tables needed to map `pages` pages.
#[inline]
pub const fn page_tables(pages: usize) -> usize {
    pages.div_ceil(PT_ENTRIES)
}

#[inline]
pub const fn align_page(addr: usize) -> usize {
    addr.saturating_add(PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

#[inline]
pub const fn is_aligned(addr: usize, align: usize) -> bool {
    addr & (align - 1) == 0
}

/// Root-table slot selecting `va`.
#[inline]
pub const fn root_index(va: usize) -> usize {
    (va >> 30) & (PT_ENTRIES - 1)
}

/// Second-level directory slot selecting `va`.
#[inline]
pub const fn directory_index(va: usize) -> usize {
    (va >> 21) & (PT_ENTRIES - 1)
}

/// Leaf-table slot selecting `va`.
#[inline]
pub const fn table_index(va: usize) -> usize {
    (va >> PAGE_SHIFT) & (PT_ENTRIES - 1)
}

/// `satp` value selecting the Sv39 tree rooted at physical page `root`.
#[inline]
pub const fn satp(root: usize) -> usize {
    SATP_MODE_SV39 | (root >> PAGE_SHIFT)
}

/// Memory as seen by the bring-up code while it builds the address space.
///
/// Addresses are interpreted in whatever translation is current: physical
/// before `satp` is written, identity or windowed afterwards.
pub trait BootMemory {
    /// Returns the table page placed at the page-aligned address `pa`.
    fn table(&mut self, pa: usize) -> &mut PageTablePage;

    /// Returns the table page at `pa` for reading, if it is backed.
    fn table_ref(&self, pa: usize) -> Option<&PageTablePage>;

    /// Copies `bytes` to `addr`.
    fn write(&mut self, addr: usize, bytes: &[u8]);

    /// Sets `len` bytes starting at `addr` to `value`.
    fn fill(&mut self, addr: usize, value: u8, len: usize);
}

/// [`BootMemory`] backed by plain loads and stores to the given addresses.
pub struct DirectMemory {
    _private: (),
}

impl DirectMemory {
    /// # Safety
    ///
    /// Every address later passed to the accessors must be mapped, writable
    /// and not aliased by live Rust references. Only the designated builder
    /// hart constructs one, and only for planner-reserved regions and
    /// payload destinations.
    pub const unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl BootMemory for DirectMemory {
    fn table(&mut self, pa: usize) -> &mut PageTablePage {
        debug_assert!(is_aligned(pa, PAGE_SIZE));
        // SAFETY: guaranteed by the contract of `DirectMemory::new`.
        unsafe { &mut *(pa as *mut PageTablePage) }
    }

    fn table_ref(&self, pa: usize) -> Option<&PageTablePage> {
        // SAFETY: guaranteed by the contract of `DirectMemory::new`.
        Some(unsafe { &*(pa as *const PageTablePage) })
    }

    fn write(&mut self, addr: usize, bytes: &[u8]) {
        // SAFETY: guaranteed by the contract of `DirectMemory::new`; the
        // source is the boot image, which never overlaps a destination.
        unsafe { core::ptr::copy_nonoverlapping(bytes.as_ptr(), addr as *mut u8, bytes.len()) };
    }

    fn fill(&mut self, addr: usize, value: u8, len: usize) {
        // SAFETY: guaranteed by the contract of `DirectMemory::new`.
        unsafe { core::ptr::write_bytes(addr as *mut u8, value, len) };
    }
}
