// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Sv39 entry encoding and a read-only table walk.

use bitflags::bitflags;

use super::{BootMemory, PAGE_SHIFT, PAGE_SIZE, PT_ENTRIES};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    /// Flags stored in Sv39 page-table entries.
    pub struct PageFlags: usize {
        const VALID = 1 << 0;
        const READ = 1 << 1;
        const WRITE = 1 << 2;
        const EXECUTE = 1 << 3;
        const USER = 1 << 4;
        const GLOBAL = 1 << 5;
        const ACCESSED = 1 << 6;
        const DIRTY = 1 << 7;
    }
}

/// Leaf flags for kernel memory: full access, supervisor only, global.
pub const KERNEL_FLAGS: PageFlags = PageFlags::VALID
    .union(PageFlags::READ)
    .union(PageFlags::WRITE)
    .union(PageFlags::EXECUTE)
    .union(PageFlags::GLOBAL)
    .union(PageFlags::ACCESSED)
    .union(PageFlags::DIRTY);

/// Leaf flags for device windows: no execute.
pub const DEVICE_FLAGS: PageFlags = PageFlags::VALID
    .union(PageFlags::READ)
    .union(PageFlags::WRITE)
    .union(PageFlags::GLOBAL)
    .union(PageFlags::ACCESSED)
    .union(PageFlags::DIRTY);

/// Svpbmt attribute selecting non-cacheable, strongly ordered I/O.
pub const PBMT_IO: usize = 2 << 61;

const LEAF_PERMS: PageFlags = PageFlags::READ.union(PageFlags::WRITE).union(PageFlags::EXECUTE);
const FLAG_MASK: usize = 0x3ff;
const PPN_MASK: usize = (1 << 44) - 1;

/// One 4 KiB table page.
#[repr(C, align(4096))]
pub struct PageTablePage {
    pub entries: [usize; PT_ENTRIES],
}

impl PageTablePage {
    pub const fn new() -> Self {
        Self { entries: [0; PT_ENTRIES] }
    }

    pub fn clear(&mut self) {
        self.entries = [0; PT_ENTRIES];
    }

    /// Number of valid entries.
    pub fn valid_slots(&self) -> usize {
        self.entries.iter().filter(|e| is_valid(**e)).count()
    }
}

impl Default for PageTablePage {
    fn default() -> Self {
        Self::new()
    }
}

/// Encodes a leaf mapping the frame at `pa`.
#[inline]
pub const fn leaf_entry(pa: usize, flags: PageFlags, attrs: usize) -> usize {
    ((pa >> PAGE_SHIFT) << 10) | flags.bits() | attrs
}

/// Encodes a pointer to the next-level table at `pa`.
#[inline]
pub const fn pointer_entry(pa: usize) -> usize {
    ((pa >> PAGE_SHIFT) << 10) | PageFlags::VALID.bits()
}

/// Physical address an entry refers to.
#[inline]
pub const fn entry_address(entry: usize) -> usize {
    ((entry >> 10) & PPN_MASK) << PAGE_SHIFT
}

#[inline]
pub const fn is_valid(entry: usize) -> bool {
    entry & PageFlags::VALID.bits() != 0
}

#[inline]
pub const fn is_leaf(entry: usize) -> bool {
    is_valid(entry) && entry & LEAF_PERMS.bits() != 0
}

#[inline]
pub fn entry_flags(entry: usize) -> PageFlags {
    PageFlags::from_bits_truncate(entry & FLAG_MASK)
}

pub(crate) fn vpn_indices(va: usize) -> [usize; 3] {
    let vpn2 = (va >> 30) & 0x1ff;
    let vpn1 = (va >> 21) & 0x1ff;
    let vpn0 = (va >> 12) & 0x1ff;
    [vpn2, vpn1, vpn0]
}

pub fn is_canonical_sv39(va: usize) -> bool {
    let sign = (va >> 38) & 1;
    let upper = va >> 39;
    if sign == 0 {
        upper == 0
    } else {
        upper == usize::MAX >> 39
    }
}

/// Walks the tree rooted at `root` and returns the frame and flags `va`
/// resolves to. Superpage leaves are honoured.
pub fn translate<M: BootMemory + ?Sized>(
    mem: &M,
    root: usize,
    va: usize,
) -> Option<(usize, PageFlags)> {
    if !is_canonical_sv39(va) {
        return None;
    }
    let indices = vpn_indices(va);
    let mut table = root;
    for (level, index) in indices.iter().enumerate() {
        let entry = mem.table_ref(table)?.entries[*index];
        if !is_valid(entry) {
            return None;
        }
        if is_leaf(entry) {
            let span_shift = PAGE_SHIFT + 9 * (indices.len() - 1 - level);
            let offset = va & ((1 << span_shift) - 1) & !(PAGE_SIZE - 1);
            return Some((entry_address(entry) + offset, entry_flags(entry)));
        }
        if level == indices.len() - 1 {
            return None;
        }
        table = entry_address(entry);
    }
    None
}
