// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for the boot address space
//! OWNERS: @kernel-mm-team
//! NOTE: Tests only; no kernel logic.
//!
//! TEST_SCOPE:
//!   - Every RAM page has exactly one leaf through the window, in order
//!   - Identity view resolves to the same frames
//!
//! TEST_SCENARIOS:
//!   - window_is_contiguous_and_increasing(): random RAM sizes, two-level
//!   - leaf_tables_cover_ram_exactly(): leaf entry count equals RAM pages

use super::page_table::{entry_address, is_leaf, translate};
use super::radix::{verify, PageTableBuilder};
use super::{pages, BootMemory, PAGE_SIZE};
use crate::config::SetupConfig;
use crate::elf::BootImage;
use crate::info::SystemInfo;
use crate::layout::MemoryLayout;
use crate::testutil::{BlobBuilder, SimMemory};
use crate::{loadmap, pmm};
use proptest::prelude::*;

fn planned(ram_pages: usize) -> (MemoryLayout, SystemInfo) {
    let layout = MemoryLayout::SIFIVE_U.with_ram(0x8000_0000, 0x8000_0000 + ram_pages * PAGE_SIZE);
    let (blob, mut bm) = BlobBuilder::new(&layout).build();
    bm.mio_base = 0;
    bm.mio_top = 0;
    let mut si = SystemInfo::new(bm);
    si.lm = loadmap::build(&BootImage::new(&blob), &si.bm, &layout, &SetupConfig::SIFIVE_U).expect("load map");
    si.pmm = pmm::build(&si.bm, &si.lm, &layout).expect("memory plan");
    (layout, si)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn window_is_contiguous_and_increasing(ram_pages in 16usize..20_000) {
        let (layout, si) = planned(ram_pages);
        let mut mem = SimMemory::new();
        PageTableBuilder::new(&mut mem, &layout, false).build(&si).expect("builds");
        prop_assert!(verify(&mem, &si, &layout).is_ok());

        let mut previous = None;
        for page in 0..ram_pages {
            let (pa, _) = translate(&mem, si.pmm.sys_pd, layout.phy_mem + page * PAGE_SIZE)
                .expect("mapped");
            if let Some(prev) = previous {
                prop_assert_eq!(pa, prev + PAGE_SIZE);
            }
            previous = Some(pa);
        }
        prop_assert_eq!(translate(&mem, si.pmm.sys_pd, layout.phy_mem + ram_pages * PAGE_SIZE), None);
    }

    #[test]
    fn leaf_tables_cover_ram_exactly(ram_pages in 16usize..20_000) {
        let (layout, si) = planned(ram_pages);
        let mut mem = SimMemory::new();
        PageTableBuilder::new(&mut mem, &layout, false).build(&si).expect("builds");

        let mut leaves = 0;
        for t in 0..si.pmm.phy_mem_pt_count {
            let table = mem.table_ref(si.pmm.phy_mem_pts + t * PAGE_SIZE).expect("leaf table");
            for entry in table.entries.iter().copied().filter(|e| is_leaf(*e)) {
                prop_assert_eq!(entry_address(entry), layout.ram_base + leaves * PAGE_SIZE);
                leaves += 1;
            }
        }
        prop_assert_eq!(leaves, pages(ram_pages * PAGE_SIZE));
    }
}
