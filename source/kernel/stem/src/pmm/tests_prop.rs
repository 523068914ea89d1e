// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for the physical memory planner
//! OWNERS: @kernel-mm-team
//! NOTE: Tests only; no kernel logic.
//!
//! TEST_SCOPE:
//!   - Planned bases are page aligned and stay inside RAM
//!   - free_base < free_top whenever planning succeeds
//!   - Planning never fails for a machine with room to spare
//!
//! TEST_SCENARIOS:
//!   - plan_is_aligned_and_inside_ram(): random RAM size and OS footprint
//!   - free_region_is_never_empty(): same inputs, checks the free region bounds

use super::build;
use crate::config::SetupConfig;
use crate::elf::BootImage;
use crate::layout::MemoryLayout;
use crate::loadmap;
use crate::mm::{is_aligned, PAGE_SIZE};
use crate::testutil::{BlobBuilder, ElfBuilder};
use proptest::prelude::*;

const MIB: usize = 1024 * 1024;

fn arb_machine() -> impl Strategy<Value = (usize, usize, usize, u32)> {
    (32usize..512, 1usize..0x40_000, 0usize..0x60_000, 1u32..=4)
        .prop_map(|(ram_mib, code, data, cpus)| (ram_mib * MIB, code, data, cpus))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn plan_is_aligned_and_inside_ram((ram, code, data, cpus) in arb_machine()) {
        let layout = MemoryLayout::SIFIVE_U.with_ram(0x8000_0000, 0x8000_0000 + ram);
        let system = ElfBuilder::new(layout.sys_code())
            .load(layout.sys_code(), &[0x55; 8], code)
            .load(layout.sys_data(), &[], data)
            .build();
        let (blob, bm) = BlobBuilder::new(&layout).system(&system).cpus(cpus).build();
        let lm = loadmap::build(&BootImage::new(&blob), &bm, &layout, &SetupConfig::SIFIVE_U)
            .expect("load map");
        let pmm = build(&bm, &lm, &layout).expect("plan");

        for base in [
            pmm.mmode_forward, pmm.sys_info, pmm.sys_pt, pmm.sys_pd, pmm.sys_code,
            pmm.sys_data, pmm.sys_stack, pmm.phy_mem_pts, pmm.io_pts, pmm.free_base, pmm.free_top,
        ] {
            prop_assert!(is_aligned(base, PAGE_SIZE));
            prop_assert!(base >= layout.ram_base && base < layout.ram_top);
        }
        prop_assert!(pmm.sys_code < pmm.sys_pd);
        prop_assert!(pmm.sys_stack <= pmm.sys_data && pmm.sys_data <= pmm.sys_code);
    }

    #[test]
    fn free_region_is_never_empty((ram, code, data, cpus) in arb_machine()) {
        let layout = MemoryLayout::SIFIVE_U.with_ram(0x8000_0000, 0x8000_0000 + ram);
        let system = ElfBuilder::new(layout.sys_code())
            .load(layout.sys_code(), &[0x55; 8], code)
            .load(layout.sys_data(), &[], data)
            .build();
        let (blob, bm) = BlobBuilder::new(&layout).system(&system).cpus(cpus).build();
        let lm = loadmap::build(&BootImage::new(&blob), &bm, &layout, &SetupConfig::SIFIVE_U)
            .expect("load map");
        let pmm = build(&bm, &lm, &layout).expect("plan");
        prop_assert!(pmm.free_base < pmm.free_top);
        prop_assert_eq!(pmm.free_base, layout.ram_base);
        prop_assert_eq!(pmm.usr_mem_top, pmm.free_top);
    }
}
