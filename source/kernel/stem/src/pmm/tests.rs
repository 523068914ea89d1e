// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Unit tests for the physical memory planner
//! OWNERS: @kernel-mm-team
//! NOTE: Tests only; allocation order, alignment, free region, failure modes

use super::build;
use crate::config::SetupConfig;
use crate::elf::BootImage;
use crate::error::{Payload, Region, SetupError, Window};
use crate::info::{BootMap, LoadMap, PhysMemMap};
use crate::layout::MemoryLayout;
use crate::loadmap;
use crate::mm::{is_aligned, pages, PAGE_SIZE};
use crate::testutil::{BlobBuilder, ElfBuilder};

const MIB: usize = 1024 * 1024;

fn full_image(layout: &MemoryLayout) -> (Vec<u8>, BootMap) {
    let setup = ElfBuilder::new(layout.boot_image)
        .load(layout.boot_image, &[0; 0x2000], 0x2000)
        .load(layout.boot_image + 0x2000, &[0; 0x100], 0x1000)
        .build();
    let init = ElfBuilder::new(layout.init_code).load(layout.init_code, &[1; 0x100], 0x100).build();
    let system = ElfBuilder::new(layout.sys_code())
        .load(layout.sys_code(), &[2; 0x3000], 0x3000)
        .load(layout.sys_data(), &[3; 0x10], 0x2000)
        .build();
    let app = ElfBuilder::new(layout.app_code(0))
        .load(layout.app_code(0), &[4; 0x100], 0x100)
        .load(layout.app_data(0), &[5; 0x10], 0x1800)
        .build();
    BlobBuilder::new(layout).setup(&setup).init(&init).system(&system).app(0, &app).cpus(4).build()
}

fn load_map(layout: &MemoryLayout, blob: &[u8], bm: &BootMap) -> LoadMap {
    loadmap::build(&BootImage::new(blob), bm, layout, &SetupConfig::SIFIVE_U).expect("load map")
}

fn regions(pmm: &PhysMemMap, lm: &LoadMap) -> [(usize, usize); 9] {
    [
        (pmm.mmode_forward, 1),
        (pmm.sys_info, 1),
        (pmm.sys_pt, 1),
        (pmm.sys_pd, 3),
        (pmm.sys_code, pages(lm.system.code_size)),
        (pmm.sys_data, pages(lm.system.data_size)),
        (pmm.sys_stack, pages(lm.sys_stack_size)),
        (pmm.phy_mem_pts, pmm.phy_mem_pt_count),
        (pmm.io_pts, pmm.io_pt_count),
    ]
}

#[test]
fn regions_are_handed_out_top_down_without_gaps() {
    let layout = MemoryLayout::SIFIVE_U;
    let (blob, bm) = full_image(&layout);
    let lm = load_map(&layout, &blob, &bm);
    let pmm = build(&bm, &lm, &layout).expect("plan");

    assert_eq!(pmm.mmode_forward, layout.ram_top - PAGE_SIZE);
    let mut top = layout.ram_top;
    for (base, count) in regions(&pmm, &lm) {
        assert!(is_aligned(base, PAGE_SIZE));
        assert_eq!(base + count * PAGE_SIZE, top, "region at {:#x} leaves a gap", base);
        top = base;
    }
    assert_eq!(pmm.free_top, top);
    assert_eq!(pmm.usr_mem_top, top);
    assert_eq!(pmm.usr_mem_base, layout.ram_base);
}

#[test]
fn plan_for_the_machine_is_two_level_with_full_io_window() {
    let layout = MemoryLayout::SIFIVE_U;
    let (blob, bm) = full_image(&layout);
    let lm = load_map(&layout, &blob, &bm);
    let pmm = build(&bm, &lm, &layout).expect("plan");

    assert_eq!(pmm.levels, 2);
    assert_eq!(pmm.phy_mem_pt_count, 64);
    assert_eq!(pmm.phy_mem_pd_count, 0);
    assert_eq!(pmm.io_pt_count, layout.io_slots);
    assert_eq!(pmm.phy_mem_window, layout.phy_mem);
    assert_eq!(pages(lm.sys_stack_size), pages(4 * 64 * 1024));
}

#[test]
fn free_region_starts_after_the_last_ram_payload() {
    let layout = MemoryLayout::SIFIVE_U;
    let (blob, bm) = full_image(&layout);
    let lm = load_map(&layout, &blob, &bm);
    let pmm = build(&bm, &lm, &layout).expect("plan");

    assert_eq!(pmm.free_base, layout.app_data(0) + 0x2000);
    assert!(pmm.free_base < pmm.free_top);
    let setup_end = lm.setup.code + lm.setup.code_size + lm.setup.data_size;
    assert!(pmm.free_top > setup_end);
}

#[test]
fn empty_image_frees_from_ram_base() {
    let layout = MemoryLayout::SIFIVE_U;
    let (blob, bm) = BlobBuilder::new(&layout).build();
    let lm = load_map(&layout, &blob, &bm);
    assert_eq!(lm, LoadMap::default());
    let pmm = build(&bm, &lm, &layout).expect("plan");
    assert_eq!(pmm.free_base, layout.ram_base);
    assert_eq!(pmm.sys_code, pmm.sys_stack);
}

#[test]
fn tiny_ram_reaching_setup_is_fatal() {
    // Seven planner pages below a 76-page RAM land inside a 70-page SETUP.
    let layout = MemoryLayout::SIFIVE_U.with_ram(0x8000_0000, 0x8000_0000 + 76 * PAGE_SIZE);
    let setup = ElfBuilder::new(layout.boot_image)
        .load(layout.boot_image, &[0; 16], 70 * PAGE_SIZE)
        .build();
    let (blob, mut bm) = BlobBuilder::new(&layout).setup(&setup).build();
    bm.mio_base = 0;
    bm.mio_top = 0;

    let lm = load_map(&layout, &blob, &bm);
    assert_eq!(
        build(&bm, &lm, &layout),
        Err(SetupError::SetupOverwritten {
            free_top: layout.ram_base + 69 * PAGE_SIZE,
            setup_end: layout.boot_image + 70 * PAGE_SIZE,
        })
    );
}

#[test]
fn forwarder_page_must_match_the_machine_layout() {
    let layout = MemoryLayout::SIFIVE_U;
    let (blob, mut bm) = BlobBuilder::new(&layout).build();
    bm.mem_top -= 2 * MIB;
    let lm = load_map(&layout, &blob, &bm);
    assert_eq!(
        build(&bm, &lm, &layout),
        Err(SetupError::LayoutMismatch {
            payload: Payload::Setup,
            region: Region::Forwarder,
            expected: layout.mmode_forward(),
            found: bm.mem_top - PAGE_SIZE,
        })
    );
}

#[test]
fn running_out_of_pages_is_reported() {
    let layout = MemoryLayout::SIFIVE_U.with_ram(0x8000_0000, 0x8000_0000 + 4 * PAGE_SIZE);
    let (blob, mut bm) = BlobBuilder::new(&layout).build();
    bm.mio_base = 0;
    bm.mio_top = 0;
    let lm = load_map(&layout, &blob, &bm);
    assert_eq!(
        build(&bm, &lm, &layout),
        Err(SetupError::OutOfMemory { needed_pages: 3, available_pages: 1 })
    );
}

#[test]
fn misaligned_ram_base_is_rejected() {
    let layout = MemoryLayout::SIFIVE_U;
    let (blob, mut bm) = BlobBuilder::new(&layout).build();
    bm.mem_base += PAGE_SIZE;
    let lm = load_map(&layout, &blob, &bm);
    assert!(matches!(build(&bm, &lm, &layout), Err(SetupError::Misaligned { what: "RAM base", .. })));
}

#[test]
fn oversized_io_range_overflows_its_window() {
    let layout = MemoryLayout::SIFIVE_U;
    let (blob, mut bm) = BlobBuilder::new(&layout).build();
    bm.mio_top = bm.mio_base + 2 * 0x1000_0000;
    let lm = load_map(&layout, &blob, &bm);
    assert_eq!(
        build(&bm, &lm, &layout),
        Err(SetupError::WindowOverflow { window: Window::Io, tables: 256, capacity: layout.io_slots })
    );
}

#[test]
fn large_ram_gets_second_level_directories() {
    let top = 0x8000_0000 + 1024 * MIB;
    let layout = MemoryLayout::SIFIVE_U.with_ram(0x8000_0000, top);
    let (blob, bm) = BlobBuilder::new(&layout).build();
    let lm = load_map(&layout, &blob, &bm);
    let pmm = build(&bm, &lm, &layout).expect("plan");
    assert_eq!(pmm.levels, 3);
    assert_eq!(pmm.phy_mem_pt_count, 512);
    assert_eq!(pmm.phy_mem_pd_count, 1);
    assert_eq!(pmm.phy_mem_pds + PAGE_SIZE, pmm.phy_mem_pts);
    assert_eq!(pmm.phy_mem_window, layout.phy_mem_wide);
}

#[test]
fn three_level_ram_must_start_on_a_root_boundary() {
    let base = 0x8000_0000 + 512 * MIB;
    let layout = MemoryLayout::SIFIVE_U.with_ram(base, base + 600 * MIB);
    let (blob, mut bm) = BlobBuilder::new(&layout).build();
    bm.mio_base = 0;
    bm.mio_top = 0;
    let lm = load_map(&layout, &blob, &bm);
    assert!(matches!(build(&bm, &lm, &layout), Err(SetupError::Misaligned { what: "RAM base", .. })));
}
