// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Load map of the payloads in the boot image
//! OWNERS: @kernel-team
//! PUBLIC API: build(image, bm, layout, config) -> LoadMap
//! DEPENDS_ON: elf::ElfImage, info, layout, config
//! INVARIANTS: Pure; absent payloads leave all-zero entries; code is program header 0;
//!             code never overlaps data; the OS sits at SYS_CODE/SYS_DATA

use crate::config::SetupConfig;
use crate::elf::{BootImage, PT_LOAD};
use crate::error::{Payload, Region, SetupError};
use crate::info::{AppMap, BootMap, LoadMap, PayloadFlags, PayloadMap};
use crate::layout::MemoryLayout;
use crate::mm::align_page;

#[cfg(test)]
mod tests_prop;

/// Describes where every payload of `image` will live.
pub fn build(
    image: &BootImage<'_>,
    bm: &BootMap,
    layout: &MemoryLayout,
    config: &SetupConfig,
) -> Result<LoadMap, SetupError> {
    let mut lm = LoadMap::default();

    if let Some(mut setup) = scan(image, bm.setup_offset, Payload::Setup)? {
        if !setup.has_data() {
            setup.data = align_page(setup.code_end());
        }
        lm.setup = setup;
    }

    if let Some(mut init) = scan(image, bm.init_offset, Payload::Init)? {
        if !init.has_data() {
            init.data = layout.init_data;
        }
        check_overlap(&init, Payload::Init)?;
        lm.init = init;
    }

    if let Some(mut system) = scan(image, bm.system_offset, Payload::System)? {
        if !system.has_data() {
            system.data = layout.sys_data();
        }
        check_system(&system, layout)?;
        lm.system = system;
        lm.sys_stack = layout.sys_stack();
        lm.sys_stack_size = config.sys_stack_size * (bm.n_cpus.max(1) as usize);
        let used = lm.sys_stack - layout.sys;
        if used + lm.sys_stack_size > layout.sys_span() {
            return Err(SetupError::SegmentTooLarge {
                payload: Payload::System,
                region: Region::Stack,
                size: lm.sys_stack_size,
                reserved: layout.sys_span() - used,
            });
        }
    }

    for slot in 0..config.app_slots() {
        let payload = Payload::Application(slot as u8);
        let Some(mut image_map) = scan(image, bm.application_offset[slot], payload)? else {
            continue;
        };
        if !image_map.has_data() {
            image_map.data = align_page(layout.app_data(slot));
        }
        check_overlap(&image_map, payload)?;
        let mut app = AppMap { image: image_map, ..AppMap::default() };
        if config.multiheap {
            reserve_heap(&mut app, config);
        }
        lm.apps[slot] = app;
    }

    if let Some(offset) = BootMap::offset(bm.extras_offset) {
        let img_size = bm.img_size as usize;
        if offset > img_size {
            return Err(SetupError::ImageCorrupted(Payload::Extras));
        }
        match lm.first_app() {
            Some(slot) => {
                let app = &mut lm.apps[slot];
                let mut size = img_size - offset;
                if config.multiheap {
                    size = align_page(size);
                }
                app.extra = app.image.data_end();
                app.extra_size = size;
                app.image.data_size = app.image.data_size.saturating_add(size);
            }
            None => log_warn!(target: "setup", "extras in boot image but no APPLICATION to carry them"),
        }
    }

    Ok(lm)
}

/// Reads one payload's header into a fresh entry; `None` when absent.
fn scan(image: &BootImage<'_>, raw_offset: u32, payload: Payload) -> Result<Option<PayloadMap>, SetupError> {
    let Some(offset) = BootMap::offset(raw_offset) else {
        return Ok(None);
    };
    let elf = image
        .payload(offset)
        .filter(|elf| elf.valid())
        .ok_or(SetupError::ImageCorrupted(payload))?;

    let corrupted = || SetupError::ImageCorrupted(payload);
    let mut map = PayloadMap {
        entry: elf.entry(),
        code: elf.segment_address(0).ok_or_else(corrupted)?,
        code_size: elf.segment_size(0).ok_or_else(corrupted)?,
        segments: elf.segments() as u32,
        ..PayloadMap::default()
    };
    map.code.checked_add(map.code_size).ok_or_else(corrupted)?;
    let mut flags = PayloadFlags::PRESENT;

    let mut data = usize::MAX;
    let mut data_size: usize = 0;
    for index in 1..elf.segments() {
        if elf.segment_type(index) != Some(PT_LOAD) {
            continue;
        }
        data = data.min(elf.segment_address(index).ok_or_else(corrupted)?);
        let size = elf.segment_size(index).ok_or_else(corrupted)?;
        data_size = data_size.checked_add(size).ok_or_else(corrupted)?;
    }
    if data != usize::MAX {
        // Segment sizes summed from the lowest base must still fit the address space.
        data.checked_add(data_size).ok_or_else(corrupted)?;
        map.data = data;
        map.data_size = data_size;
        flags |= PayloadFlags::HAS_DATA;
    } else {
        log_warn!(target: "setup", "{} has no data segment", payload);
    }
    map.set_flags(flags);
    Ok(Some(map))
}

fn check_overlap(map: &PayloadMap, payload: Payload) -> Result<(), SetupError> {
    if map.code_end() > map.data {
        return Err(SetupError::SegmentTooLarge {
            payload,
            region: Region::Code,
            size: map.code_size,
            reserved: map.data.saturating_sub(map.code),
        });
    }
    Ok(())
}

fn check_system(system: &PayloadMap, layout: &MemoryLayout) -> Result<(), SetupError> {
    let payload = Payload::System;
    if system.code != layout.sys_code() {
        return Err(SetupError::LayoutMismatch {
            payload,
            region: Region::Code,
            expected: layout.sys_code(),
            found: system.code,
        });
    }
    check_overlap(system, payload)?;
    if system.data != layout.sys_data() {
        return Err(SetupError::LayoutMismatch {
            payload,
            region: Region::Data,
            expected: layout.sys_data(),
            found: system.data,
        });
    }
    if system.data_end() > layout.sys_stack() {
        return Err(SetupError::SegmentTooLarge {
            payload,
            region: Region::Data,
            size: system.data_size,
            reserved: layout.sys_stack() - layout.sys_data(),
        });
    }
    Ok(())
}

fn reserve_heap(app: &mut AppMap, config: &SetupConfig) {
    let image = &mut app.image;
    image.data_size = align_page(image.data_size);
    app.stack = image.data_end();
    image.data_size = image.data_size.saturating_add(align_page(config.app_stack_size));
    app.heap = image.data_end();
    image.data_size = image.data_size.saturating_add(align_page(config.app_heap_size));
}
