// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Copies payload segments to their link addresses.
//!
//! Runs after translation is on: OS segments land in the system window,
//! INIT and applications in identity-mapped RAM. Each payload is checked
//! against the gap the memory map leaves before the next region.

use crate::elf::{BootImage, PT_LOAD};
use crate::error::{Payload, Region, SetupError};
use crate::info::{BootMap, PayloadMap, SystemInfo};
use crate::layout::MemoryLayout;
use crate::mm::BootMemory;

/// Exclusive ends of the regions reserved for one payload.
#[derive(Clone, Copy, Debug)]
struct Reserved {
    code_end: usize,
    data_end: usize,
}

/// Loads INIT, the OS and the applications, in that order.
pub fn load_parts<M: BootMemory + ?Sized>(
    image: &BootImage<'_>,
    si: &SystemInfo,
    layout: &MemoryLayout,
    mem: &mut M,
) -> Result<(), SetupError> {
    let (bm, lm) = (&si.bm, &si.lm);

    if lm.init.is_present() {
        let reserved = Reserved { code_end: layout.init_data, data_end: layout.app_code(0) };
        load_payload(image, bm.init_offset, Payload::Init, &lm.init, reserved, mem)?;
    }

    if lm.system.is_present() {
        let reserved = Reserved { code_end: layout.sys_data(), data_end: layout.sys_stack() };
        load_payload(image, bm.system_offset, Payload::System, &lm.system, reserved, mem)?;
    }

    for (slot, app) in lm.apps.iter().enumerate() {
        if !app.image.is_present() {
            continue;
        }
        let payload = Payload::Application(slot as u8);
        let reserved = Reserved { code_end: layout.app_data(slot), data_end: layout.app_code(slot + 1) };
        load_payload(image, bm.application_offset[slot], payload, &app.image, reserved, mem)?;
        if app.extra_size > 0 {
            let start = BootMap::offset(bm.extras_offset).ok_or(SetupError::ImageCorrupted(Payload::Extras))?;
            let bytes = image
                .bytes()
                .get(start..bm.img_size as usize)
                .ok_or(SetupError::ImageCorrupted(Payload::Extras))?;
            mem.write(app.extra, bytes);
            log_info!(target: "loader", "{} extras: {:#x} bytes at {:#x}", payload, bytes.len(), app.extra);
        }
    }
    Ok(())
}

fn load_payload<M: BootMemory + ?Sized>(
    image: &BootImage<'_>,
    raw_offset: u32,
    payload: Payload,
    map: &PayloadMap,
    reserved: Reserved,
    mem: &mut M,
) -> Result<(), SetupError> {
    let code_slack = slack(payload, Region::Code, map.code, map.code_size, reserved.code_end)?;
    let data_slack = slack(payload, Region::Data, map.data, map.data_size, reserved.data_end)?;

    let elf = BootMap::offset(raw_offset)
        .and_then(|offset| image.payload(offset))
        .ok_or(SetupError::ImageCorrupted(payload))?;
    elf.load_segment(0, mem)
        .map_err(|cause| SetupError::LoadFailed { payload, segment: 0, cause })?;
    for index in 1..elf.segments() {
        if elf.segment_type(index) == Some(PT_LOAD) {
            elf.load_segment(index, mem)
                .map_err(|cause| SetupError::LoadFailed { payload, segment: index, cause })?;
        }
    }

    log_info!(
        target: "loader",
        "{}: {} segments, {:#x} bytes code slack, {:#x} bytes data slack",
        payload,
        map.segments,
        code_slack,
        data_slack
    );
    Ok(())
}

/// Unused bytes of a region, or the error when `size` does not fit.
fn slack(payload: Payload, region: Region, base: usize, size: usize, end: usize) -> Result<usize, SetupError> {
    let reserved = end.saturating_sub(base);
    if size > reserved {
        return Err(SetupError::SegmentTooLarge { payload, region, size, reserved });
    }
    Ok(reserved - size)
}
