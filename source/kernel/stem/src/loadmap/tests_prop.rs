// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

#![cfg(test)]
//! CONTEXT: Property-based tests for the payload load map
//! OWNERS: @kernel-team
//! NOTE: Tests only; no kernel logic.
//!
//! TEST_SCOPE:
//!   - Accepted maps never let code run into data
//!   - Building twice from the same image is byte identical
//!
//! TEST_SCENARIOS:
//!   - accepted_maps_never_overlap(): random segment sizes per application slot
//!   - build_is_deterministic(): random images built twice

use super::build;
use crate::config::{SetupConfig, MAX_APPS};
use crate::elf::BootImage;
use crate::error::SetupError;
use crate::layout::MemoryLayout;
use crate::testutil::{BlobBuilder, ElfBuilder};
use proptest::prelude::*;

fn arb_app() -> impl Strategy<Value = Option<(usize, Option<usize>)>> {
    proptest::option::of((1usize..0x30_0000, proptest::option::of(0usize..0x10_0000)))
}

fn image(layout: &MemoryLayout, apps: &[Option<(usize, Option<usize>)>]) -> (Vec<u8>, crate::info::BootMap) {
    let mut blob = BlobBuilder::new(layout);
    for (slot, app) in apps.iter().enumerate() {
        let Some((code, data)) = app else {
            continue;
        };
        let code_base = layout.app_code(slot);
        let mut elf = ElfBuilder::new(code_base).load(code_base, &[0x13; 4], *code);
        if let Some(data) = data {
            elf = elf.load(layout.app_data(slot), &[], *data);
        }
        blob = blob.app(slot, &elf.build());
    }
    blob.build()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn accepted_maps_never_overlap(
        apps in proptest::collection::vec(arb_app(), MAX_APPS),
        multiheap in any::<bool>(),
    ) {
        let layout = MemoryLayout::SIFIVE_U;
        let config = SetupConfig { multiheap, ..SetupConfig::SIFIVE_U };
        let (blob, bm) = image(&layout, &apps);
        match build(&BootImage::new(&blob), &bm, &layout, &config) {
            Ok(lm) => {
                for app in lm.apps.iter().filter(|a| a.image.is_present()) {
                    prop_assert!(app.image.code_end() <= app.image.data);
                    if multiheap {
                        prop_assert!(app.image.data <= app.stack && app.stack < app.heap);
                    }
                }
            }
            Err(SetupError::SegmentTooLarge { .. }) => {
                let overlaps = apps.iter().enumerate().any(|(slot, app)| {
                    app.map_or(false, |(code, _)| layout.app_code(slot) + code > layout.app_data(slot))
                });
                prop_assert!(overlaps);
            }
            Err(other) => prop_assert!(false, "unexpected error {:?}", other),
        }
    }

    #[test]
    fn build_is_deterministic(apps in proptest::collection::vec(arb_app(), MAX_APPS)) {
        let layout = MemoryLayout::SIFIVE_U;
        let (blob, bm) = image(&layout, &apps);
        let image = BootImage::new(&blob);
        let first = build(&image, &bm, &layout, &SetupConfig::SIFIVE_U);
        let second = build(&image, &bm, &layout, &SetupConfig::SIFIVE_U);
        prop_assert_eq!(first, second);
    }
}
