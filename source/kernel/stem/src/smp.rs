// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Hart rendezvous during bring-up
//! OWNERS: @kernel-team
//! PUBLIC API: BootLatch, OnceGate, FORWARDER_LATCH, ROOT_LATCH, enter_stage(), stage_of()
//! DEPENDS_ON: config::MAX_HARTS, sequencer::BootStage
//! INVARIANTS: A latch is published or failed exactly once; the value is visible before Ready;
//!             per-hart stages only move forward; a gate step runs on one hart only

use core::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

use crate::config::MAX_HARTS;
use crate::error::SetupError;
use crate::sequencer::BootStage;
use crate::types::HartId;

const IDLE: usize = 0;
const BUILDING: usize = 1;
const READY: usize = 2;
const FAILED: usize = 3;

/// Observed state of a [`BootLatch`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LatchState {
    Idle,
    Building,
    Ready(usize),
    Failed,
}

/// One-shot handover of a word from the builder hart to its followers.
pub struct BootLatch {
    state: AtomicUsize,
    value: AtomicUsize,
}

impl BootLatch {
    pub const fn new() -> Self {
        Self { state: AtomicUsize::new(IDLE), value: AtomicUsize::new(0) }
    }

    /// Claims the latch for the calling hart. Only the first caller wins.
    pub fn begin(&self) -> bool {
        self.state.compare_exchange(IDLE, BUILDING, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    /// [`begin`](Self::begin) for the designated builder: losing the claim
    /// means another hart already took its place.
    pub fn claim(&self, latch: &'static str) -> Result<(), SetupError> {
        if self.begin() {
            Ok(())
        } else {
            Err(SetupError::LatchTaken { latch })
        }
    }

    /// Releases followers with `value`.
    pub fn publish(&self, value: usize) {
        self.value.store(value, Ordering::Relaxed);
        self.state.store(READY, Ordering::Release);
    }

    /// Releases followers without a value; they halt.
    pub fn fail(&self) {
        self.state.store(FAILED, Ordering::Release);
    }

    pub fn poll(&self) -> LatchState {
        match self.state.load(Ordering::Acquire) {
            IDLE => LatchState::Idle,
            BUILDING => LatchState::Building,
            READY => LatchState::Ready(self.value.load(Ordering::Relaxed)),
            _ => LatchState::Failed,
        }
    }

    /// Spins until the builder publishes or fails.
    pub fn wait(&self) -> Option<usize> {
        loop {
            match self.poll() {
                LatchState::Ready(value) => return Some(value),
                LatchState::Failed => return None,
                LatchState::Idle | LatchState::Building => core::hint::spin_loop(),
            }
        }
    }
}

impl Default for BootLatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a step exactly once, on the first hart to arrive. Later harts spin
/// until it has finished.
///
/// Both flags start out false in the image itself, so a gate placed in
/// `.data` can guard the clearing of `.bss`.
pub struct OnceGate {
    claimed: AtomicBool,
    done: AtomicBool,
}

impl OnceGate {
    pub const fn new() -> Self {
        Self { claimed: AtomicBool::new(false), done: AtomicBool::new(false) }
    }

    /// Returns `true` on the hart that ran `step`.
    pub fn pass(&self, step: impl FnOnce()) -> bool {
        if !self.claimed.swap(true, Ordering::AcqRel) {
            step();
            self.done.store(true, Ordering::Release);
            return true;
        }
        while !self.done.load(Ordering::Acquire) {
            core::hint::spin_loop();
        }
        false
    }
}

impl Default for OnceGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Forwarder page, published once the stub has been copied there.
pub static FORWARDER_LATCH: BootLatch = BootLatch::new();
/// `satp` of the boot address space.
pub static ROOT_LATCH: BootLatch = BootLatch::new();

static STAGES: [AtomicU8; MAX_HARTS] = [const { AtomicU8::new(0) }; MAX_HARTS];

/// Records that `hart` reached `stage`. Out-of-range harts are ignored.
pub fn enter_stage(hart: HartId, stage: BootStage) {
    if let Some(slot) = STAGES.get(hart.as_index()) {
        slot.fetch_max(stage as u8, Ordering::AcqRel);
    }
}

pub fn stage_of(hart: HartId) -> Option<BootStage> {
    STAGES.get(hart.as_index()).and_then(|slot| BootStage::from_raw(slot.load(Ordering::Acquire)))
}
