// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Hart identity newtypes.

use core::fmt;

use crate::config::MAX_HARTS;

/// Hardware thread id as reported by `mhartid`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct HartId(u16);

impl HartId {
    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> u16 {
        self.0
    }

    #[inline]
    pub const fn as_index(self) -> usize {
        self.0 as usize
    }

    /// Returns `true` for harts the boot stacks and state tables cover.
    #[inline]
    pub const fn is_supported(self) -> bool {
        self.as_index() < MAX_HARTS
    }
}

impl fmt::Display for HartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_raw())
    }
}

/// Set of harts, one bit per id.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(transparent)]
pub struct HartMask(usize);

impl HartMask {
    pub const EMPTY: Self = Self(0);

    #[inline]
    pub const fn from_bits(bits: usize) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn with(self, hart: HartId) -> Self {
        Self(self.0 | (1 << hart.as_index()))
    }

    #[inline]
    pub const fn contains(self, hart: HartId) -> bool {
        hart.as_index() < usize::BITS as usize && self.0 & (1 << hart.as_index()) != 0
    }

    /// Lowest supported hart not in the set.
    pub const fn first_absent(self) -> Option<HartId> {
        let id = (!self.0).trailing_zeros() as usize;
        if id < MAX_HARTS {
            Some(HartId::from_raw(id as u16))
        } else {
            None
        }
    }
}
