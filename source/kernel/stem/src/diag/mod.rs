// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Diagnostics: severity-tagged console logging.

#[macro_use]
pub mod log;
