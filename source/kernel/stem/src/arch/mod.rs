// Copyright 2024 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

pub mod riscv;
