// Copyright (c) 2026 VeriML Contributors
// SPDX-License-Identifier: Apache-2.0

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod blob;
pub mod chain;
pub mod config;
pub mod credits;
pub mod error;
pub mod keys;
pub mod sandbox;
pub mod server;
pub mod store;
