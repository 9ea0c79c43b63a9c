// Copyright (c) The stagerun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Machine-readable metadata shared between `stagerun` and the tools that wrap it.

mod exit_codes;

pub use exit_codes::*;
