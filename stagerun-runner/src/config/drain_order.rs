// Copyright (c) The stagerun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::errors::DrainOrderParseError;
use serde::Deserialize;
use std::{fmt, str::FromStr};

/// The order in which built tests are executed.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DrainOrder {
    /// Execute tests in the order they were submitted for building.
    ///
    /// Tests that finish building early wait until every test before them has executed.
    #[default]
    Submission,

    /// Execute tests in the order they finish building.
    Arrival,
}

impl DrainOrder {
    /// Returns the string representations of all known variants.
    pub fn variants() -> &'static [&'static str] {
        &["submission", "arrival"]
    }
}

impl fmt::Display for DrainOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Submission => write!(f, "submission"),
            Self::Arrival => write!(f, "arrival"),
        }
    }
}

impl FromStr for DrainOrder {
    type Err = DrainOrderParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let val = match s {
            "submission" => DrainOrder::Submission,
            "arrival" => DrainOrder::Arrival,
            _ => return Err(DrainOrderParseError::new(s)),
        };
        Ok(val)
    }
}
