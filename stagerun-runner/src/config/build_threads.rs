// Copyright (c) The stagerun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::{config::get_num_cpus, errors::BuildThreadsParseError};
use serde::Deserialize;
use std::{fmt, str::FromStr};

/// How many threads build and install tests: the `build-threads` key, or `-j` on the command
/// line.
///
/// Accepts a positive count, `"num-cpus"`, or a negative count meaning "that many fewer than the
/// number of logical CPUs".
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(try_from = "RawBuildThreads")]
pub enum BuildThreads {
    /// A fixed number of threads.
    Count(usize),

    /// One thread per logical CPU.
    NumCpus,

    /// One thread per logical CPU, minus this many. Never fewer than one thread.
    NumCpusMinus(usize),
}

impl BuildThreads {
    /// Resolves the number of threads to start.
    pub fn compute(self) -> usize {
        match self {
            Self::Count(threads) => threads,
            Self::NumCpus => get_num_cpus(),
            Self::NumCpusMinus(fewer) => get_num_cpus().saturating_sub(fewer).max(1),
        }
    }

    fn from_signed(n: i64) -> Option<Self> {
        if n > 0 {
            usize::try_from(n).ok().map(Self::Count)
        } else if n < 0 {
            usize::try_from(n.unsigned_abs()).ok().map(Self::NumCpusMinus)
        } else {
            None
        }
    }
}

impl FromStr for BuildThreads {
    type Err = BuildThreadsParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "num-cpus" {
            return Ok(Self::NumCpus);
        }
        s.parse::<i64>()
            .ok()
            .and_then(Self::from_signed)
            .ok_or_else(|| BuildThreadsParseError::new(s))
    }
}

impl fmt::Display for BuildThreads {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(threads) => write!(f, "{threads}"),
            Self::NumCpus => write!(f, "num-cpus"),
            Self::NumCpusMinus(fewer) => write!(f, "-{fewer}"),
        }
    }
}

// TOML gives us either an integer or a string.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawBuildThreads {
    Int(i64),
    Str(String),
}

impl TryFrom<RawBuildThreads> for BuildThreads {
    type Error = BuildThreadsParseError;

    fn try_from(raw: RawBuildThreads) -> Result<Self, Self::Error> {
        match raw {
            RawBuildThreads::Int(n) => {
                Self::from_signed(n).ok_or_else(|| BuildThreadsParseError::new(n.to_string()))
            }
            RawBuildThreads::Str(s) => s.parse(),
        }
    }
}
