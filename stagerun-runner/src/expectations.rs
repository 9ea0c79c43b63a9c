// Copyright (c) The stagerun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Expected results for tests, and how a test's qualified name is matched against them.
//!
//! Expectations are declared in TOML files:
//!
//! ```toml
//! [expectations]
//! "libcore.java.net" = "UNSUPPORTED"
//! "libcore.java.io.FileTest.testDelete" = { result = "EXEC_FAILED", pattern = ".*EACCES.*" }
//! ```
//!
//! An entry applies to the name it is declared for and to every name below it. When several
//! entries apply, the most specific one (the longest matching prefix) wins. Names that no entry
//! applies to are expected to succeed.

use crate::{
    errors::ExpectationParseError,
    test_run::{ExpectedResult, TestResult},
};
use camino::Utf8Path;
use indexmap::IndexMap;
use serde::Deserialize;
use std::{collections::HashMap, io, sync::Arc};
use tracing::debug;

/// The set of expected results for a run.
///
/// The store is populated once, by [`load`](Self::load) or [`from_entries`](Self::from_entries),
/// and is read-only afterwards. Runners share it with every build worker through an `Arc`.
#[derive(Clone, Debug)]
pub struct ExpectationStore {
    entries: HashMap<String, Arc<ExpectedResult>>,
    default: Arc<ExpectedResult>,
}

impl ExpectationStore {
    /// Creates a store with no entries: every test is expected to succeed.
    pub fn empty() -> Self {
        Self::from_entries(std::iter::empty::<(String, ExpectedResult)>())
    }

    /// Creates a store from in-memory entries. Later entries override earlier ones with the same
    /// name.
    pub fn from_entries(
        entries: impl IntoIterator<Item = (impl Into<String>, ExpectedResult)>,
    ) -> Self {
        let entries = entries
            .into_iter()
            .map(|(name, expected)| (name.into(), Arc::new(expected)))
            .collect();
        Self {
            entries,
            default: Arc::new(ExpectedResult::success()),
        }
    }

    /// Loads expectations from the given files, in order.
    ///
    /// Files that don't exist are skipped. When the same name is declared in several files, the
    /// declaration in the last file wins.
    pub fn load<P: AsRef<Utf8Path>>(
        files: impl IntoIterator<Item = P>,
    ) -> Result<Self, ExpectationParseError> {
        let mut store = Self::empty();
        for file in files {
            let file = file.as_ref();
            let contents = match std::fs::read_to_string(file) {
                Ok(contents) => contents,
                Err(error) if error.kind() == io::ErrorKind::NotFound => {
                    debug!("expectations file `{file}` not found, skipping");
                    continue;
                }
                Err(error) => {
                    return Err(ExpectationParseError::Read {
                        file: file.to_owned(),
                        error,
                    });
                }
            };

            let parsed = parse_expectations(file, &contents)?;
            debug!(
                "loaded {} expectations from `{file}`",
                parsed.len()
            );
            store
                .entries
                .extend(parsed.into_iter().map(|(name, expected)| (name, Arc::new(expected))));
        }

        Ok(store)
    }

    /// Returns the expectation that applies to `qualified_name`.
    ///
    /// The name itself is looked up first, then each shorter prefix obtained by dropping the last
    /// `.`-delimited component. If nothing matches, the default `SUCCESS` expectation is returned.
    pub fn resolve(&self, qualified_name: &str) -> Arc<ExpectedResult> {
        match self.resolve_entry(qualified_name) {
            Some((_, expected)) => expected.clone(),
            None => self.default.clone(),
        }
    }

    /// Like [`resolve`](Self::resolve), but also returns the name of the matching entry. Returns
    /// `None` if the default expectation applies.
    pub fn resolve_entry<'a>(
        &'a self,
        qualified_name: &'a str,
    ) -> Option<(&'a str, &'a Arc<ExpectedResult>)> {
        let mut name = qualified_name;
        loop {
            if let Some(expected) = self.entries.get(name) {
                return Some((name, expected));
            }
            let (parent, _) = name.rsplit_once('.')?;
            name = parent;
        }
    }

    /// Returns the expectation declared for exactly this name, without any prefix fallback.
    pub fn get(&self, name: &str) -> Option<&ExpectedResult> {
        self.entries.get(name).map(|expected| &**expected)
    }

    /// Returns the default expectation, used for names that no entry applies to.
    pub fn default_expectation(&self) -> Arc<ExpectedResult> {
        self.default.clone()
    }

    /// Returns the number of declared entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entries are declared.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ExpectationStore {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ExpectationsFile {
    #[serde(default)]
    expectations: IndexMap<String, DeserializedExpectation>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum DeserializedExpectation {
    Result(TestResult),
    Table(ExpectationTable),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ExpectationTable {
    result: TestResult,
    #[serde(default)]
    pattern: Option<String>,
}

fn parse_expectations(
    file: &Utf8Path,
    contents: &str,
) -> Result<IndexMap<String, ExpectedResult>, ExpectationParseError> {
    let parsed: ExpectationsFile =
        toml::from_str(contents).map_err(|error| ExpectationParseError::Parse {
            file: file.to_owned(),
            error: Box::new(error),
        })?;

    parsed
        .expectations
        .into_iter()
        .map(|(name, expectation)| {
            let expected = match expectation {
                DeserializedExpectation::Result(result)
                | DeserializedExpectation::Table(ExpectationTable {
                    result,
                    pattern: None,
                }) => ExpectedResult::new(result),
                DeserializedExpectation::Table(ExpectationTable {
                    result,
                    pattern: Some(pattern),
                }) => ExpectedResult::with_pattern(result, &pattern).map_err(|error| {
                    ExpectationParseError::InvalidPattern {
                        file: file.to_owned(),
                        name: name.clone(),
                        error: Box::new(error),
                    }
                })?,
            };
            Ok((name, expected))
        })
        .collect()
}
