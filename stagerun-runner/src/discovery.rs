// Copyright (c) The stagerun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turning input files into the set of tests to run.
//!
//! Discovery is pluggable: a [`TestFinder`] claims the files it understands and returns the tests
//! they contain. [`TestCorpus::discover`] tries a list of finders against each input file.

use crate::{
    errors::DiscoveryError,
    test_run::{TestRun, is_valid_qualified_name},
};
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashSet;
use tracing::debug;

/// A strategy for finding tests in a file.
pub trait TestFinder: Send + Sync {
    /// Returns the tests found in `file`.
    ///
    /// An empty list means this finder doesn't claim the file, and the next finder is tried.
    fn find_tests(&self, file: &Utf8Path) -> Result<Vec<TestRun>, DiscoveryError>;
}

/// Finds tests listed in `.tests` files.
///
/// Each line holds a qualified name, optionally followed by whitespace and a description. Blank
/// lines and lines starting with `#` are ignored.
#[derive(Clone, Debug, Default)]
pub struct ListFileFinder {
    _private: (),
}

impl ListFileFinder {
    /// The extension of files claimed by this finder.
    pub const EXTENSION: &'static str = "tests";

    /// Creates a new finder.
    pub fn new() -> Self {
        Self::default()
    }

    fn parse(&self, file: &Utf8Path, contents: &str) -> Result<Vec<TestRun>, DiscoveryError> {
        let mut tests = Vec::new();
        for (idx, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let (name, description) = match line.split_once(char::is_whitespace) {
                Some((name, description)) => (name, Some(description.trim())),
                None => (line, None),
            };
            if !is_valid_qualified_name(name) {
                return Err(DiscoveryError::InvalidName {
                    file: file.to_owned(),
                    line: idx + 1,
                    name: name.to_owned(),
                });
            }

            let mut test_run = TestRun::new(name).with_source(file);
            if let Some(description) = description.filter(|d| !d.is_empty()) {
                test_run = test_run.with_description(description);
            }
            tests.push(test_run);
        }
        Ok(tests)
    }
}

impl TestFinder for ListFileFinder {
    fn find_tests(&self, file: &Utf8Path) -> Result<Vec<TestRun>, DiscoveryError> {
        if file.extension() != Some(Self::EXTENSION) {
            return Ok(Vec::new());
        }
        let contents = std::fs::read_to_string(file).map_err(|error| DiscoveryError::Read {
            file: file.to_owned(),
            error,
        })?;
        self.parse(file, &contents)
    }
}

/// Treats each source file as a single test named after its path.
///
/// `<root>/libcore/java/util/ArrayListTest.java` becomes `libcore.java.util.ArrayListTest`.
#[derive(Clone, Debug)]
pub struct SourcePathFinder {
    root: Utf8PathBuf,
    extensions: Vec<String>,
}

impl SourcePathFinder {
    /// The extensions claimed by default.
    pub const DEFAULT_EXTENSIONS: &'static [&'static str] = &["java", "rs", "py"];

    /// Creates a finder that names tests relative to `root`, claiming the default extensions.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: Self::DEFAULT_EXTENSIONS
                .iter()
                .map(|ext| (*ext).to_owned())
                .collect(),
        }
    }

    /// Replaces the set of claimed extensions.
    pub fn with_extensions(
        mut self,
        extensions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    fn qualified_name(&self, file: &Utf8Path) -> Option<String> {
        let relative = file.strip_prefix(&self.root).unwrap_or(file);
        let stem = relative.with_extension("");
        let name = stem
            .components()
            .filter_map(|component| match component {
                camino::Utf8Component::Normal(part) => Some(part),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join(".");
        is_valid_qualified_name(&name).then_some(name)
    }
}

impl TestFinder for SourcePathFinder {
    fn find_tests(&self, file: &Utf8Path) -> Result<Vec<TestRun>, DiscoveryError> {
        let claimed = file
            .extension()
            .is_some_and(|ext| self.extensions.iter().any(|e| e == ext));
        if !claimed {
            return Ok(Vec::new());
        }

        match self.qualified_name(file) {
            Some(name) => Ok(vec![TestRun::new(name).with_source(file)]),
            None => {
                debug!("`{file}` does not map to a valid test name, skipping");
                Ok(Vec::new())
            }
        }
    }
}

/// The ordered, deduplicated set of tests for a run.
#[derive(Clone, Debug, Default)]
pub struct TestCorpus {
    tests: Vec<TestRun>,
}

impl TestCorpus {
    /// Creates a corpus from an explicit list of tests.
    ///
    /// Tests with duplicate qualified names are dropped, keeping the first occurrence.
    pub fn new(tests: impl IntoIterator<Item = TestRun>) -> Self {
        let mut seen = HashSet::new();
        let tests = tests
            .into_iter()
            .filter(|test_run| seen.insert(test_run.qualified_name().to_owned()))
            .collect();
        Self { tests }
    }

    /// Discovers tests in `files`.
    ///
    /// For each file, finders are tried in order, and the first one that returns a non-empty list
    /// wins. Results from different files are concatenated in order, keeping the first occurrence
    /// of each name.
    pub fn discover<P: AsRef<Utf8Path>>(
        files: impl IntoIterator<Item = P>,
        finders: &[Box<dyn TestFinder>],
    ) -> Result<Self, DiscoveryError> {
        let mut tests = Vec::new();
        for file in files {
            let file = file.as_ref();
            let mut claimed = false;
            for finder in finders {
                let found = finder.find_tests(file)?;
                if !found.is_empty() {
                    debug!("found {} tests in `{file}`", found.len());
                    tests.extend(found);
                    claimed = true;
                    break;
                }
            }
            if !claimed {
                debug!("no tests found in `{file}`");
            }
        }

        Ok(Self::new(tests))
    }

    /// Returns the number of tests.
    pub fn len(&self) -> usize {
        self.tests.len()
    }

    /// Returns true if there are no tests.
    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    /// Iterates over the tests in order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &TestRun> {
        self.tests.iter()
    }
}

impl IntoIterator for TestCorpus {
    type Item = TestRun;
    type IntoIter = std::vec::IntoIter<TestRun>;

    fn into_iter(self) -> Self::IntoIter {
        self.tests.into_iter()
    }
}

impl FromIterator<TestRun> for TestCorpus {
    fn from_iter<T: IntoIterator<Item = TestRun>>(iter: T) -> Self {
        Self::new(iter)
    }
}
