// Copyright (c) The stagerun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use super::{BuildThreads, DrainOrder};
use crate::{
    backend::{CommandBackend, CommandTemplate},
    errors::{ConfigParseError, ConfigParseErrorKind, ProfileNotFound},
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, ConfigError, File, FileFormat, builder::DefaultState};
use itertools::Itertools;
use serde::Deserialize;
use std::{
    collections::{BTreeSet, HashMap},
    num::NonZeroUsize,
    sync::LazyLock,
    time::Duration,
};
use tracing::warn;

/// Gets the number of available CPUs and caches the value.
#[inline]
pub fn get_num_cpus() -> usize {
    static NUM_CPUS: LazyLock<usize> =
        LazyLock::new(|| match std::thread::available_parallelism() {
            Ok(count) => count.into(),
            Err(err) => {
                warn!("unable to determine num-cpus ({err}), assuming 1 logical CPU");
                1
            }
        });

    *NUM_CPUS
}

/// Overall configuration for stagerun.
///
/// This is the root data structure for stagerun configuration. Settings are managed through
/// [profiles](StagerunProfile), obtained through the [`profile`](Self::profile) method.
#[derive(Clone, Debug)]
pub struct StagerunConfig {
    root: Utf8PathBuf,
    inner: StagerunConfigImpl,
}

impl StagerunConfig {
    /// The default location of the config within the project root: `.config/stagerun.toml`.
    pub const CONFIG_PATH: &'static str = ".config/stagerun.toml";

    /// Contains the default config as a TOML file.
    ///
    /// Project-specific configuration is layered on top of the default config.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../../default-config.toml");

    /// The name of the default profile.
    pub const DEFAULT_PROFILE: &'static str = "default";

    /// Reads the stagerun config from the given file, or if not specified from
    /// `.config/stagerun.toml` in the project root.
    ///
    /// If no config file is specified and the project doesn't have `.config/stagerun.toml`, uses
    /// the default config options. A config file that is specified explicitly must exist.
    pub fn from_sources(
        root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
    ) -> Result<Self, ConfigParseError> {
        Self::from_sources_impl(root, config_file, |config_file, unknown| {
            warn!(
                "ignoring unknown configuration keys in config file {config_file}: {}",
                unknown.iter().join(", ")
            )
        })
    }

    // A custom unknown_callback can be passed in while testing.
    fn from_sources_impl(
        root: impl Into<Utf8PathBuf>,
        config_file: Option<&Utf8Path>,
        mut unknown_callback: impl FnMut(&Utf8Path, &BTreeSet<String>),
    ) -> Result<Self, ConfigParseError> {
        let root = root.into();
        let (config_file, source) = match config_file {
            Some(file) => (file.to_owned(), File::new(file.as_str(), FileFormat::Toml)),
            None => {
                let config_file = root.join(Self::CONFIG_PATH);
                let source = File::new(config_file.as_str(), FileFormat::Toml).required(false);
                (config_file, source)
            }
        };

        let builder = Self::make_default_config().add_source(source);
        let (config, unknown) = Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(Some(config_file.clone()), kind))?;

        if !unknown.is_empty() {
            unknown_callback(&config_file, &unknown);
        }

        Ok(Self {
            root,
            inner: config.into_config_impl(),
        })
    }

    /// Returns the default stagerun config.
    #[cfg(test)]
    pub(crate) fn default_config(root: impl Into<Utf8PathBuf>) -> Self {
        let config = Self::make_default_config()
            .build()
            .expect("default config is always valid");

        let deserialized: StagerunConfigDeserialize =
            config.try_deserialize().expect("default config is always valid");

        Self {
            root: root.into(),
            inner: deserialized.into_config_impl(),
        }
    }

    /// Returns the project root that relative paths in the config are resolved against.
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    /// Returns the profile with the given name, or an error if a profile was specified but not
    /// found.
    pub fn profile(&self, name: impl AsRef<str>) -> Result<StagerunProfile<'_>, ProfileNotFound> {
        self.make_profile(name.as_ref())
    }

    // ---
    // Helper methods
    // ---

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn make_profile(&self, name: &str) -> Result<StagerunProfile<'_>, ProfileNotFound> {
        let custom_profile = self.inner.get_profile(name)?;

        Ok(StagerunProfile {
            name: name.to_owned(),
            root: &self.root,
            default_profile: &self.inner.default_profile,
            custom_profile,
        })
    }

    /// This returns a tuple of (config, ignored paths).
    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<(StagerunConfigDeserialize, BTreeSet<String>), ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        let mut ignored = BTreeSet::new();
        let mut cb = |path: serde_ignored::Path| {
            ignored.insert(path.to_string());
        };
        let ignored_de = serde_ignored::Deserializer::new(config, &mut cb);
        let config: StagerunConfigDeserialize = serde_path_to_error::deserialize(ignored_de)
            .map_err(|error| {
                // serde_path_to_error already reports the key, so drop it from the config error.
                let path = error.path().clone();
                let config_error = error.into_inner();
                let error = match config_error {
                    ConfigError::At { error, .. } => *error,
                    other => other,
                };
                ConfigParseErrorKind::DeserializeError(Box::new(serde_path_to_error::Error::new(
                    path, error,
                )))
            })?;

        Ok((config, ignored))
    }
}

/// A stagerun profile, with settings from a custom profile falling back to the default profile.
///
/// Returned by [`StagerunConfig::profile`].
#[derive(Clone, Debug)]
pub struct StagerunProfile<'cfg> {
    name: String,
    root: &'cfg Utf8Path,
    default_profile: &'cfg DefaultProfileImpl,
    custom_profile: Option<&'cfg CustomProfileImpl>,
}

macro_rules! profile_field {
    ($eval_prof:ident.$field:ident) => {
        $eval_prof
            .custom_profile
            .and_then(|p| p.$field)
            .unwrap_or($eval_prof.default_profile.$field)
    };
}

macro_rules! profile_field_from_ref {
    ($eval_prof:ident.$nested:ident.$field:ident) => {
        $eval_prof
            .custom_profile
            .and_then(|p| p.$nested.$field.as_ref())
            .or($eval_prof.default_profile.$nested.$field.as_ref())
    };
}

impl<'cfg> StagerunProfile<'cfg> {
    /// Returns the name of the profile.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of threads used to build and install tests.
    pub fn build_threads(&self) -> BuildThreads {
        profile_field!(self.build_threads)
    }

    /// Returns the capacity of the queue between building and execution.
    pub fn queue_capacity(&self) -> NonZeroUsize {
        profile_field!(self.queue_capacity)
    }

    /// Returns how long execution waits for the next built test before aborting the run.
    pub fn build_timeout(&self) -> Duration {
        profile_field!(self.build_timeout)
    }

    /// Returns the order in which built tests are executed.
    pub fn drain_order(&self) -> DrainOrder {
        profile_field!(self.drain_order)
    }

    /// Returns true if the output of passing tests should be shown.
    pub fn verbose(&self) -> bool {
        profile_field!(self.verbose)
    }

    /// Returns the expectations files for this profile, resolved against the project root.
    pub fn expectations(&self) -> Vec<Utf8PathBuf> {
        let files = self
            .custom_profile
            .and_then(|p| p.expectations.as_deref())
            .unwrap_or(&self.default_profile.expectations);
        files.iter().map(|file| self.root.join(file)).collect()
    }

    /// Returns the directory JUnit reports are written to, if reports are enabled.
    pub fn junit_dir(&self) -> Option<Utf8PathBuf> {
        profile_field_from_ref!(self.junit.dir).map(|dir| self.root.join(dir))
    }

    /// Returns a [`CommandBackend`] configured from this profile, running commands in the project
    /// root.
    pub fn command_backend(&self) -> CommandBackend {
        let mut backend = CommandBackend::new();
        backend
            .set_dir(self.root)
            .set_prepare(profile_field_from_ref!(self.backend.prepare).cloned())
            .set_build(profile_field_from_ref!(self.backend.build).cloned())
            .set_run(profile_field_from_ref!(self.backend.run).cloned())
            .set_run_timeout(profile_field_from_ref!(self.backend.run_timeout).copied())
            .set_cleanup(profile_field_from_ref!(self.backend.cleanup).cloned());
        backend
    }
}

#[derive(Clone, Debug)]
struct StagerunConfigImpl {
    default_profile: DefaultProfileImpl,
    other_profiles: HashMap<String, CustomProfileImpl>,
}

impl StagerunConfigImpl {
    fn get_profile(&self, profile: &str) -> Result<Option<&CustomProfileImpl>, ProfileNotFound> {
        let custom_profile = match profile {
            StagerunConfig::DEFAULT_PROFILE => None,
            other => Some(
                self.other_profiles
                    .get(other)
                    .ok_or_else(|| ProfileNotFound::new(profile, self.all_profiles()))?,
            ),
        };
        Ok(custom_profile)
    }

    fn all_profiles(&self) -> impl Iterator<Item = &str> {
        self.other_profiles
            .keys()
            .map(|key| key.as_str())
            .chain(std::iter::once(StagerunConfig::DEFAULT_PROFILE))
    }
}

// This is the form of `StagerunConfig` that gets deserialized.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct StagerunConfigDeserialize {
    #[serde(rename = "profile")]
    profiles: HashMap<String, CustomProfileImpl>,
}

impl StagerunConfigDeserialize {
    fn into_config_impl(mut self) -> StagerunConfigImpl {
        let p = self
            .profiles
            .remove(StagerunConfig::DEFAULT_PROFILE)
            .expect("default profile should exist");
        let default_profile = DefaultProfileImpl::new(p);

        StagerunConfigImpl {
            default_profile,
            other_profiles: self.profiles,
        }
    }
}

#[derive(Clone, Debug)]
struct DefaultProfileImpl {
    build_threads: BuildThreads,
    queue_capacity: NonZeroUsize,
    build_timeout: Duration,
    drain_order: DrainOrder,
    expectations: Vec<Utf8PathBuf>,
    verbose: bool,
    junit: JunitImpl,
    backend: BackendImpl,
}

impl DefaultProfileImpl {
    fn new(p: CustomProfileImpl) -> Self {
        Self {
            build_threads: p
                .build_threads
                .expect("build-threads present in default profile"),
            queue_capacity: p
                .queue_capacity
                .expect("queue-capacity present in default profile"),
            build_timeout: p
                .build_timeout
                .expect("build-timeout present in default profile"),
            drain_order: p
                .drain_order
                .expect("drain-order present in default profile"),
            expectations: p
                .expectations
                .expect("expectations present in default profile"),
            verbose: p.verbose.expect("verbose present in default profile"),
            junit: p.junit,
            backend: p.backend,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct CustomProfileImpl {
    #[serde(default)]
    build_threads: Option<BuildThreads>,
    #[serde(default)]
    queue_capacity: Option<NonZeroUsize>,
    #[serde(default, with = "humantime_serde")]
    build_timeout: Option<Duration>,
    #[serde(default)]
    drain_order: Option<DrainOrder>,
    #[serde(default)]
    expectations: Option<Vec<Utf8PathBuf>>,
    #[serde(default)]
    verbose: Option<bool>,
    #[serde(default)]
    junit: JunitImpl,
    #[serde(default)]
    backend: BackendImpl,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct JunitImpl {
    #[serde(default)]
    dir: Option<Utf8PathBuf>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct BackendImpl {
    #[serde(default)]
    prepare: Option<CommandTemplate>,
    #[serde(default)]
    build: Option<CommandTemplate>,
    #[serde(default)]
    run: Option<CommandTemplate>,
    #[serde(default, with = "humantime_serde")]
    run_timeout: Option<Duration>,
    #[serde(default)]
    cleanup: Option<CommandTemplate>,
}
