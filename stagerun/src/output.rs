// Copyright (c) The stagerun Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Terminal output: the stderr logger, and the styles used for errors and run summaries.

use clap::{Args, ValueEnum};
use owo_colors::{OwoColorize, Style, style};
use std::{
    fmt::{self, Write as _},
    sync::Once,
};
use tracing::{
    Event, Level, Subscriber,
    field::{Field, Visit},
    level_filters::LevelFilter,
    warn,
};
use tracing_subscriber::{
    Layer,
    filter::{ParseError, Targets},
    fmt::{FmtContext, FormatEvent, FormatFields, format::Writer},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

/// Events logged to this target are printed without a level prefix.
pub(crate) const NO_HEADING_TARGET: &str = "stagerun::no_heading";

/// Replaces the level picked by `--verbose` with `tracing-subscriber` target directives, e.g.
/// `stagerun_runner=trace,info`.
const LOG_ENV: &str = "STAGERUN_LOG";

#[derive(Copy, Clone, Debug, Args)]
#[must_use]
pub(crate) struct OutputOpts {
    /// Show debug logs and the output of passing tests
    #[arg(long, short, global = true, env = "STAGERUN_VERBOSE")]
    pub(crate) verbose: bool,

    /// When to use colors: auto, always, never
    #[arg(
        long,
        value_enum,
        default_value_t,
        hide_possible_values = true,
        global = true,
        value_name = "WHEN",
        env = "STAGERUN_COLOR"
    )]
    pub(crate) color: ColorChoice,
}

impl OutputOpts {
    /// Installs the stderr logger. Only the first call in a process has any effect.
    pub(crate) fn init(self) -> OutputContext {
        let colorize = self.color.resolve(supports_color::Stream::Stderr);
        install_logger(self.verbose, colorize);
        OutputContext {
            verbose: self.verbose,
            colorize,
        }
    }
}

/// The output settings in effect, after the logger has been installed.
#[derive(Copy, Clone, Debug)]
#[must_use]
pub struct OutputContext {
    pub(crate) verbose: bool,
    colorize: bool,
}

impl OutputContext {
    /// Returns the styles to use for messages printed to stderr.
    pub fn stderr_styles(&self) -> StderrStyles {
        if self.colorize {
            StderrStyles::colorized()
        } else {
            StderrStyles::default()
        }
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub(crate) enum ColorChoice {
    #[default]
    Auto,
    Always,
    Never,
}

impl ColorChoice {
    fn resolve(self, stream: supports_color::Stream) -> bool {
        match self {
            Self::Auto => supports_color::on_cached(stream).is_some(),
            Self::Always => true,
            Self::Never => false,
        }
    }
}

fn install_logger(verbose: bool, colorize: bool) {
    static INSTALLED: Once = Once::new();

    INSTALLED.call_once(|| {
        let directives = std::env::var(LOG_ENV).ok();
        let (filter, invalid) = match log_filter(directives.as_deref(), verbose) {
            Ok(filter) => (filter, None),
            Err(error) => (level_filter(verbose), Some(error)),
        };

        let layer = tracing_subscriber::fmt::layer()
            .event_format(HeadingFormatter { colorize })
            .with_writer(std::io::stderr)
            .with_filter(filter);
        tracing_subscriber::registry().with(layer).init();

        if let Some(error) = invalid {
            warn!("ignoring {LOG_ENV}: {error}");
        }
    });
}

fn level_filter(verbose: bool) -> Targets {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    Targets::new().with_default(level)
}

/// Parses `STAGERUN_LOG` directives, falling back to the `--verbose` level if they're unset or
/// blank.
fn log_filter(directives: Option<&str>, verbose: bool) -> Result<Targets, ParseError> {
    match directives.map(str::trim).filter(|d| !d.is_empty()) {
        Some(directives) => directives.parse(),
        None => Ok(level_filter(verbose)),
    }
}

/// Prints each event as `<level>: <message>` with no timestamp, target or span context.
struct HeadingFormatter {
    colorize: bool,
}

impl HeadingFormatter {
    fn heading(&self, level: Level) -> (&'static str, Style) {
        let (label, colored) = match level {
            Level::ERROR => ("error", style().red().bold()),
            Level::WARN => ("warning", style().yellow().bold()),
            Level::INFO => ("info", style().bold()),
            Level::DEBUG => ("debug", style().bold()),
            Level::TRACE => ("trace", style().dimmed()),
        };
        (label, if self.colorize { colored } else { style() })
    }
}

impl<S, N> FormatEvent<S, N> for HeadingFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        if metadata.target() != NO_HEADING_TARGET {
            let (label, style) = self.heading(*metadata.level());
            write!(writer, "{}: ", label.style(style))?;
        }

        let mut message = MessageText::default();
        event.record(&mut message);
        writeln!(writer, "{}", message.0)
    }
}

/// The `message` field of an event. Other fields are dropped.
#[derive(Default)]
struct MessageText(String);

impl MessageText {
    const FIELD: &'static str = "message";
}

impl Visit for MessageText {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == Self::FIELD {
            self.0.push_str(value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == Self::FIELD {
            // Writing to a String can't fail.
            let _ = write!(self.0, "{value:?}");
        }
    }
}

/// Styles used when printing errors and summaries to stderr.
#[derive(Debug, Default)]
pub struct StderrStyles {
    pub(crate) bold: Style,
    pub(crate) pass: Style,
    pub(crate) fail: Style,
    pub(crate) skip: Style,
}

impl StderrStyles {
    fn colorized() -> Self {
        Self {
            bold: style().bold(),
            pass: style().green().bold(),
            fail: style().red().bold(),
            skip: style().yellow().bold(),
        }
    }
}
