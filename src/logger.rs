// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Component Loggers
//!
//! Each client, channel, publisher and consumer receives its own `Logger` at
//! construction. A logger carries a component name, emitted as the `logger` field
//! of every event, and the verbosity configured for the client. Nothing here touches
//! process-wide subscriber state; installing a subscriber is left to the application.

use std::fmt;
use tracing::{level_filters::LevelFilter, Level};

/// Root name used by loggers created from a client.
pub const LOG_NAME: &str = "rabbit-client";

/// A named, level-gated handle onto `tracing`.
#[derive(Debug, Clone)]
pub struct Logger {
    name: String,
    level: LevelFilter,
}

impl Logger {
    /// Creates a new logger with the given name and maximum verbosity.
    pub fn new(name: impl Into<String>, level: LevelFilter) -> Logger {
        Logger {
            name: name.into(),
            level,
        }
    }

    /// Creates a child logger named `<parent>:<suffix>` sharing the same verbosity.
    pub fn named(&self, suffix: &str) -> Logger {
        Logger::new(format!("{}:{}", self.name, suffix), self.level)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> LevelFilter {
        self.level
    }

    /// Returns true when events at `level` pass this logger's verbosity.
    pub fn enabled(&self, level: Level) -> bool {
        level <= self.level
    }

    pub fn trace(&self, args: fmt::Arguments<'_>) {
        if self.enabled(Level::TRACE) {
            tracing::trace!(logger = %self.name, "{}", args);
        }
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        if self.enabled(Level::DEBUG) {
            tracing::debug!(logger = %self.name, "{}", args);
        }
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        if self.enabled(Level::INFO) {
            tracing::info!(logger = %self.name, "{}", args);
        }
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        if self.enabled(Level::WARN) {
            tracing::warn!(logger = %self.name, "{}", args);
        }
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        if self.enabled(Level::ERROR) {
            tracing::error!(logger = %self.name, "{}", args);
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Logger::new(LOG_NAME, LevelFilter::INFO)
    }
}
