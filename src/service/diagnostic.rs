// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Diagnostic reporting for the kafka input.
//!
//! Partition errors, decode failures and truncated reads are not part of the
//! data path; they are handed to a [`DiagnosticSink`]. Production code uses
//! [`TracingSink`], tests inject a [`MemorySink`] and assert on what was
//! reported.

use std::fmt::{Display, Formatter};

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Display for Severity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        };
        f.write_str(name)
    }
}

pub trait DiagnosticSink: Send + Sync + 'static {
    fn report(&self, severity: Severity, message: &str);
}

/// Forwards every report to the `tracing` subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Trace => trace!("{message}"),
            Severity::Debug => debug!("{message}"),
            Severity::Info => info!("{message}"),
            Severity::Warn => warn!("{message}"),
            Severity::Error => error!("{message}"),
        }
    }
}

/// Keeps every report in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    reports: Mutex<Vec<(Severity, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<(Severity, String)> {
        self.reports.lock().clone()
    }

    /// Whether a report of `severity` containing `needle` was recorded.
    pub fn contains(&self, severity: Severity, needle: &str) -> bool {
        self.reports
            .lock()
            .iter()
            .any(|(s, message)| *s == severity && message.contains(needle))
    }

    pub fn clear(&self) {
        self.reports.lock().clear();
    }
}

impl DiagnosticSink for MemorySink {
    fn report(&self, severity: Severity, message: &str) {
        self.reports.lock().push((severity, message.to_string()));
    }
}
