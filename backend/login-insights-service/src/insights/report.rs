//! Final insights report printed at shutdown

use super::{Counter, InsightsSnapshot};
use std::fmt;
use std::io::{self, Write};

/// Human readable report grouped by locale
#[derive(Debug, Clone)]
pub struct InsightsReport {
    snapshot: InsightsSnapshot,
}

impl InsightsReport {
    pub fn new(snapshot: InsightsSnapshot) -> Self {
        Self { snapshot }
    }

    /// Write the rendered report and flush `out`
    pub fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        write!(out, "{}", self)?;
        out.flush()
    }
}

impl fmt::Display for InsightsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (locale, insight) in self.snapshot.iter() {
            writeln!(f)?;
            writeln!(f, "Locale: {}", locale)?;
            write_section(f, "Device Type Counts:", &insight.device_type_count)?;
            write_section(f, "App Version Counts:", &insight.app_version_count)?;
            write_section(f, "Login Frequency (Hourly):", &insight.login_frequency)?;
        }
        Ok(())
    }
}

fn write_section(f: &mut fmt::Formatter<'_>, title: &str, counter: &Counter) -> fmt::Result {
    writeln!(f, "{}", title)?;
    for (key, count) in counter.iter() {
        writeln!(f, "{}: {}", key, count)?;
    }
    Ok(())
}
