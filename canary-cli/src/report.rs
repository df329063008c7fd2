use canary::RunError;
use canary_core::{ConfigError, Report};
use std::io::Write;

pub const EXIT_PASSED: u8 = 0;
pub const EXIT_ERROR: u8 = 1;
pub const EXIT_THRESHOLDS_FAILED: u8 = 99;
pub const EXIT_CONFIG_ERROR: u8 = 104;

/// Write the report as text, or as pretty JSON when `json` is set.
pub fn write_report(out: &mut impl Write, report: &Report, json: bool) -> anyhow::Result<()> {
    if json {
        serde_json::to_writer_pretty(&mut *out, report)?;
        writeln!(out)?;
    } else {
        writeln!(out, "{report}")?;
    }
    out.flush()?;
    Ok(())
}

pub fn report_exit_code(report: &Report) -> u8 {
    if report.passed {
        EXIT_PASSED
    } else {
        EXIT_THRESHOLDS_FAILED
    }
}

/// Anything that went wrong before traffic was sent because of the configuration maps to
/// [`EXIT_CONFIG_ERROR`].
pub fn error_exit_code(err: &anyhow::Error) -> u8 {
    let is_config = err.downcast_ref::<ConfigError>().is_some()
        || err.downcast_ref::<serde_yaml::Error>().is_some()
        || matches!(err.downcast_ref::<RunError>(), Some(RunError::Config(_)));

    if is_config {
        EXIT_CONFIG_ERROR
    } else {
        EXIT_ERROR
    }
}
