use crate::collector::GroupTopicResult;
use crate::error::{KlagError, Result};
use crate::request::LagRequest;
use std::io::Write;

/// `<groupId> <topic> <totalLag>` plus `<timeLagSeconds>` in time mode. The
/// same order as batch input lines, in both modes.
pub fn format_result(result: &GroupTopicResult) -> String {
    match result.time_lag_seconds {
        Some(time_lag) => format!(
            "{} {} {} {}",
            result.group_id, result.topic, result.total_lag, time_lag
        ),
        None => format!("{} {} {}", result.group_id, result.topic, result.total_lag),
    }
}

pub fn format_failure(request: &LagRequest, error: &KlagError) -> String {
    format!("{} {} error: {}", request.group_id, request.topic, error)
}

/// Writes one line per evaluated pair, flushed as soon as it is known.
pub struct Reporter<W: Write> {
    out: W,
}

impl<W: Write> Reporter<W> {
    pub const fn new(out: W) -> Self {
        Self { out }
    }

    pub fn report(&mut self, result: &GroupTopicResult) -> Result<()> {
        self.write_line(&format_result(result))
    }

    pub fn report_failure(&mut self, request: &LagRequest, error: &KlagError) -> Result<()> {
        self.write_line(&format_failure(request, error))
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.out, "{line}")?;
        self.out.flush()?;
        Ok(())
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}
