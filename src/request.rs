use crate::error::{KlagError, Result};
use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LagMode {
    /// Offset lag only.
    #[default]
    #[value(name = "lag")]
    Lag,
    /// Offset lag plus seconds since the newest observed record.
    #[value(name = "lag_and_time")]
    LagAndTime,
}

impl LagMode {
    pub const fn wants_time(self) -> bool {
        matches!(self, Self::LagAndTime)
    }
}

/// One (group, topic) pair to evaluate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LagRequest {
    pub group_id: String,
    pub topic: String,
    pub mode: LagMode,
}

impl LagRequest {
    pub fn new(group_id: impl Into<String>, topic: impl Into<String>, mode: LagMode) -> Self {
        Self {
            group_id: group_id.into(),
            topic: topic.into(),
            mode,
        }
    }

    /// Requests for single-pair mode. `group_ids` may hold several
    /// comma-separated groups, each evaluated against the same topic.
    pub fn from_args(
        group_ids: Option<&str>,
        topic: Option<&str>,
        mode: LagMode,
    ) -> Result<Vec<LagRequest>> {
        let topic = topic.map(str::trim).filter(|t| !t.is_empty()).ok_or_else(|| {
            KlagError::Config("Topic is not defined. Use --topic argument to define it.".to_string())
        })?;

        let groups: Vec<&str> = group_ids
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .collect();

        if groups.is_empty() {
            return Err(KlagError::Config(
                "Consumer group is not defined. Use --group-id argument to define it.".to_string(),
            ));
        }

        Ok(groups
            .into_iter()
            .map(|group| LagRequest::new(group, topic, mode))
            .collect())
    }

    /// Parse batch input: one `<groupId> <topic>` pair per line. Blank lines
    /// are skipped; anything else without exactly two tokens is rejected.
    pub fn parse_batch<'a, I>(lines: I, mode: LagMode) -> Result<Vec<LagRequest>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut requests = Vec::new();

        for (index, line) in lines.into_iter().enumerate() {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            match tokens.as_slice() {
                [] => continue,
                [group, topic] => requests.push(LagRequest::new(*group, *topic, mode)),
                _ => {
                    return Err(KlagError::Config(format!(
                        "Invalid batch line {}: expected '<group-id> <topic>', got '{}'",
                        index + 1,
                        line.trim()
                    )));
                }
            }
        }

        Ok(requests)
    }
}
