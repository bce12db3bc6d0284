use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identity of one unit of migration work: one shard of one index within one
/// snapshot. The canonical string form is used as the coordination-store key.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkItemId {
    pub snapshot: String,
    pub index: String,
    pub shard: u32,
}

impl WorkItemId {
    pub fn new(snapshot: impl Into<String>, index: impl Into<String>, shard: u32) -> Self {
        Self {
            snapshot: snapshot.into(),
            index: index.into(),
            shard,
        }
    }

    /// Canonical store key, `<snapshot>/<index>/<shard>`.
    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.snapshot, self.index, self.shard)
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.snapshot, self.index, self.shard)
    }
}

impl FromStr for WorkItemId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.splitn(3, '/').collect();
        match parts.as_slice() {
            [snapshot, index, shard] => {
                let shard = shard
                    .parse::<u32>()
                    .map_err(|_| format!("Invalid shard id in work item key: {s}"))?;
                Ok(WorkItemId::new(*snapshot, *index, shard))
            }
            _ => Err(format!("Malformed work item key: {s}")),
        }
    }
}

/// Identity of one worker process; unique per process start.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_item_key_round_trips() {
        let id = WorkItemId::new("snap-1", "logs-2026.01", 7);
        let parsed: WorkItemId = id.key().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn malformed_key_is_rejected() {
        assert!("snap-only".parse::<WorkItemId>().is_err());
        assert!("snap/index/not-a-number".parse::<WorkItemId>().is_err());
    }
}
