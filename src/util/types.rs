//! Identifier aliases and the small closed enums that drive scheduling.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Task identifier.
pub type TaskId = uuid::Uuid;

/// Worker identifier.
pub type WorkerId = uuid::Uuid;

/// Partition ("master") name.
pub type PartitionId = String;

/// Category of work. Drives the base priority score and which worker type
/// (and therefore which partitions) can serve a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Security scans and audits.
    Security,
    /// Bug fixes and remediation.
    Fix,
    /// Feature implementation.
    Implementation,
    /// Test authoring and coverage work.
    Test,
    /// Documentation generation.
    Documentation,
}

impl Category {
    /// All categories in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Security,
        Self::Fix,
        Self::Implementation,
        Self::Test,
        Self::Documentation,
    ];

    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Security => "security",
            Self::Fix => "fix",
            Self::Implementation => "implementation",
            Self::Test => "test",
            Self::Documentation => "documentation",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "security" | "scan" | "audit" => Ok(Self::Security),
            "fix" | "bug" | "remediation" => Ok(Self::Fix),
            "implementation" | "feature" => Ok(Self::Implementation),
            "test" | "test-coverage" => Ok(Self::Test),
            "documentation" | "docs" => Ok(Self::Documentation),
            other => Err(format!("unrecognized category `{other}`")),
        }
    }
}

/// Urgency declared by the submitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Urgency {
    /// Lowest urgency.
    Low,
    /// Default urgency.
    Medium,
    /// Elevated urgency.
    High,
    /// Must run as soon as budget allows.
    Critical,
}

impl Urgency {
    /// All urgencies, lowest first.
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    /// Canonical lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Urgency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Urgency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" | "normal" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(format!("unrecognized urgency `{other}`")),
        }
    }
}
