//! Database models

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle state of a calibration run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::Internal(format!("Unknown run status: {}", other))),
        }
    }

    /// Completed and failed runs never change status again
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Teacher diagnosis level, ordered from lowest to highest
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisLevel {
    None,
    Preliminary,
    Official,
    Advanced,
}

impl DiagnosisLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Preliminary => "preliminary",
            Self::Official => "official",
            Self::Advanced => "advanced",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "preliminary" => Ok(Self::Preliminary),
            "official" => Ok(Self::Official),
            "advanced" => Ok(Self::Advanced),
            other => Err(Error::Internal(format!("Unknown diagnosis level: {}", other))),
        }
    }
}

impl fmt::Display for DiagnosisLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score-category edge an expert flagged a judgment as sitting on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BoundaryType {
    #[serde(rename = "1-2")]
    OneTwo,
    #[serde(rename = "2-3")]
    TwoThree,
}

impl BoundaryType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneTwo => "1-2",
            Self::TwoThree => "2-3",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "1-2" => Ok(Self::OneTwo),
            "2-3" => Ok(Self::TwoThree),
            other => Err(Error::InvalidInput(format!("Unknown boundary type: {}", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Essay {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub is_active: bool,
    pub is_anchor: bool,
    pub is_calibration: bool,
    pub anchor_explanation: Option<String>,
    /// Cached from the active run's result; set only by activation
    pub difficulty_logit: Option<f64>,
    pub difficulty_logit_se: Option<f64>,
    pub is_calibrated: bool,
    pub calibrated_at: Option<DateTime<Utc>>,
    /// Run the cached difficulty was last synced from
    pub calibration_run_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rubric {
    pub id: Uuid,
    pub name: String,
    /// content / organization / expression grouping
    pub category: String,
    pub description: Option<String>,
    pub boundary_1_2_description: Option<String>,
    pub boundary_2_3_description: Option<String>,
    pub display_order: i64,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertRater {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub institution: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpertScore {
    pub id: Uuid,
    pub expert_id: Uuid,
    pub essay_id: Uuid,
    pub rubric_id: Uuid,
    pub score: u8,
    pub confidence_level: Option<u8>,
    pub is_boundary_case: bool,
    pub boundary_type: Option<BoundaryType>,
    pub rationale: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusScore {
    pub id: Uuid,
    pub essay_id: Uuid,
    pub rubric_id: Uuid,
    pub consensus_score: u8,
    pub is_boundary_1_2: bool,
    pub is_boundary_2_3: bool,
    pub expert_panel_size: u32,
    pub agreement_rate: Option<f64>,
    pub boundary_rationale: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRun {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Audit identity, distinct from the row id
    pub version_id: String,
    pub status: RunStatus,
    pub is_active_version: bool,
    pub essay_ids: Vec<Uuid>,
    pub rubric_ids: Vec<Uuid>,
    pub total_observations: i64,
    pub convergence: Option<bool>,
    pub separation_reliability: Option<f64>,
    pub method: Option<String>,
    pub expert_count: Option<i64>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub id: Uuid,
    pub calibration_run_id: Uuid,
    pub essay_id: Uuid,
    /// Joined from essays when the essay still exists
    pub essay_title: Option<String>,
    pub difficulty_logit: f64,
    pub difficulty_se: Option<f64>,
    pub difficulty_ci_lower: Option<f64>,
    pub difficulty_ci_upper: Option<f64>,
    pub infit: Option<f64>,
    pub outfit: Option<f64>,
    pub mean_score: Option<f64>,
    pub sd_score: Option<f64>,
    pub expert_count: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaterResult {
    pub id: Uuid,
    pub calibration_run_id: Uuid,
    pub rater_id: String,
    pub severity: f64,
    pub severity_se: Option<f64>,
    pub infit: Option<f64>,
    pub outfit: Option<f64>,
    pub mean_score: Option<f64>,
    pub feedback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Teacher {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub essays_rated_count: u32,
    pub diagnosis_level: DiagnosisLevel,
    pub is_active: bool,
}

/// Parse a TEXT uuid column
pub fn parse_uuid(column: &str, value: &str) -> Result<Uuid> {
    Uuid::parse_str(value)
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

/// Parse a TEXT RFC 3339 timestamp column
pub fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Internal(format!("Failed to parse {}: {}", column, e)))
}

/// Parse an optional TEXT RFC 3339 timestamp column
pub fn parse_optional_timestamp(column: &str, value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_timestamp(column, &v)).transpose()
}

/// Parse a JSON array of uuids stored as TEXT
pub fn parse_uuid_list(column: &str, value: &str) -> Result<Vec<Uuid>> {
    serde_json::from_str(value)
        .map_err(|e| Error::Internal(format!("Failed to deserialize {}: {}", column, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_status_round_trips_through_text() {
        for status in [
            RunStatus::Pending,
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
        ] {
            assert_eq!(RunStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(RunStatus::parse("archived").is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
    }

    #[test]
    fn test_diagnosis_levels_are_ordered() {
        assert!(DiagnosisLevel::None < DiagnosisLevel::Preliminary);
        assert!(DiagnosisLevel::Preliminary < DiagnosisLevel::Official);
        assert!(DiagnosisLevel::Official < DiagnosisLevel::Advanced);
    }

    #[test]
    fn test_boundary_type_serializes_as_tag() {
        let json = serde_json::to_string(&BoundaryType::TwoThree).unwrap();
        assert_eq!(json, "\"2-3\"");
        assert_eq!(BoundaryType::parse("1-2").unwrap(), BoundaryType::OneTwo);
        assert!(BoundaryType::parse("1-3").is_err());
    }
}
