//! Allotment record: the domain payload persisted by the engine.
//!
//! Schema version 5. Field names serialize in camelCase to stay
//! interchangeable with records written by other frontends sharing the same
//! durable key, and collections this build does not edit (permanent
//! plantings, infrastructure, maintenance tasks) are carried opaquely so a
//! foreign record survives a round-trip. Optional planting fields are
//! omitted when absent rather than serialized as null, matching what those
//! frontends write.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::validate::SchemaValidator;

/// Schema version written by this build.
pub const CURRENT_VERSION: u64 = 5;

/// Oldest schema version this build still accepts.
pub const MIN_SUPPORTED_VERSION: u64 = 1;

/// Top-level persisted allotment record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllotmentRecord {
    /// Schema version of this record.
    pub version: u64,
    /// Plot-level metadata.
    pub meta: AllotmentMeta,
    /// Physical layout: the beds that exist on the plot.
    pub layout: Layout,
    /// Per-year growing seasons.
    #[serde(default)]
    pub seasons: Vec<Season>,
    /// The year the user is currently working in.
    pub current_year: i32,
    /// Maintenance tasks, carried opaquely so records written by other
    /// frontends survive a round-trip through this build.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintenance_tasks: Vec<serde_json::Value>,
}

/// Plot-level metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllotmentMeta {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Physical layout of the plot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Layout {
    #[serde(default)]
    pub beds: Vec<Bed>,
    /// Permanent plantings, carried opaquely (see
    /// [`AllotmentRecord::maintenance_tasks`]).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permanent_plantings: Vec<serde_json::Value>,
    /// Fixed infrastructure (paths, sheds, water butts), carried opaquely.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub infrastructure: Vec<serde_json::Value>,
}

/// A bed on the plot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bed {
    pub id: String,
    pub name: String,
    pub status: BedStatus,
}

/// Whether a bed takes part in crop rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BedStatus {
    /// Rotates crops year over year.
    Rotation,
    /// Holds a permanent planting (fruit bushes, asparagus).
    Perennial,
}

/// One growing year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Season {
    pub year: i32,
    pub status: SeasonStatus,
    #[serde(default)]
    pub beds: Vec<SeasonBed>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Lifecycle of a season.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeasonStatus {
    /// Being planned; plantings are intentions.
    Planning,
    /// The season currently in the ground.
    Active,
    /// A past season kept for rotation history.
    Historical,
}

/// A bed's assignment within one season.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeasonBed {
    /// References [`Bed::id`] in the layout.
    pub bed_id: String,
    pub rotation_group: RotationGroup,
    #[serde(default)]
    pub plantings: Vec<Planting>,
}

/// Crop rotation family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationGroup {
    Legumes,
    Brassicas,
    Roots,
    Alliums,
    Cucurbits,
    Solanaceae,
}

/// One crop in one bed in one season.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Planting {
    pub id: String,
    pub plant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variety_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sow_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transplant_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub harvest_date: Option<NaiveDate>,
}

impl AllotmentRecord {
    /// A fresh record for a plot named `name`, current-versioned, with no
    /// beds or seasons yet. Used as the engine's default when nothing is
    /// stored under the key.
    #[must_use]
    pub fn empty(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            version: CURRENT_VERSION,
            meta: AllotmentMeta {
                name: name.into(),
                location: None,
                created_at: now,
                updated_at: now,
            },
            layout: Layout::default(),
            seasons: Vec::new(),
            current_year: now.year(),
            maintenance_tasks: Vec::new(),
        }
    }

    /// Bump the modification timestamp. Call before handing a mutated record
    /// to the engine.
    pub fn touch(&mut self) {
        self.meta.updated_at = Utc::now();
    }

    /// Validator accepting every schema version this build can decode.
    #[must_use]
    pub fn validator() -> SchemaValidator<Self> {
        SchemaValidator::new(MIN_SUPPORTED_VERSION, CURRENT_VERSION)
    }

    /// The season for `year`, if one exists.
    #[must_use]
    pub fn season(&self, year: i32) -> Option<&Season> {
        self.seasons.iter().find(|season| season.year == year)
    }

    /// The bed with layout id `id`, if one exists.
    #[must_use]
    pub fn bed(&self, id: &str) -> Option<&Bed> {
        self.layout.beds.iter().find(|bed| bed.id == id)
    }
}
