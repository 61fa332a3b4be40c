//! Landmark domain model.
//!
//! # Responsibility
//! - Define the canonical landmark record shared by cache, queue and remote.
//! - Reject invalid titles and coordinates at construction time.
//!
//! # Invariants
//! - `title` is trimmed and never empty.
//! - `latitude` is within [-90, 90] and `longitude` within [-180, 180].
//! - `updated_at` never moves backwards when a record is touched.

use super::now_epoch_ms;
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

static WHITESPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid ws regex"));

/// Server-assigned landmark identity.
pub type LandmarkId = i64;

/// Client-side identity, stable for the lifetime of a local record.
///
/// Queued operations and the facade address records by this key because the
/// server identity is unknown until the first create is confirmed.
pub type LocalKey = Uuid;

/// Validation failures for landmark construction and mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum LandmarkValidationError {
    EmptyTitle,
    NonFiniteCoordinate,
    LatitudeOutOfRange(f64),
    LongitudeOutOfRange(f64),
    InvertedTimestamps { created_at: i64, updated_at: i64 },
}

impl Display for LandmarkValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyTitle => write!(f, "landmark title must not be blank"),
            Self::NonFiniteCoordinate => write!(f, "coordinates must be finite numbers"),
            Self::LatitudeOutOfRange(value) => {
                write!(f, "latitude {value} is outside [-90, 90]")
            }
            Self::LongitudeOutOfRange(value) => {
                write!(f, "longitude {value} is outside [-180, 180]")
            }
            Self::InvertedTimestamps {
                created_at,
                updated_at,
            } => write!(
                f,
                "updated_at ({updated_at}) must not be earlier than created_at ({created_at})"
            ),
        }
    }
}

impl Error for LandmarkValidationError {}

/// Validated WGS84 coordinate pair.
///
/// Fields are private so an out-of-range pair cannot be built outside
/// [`Coordinates::new`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    latitude: f64,
    longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, LandmarkValidationError> {
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(LandmarkValidationError::NonFiniteCoordinate);
        }
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(LandmarkValidationError::LatitudeOutOfRange(latitude));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(LandmarkValidationError::LongitudeOutOfRange(longitude));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }
}

/// User-editable landmark fields, as submitted by create/update requests.
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkDraft {
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    /// Local image file reference, uploaded alongside the remote write.
    pub image_path: Option<String>,
}

impl LandmarkDraft {
    pub fn new(title: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            title: title.into(),
            description: None,
            category: None,
            latitude,
            longitude,
            image_path: None,
        }
    }
}

/// Canonical landmark record.
#[derive(Debug, Clone, PartialEq)]
pub struct Landmark {
    /// Stable client-side key; never sent to the remote service.
    pub local_key: LocalKey,
    /// Server identity. `None` until the first remote create is confirmed.
    pub id: Option<LandmarkId>,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub coordinates: Coordinates,
    /// Remote image reference returned by the server.
    pub image: Option<String>,
    /// Local image file reference.
    pub image_path: Option<String>,
    /// True once the local copy is confirmed identical to the remote copy.
    pub is_synced: bool,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Unix epoch milliseconds. Always `>= created_at`.
    pub updated_at: i64,
}

impl Landmark {
    /// Creates an optimistic, unsynced landmark with a fresh local key.
    pub fn new(
        title: impl Into<String>,
        latitude: f64,
        longitude: f64,
    ) -> Result<Self, LandmarkValidationError> {
        Self::from_draft(&LandmarkDraft::new(title, latitude, longitude))
    }

    /// Builds an unsynced landmark from a validated draft.
    pub fn from_draft(draft: &LandmarkDraft) -> Result<Self, LandmarkValidationError> {
        let title = normalize_title(&draft.title)?;
        let coordinates = Coordinates::new(draft.latitude, draft.longitude)?;
        let now = now_epoch_ms();
        Ok(Self {
            local_key: Uuid::new_v4(),
            id: None,
            title,
            description: normalize_optional(draft.description.as_deref()),
            category: normalize_optional(draft.category.as_deref()),
            coordinates,
            image: None,
            image_path: normalize_optional(draft.image_path.as_deref()),
            is_synced: false,
            created_at: now,
            updated_at: now,
        })
    }

    /// Applies draft fields as a local edit.
    ///
    /// The record is left untouched when the draft is invalid. On success the
    /// synced flag drops to `false` and `updated_at` is bumped.
    pub fn apply_draft(&mut self, draft: &LandmarkDraft) -> Result<(), LandmarkValidationError> {
        let title = normalize_title(&draft.title)?;
        let coordinates = Coordinates::new(draft.latitude, draft.longitude)?;
        self.title = title;
        self.coordinates = coordinates;
        self.description = normalize_optional(draft.description.as_deref());
        self.category = normalize_optional(draft.category.as_deref());
        if draft.image_path.is_some() {
            self.image_path = normalize_optional(draft.image_path.as_deref());
        }
        self.is_synced = false;
        self.touch();
        Ok(())
    }

    /// Copies server-authoritative fields from a confirmed remote record.
    ///
    /// Keeps `local_key`, `created_at` and the local image reference.
    pub fn absorb_remote(&mut self, remote: &Landmark) {
        if remote.id.is_some() {
            self.id = remote.id;
        }
        self.title = remote.title.clone();
        self.coordinates = remote.coordinates;
        if remote.description.is_some() {
            self.description = remote.description.clone();
        }
        if remote.category.is_some() {
            self.category = remote.category.clone();
        }
        if remote.image.is_some() {
            self.image = remote.image.clone();
        }
        self.updated_at = self.updated_at.max(remote.updated_at);
    }

    /// Bumps `updated_at` to `max(now, updated_at + 1)`.
    pub fn touch(&mut self) {
        self.updated_at = now_epoch_ms().max(self.updated_at.saturating_add(1));
    }

    pub fn latitude(&self) -> f64 {
        self.coordinates.latitude()
    }

    pub fn longitude(&self) -> f64 {
        self.coordinates.longitude()
    }

    /// Re-checks invariants for records assembled field by field.
    pub fn validate(&self) -> Result<(), LandmarkValidationError> {
        if self.title.trim().is_empty() {
            return Err(LandmarkValidationError::EmptyTitle);
        }
        if self.updated_at < self.created_at {
            return Err(LandmarkValidationError::InvertedTimestamps {
                created_at: self.created_at,
                updated_at: self.updated_at,
            });
        }
        Ok(())
    }
}

/// Trims and collapses internal whitespace runs; rejects blank titles.
pub fn normalize_title(raw: &str) -> Result<String, LandmarkValidationError> {
    let collapsed = WHITESPACE_RE.replace_all(raw.trim(), " ");
    if collapsed.is_empty() {
        return Err(LandmarkValidationError::EmptyTitle);
    }
    Ok(collapsed.into_owned())
}

fn normalize_optional(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
