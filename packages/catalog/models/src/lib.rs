#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Artist catalog row types and enrichment field definitions.
//!
//! Every enrichment job fills exactly one [`EnrichmentField`] of an
//! artist row. The field decides which rows are eligible (the "needs
//! enrichment" predicate) and which column a result is written to. The
//! same predicate is expressed in SQL by `star_seeker_catalog` so that
//! chunk queries and the in-memory check never disagree.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Genre value written by the name import before any enrichment.
pub const UNKNOWN_GENRE: &str = "Unknown";

/// Prefix of the placeholder profile pictures assigned at import time.
pub const PLACEHOLDER_IMAGE_PREFIX: &str = "https://picsum.photos/";

/// Maximum length of any text column in the catalog.
pub const MAX_TEXT_LEN: usize = 255;

/// Returns the deterministic placeholder image URL for a registry ID.
#[must_use]
pub fn placeholder_image(seed: &str) -> String {
    format!("{PLACEHOLDER_IMAGE_PREFIX}seed/{seed}/400/400")
}

/// Truncates `value` to at most [`MAX_TEXT_LEN`] characters.
#[must_use]
pub fn truncate_text(value: &str) -> String {
    value.chars().take(MAX_TEXT_LEN).collect()
}

/// The attribute an enrichment job fills in.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EnrichmentField {
    /// Primary genre label.
    Genre,
    /// Profile picture URL.
    Image,
    /// Popularity score (1-100).
    Popularity,
}

impl EnrichmentField {
    /// All enrichment fields, in CLI display order.
    pub const ALL: &[Self] = &[Self::Genre, Self::Image, Self::Popularity];

    /// Name of the catalog column this field is stored in.
    #[must_use]
    pub const fn column(self) -> &'static str {
        match self {
            Self::Genre => "genre",
            Self::Image => "profile_picture",
            Self::Popularity => "popularity",
        }
    }

    /// Returns `true` if a row whose current value is `current` is still
    /// missing this attribute.
    #[must_use]
    pub fn needs(self, current: Option<&FieldValue>) -> bool {
        match (self, current) {
            (_, None) => true,
            (Self::Genre, Some(FieldValue::Text(genre))) => {
                genre.trim().is_empty() || genre.eq_ignore_ascii_case(UNKNOWN_GENRE)
            }
            (Self::Image, Some(FieldValue::Text(url))) => {
                url.is_empty() || url.starts_with(PLACEHOLDER_IMAGE_PREFIX)
            }
            (Self::Popularity, Some(FieldValue::Score(score))) => *score == 0,
            // A value of the wrong shape can't satisfy the field.
            _ => true,
        }
    }
}

/// A value for one [`EnrichmentField`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Text columns (genre, profile picture).
    Text(String),
    /// Integer columns (popularity).
    Score(i32),
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Score(n) => write!(f, "{n}"),
        }
    }
}

/// A full artist row as stored in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtistRow {
    /// Primary key; also the pagination and resume cursor.
    pub id: i64,
    /// Display name used for external lookups.
    pub name: String,
    /// Genre label, `None` when never set.
    pub genre: Option<String>,
    /// Profile picture URL.
    pub profile_picture: Option<String>,
    /// Country or area reported by the registry.
    pub location: String,
    /// Popularity score, `0` when unknown.
    pub popularity: i32,
    /// Registry ID the row was imported from, if any.
    pub external_id: Option<String>,
}

impl ArtistRow {
    /// Returns the current value of `field` for this row.
    #[must_use]
    pub fn value_of(&self, field: EnrichmentField) -> Option<FieldValue> {
        match field {
            EnrichmentField::Genre => self.genre.clone().map(FieldValue::Text),
            EnrichmentField::Image => self.profile_picture.clone().map(FieldValue::Text),
            EnrichmentField::Popularity => Some(FieldValue::Score(self.popularity)),
        }
    }

    /// Snapshots this row as an enrichment target for `field`.
    #[must_use]
    pub fn to_target(&self, field: EnrichmentField) -> EnrichmentTarget {
        EnrichmentTarget {
            id: self.id,
            name: self.name.clone(),
            current: self.value_of(field),
        }
    }
}

/// One catalog row eligible for enrichment, as read at chunk fetch time.
///
/// Targets are never cached across chunks; each chunk re-reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichmentTarget {
    /// Stable numeric ID (the cursor key).
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Current value of the attribute being filled.
    pub current: Option<FieldValue>,
}

impl EnrichmentTarget {
    /// Returns `true` if this target still needs `field`.
    #[must_use]
    pub fn needs(&self, field: EnrichmentField) -> bool {
        field.needs(self.current.as_ref())
    }
}

/// An artist to insert during a name import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewArtist {
    /// Display name.
    pub name: String,
    /// Initial genre (normally [`UNKNOWN_GENRE`]).
    pub genre: String,
    /// Country or area.
    pub location: String,
    /// Initial profile picture (normally a placeholder).
    pub profile_picture: String,
    /// Registry ID, used to ignore duplicates.
    pub external_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> FieldValue {
        FieldValue::Text(s.to_string())
    }

    #[test]
    fn genre_needs_enrichment_when_missing_or_unknown() {
        let field = EnrichmentField::Genre;
        assert!(field.needs(None));
        assert!(field.needs(Some(&text(""))));
        assert!(field.needs(Some(&text("   "))));
        assert!(field.needs(Some(&text("Unknown"))));
        assert!(field.needs(Some(&text("UNKNOWN"))));
        assert!(!field.needs(Some(&text("Indie Rock"))));
    }

    #[test]
    fn image_placeholder_still_needs_enrichment() {
        let field = EnrichmentField::Image;
        assert!(field.needs(None));
        assert!(field.needs(Some(&text(&placeholder_image("abc")))));
        assert!(!field.needs(Some(&text("https://i.scdn.co/image/123"))));
    }

    #[test]
    fn popularity_zero_needs_enrichment() {
        let field = EnrichmentField::Popularity;
        assert!(field.needs(Some(&FieldValue::Score(0))));
        assert!(!field.needs(Some(&FieldValue::Score(42))));
    }

    #[test]
    fn field_parses_from_snake_case() {
        assert_eq!(
            "popularity".parse::<EnrichmentField>().unwrap(),
            EnrichmentField::Popularity
        );
        assert_eq!(EnrichmentField::Image.as_ref(), "image");
        assert_eq!(EnrichmentField::Image.column(), "profile_picture");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let long = "é".repeat(300);
        let truncated = truncate_text(&long);
        assert_eq!(truncated.chars().count(), MAX_TEXT_LEN);
    }

    #[test]
    fn row_snapshot_carries_current_value() {
        let row = ArtistRow {
            id: 7,
            name: "Bonobo".to_string(),
            genre: Some("Unknown".to_string()),
            profile_picture: None,
            location: "GB".to_string(),
            popularity: 0,
            external_id: None,
        };
        let target = row.to_target(EnrichmentField::Genre);
        assert_eq!(target.id, 7);
        assert!(target.needs(EnrichmentField::Genre));
        assert!(row.to_target(EnrichmentField::Image).needs(EnrichmentField::Image));
    }
}
