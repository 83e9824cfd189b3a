//! Per-target resolution: search, optional detail fetch, value selection.
//!
//! A target is resolved by searching the provider for its name. If the
//! best match already carries the attribute the job needs it is used
//! directly, otherwise the match is fetched by ID with that attribute
//! requested. Errors never escape: every target ends in an [`Outcome`].

use star_seeker_catalog_models::{EnrichmentField, EnrichmentTarget, FieldValue, truncate_text};
use star_seeker_pipeline_models::Outcome;
use star_seeker_provider::{ArtistImage, ArtistProvider, ArtistRecord, ProviderError, RecordField};

/// How a provider's genre list is collapsed into the single genre column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenreStyle {
    /// The first (most relevant) genre, title-cased.
    Primary,
    /// All genres joined by `", "`.
    Joined,
}

impl GenreStyle {
    /// Style used for genres from the provider with the given ID.
    #[must_use]
    pub fn for_provider(provider_id: &str) -> Self {
        if provider_id == star_seeker_provider::musicbrainz::SERVICE_ID {
            Self::Joined
        } else {
            Self::Primary
        }
    }
}

/// The provider record field that carries `field`.
#[must_use]
pub const fn record_field(field: EnrichmentField) -> RecordField {
    match field {
        EnrichmentField::Genre => RecordField::Genres,
        EnrichmentField::Image => RecordField::Images,
        EnrichmentField::Popularity => RecordField::Popularity,
    }
}

/// Resolves one target to an [`Outcome`].
///
/// Targets that no longer need `field` are [`Outcome::Skipped`] without
/// any external call.
pub async fn resolve(
    provider: &dyn ArtistProvider,
    target: &EnrichmentTarget,
    field: EnrichmentField,
) -> Outcome {
    if !target.needs(field) {
        return Outcome::Skipped;
    }

    match lookup(provider, target, field).await {
        Ok(Some(value)) => Outcome::Updated(value),
        Ok(None) => {
            log::debug!("No {field} found for '{}' (id {})", target.name, target.id);
            Outcome::NotFound
        }
        Err(ProviderError::NotFound { id }) => {
            log::debug!("Match {id} for '{}' vanished", target.name);
            Outcome::NotFound
        }
        Err(e) => {
            log::warn!("Failed to enrich '{}' (id {}): {e}", target.name, target.id);
            Outcome::Error(e.to_string())
        }
    }
}

async fn lookup(
    provider: &dyn ArtistProvider,
    target: &EnrichmentTarget,
    field: EnrichmentField,
) -> Result<Option<FieldValue>, ProviderError> {
    let Some(found) = provider.search_by_name(&target.name).await? else {
        return Ok(None);
    };

    let wanted = record_field(field);
    let record = if found.has(wanted) {
        found
    } else {
        provider.fetch_by_id(&found.id, &[wanted]).await?
    };

    Ok(select_value(
        field,
        &record,
        GenreStyle::for_provider(provider.id()),
    ))
}

/// Picks the catalog value for `field` out of a provider record.
///
/// Returns `None` when the record has nothing usable (no genres, no
/// images, or a zero popularity).
#[must_use]
pub fn select_value(
    field: EnrichmentField,
    record: &ArtistRecord,
    genre_style: GenreStyle,
) -> Option<FieldValue> {
    match field {
        EnrichmentField::Genre => {
            let genres = record.genres.as_deref()?;
            let genre = match genre_style {
                GenreStyle::Primary => title_case(genres.iter().find(|g| !g.trim().is_empty())?),
                GenreStyle::Joined => {
                    let names: Vec<&str> = genres
                        .iter()
                        .map(|g| g.trim())
                        .filter(|g| !g.is_empty())
                        .collect();
                    if names.is_empty() {
                        return None;
                    }
                    names.join(", ")
                }
            };
            Some(FieldValue::Text(truncate_text(&genre)))
        }
        EnrichmentField::Image => {
            pick_image(record.images.as_deref()?).map(|i| FieldValue::Text(i.url.clone()))
        }
        EnrichmentField::Popularity => record
            .popularity
            .filter(|p| *p > 0)
            .map(|p| FieldValue::Score(i32::from(p))),
    }
}

/// Picks a profile image: the middle one by width when there are three or
/// more, the widest otherwise.
#[must_use]
pub fn pick_image(images: &[ArtistImage]) -> Option<&ArtistImage> {
    let mut by_width: Vec<&ArtistImage> = images.iter().filter(|i| !i.url.is_empty()).collect();
    by_width.sort_by_key(|i| std::cmp::Reverse(i.width.unwrap_or(0)));

    if by_width.len() >= 3 {
        by_width.get(by_width.len() / 2).copied()
    } else {
        by_width.first().copied()
    }
}

/// Upper-cases the first letter of every word and lower-cases the rest.
///
/// A word starts after any non-alphabetic character, so `"hip-hop"`
/// becomes `"Hip-Hop"`.
#[must_use]
pub fn title_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut at_word_start = true;

    for c in value.trim().chars() {
        if c.is_alphabetic() {
            if at_word_start {
                out.extend(c.to_uppercase());
            } else {
                out.extend(c.to_lowercase());
            }
            at_word_start = false;
        } else {
            out.push(c);
            at_word_start = true;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeProvider;

    fn image(url: &str, width: u32) -> ArtistImage {
        ArtistImage {
            url: url.to_string(),
            width: Some(width),
            height: Some(width),
        }
    }

    fn target(name: &str, current: Option<FieldValue>) -> EnrichmentTarget {
        EnrichmentTarget {
            id: 1,
            name: name.to_string(),
            current,
        }
    }

    #[test]
    fn title_cases_like_a_label() {
        assert_eq!(title_case("french house"), "French House");
        assert_eq!(title_case("hip-hop"), "Hip-Hop");
        assert_eq!(title_case("r&b"), "R&B");
        assert_eq!(title_case("  ALT Z "), "Alt Z");
    }

    #[test]
    fn picks_middle_image_of_three_or_more() {
        let images = vec![image("s", 160), image("l", 640), image("m", 320)];
        assert_eq!(pick_image(&images).unwrap().url, "m");
    }

    #[test]
    fn picks_widest_of_fewer_than_three() {
        let images = vec![image("s", 160), image("l", 640)];
        assert_eq!(pick_image(&images).unwrap().url, "l");
        assert!(pick_image(&[]).is_none());
    }

    #[test]
    fn genre_styles() {
        let record = ArtistRecord {
            genres: Some(vec!["french house".into(), "electro".into()]),
            ..ArtistRecord::default()
        };
        assert_eq!(
            select_value(EnrichmentField::Genre, &record, GenreStyle::Primary),
            Some(FieldValue::Text("French House".into()))
        );
        assert_eq!(
            select_value(EnrichmentField::Genre, &record, GenreStyle::Joined),
            Some(FieldValue::Text("french house, electro".into()))
        );
    }

    #[test]
    fn empty_genre_list_selects_nothing() {
        let record = ArtistRecord {
            genres: Some(vec![]),
            ..ArtistRecord::default()
        };
        assert_eq!(
            select_value(EnrichmentField::Genre, &record, GenreStyle::Joined),
            None
        );
    }

    #[test]
    fn joined_genres_are_truncated() {
        let record = ArtistRecord {
            genres: Some((0..100).map(|i| format!("genre number {i}")).collect()),
            ..ArtistRecord::default()
        };
        let Some(FieldValue::Text(genre)) =
            select_value(EnrichmentField::Genre, &record, GenreStyle::Joined)
        else {
            panic!("expected a genre");
        };
        assert_eq!(genre.chars().count(), 255);
    }

    #[test]
    fn zero_popularity_is_not_a_value() {
        let mut record = ArtistRecord {
            popularity: Some(0),
            ..ArtistRecord::default()
        };
        assert_eq!(
            select_value(EnrichmentField::Popularity, &record, GenreStyle::Primary),
            None
        );
        record.popularity = Some(64);
        assert_eq!(
            select_value(EnrichmentField::Popularity, &record, GenreStyle::Primary),
            Some(FieldValue::Score(64))
        );
    }

    #[tokio::test]
    async fn enriched_target_is_skipped_without_calls() {
        let provider = FakeProvider::default();
        let outcome = resolve(
            &provider,
            &target("Bonobo", Some(FieldValue::Text("Downtempo".into()))),
            EnrichmentField::Genre,
        )
        .await;
        assert_eq!(outcome, Outcome::Skipped);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn search_miss_is_not_found() {
        let provider = FakeProvider::default();
        let outcome = resolve(&provider, &target("Nobody", None), EnrichmentField::Genre).await;
        assert_eq!(outcome, Outcome::NotFound);
    }

    #[tokio::test]
    async fn incomplete_match_is_fetched_by_id() {
        let provider = FakeProvider::default()
            .with_artist(
                "Burial",
                ArtistRecord {
                    id: "mb-1".into(),
                    name: "Burial".into(),
                    ..ArtistRecord::default()
                },
            )
            .with_detail(ArtistRecord {
                id: "mb-1".into(),
                name: "Burial".into(),
                genres: Some(vec!["dubstep".into()]),
                ..ArtistRecord::default()
            });

        let outcome = resolve(&provider, &target("Burial", None), EnrichmentField::Genre).await;

        assert_eq!(outcome, Outcome::Updated(FieldValue::Text("Dubstep".into())));
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn provider_failure_is_an_error_outcome() {
        let provider = FakeProvider::default().failing_for("Broken");
        let outcome = resolve(&provider, &target("Broken", None), EnrichmentField::Genre).await;
        assert!(matches!(outcome, Outcome::Error(msg) if msg.contains("503")));
    }
}
