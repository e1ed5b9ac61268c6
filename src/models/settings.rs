//! Default search settings pushed to the staging collection.

use serde_json::{Value, json};

/// Ranking, faceting and highlighting configuration for talk records.
pub fn default_settings() -> Value {
    // Typo tolerance is disabled on years
    let years: Vec<String> = (1970..2030).map(|year| year.to_string()).collect();

    json!({
        "searchableAttributes": [
            "unordered(video.title)",
            "unordered(speakers.name)",
            "unordered(caption.content)",
            "unordered(conference.name)"
        ],
        "customRanking": [
            "desc(video.hasCaptions)",
            "desc(video.popularity.score)",
            "desc(video.hasManualCaptions)",
            "desc(video.publishedDate.day)",
            "desc(video.duration.minutes)",
            "asc(video.positionInPlaylist)",
            "asc(caption.start)"
        ],
        "attributesForFaceting": [
            "speakers.name",
            "conference.name",
            "conference.year",
            "video.hasManualCaptions",
            "video.id",
            "playlist.id",
            "playlist.title",
            "channel.id",
            "channel.title"
        ],
        "attributesToSnippet": ["caption.content:8"],
        "distinct": true,
        "attributeForDistinct": "video.id",
        "highlightPreTag": "<em class=\"ats-highlight\">",
        "highlightPostTag": "</em>",
        "disableTypoToleranceOnWords": years
    })
}

/// Overlay the top-level keys of `overrides` onto `base`.
///
/// Non-object overrides are ignored.
pub fn merge_settings(base: Value, overrides: &Value) -> Value {
    match (base, overrides) {
        (Value::Object(mut base), Value::Object(overrides)) => {
            for (key, value) in overrides {
                base.insert(key.clone(), value.clone());
            }
            Value::Object(base)
        }
        (base, _) => base,
    }
}
