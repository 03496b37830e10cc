//! Field-level cleaning applied to records before storage.
//!
//! All functions here are pure and total: bad input degrades to `None` or
//! a sanitised value, never an error, because a single messy field must
//! not cost us the whole record.

use crate::record::SpatialRecord;

/// Collapse whitespace and capitalise the first letter of every word.
///
/// The remainder of each word is preserved, so mixed-case names like
/// "McKenzie" survive.
#[must_use]
pub fn clean_name(name: &str) -> String {
    name.split_whitespace()
        .map(capitalise_first)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Tidy a description: collapse whitespace, sentence-case the first
/// letter, and make sure it ends with terminal punctuation.
#[must_use]
pub fn clean_description(description: &str) -> Option<String> {
    let collapsed = description.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return None;
    }
    let mut cleaned = capitalise_first(&collapsed);
    if !cleaned.ends_with(['.', '!', '?']) {
        cleaned.push('.');
    }
    Some(cleaned)
}

/// Normalise a rating to the 0-5 scale, rounded to one decimal place.
///
/// Ratings above 5 are assumed to be on a 10-point scale and rescaled.
/// Non-finite input degrades to `None`.
#[must_use]
pub fn clean_rating(rating: f64) -> Option<f64> {
    if !rating.is_finite() {
        return None;
    }
    let scaled = if rating > 5.0 { rating / 2.0 } else { rating };
    Some(round_to(scaled.clamp(0.0, 5.0), 1))
}

/// Round a coordinate to six decimal places (roughly 0.1 m of precision).
#[must_use]
pub fn clean_coordinate(coordinate: f64) -> f64 {
    round_to(coordinate, 6)
}

/// Deduplicate, title-case and sort an amenity list.
#[must_use]
pub fn clean_amenities(amenities: &[String]) -> Vec<String> {
    let mut cleaned: Vec<String> = amenities
        .iter()
        .map(|amenity| {
            amenity
                .split_whitespace()
                .map(|word| capitalise_first(&word.to_lowercase()))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|amenity| !amenity.is_empty())
        .collect();
    cleaned.sort();
    cleaned.dedup();
    cleaned
}

/// Aggregate several ratings into one score: the mean, rounded to one
/// decimal place. Non-finite entries are ignored; an empty or all-invalid
/// list yields `None`.
#[must_use]
pub fn mean_rating(ratings: &[f64]) -> Option<f64> {
    let valid: Vec<f64> = ratings.iter().copied().filter(|r| r.is_finite()).collect();
    if valid.is_empty() {
        return None;
    }
    let mean = valid.iter().sum::<f64>() / valid.len() as f64;
    Some(round_to(mean, 1))
}

/// Apply every field cleaner to a record.
#[must_use]
pub fn clean_record(mut record: SpatialRecord) -> SpatialRecord {
    record.name = clean_name(&record.name);
    record.location.x = clean_coordinate(record.location.x);
    record.location.y = clean_coordinate(record.location.y);
    record.rating = record.rating.and_then(clean_rating);
    record.description = record
        .description
        .as_deref()
        .and_then(clean_description);
    record.country = record
        .country
        .map(|country| country.trim().to_uppercase())
        .filter(|country| !country.is_empty());
    record.region = record
        .region
        .map(|region| region.trim().to_owned())
        .filter(|region| !region.is_empty());
    record.amenities = clean_amenities(&record.amenities);
    record
}

fn capitalise_first(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10_f64.powi(decimals as i32);
    (value * factor).round() / factor
}
