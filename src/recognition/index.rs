//! Cosine-distance ranking over face candidates.
//!
//! The store hands over candidate rows already narrowed by the filter spec;
//! this module only does the numeric work: distance, threshold, per-person
//! de-duplication, ordering and truncation.

use crate::records::{FaceCandidate, Person};
use serde::Serialize;
use std::collections::HashMap;

/// One ranked match. `similarity` is exactly `1.0 - distance`; the raw
/// arithmetic is preserved, no clamping is applied.
#[derive(Debug, Clone, Serialize)]
pub struct FaceMatch {
    pub person: Person,
    pub similarity: f32,
    pub distance: f32,
    pub face_photo_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("query vector has zero norm")]
    ZeroNormQuery,
}

/// Rank candidates against a query vector.
///
/// - candidates below `threshold` similarity are dropped
/// - each person appears at most once, represented by their closest photo
/// - results are ordered by distance ascending, ties broken by person id
/// - at most `limit` results are returned
///
/// Candidates whose stored vector does not match the query's dimensionality
/// are skipped. An empty candidate set yields an empty result, not an error.
pub fn rank(
    query: &[f32],
    candidates: Vec<FaceCandidate>,
    threshold: f32,
    limit: usize,
) -> Result<Vec<FaceMatch>, IndexError> {
    let query_norm = l2_norm(query);
    if query_norm < f32::EPSILON {
        return Err(IndexError::ZeroNormQuery);
    }

    // closest row per person id
    let mut best: HashMap<u64, FaceMatch> = HashMap::new();

    for candidate in candidates {
        if candidate.embedding.len() != query.len() {
            log::debug!(
                "skipping media {}: embedding dimension {} does not match query {}",
                candidate.media_id,
                candidate.embedding.len(),
                query.len()
            );
            continue;
        }

        let target_norm = l2_norm(&candidate.embedding);
        if target_norm < f32::EPSILON {
            continue;
        }

        let dot: f32 = query
            .iter()
            .zip(candidate.embedding.iter())
            .map(|(a, b)| a * b)
            .sum();
        let distance = 1.0 - dot / (query_norm * target_norm);
        let similarity = 1.0 - distance;

        if similarity < threshold {
            continue;
        }

        let entry = FaceMatch {
            person: candidate.person,
            similarity,
            distance,
            face_photo_url: candidate.url,
        };

        match best.get(&entry.person.id) {
            Some(existing) if existing.distance <= entry.distance => {}
            _ => {
                best.insert(entry.person.id, entry);
            }
        }
    }

    let mut results: Vec<FaceMatch> = best.into_values().collect();
    results.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.person.id.cmp(&b.person.id))
    });
    results.truncate(limit);

    Ok(results)
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}
