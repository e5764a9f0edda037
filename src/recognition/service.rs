//! Face search orchestration.
//!
//! Single-request pipeline: validate the probe image, extract its feature
//! vector, derive the caller's visibility filter, rank candidates from the
//! store. Extraction failure is surfaced here and only here; everywhere
//! else in the system a missing embedding is a silent condition.

use crate::config::RecognitionConfig;
use crate::records::{FilterSpec, RecordStore, StoreError};
use crate::recognition::client::EmbeddingProvider;
use crate::recognition::index::{self, FaceMatch, IndexError};
use crate::roles::CallerContext;
use serde::Deserialize;
use std::sync::Arc;

const ACCEPTED_IMAGE_TYPES: [&str; 2] = ["image/jpeg", "image/png"];

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub threshold: Option<f32>,
}

impl SearchParams {
    /// Resolve against config defaults; limit clamps to [1, max_limit],
    /// threshold to [0.0, 1.0].
    fn resolve(&self, config: &RecognitionConfig) -> (usize, f32) {
        let limit = self
            .limit
            .unwrap_or(config.default_limit)
            .clamp(1, config.max_limit);
        let threshold = self
            .threshold
            .unwrap_or(config.default_threshold)
            .clamp(0.0, 1.0);
        (limit, threshold)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FaceSearchError {
    #[error("image is required")]
    EmptyImage,

    #[error("invalid image format, accepted formats: JPEG, PNG")]
    UnsupportedImageType,

    #[error("could not process the image, no embedding was extracted; resend the image")]
    ExtractionFailed,

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub struct FaceSearchService {
    provider: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn RecordStore>,
    config: RecognitionConfig,
}

impl FaceSearchService {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn RecordStore>,
        config: RecognitionConfig,
    ) -> Self {
        Self {
            provider,
            store,
            config,
        }
    }

    /// Search people by probe image. An empty result list is a valid
    /// outcome; only an unusable probe is an error.
    pub fn search_by_face(
        &self,
        image: &[u8],
        params: SearchParams,
        caller: &CallerContext,
    ) -> Result<Vec<FaceMatch>, FaceSearchError> {
        if image.is_empty() {
            return Err(FaceSearchError::EmptyImage);
        }

        let content_type = sniff_image_type(image)?;

        let vector = self
            .provider
            .extract_from_buffer(image, content_type)
            .ok_or(FaceSearchError::ExtractionFailed)?;

        let (limit, threshold) = params.resolve(&self.config);
        let filter = FilterSpec::face_search(caller);
        let candidates = self.store.face_candidates(&filter)?;

        log::debug!(
            "face search by user {}: {} candidates, threshold {threshold}, limit {limit}",
            caller.user_id,
            candidates.len()
        );

        Ok(index::rank(&vector, candidates, threshold, limit)?)
    }

    /// Liveness of the embedding service, for the health endpoint.
    pub fn embedding_service_available(&self) -> bool {
        self.provider.is_available()
    }
}

fn sniff_image_type(image: &[u8]) -> Result<&'static str, FaceSearchError> {
    let kind = infer::get(image).ok_or(FaceSearchError::UnsupportedImageType)?;

    ACCEPTED_IMAGE_TYPES
        .iter()
        .copied()
        .find(|t| *t == kind.mime_type())
        .ok_or(FaceSearchError::UnsupportedImageType)
}
