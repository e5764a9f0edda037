//! Best-effort embedding attachment for newly created FACE media.
//!
//! Runs from the task queue after the media row has been committed. The
//! media row is never rolled back here: when extraction fails or the vector
//! fails validation the row simply keeps no embedding and stays invisible
//! to face search until a backfill picks it up.

use crate::records::{MediaType, RecordStore, StoreError};
use crate::recognition::client::EmbeddingProvider;
use std::sync::Arc;

#[derive(Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Vector extracted, validated and attached
    Attached,
    /// Extraction returned the no-embedding sentinel
    NoEmbedding,
    /// Extraction produced a vector of the wrong dimensionality
    WrongDimensions { got: usize },
    /// Row is not a FACE photo; nothing to do
    NotFace,
    /// Row already carries an embedding; extraction is not repeated
    AlreadyEmbedded,
    /// Store failure while loading or updating the row
    StoreFailed(String),
}

pub fn ingest_media_embedding(
    media_id: u64,
    store: &Arc<dyn RecordStore>,
    provider: &Arc<dyn EmbeddingProvider>,
    dimensions: usize,
) -> IngestOutcome {
    let media = match store.media_get(media_id) {
        Ok(media) => media,
        Err(StoreError::NotFound) => {
            log::warn!("media {media_id} disappeared before embedding extraction");
            return IngestOutcome::StoreFailed("media not found".to_string());
        }
        Err(err) => return IngestOutcome::StoreFailed(err.to_string()),
    };

    if media.media_type != MediaType::Face {
        return IngestOutcome::NotFace;
    }

    if media.embedding.is_some() {
        return IngestOutcome::AlreadyEmbedded;
    }

    let Some(vector) = provider.extract_from_url(&media.url) else {
        log::warn!(
            "no embedding extracted for media {media_id}; row stays searchable-by-listing only"
        );
        return IngestOutcome::NoEmbedding;
    };

    if vector.len() != dimensions {
        log::warn!(
            "discarding embedding for media {media_id}: dimension {} (expected {dimensions})",
            vector.len()
        );
        return IngestOutcome::WrongDimensions { got: vector.len() };
    }

    match store.set_media_embedding(media_id, vector) {
        Ok(()) => {
            log::info!("embedding attached to media {media_id}");
            IngestOutcome::Attached
        }
        Err(err) => IngestOutcome::StoreFailed(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{BackendJson, MediaCreate, PersonCreate};
    use crate::storage::BackendLocal;

    struct FixedProvider {
        vector: Option<Vec<f32>>,
    }

    impl EmbeddingProvider for FixedProvider {
        fn extract_from_buffer(&self, _: &[u8], _: &str) -> Option<Vec<f32>> {
            self.vector.clone()
        }
        fn extract_from_url(&self, _: &str) -> Option<Vec<f32>> {
            self.vector.clone()
        }
        fn is_available(&self) -> bool {
            self.vector.is_some()
        }
    }

    fn setup(
        media_type: MediaType,
        vector: Option<Vec<f32>>,
    ) -> (Arc<dyn RecordStore>, Arc<dyn EmbeddingProvider>, u64, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = BackendLocal::new(dir.path().to_str().unwrap()).unwrap();
        let store: Arc<dyn RecordStore> =
            Arc::new(BackendJson::load(Arc::new(storage)).unwrap());

        let person = store
            .person_create(
                PersonCreate {
                    full_name: "Ana Souza".to_string(),
                    ..Default::default()
                },
                1,
            )
            .unwrap();
        let media = store
            .media_create(MediaCreate {
                media_type,
                url: "https://cdn.example/a.jpg".to_string(),
                label: None,
                description: None,
                person_id: person.id,
            })
            .unwrap();

        let provider: Arc<dyn EmbeddingProvider> = Arc::new(FixedProvider { vector });
        (store, provider, media.id, dir)
    }

    #[test]
    fn test_attaches_valid_vector() {
        let (store, provider, media_id, _dir) = setup(MediaType::Face, Some(vec![0.5; 128]));

        let outcome = ingest_media_embedding(media_id, &store, &provider, 128);
        assert_eq!(outcome, IngestOutcome::Attached);
        assert_eq!(store.media_get(media_id).unwrap().embedding, Some(vec![0.5; 128]));
    }

    #[test]
    fn test_extraction_failure_leaves_row_without_embedding() {
        let (store, provider, media_id, _dir) = setup(MediaType::Face, None);

        let outcome = ingest_media_embedding(media_id, &store, &provider, 128);
        assert_eq!(outcome, IngestOutcome::NoEmbedding);
        assert!(store.media_get(media_id).unwrap().embedding.is_none());
    }

    #[test]
    fn test_wrong_dimensions_not_attached() {
        let (store, provider, media_id, _dir) = setup(MediaType::Face, Some(vec![0.5; 64]));

        let outcome = ingest_media_embedding(media_id, &store, &provider, 128);
        assert_eq!(outcome, IngestOutcome::WrongDimensions { got: 64 });
        assert!(store.media_get(media_id).unwrap().embedding.is_none());
    }

    #[test]
    fn test_non_face_media_skipped() {
        let (store, provider, media_id, _dir) = setup(MediaType::Tattoo, Some(vec![0.5; 128]));

        let outcome = ingest_media_embedding(media_id, &store, &provider, 128);
        assert_eq!(outcome, IngestOutcome::NotFace);
        assert!(store.media_get(media_id).unwrap().embedding.is_none());
    }

    #[test]
    fn test_already_embedded_not_recomputed() {
        let (store, provider, media_id, _dir) = setup(MediaType::Face, Some(vec![0.9; 128]));

        store.set_media_embedding(media_id, vec![0.1; 128]).unwrap();
        let outcome = ingest_media_embedding(media_id, &store, &provider, 128);
        assert_eq!(outcome, IngestOutcome::AlreadyEmbedded);
        // original vector untouched
        assert_eq!(store.media_get(media_id).unwrap().embedding, Some(vec![0.1; 128]));
    }

    #[test]
    fn test_missing_media_reported() {
        let (store, provider, _media_id, _dir) = setup(MediaType::Face, Some(vec![0.5; 128]));

        let outcome = ingest_media_embedding(999, &store, &provider, 128);
        assert!(matches!(outcome, IngestOutcome::StoreFailed(_)));
    }
}
