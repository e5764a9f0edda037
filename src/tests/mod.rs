//! Integration tests wiring the real store to mock embedding providers.

mod app;

pub mod support {
    use crate::records::{BackendJson, RecordStore};
    use crate::recognition::EmbeddingProvider;
    use crate::storage::BackendLocal;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Minimal JPEG header; enough for the content sniff in the orchestrator.
    pub const JPEG_STUB: &[u8] = &[
        0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, 0x4A, 0x46, 0x49, 0x46, 0x00, 0x01,
    ];

    /// Embedding provider with scripted responses.
    pub struct MockProvider {
        /// Returned by extract_from_buffer; None simulates extraction failure
        pub buffer_vector: Option<Vec<f32>>,
        /// Per-URL vectors returned by extract_from_url
        pub url_vectors: Mutex<HashMap<String, Vec<f32>>>,
        pub available: bool,
    }

    impl MockProvider {
        pub fn returning(vector: Vec<f32>) -> Self {
            Self {
                buffer_vector: Some(vector),
                url_vectors: Mutex::new(HashMap::new()),
                available: true,
            }
        }

        pub fn failing() -> Self {
            Self {
                buffer_vector: None,
                url_vectors: Mutex::new(HashMap::new()),
                available: false,
            }
        }

        pub fn with_url(self, url: &str, vector: Vec<f32>) -> Self {
            self.url_vectors
                .lock()
                .unwrap()
                .insert(url.to_string(), vector);
            self
        }
    }

    impl EmbeddingProvider for MockProvider {
        fn extract_from_buffer(&self, _: &[u8], _: &str) -> Option<Vec<f32>> {
            self.buffer_vector.clone()
        }

        fn extract_from_url(&self, url: &str) -> Option<Vec<f32>> {
            self.url_vectors.lock().unwrap().get(url).cloned()
        }

        fn is_available(&self) -> bool {
            self.available
        }
    }

    /// A 128-dim unit vector along the given axis.
    pub fn unit_vec(axis: usize) -> Vec<f32> {
        let mut v = vec![0.0; 128];
        v[axis] = 1.0;
        v
    }

    /// A 128-dim unit vector whose cosine similarity to `unit_vec(0)` is
    /// exactly `cos` (remaining mass on the second axis).
    pub fn vec_with_cos(cos: f32) -> Vec<f32> {
        let mut v = vec![0.0; 128];
        v[0] = cos;
        v[1] = (1.0 - cos * cos).sqrt();
        v
    }

    pub fn temp_store() -> (Arc<dyn RecordStore>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let storage = BackendLocal::new(dir.path().to_str().unwrap()).unwrap();
        let store: Arc<dyn RecordStore> = Arc::new(BackendJson::load(Arc::new(storage)).unwrap());
        (store, dir)
    }
}
