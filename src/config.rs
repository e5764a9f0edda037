use crate::storage::{self, StorageManager};
use serde::{Deserialize, Serialize};

const TASK_QUEUE_MAX_THREADS: u16 = 4;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Default base URL for the embedding-extraction service
const DEFAULT_RECOGNITION_API_URL: &str = "http://localhost:8000";
/// Embedding dimensionality the whole index agrees on
const DEFAULT_DIMENSIONS: usize = 128;
/// Default minimum similarity for a match [0.0, 1.0]
const DEFAULT_THRESHOLD: f32 = 0.5;
/// Default and maximum result counts for face search
const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 50;
/// Timeouts for the embedding service calls, in seconds
const DEFAULT_EXTRACT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 10;
const DEFAULT_HEALTH_TIMEOUT_SECS: u64 = 5;

/// Configuration for the face recognition pipeline
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RecognitionConfig {
    /// Base URL of the embedding-extraction service
    #[serde(default = "default_recognition_api_url")]
    pub api_url: String,

    /// Expected embedding dimensionality
    #[serde(default = "default_dimensions")]
    pub dimensions: usize,

    /// Default similarity threshold [0.0, 1.0]
    #[serde(default = "default_threshold")]
    pub default_threshold: f32,

    /// Default number of results returned by face search
    #[serde(default = "default_limit")]
    pub default_limit: usize,

    /// Hard cap on requested result counts
    #[serde(default = "max_limit")]
    pub max_limit: usize,

    /// Timeout for embedding extraction requests, seconds
    #[serde(default = "default_extract_timeout_secs")]
    pub extract_timeout_secs: u64,

    /// Timeout for downloading a probe image by URL, seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// Timeout for the service health probe, seconds
    #[serde(default = "default_health_timeout_secs")]
    pub health_timeout_secs: u64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_RECOGNITION_API_URL.to_string(),
            dimensions: DEFAULT_DIMENSIONS,
            default_threshold: DEFAULT_THRESHOLD,
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
            extract_timeout_secs: DEFAULT_EXTRACT_TIMEOUT_SECS,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            health_timeout_secs: DEFAULT_HEALTH_TIMEOUT_SECS,
        }
    }
}

fn default_recognition_api_url() -> String {
    DEFAULT_RECOGNITION_API_URL.to_string()
}

fn default_dimensions() -> usize {
    DEFAULT_DIMENSIONS
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

fn max_limit() -> usize {
    MAX_LIMIT
}

fn default_extract_timeout_secs() -> u64 {
    DEFAULT_EXTRACT_TIMEOUT_SECS
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_health_timeout_secs() -> u64 {
    DEFAULT_HEALTH_TIMEOUT_SECS
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Optional static API token required on every request when set
    #[serde(default)]
    pub api_token: Option<String>,

    #[serde(default = "task_queue_max_threads")]
    pub task_queue_max_threads: u16,

    #[serde(default)]
    pub recognition: RecognitionConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            api_token: None,
            task_queue_max_threads: TASK_QUEUE_MAX_THREADS,
            recognition: RecognitionConfig::default(),
            base_path: String::new(),
        }
    }
}

fn task_queue_max_threads() -> u16 {
    TASK_QUEUE_MAX_THREADS
}

fn default_bind_addr() -> String {
    DEFAULT_BIND_ADDR.to_string()
}

impl Config {
    fn validate(&mut self) {
        if self.task_queue_max_threads == 0 {
            self.task_queue_max_threads = 1
        }

        let rec = &self.recognition;
        if !(0.0..=1.0).contains(&rec.default_threshold) {
            panic!(
                "recognition.default_threshold must be between 0.0 and 1.0, got {}",
                rec.default_threshold
            );
        }

        if rec.dimensions == 0 {
            panic!("recognition.dimensions must be greater than 0");
        }

        if rec.default_limit == 0 || rec.max_limit == 0 {
            panic!("recognition.default_limit and recognition.max_limit must be greater than 0");
        }

        if rec.default_limit > rec.max_limit {
            panic!(
                "recognition.default_limit ({}) must not exceed recognition.max_limit ({})",
                rec.default_limit, rec.max_limit
            );
        }

        if rec.extract_timeout_secs == 0
            || rec.download_timeout_secs == 0
            || rec.health_timeout_secs == 0
        {
            panic!("recognition timeouts must be greater than 0");
        }

        if let Some(token) = &self.api_token {
            if token.is_empty() {
                panic!("api_token must not be empty when set");
            }
        }
    }

    pub fn load_with(base_path: &str) -> Self {
        let store = storage::BackendLocal::new(base_path).expect("cannot create data directory");

        // create new if does not exist
        if !store.exists("config.yaml") {
            store
                .write(
                    "config.yaml",
                    serde_yml::to_string(&Self::default()).unwrap().as_bytes(),
                )
                .expect("cannot write default config");
        }

        let config_str = String::from_utf8(store.read("config.yaml").expect("cannot read config"))
            .expect("config file is not valid utf8");
        let mut config: Self = serde_yml::from_str(&config_str).expect("config is malformed");

        config.base_path = base_path.to_string();

        config.validate();

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config).unwrap() {
            config.save();
        }

        config
    }

    pub fn save(&self) {
        let store =
            storage::BackendLocal::new(&self.base_path).expect("cannot create data directory");

        let config_str = serde_yml::to_string(&self).unwrap();
        if let Err(err) = store.write("config.yaml", config_str.as_bytes()) {
            log::error!("failed to save config: {err}");
        }
    }
}
