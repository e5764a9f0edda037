//! Person and media records, the store seam, and the typed filter
//! specification used by face search.
//!
//! The store keeps its whole state in memory behind a `RwLock` and persists
//! it as JSON through the atomic-write storage backend on every mutation.

use crate::roles::CallerContext;
use crate::storage::StorageManager;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

const RECORDS_FILE: &str = "records.json";

#[derive(Debug, Clone, Eq, Default, Serialize, Deserialize)]
pub struct Person {
    pub id: u64,

    pub full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    /// Taxpayer id; unique across people when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voter_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub mother_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub father_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub warrant_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(default)]
    pub is_confidential: bool,

    pub created_by: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_by: Option<u64>,
    pub created_at: String,
    pub updated_at: String,
}

impl std::hash::Hash for Person {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state)
    }
}

impl PartialEq for Person {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PersonCreate {
    pub full_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voter_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mother_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub father_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warrant_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default)]
    pub is_confidential: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PersonUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rg: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voter_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mother_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub father_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warrant_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_confidential: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PersonQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpf: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mother_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_confidential: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<u64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MediaType {
    Face,
    FullBody,
    Tattoo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub id: u64,
    pub media_type: MediaType,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub person_id: u64,
    pub created_at: String,

    /// Feature vector extracted from the photo; present only for FACE rows
    /// whose extraction succeeded. Rows without it never appear in search.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MediaCreate {
    pub media_type: MediaType,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub person_id: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MediaQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub person_id: Option<u64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

/// One FACE row eligible for similarity ranking.
#[derive(Debug, Clone)]
pub struct FaceCandidate {
    pub person: Person,
    pub media_id: u64,
    pub url: String,
    pub embedding: Vec<f32>,
}

/// A single typed condition on a (person, media) pair.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    MediaType(MediaType),
    HasEmbedding,
    /// `false` restricts to non-confidential people; `true` is a no-op.
    ConfidentialAllowed(bool),
}

/// Ordered, conjunctive filter passed to the store's candidate query.
///
/// Keeps the similarity index decoupled from any storage query language:
/// the store evaluates predicates, the index only ranks what survives.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSpec {
    predicates: Vec<Predicate>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// The canonical face-search filter: FACE rows with embeddings,
    /// confidential people visible only to privileged callers.
    pub fn face_search(caller: &CallerContext) -> Self {
        Self::new()
            .with(Predicate::MediaType(MediaType::Face))
            .with(Predicate::HasEmbedding)
            .with(Predicate::ConfidentialAllowed(
                caller.role.can_view_confidential(),
            ))
    }

    pub fn matches(&self, person: &Person, media: &Media) -> bool {
        self.predicates.iter().all(|p| match p {
            Predicate::MediaType(t) => media.media_type == *t,
            Predicate::HasEmbedding => media.embedding.is_some(),
            Predicate::ConfidentialAllowed(allowed) => *allowed || !person.is_confidential,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Invalid(String),

    #[error("io error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("store data is corrupt: {0}")]
    Corrupt(String),
}

pub trait RecordStore: Send + Sync {
    fn person_create(&self, create: PersonCreate, created_by: u64) -> Result<Person, StoreError>;
    fn person_get(&self, id: u64) -> Result<Person, StoreError>;
    fn person_search(&self, query: PersonQuery) -> Result<Vec<Person>, StoreError>;
    fn person_update(
        &self,
        id: u64,
        update: PersonUpdate,
        updated_by: u64,
    ) -> Result<Person, StoreError>;
    fn person_delete(&self, id: u64) -> Result<(), StoreError>;

    fn media_create(&self, create: MediaCreate) -> Result<Media, StoreError>;
    fn media_get(&self, id: u64) -> Result<Media, StoreError>;
    fn media_search(&self, query: MediaQuery) -> Result<Vec<Media>, StoreError>;
    fn media_delete(&self, id: u64) -> Result<(), StoreError>;

    /// Attach an extracted feature vector to a media row. Write-once in
    /// practice: only the ingest worker calls this, once per row.
    fn set_media_embedding(&self, media_id: u64, embedding: Vec<f32>) -> Result<(), StoreError>;

    /// All (person, FACE media) rows surviving the filter, for ranking.
    fn face_candidates(&self, filter: &FilterSpec) -> Result<Vec<FaceCandidate>, StoreError>;
}

/// Lowercased, whitespace-collapsed form used for the duplicate-identity
/// check on (full name, mother name).
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct State {
    people: Vec<Person>,
    media: Vec<Media>,
    next_person_id: u64,
    next_media_id: u64,
}

/// File-backed record store. The in-memory state is authoritative; every
/// mutation rewrites records.json through the atomic storage backend.
pub struct BackendJson {
    state: RwLock<State>,
    storage: Arc<dyn StorageManager>,
}

impl BackendJson {
    pub fn load(storage: Arc<dyn StorageManager>) -> Result<Self, StoreError> {
        let state = if storage.exists(RECORDS_FILE) {
            let data = storage.read(RECORDS_FILE)?;
            serde_json::from_slice(&data).map_err(|e| StoreError::Corrupt(e.to_string()))?
        } else {
            State {
                next_person_id: 1,
                next_media_id: 1,
                ..Default::default()
            }
        };

        Ok(Self {
            state: RwLock::new(state),
            storage,
        })
    }

    fn persist(&self, state: &State) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(state)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        self.storage.write(RECORDS_FILE, &data)?;
        Ok(())
    }

    fn now() -> String {
        chrono::Utc::now().to_rfc3339()
    }

    /// Duplicate-identity checks: CPF is unique; so is the normalized
    /// (full name, mother name) pair when both are present.
    fn check_uniqueness(
        state: &State,
        cpf: Option<&str>,
        full_name: &str,
        mother_name: Option<&str>,
        exclude_id: Option<u64>,
    ) -> Result<(), StoreError> {
        if let Some(cpf) = cpf {
            if state
                .people
                .iter()
                .any(|p| Some(p.id) != exclude_id && p.cpf.as_deref() == Some(cpf))
            {
                return Err(StoreError::Conflict("cpf already registered".to_string()));
            }
        }

        if let Some(mother) = mother_name {
            let name_key = normalize_name(full_name);
            let mother_key = normalize_name(mother);
            if state.people.iter().any(|p| {
                Some(p.id) != exclude_id
                    && normalize_name(&p.full_name) == name_key
                    && p.mother_name.as_deref().map(normalize_name) == Some(mother_key.clone())
            }) {
                return Err(StoreError::Conflict(
                    "person with this full name and mother name already registered".to_string(),
                ));
            }
        }

        Ok(())
    }

    fn lock_write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl RecordStore for BackendJson {
    fn person_create(&self, create: PersonCreate, created_by: u64) -> Result<Person, StoreError> {
        if create.full_name.trim().is_empty() {
            return Err(StoreError::Invalid("full_name must not be empty".to_string()));
        }

        let mut state = self.lock_write();

        Self::check_uniqueness(
            &state,
            create.cpf.as_deref(),
            &create.full_name,
            create.mother_name.as_deref(),
            None,
        )?;

        let now = Self::now();
        let person = Person {
            id: state.next_person_id,
            full_name: create.full_name,
            nickname: create.nickname,
            cpf: create.cpf,
            rg: create.rg,
            voter_id: create.voter_id,
            mother_name: create.mother_name,
            father_name: create.father_name,
            warrant_status: create.warrant_status,
            notes: create.notes,
            is_confidential: create.is_confidential,
            created_by,
            updated_by: None,
            created_at: now.clone(),
            updated_at: now,
        };

        state.next_person_id += 1;
        state.people.push(person.clone());
        self.persist(&state)?;

        Ok(person)
    }

    fn person_get(&self, id: u64) -> Result<Person, StoreError> {
        self.lock_read()
            .people
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn person_search(&self, query: PersonQuery) -> Result<Vec<Person>, StoreError> {
        let state = self.lock_read();

        let mut results: Vec<Person> = state
            .people
            .iter()
            .filter(|p| {
                query.full_name.as_ref().map_or(true, |needle| {
                    p.full_name.to_lowercase().contains(&needle.to_lowercase())
                }) && query.nickname.as_ref().map_or(true, |needle| {
                    p.nickname
                        .as_ref()
                        .map_or(false, |n| n.to_lowercase().contains(&needle.to_lowercase()))
                }) && query
                    .cpf
                    .as_ref()
                    .map_or(true, |cpf| p.cpf.as_deref() == Some(cpf.as_str()))
                    && query.mother_name.as_ref().map_or(true, |needle| {
                        p.mother_name
                            .as_ref()
                            .map_or(false, |m| m.to_lowercase().contains(&needle.to_lowercase()))
                    })
                    && query
                        .is_confidential
                        .map_or(true, |c| p.is_confidential == c)
                    && query.created_by.map_or(true, |u| p.created_by == u)
            })
            .cloned()
            .collect();

        // newest first
        results.sort_by(|a, b| b.id.cmp(&a.id));

        if let Some(limit) = query.limit {
            results.truncate(limit);
        }

        Ok(results)
    }

    fn person_update(
        &self,
        id: u64,
        update: PersonUpdate,
        updated_by: u64,
    ) -> Result<Person, StoreError> {
        let mut state = self.lock_write();

        let current = state
            .people
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or(StoreError::NotFound)?;

        let full_name = update.full_name.clone().unwrap_or(current.full_name);
        let cpf = update.cpf.clone().or(current.cpf);
        let mother_name = update.mother_name.clone().or(current.mother_name);

        Self::check_uniqueness(
            &state,
            cpf.as_deref(),
            &full_name,
            mother_name.as_deref(),
            Some(id),
        )?;

        let person = state
            .people
            .iter_mut()
            .find(|p| p.id == id)
            .expect("row existed under the same write guard");

        person.full_name = full_name;
        person.cpf = cpf;
        person.mother_name = mother_name;
        if let Some(nickname) = update.nickname {
            person.nickname = Some(nickname);
        }
        if let Some(rg) = update.rg {
            person.rg = Some(rg);
        }
        if let Some(voter_id) = update.voter_id {
            person.voter_id = Some(voter_id);
        }
        if let Some(father_name) = update.father_name {
            person.father_name = Some(father_name);
        }
        if let Some(warrant_status) = update.warrant_status {
            person.warrant_status = Some(warrant_status);
        }
        if let Some(notes) = update.notes {
            person.notes = Some(notes);
        }
        if let Some(is_confidential) = update.is_confidential {
            person.is_confidential = is_confidential;
        }
        person.updated_by = Some(updated_by);
        person.updated_at = Self::now();

        let person = person.clone();
        self.persist(&state)?;

        Ok(person)
    }

    fn person_delete(&self, id: u64) -> Result<(), StoreError> {
        let mut state = self.lock_write();

        let before = state.people.len();
        state.people.retain(|p| p.id != id);
        if state.people.len() == before {
            return Err(StoreError::NotFound);
        }

        // media rows belong to exactly one person; cascade
        state.media.retain(|m| m.person_id != id);

        self.persist(&state)
    }

    fn media_create(&self, create: MediaCreate) -> Result<Media, StoreError> {
        let mut state = self.lock_write();

        if !state.people.iter().any(|p| p.id == create.person_id) {
            return Err(StoreError::NotFound);
        }

        let media = Media {
            id: state.next_media_id,
            media_type: create.media_type,
            url: create.url,
            label: create.label,
            description: create.description,
            person_id: create.person_id,
            created_at: Self::now(),
            embedding: None,
        };

        state.next_media_id += 1;
        state.media.push(media.clone());
        self.persist(&state)?;

        Ok(media)
    }

    fn media_get(&self, id: u64) -> Result<Media, StoreError> {
        self.lock_read()
            .media
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn media_search(&self, query: MediaQuery) -> Result<Vec<Media>, StoreError> {
        let state = self.lock_read();

        let mut results: Vec<Media> = state
            .media
            .iter()
            .filter(|m| {
                query.media_type.map_or(true, |t| m.media_type == t)
                    && query.person_id.map_or(true, |p| m.person_id == p)
            })
            .cloned()
            .collect();

        results.sort_by(|a, b| b.id.cmp(&a.id));

        if let Some(limit) = query.limit {
            results.truncate(limit);
        }

        Ok(results)
    }

    fn media_delete(&self, id: u64) -> Result<(), StoreError> {
        let mut state = self.lock_write();

        let before = state.media.len();
        state.media.retain(|m| m.id != id);
        if state.media.len() == before {
            return Err(StoreError::NotFound);
        }

        self.persist(&state)
    }

    fn set_media_embedding(&self, media_id: u64, embedding: Vec<f32>) -> Result<(), StoreError> {
        if embedding.is_empty() {
            return Err(StoreError::Invalid("embedding must not be empty".to_string()));
        }

        let mut state = self.lock_write();

        let media = state
            .media
            .iter_mut()
            .find(|m| m.id == media_id)
            .ok_or(StoreError::NotFound)?;

        media.embedding = Some(embedding);

        self.persist(&state)
    }

    fn face_candidates(&self, filter: &FilterSpec) -> Result<Vec<FaceCandidate>, StoreError> {
        let state = self.lock_read();

        let mut candidates = Vec::new();
        for media in &state.media {
            let Some(person) = state.people.iter().find(|p| p.id == media.person_id) else {
                log::warn!("media {} references missing person {}", media.id, media.person_id);
                continue;
            };

            if !filter.matches(person, media) {
                continue;
            }

            let Some(embedding) = media.embedding.clone() else {
                continue;
            };

            candidates.push(FaceCandidate {
                person: person.clone(),
                media_id: media.id,
                url: media.url.clone(),
                embedding,
            });
        }

        Ok(candidates)
    }
}
