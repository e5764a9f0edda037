//! Application facade tying the record store, the recognition pipeline,
//! the audit trail and the ingestion queue together. Every operation takes
//! the caller's context; confidentiality is enforced here for single-record
//! access (403) and by filtering for list and search operations.

use crate::{
    audit::{AuditEntry, AuditLog, AuditQuery},
    config::Config,
    records::{
        BackendJson, Media, MediaCreate, MediaQuery, MediaType, Person, PersonCreate,
        PersonQuery, PersonUpdate, RecordStore,
    },
    recognition::{EmbeddingClient, EmbeddingProvider, FaceMatch, FaceSearchService, SearchParams},
    roles::CallerContext,
    storage::BackendLocal,
};

use super::errors::AppError;
use super::task_runner::{self, QueueDump, Status, Task};
use std::sync::{mpsc, Arc, RwLock};

pub struct AppLocal {
    store: Arc<dyn RecordStore>,
    provider: Arc<dyn EmbeddingProvider>,
    face_search: FaceSearchService,
    audit: AuditLog,

    task_tx: Option<Arc<mpsc::Sender<Task>>>,
    task_queue_handle: Option<std::thread::JoinHandle<()>>,

    config: Arc<RwLock<Config>>,
    base_path: String,
}

impl AppLocal {
    /// Open the default file-backed store and the HTTP embedding client.
    pub fn open(config: Arc<RwLock<Config>>, base_path: &str) -> Result<Self, AppError> {
        let storage = BackendLocal::new(base_path)?;
        let store: Arc<dyn RecordStore> = Arc::new(
            BackendJson::load(Arc::new(storage)).map_err(AppError::from)?,
        );

        let recognition_config = config.read().unwrap().recognition.clone();
        let provider: Arc<dyn EmbeddingProvider> =
            Arc::new(EmbeddingClient::new(&recognition_config));

        Ok(Self::new(config, base_path, store, provider))
    }

    /// Wire an explicit store and embedding provider (tests inject mocks).
    pub fn new(
        config: Arc<RwLock<Config>>,
        base_path: &str,
        store: Arc<dyn RecordStore>,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let recognition_config = config.read().unwrap().recognition.clone();
        let face_search =
            FaceSearchService::new(provider.clone(), store.clone(), recognition_config);

        Self {
            store,
            provider,
            face_search,
            audit: AuditLog::new(base_path),
            task_tx: None,
            task_queue_handle: None,
            config,
            base_path: base_path.to_string(),
        }
    }

    pub fn run_queue(&mut self) {
        let (task_tx, task_rx) = mpsc::channel::<Task>();

        let handle = std::thread::spawn({
            let store = self.store.clone();
            let provider = self.provider.clone();
            let config = self.config.clone();
            let base_path = self.base_path.clone();

            let mut queue_dump = task_runner::read_queue_dump(&base_path);
            let task_list = queue_dump.queue.clone();

            queue_dump.queue = Vec::new();
            task_runner::write_queue_dump(&base_path, &queue_dump);

            std::thread::spawn({
                let task_tx = task_tx.clone();

                move || {
                    for task in task_list {
                        if let Status::Done = task.status {
                            continue;
                        }

                        log::info!("restarting interrupted task \"{:?}\"", task.task);
                        if let Err(err) = task_tx.send(task.task) {
                            log::error!("failed to initialize interrupted task: {err:?}");
                        }
                    }
                }
            });

            move || task_runner::start_queue(task_rx, store, provider, config, base_path)
        });

        self.task_queue_handle = Some(handle);
        self.task_tx = Some(Arc::new(task_tx));
    }

    pub fn shutdown(&self) {
        if let Some(task_tx) = self.task_tx.as_ref() {
            if let Err(err) = task_tx.send(Task::Shutdown) {
                log::error!("failed to send shutdown to task queue: {err:?}");
            }
        }
    }

    pub fn wait_task_queue_finish(&mut self) {
        if let Some(handle) = self.task_queue_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn config(&self) -> Arc<RwLock<Config>> {
        self.config.clone()
    }

    pub fn queue_dump(&self) -> QueueDump {
        task_runner::read_queue_dump(&self.base_path)
    }

    // --- people ---

    pub fn create_person(
        &self,
        create: PersonCreate,
        caller: &CallerContext,
    ) -> Result<Person, AppError> {
        let person = self.store.person_create(create, caller.user_id)?;
        self.audit
            .record("person.create", "Person", Some(person.id), caller.user_id);
        Ok(person)
    }

    pub fn search_people(
        &self,
        query: PersonQuery,
        caller: &CallerContext,
    ) -> Result<Vec<Person>, AppError> {
        let mut people = self.store.person_search(query)?;

        if !caller.role.can_view_confidential() {
            people.retain(|p| !p.is_confidential);
        }

        Ok(people)
    }

    pub fn get_person(&self, id: u64, caller: &CallerContext) -> Result<Person, AppError> {
        let person = self.store.person_get(id)?;
        self.check_confidential_access(&person, caller)?;
        Ok(person)
    }

    pub fn update_person(
        &self,
        id: u64,
        update: PersonUpdate,
        caller: &CallerContext,
    ) -> Result<Person, AppError> {
        // access check first: confidential rows must 403, not leak via 409
        self.get_person(id, caller)?;

        let person = self.store.person_update(id, update, caller.user_id)?;
        self.audit
            .record("person.update", "Person", Some(id), caller.user_id);
        Ok(person)
    }

    pub fn delete_person(&self, id: u64, caller: &CallerContext) -> Result<(), AppError> {
        self.get_person(id, caller)?;

        self.store.person_delete(id)?;
        self.audit
            .record("person.delete", "Person", Some(id), caller.user_id);
        Ok(())
    }

    // --- media ---

    pub fn create_media(
        &self,
        create: MediaCreate,
        caller: &CallerContext,
    ) -> Result<Media, AppError> {
        self.check_access_to_person(create.person_id, caller)?;

        url::Url::parse(&create.url)
            .map_err(|err| AppError::Validation(format!("invalid media url: {err}")))?;

        let media = self.store.media_create(create)?;

        if media.media_type == MediaType::Face {
            self.on_face_media_created(media.id);
        }

        self.audit
            .record("media.create", "Media", Some(media.id), caller.user_id);

        Ok(media)
    }

    /// Fire-and-forget hook: enqueue embedding extraction for a new FACE
    /// row. The creation has already committed; enqueue failures are logged
    /// and swallowed.
    pub fn on_face_media_created(&self, media_id: u64) {
        let Some(task_tx) = self.task_tx.as_ref() else {
            log::warn!("task queue not running; media {media_id} will need a backfill");
            return;
        };

        if let Err(err) = task_tx.send(Task::ExtractEmbedding { media_id }) {
            log::error!("failed to enqueue embedding extraction for media {media_id}: {err:?}");
        }
    }

    pub fn search_media(
        &self,
        query: MediaQuery,
        caller: &CallerContext,
    ) -> Result<Vec<Media>, AppError> {
        let media = self.store.media_search(query)?;

        if caller.role.can_view_confidential() {
            return Ok(media);
        }

        let mut visible = Vec::with_capacity(media.len());
        for row in media {
            match self.store.person_get(row.person_id) {
                Ok(person) if !person.is_confidential => visible.push(row),
                Ok(_) => {}
                Err(err) => {
                    log::warn!("media {} references missing person: {err}", row.id);
                }
            }
        }

        Ok(visible)
    }

    pub fn get_media(&self, id: u64, caller: &CallerContext) -> Result<Media, AppError> {
        let media = self.store.media_get(id)?;

        let person = self.store.person_get(media.person_id)?;
        if person.is_confidential && !caller.role.can_view_confidential() {
            return Err(AppError::Forbidden(
                "you do not have permission to access this media".to_string(),
            ));
        }

        Ok(media)
    }

    pub fn delete_media(&self, id: u64, caller: &CallerContext) -> Result<(), AppError> {
        self.get_media(id, caller)?;

        self.store.media_delete(id)?;
        self.audit
            .record("media.delete", "Media", Some(id), caller.user_id);
        Ok(())
    }

    // --- face search ---

    pub fn search_by_face(
        &self,
        image: &[u8],
        params: SearchParams,
        caller: &CallerContext,
    ) -> Result<Vec<FaceMatch>, AppError> {
        let results = self.face_search.search_by_face(image, params, caller)?;

        self.audit
            .record("person.search_by_face", "Person", None, caller.user_id);

        Ok(results)
    }

    pub fn embedding_service_available(&self) -> bool {
        self.face_search.embedding_service_available()
    }

    /// Re-enqueue extraction for every FACE row without an embedding.
    /// Returns how many rows were queued.
    pub fn backfill_embeddings(&self) -> Result<usize, AppError> {
        let media = self.store.media_search(MediaQuery {
            media_type: Some(MediaType::Face),
            ..Default::default()
        })?;

        let mut queued = 0;
        for row in media {
            if row.embedding.is_none() {
                self.on_face_media_created(row.id);
                queued += 1;
            }
        }

        log::info!("backfill queued {queued} media rows");
        Ok(queued)
    }

    // --- audit ---

    pub fn audit_list(&self, query: AuditQuery) -> Result<Vec<AuditEntry>, AppError> {
        Ok(self.audit.list(query)?)
    }

    // --- helpers ---

    fn check_confidential_access(
        &self,
        person: &Person,
        caller: &CallerContext,
    ) -> Result<(), AppError> {
        if person.is_confidential && !caller.role.can_view_confidential() {
            return Err(AppError::Forbidden(
                "you do not have permission to access this confidential record".to_string(),
            ));
        }
        Ok(())
    }

    fn check_access_to_person(&self, person_id: u64, caller: &CallerContext) -> Result<(), AppError> {
        let person = self.store.person_get(person_id)?;
        self.check_confidential_access(&person, caller)
    }
}
