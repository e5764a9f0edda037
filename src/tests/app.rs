//! Application-layer tests: confidentiality enforcement, the ingestion
//! queue, backfill and the audit trail.

use crate::app::AppLocal;
use crate::audit::AuditQuery;
use crate::config::Config;
use crate::records::{MediaCreate, MediaQuery, MediaType, PersonCreate, PersonQuery, RecordStore};
use crate::roles::{CallerContext, UserRole};
use crate::tests::support::{temp_store, unit_vec, MockProvider, JPEG_STUB};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

fn admin() -> CallerContext {
    CallerContext::new(1, UserRole::AdminGeral)
}

fn regular() -> CallerContext {
    CallerContext::new(2, UserRole::Usuario)
}

fn test_app(provider: MockProvider) -> (AppLocal, Arc<dyn RecordStore>, tempfile::TempDir) {
    let (store, dir) = temp_store();
    let config = Arc::new(RwLock::new(Config::default()));
    let app = AppLocal::new(
        config,
        dir.path().to_str().unwrap(),
        store.clone(),
        Arc::new(provider),
    );
    (app, store, dir)
}

fn person(name: &str, confidential: bool) -> PersonCreate {
    PersonCreate {
        full_name: name.to_string(),
        is_confidential: confidential,
        ..Default::default()
    }
}

fn face_media(person_id: u64, url: &str) -> MediaCreate {
    MediaCreate {
        media_type: MediaType::Face,
        url: url.to_string(),
        label: None,
        description: None,
        person_id,
    }
}

/// Wait for the queue worker to attach an embedding, bounded at 5 seconds.
fn wait_for_embedding(store: &Arc<dyn RecordStore>, media_id: u64) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if store.media_get(media_id).unwrap().embedding.is_some() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}

#[test]
fn test_confidential_person_access() {
    let (app, _store, _dir) = test_app(MockProvider::failing());

    let p = app.create_person(person("Bruno Lima", true), &admin()).unwrap();

    // single-record access: 403 for unprivileged, ok for privileged
    assert!(app.get_person(p.id, &admin()).is_ok());
    assert!(matches!(
        app.get_person(p.id, &regular()),
        Err(crate::app::AppError::Forbidden(_))
    ));

    // list access: filtered, not an error
    let visible = app
        .search_people(PersonQuery::default(), &regular())
        .unwrap();
    assert!(visible.is_empty());
    let visible = app.search_people(PersonQuery::default(), &admin()).unwrap();
    assert_eq!(visible.len(), 1);
}

#[test]
fn test_confidential_media_access() {
    let (app, _store, _dir) = test_app(MockProvider::failing());

    let p = app.create_person(person("Bruno Lima", true), &admin()).unwrap();
    let m = app
        .create_media(face_media(p.id, "https://cdn.example/b.jpg"), &admin())
        .unwrap();

    assert!(matches!(
        app.get_media(m.id, &regular()),
        Err(crate::app::AppError::Forbidden(_))
    ));

    let listed = app.search_media(MediaQuery::default(), &regular()).unwrap();
    assert!(listed.is_empty());

    // an unprivileged caller cannot attach media to a confidential person
    assert!(matches!(
        app.create_media(face_media(p.id, "https://cdn.example/c.jpg"), &regular()),
        Err(crate::app::AppError::Forbidden(_))
    ));
}

#[test]
fn test_media_url_validated() {
    let (app, _store, _dir) = test_app(MockProvider::failing());

    let p = app.create_person(person("Ana Souza", false), &admin()).unwrap();
    let result = app.create_media(face_media(p.id, "not a url"), &admin());
    assert!(matches!(result, Err(crate::app::AppError::Validation(_))));
}

#[test]
fn test_face_media_creation_attaches_embedding_async() {
    let url = "https://cdn.example/new-face.jpg";
    let provider = MockProvider::failing().with_url(url, unit_vec(3));
    let (mut app, store, _dir) = test_app(provider);
    app.run_queue();

    let p = app.create_person(person("Ana Souza", false), &admin()).unwrap();
    let m = app.create_media(face_media(p.id, url), &admin()).unwrap();

    // creation returns immediately, without an embedding
    assert!(m.embedding.is_none());

    assert!(wait_for_embedding(&store, m.id), "embedding never attached");
    assert_eq!(store.media_get(m.id).unwrap().embedding, Some(unit_vec(3)));

    app.shutdown();
    app.wait_task_queue_finish();
}

/// Scenario D (ingestion half): extraction failure leaves the media row in
/// place with no embedding, and creation itself never errors.
#[test]
fn test_face_media_creation_survives_extraction_failure() {
    let (mut app, store, _dir) = test_app(MockProvider::failing());
    app.run_queue();

    let p = app.create_person(person("Ana Souza", false), &admin()).unwrap();
    let m = app
        .create_media(face_media(p.id, "https://cdn.example/unreachable.jpg"), &admin())
        .unwrap();

    app.shutdown();
    app.wait_task_queue_finish();

    let row = store.media_get(m.id).unwrap();
    assert!(row.embedding.is_none());
}

#[test]
fn test_non_face_media_not_enqueued() {
    let (mut app, store, _dir) = test_app(MockProvider::failing());
    app.run_queue();

    let p = app.create_person(person("Ana Souza", false), &admin()).unwrap();
    let m = app
        .create_media(
            MediaCreate {
                media_type: MediaType::Tattoo,
                url: "https://cdn.example/t.jpg".to_string(),
                label: None,
                description: None,
                person_id: p.id,
            },
            &admin(),
        )
        .unwrap();

    app.shutdown();
    app.wait_task_queue_finish();

    assert!(store.media_get(m.id).unwrap().embedding.is_none());
}

#[test]
fn test_backfill_queues_missing_embeddings() {
    let url_a = "https://cdn.example/a.jpg";
    let url_b = "https://cdn.example/b.jpg";
    let provider = MockProvider::failing()
        .with_url(url_a, unit_vec(1))
        .with_url(url_b, unit_vec(2));
    let (mut app, store, _dir) = test_app(provider);

    // created before the queue runs: stays without an embedding
    let p = app.create_person(person("Ana Souza", false), &admin()).unwrap();
    let ma = app.create_media(face_media(p.id, url_a), &admin()).unwrap();
    let mb = app.create_media(face_media(p.id, url_b), &admin()).unwrap();
    assert!(store.media_get(ma.id).unwrap().embedding.is_none());

    app.run_queue();
    let queued = app.backfill_embeddings().unwrap();
    assert_eq!(queued, 2);

    assert!(wait_for_embedding(&store, ma.id));
    assert!(wait_for_embedding(&store, mb.id));

    // nothing left to backfill
    let queued = app.backfill_embeddings().unwrap();
    assert_eq!(queued, 0);

    app.shutdown();
    app.wait_task_queue_finish();
}

#[test]
fn test_interrupted_tasks_requeued_on_start() {
    use crate::app::task_runner::{self, Status, Task};

    let url = "https://cdn.example/interrupted.jpg";
    let provider = MockProvider::failing().with_url(url, unit_vec(5));
    let (mut app, store, dir) = test_app(provider);

    // created while the queue is down: row stays without an embedding
    let p = app.create_person(person("Ana Souza", false), &admin()).unwrap();
    let m = app.create_media(face_media(p.id, url), &admin()).unwrap();
    assert!(store.media_get(m.id).unwrap().embedding.is_none());

    // a task left behind by a previous daemon run
    task_runner::save_task(
        dir.path().to_str().unwrap(),
        Task::ExtractEmbedding { media_id: m.id },
        Status::Interrupted,
    );

    app.run_queue();
    assert!(wait_for_embedding(&store, m.id), "interrupted task not re-run");

    app.shutdown();
    app.wait_task_queue_finish();
}

#[test]
fn test_audit_trail_records_operations() {
    let (app, _store, _dir) = test_app(MockProvider::returning(unit_vec(0)));

    let p = app.create_person(person("Ana Souza", false), &admin()).unwrap();
    app.create_media(face_media(p.id, "https://cdn.example/a.jpg"), &admin())
        .unwrap();
    app.search_by_face(JPEG_STUB, Default::default(), &regular())
        .unwrap();

    let entries = app.audit_list(AuditQuery::default()).unwrap();
    let actions: Vec<&str> = entries.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(
        actions,
        vec!["person.search_by_face", "media.create", "person.create"]
    );

    // face search is attributed to the caller who ran it
    assert_eq!(entries[0].user_id, regular().user_id);
    assert_eq!(entries[0].entity_id, None);
}

#[test]
fn test_queue_dump_exposed() {
    let (mut app, _store, _dir) = test_app(MockProvider::failing());
    app.run_queue();

    let p = app.create_person(person("Ana Souza", false), &admin()).unwrap();
    app.create_media(face_media(p.id, "https://cdn.example/a.jpg"), &admin())
        .unwrap();

    app.shutdown();
    app.wait_task_queue_finish();

    // tasks hang around for a short while after completion, so the dump may
    // show the finished task or already be empty; it must always parse
    let dump = app.queue_dump();
    assert!(dump.now > 0);
}
