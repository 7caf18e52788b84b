//! Sync dispatcher behavior: namespace whitelisting, payload shaping,
//! watermark resumption, and the re-login path.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use hubgraph::error::PushError;
use hubgraph::models::{
    ChangeRecord, Connection, Dictionary, DictionaryValue, Entity, EntityKind, Property,
    PropertyKind, RelationType, SyncFilters, SyncSettings, Template,
};
use hubgraph::store::memory::MemoryStore;
use hubgraph::store::Store;
use hubgraph::sync::{CancelToken, PushTransport, SyncBody, SyncWorker};

/// Records pushes; optionally fails any request whose body mentions a
/// marker string.
#[derive(Default)]
struct MockTransport {
    posts: Mutex<Vec<SyncBody>>,
    deletes: Mutex<Vec<SyncBody>>,
    logins: Mutex<Vec<(String, String)>>,
    fail_on: Mutex<Option<(String, u16)>>,
    fail_login: Mutex<bool>,
}

impl MockTransport {
    fn posts(&self) -> Vec<SyncBody> {
        self.posts.lock().unwrap().clone()
    }

    fn deletes(&self) -> Vec<SyncBody> {
        self.deletes.lock().unwrap().clone()
    }

    fn logins(&self) -> Vec<(String, String)> {
        self.logins.lock().unwrap().clone()
    }

    fn fail_on(&self, marker: &str, status: u16) {
        *self.fail_on.lock().unwrap() = Some((marker.to_string(), status));
    }

    fn clear_failure(&self) {
        *self.fail_on.lock().unwrap() = None;
    }

    fn check(&self, url: &str, body: &SyncBody) -> Result<(), PushError> {
        if let Some((marker, status)) = self.fail_on.lock().unwrap().clone() {
            if body.data.to_string().contains(&marker) {
                return Err(PushError::Status {
                    url: url.to_string(),
                    status,
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl PushTransport for MockTransport {
    async fn post(&self, url: &str, body: &SyncBody) -> Result<(), PushError> {
        self.check(url, body)?;
        self.posts.lock().unwrap().push(body.clone());
        Ok(())
    }

    async fn delete(&self, url: &str, body: &SyncBody) -> Result<(), PushError> {
        self.check(url, body)?;
        self.deletes.lock().unwrap().push(body.clone());
        Ok(())
    }

    async fn login(&self, url: &str, username: &str, password: &str) -> Result<(), PushError> {
        if *self.fail_login.lock().unwrap() {
            return Err(PushError::Status {
                url: url.to_string(),
                status: 401,
            });
        }
        self.logins
            .lock()
            .unwrap()
            .push((username.to_string(), password.to_string()));
        Ok(())
    }
}

fn target(filters: SyncFilters) -> SyncSettings {
    SyncSettings {
        url: "http://peer".to_string(),
        active: true,
        username: None,
        password: None,
        config: filters,
    }
}

fn change(timestamp: i64, namespace: &str, record_id: &str) -> ChangeRecord {
    ChangeRecord {
        timestamp,
        namespace: namespace.to_string(),
        record_id: record_id.to_string(),
        deleted: false,
    }
}

fn tombstone(timestamp: i64, namespace: &str, record_id: &str) -> ChangeRecord {
    ChangeRecord {
        deleted: true,
        ..change(timestamp, namespace, record_id)
    }
}

fn connection(id: &str, entity: &str, template: Option<&str>) -> Connection {
    Connection {
        id: id.to_string(),
        entity: entity.to_string(),
        hub: "h1".to_string(),
        template: template.map(str::to_string),
        range: None,
        filename: None,
        language: "en".to_string(),
    }
}

fn entity(id: &str, shared_id: &str, template: Option<&str>) -> Entity {
    Entity {
        id: id.to_string(),
        shared_id: shared_id.to_string(),
        language: "en".to_string(),
        title: shared_id.to_string(),
        kind: EntityKind::Entity,
        template: template.map(str::to_string),
        published: Some(true),
        creation_date: 0,
        file: None,
        metadata: BTreeMap::new(),
    }
}

/// Template t1: a plain text property, a select backed by dict1, and a
/// relationship property backed by rel1.
fn seed_schema(store: &MemoryStore) {
    store.seed_template(Template {
        id: "t1".to_string(),
        name: "Case".to_string(),
        properties: vec![
            Property {
                id: "p-text".to_string(),
                name: "summary".to_string(),
                kind: PropertyKind::Text,
                content: None,
            },
            Property {
                id: "p-sel".to_string(),
                name: "issue".to_string(),
                kind: PropertyKind::Select,
                content: Some("dict1".to_string()),
            },
            Property {
                id: "p-rel".to_string(),
                name: "related".to_string(),
                kind: PropertyKind::Relationship,
                content: Some("rel1".to_string()),
            },
        ],
    });
    store.seed_template(Template {
        id: "t2".to_string(),
        name: "Other".to_string(),
        properties: vec![],
    });
    store.seed_dictionary(Dictionary {
        id: "dict1".to_string(),
        name: "Issues".to_string(),
        values: vec![DictionaryValue {
            id: "v1".to_string(),
            label: "Torture".to_string(),
        }],
    });
    store.seed_relation_type(RelationType {
        id: "rel1".to_string(),
        name: "Related".to_string(),
    });
    store.seed_relation_type(RelationType {
        id: "rel2".to_string(),
        name: "Listed".to_string(),
    });
}

fn whitelist_t1_full() -> SyncFilters {
    let mut templates = BTreeMap::new();
    templates.insert(
        "t1".to_string(),
        vec!["p-sel".to_string(), "p-rel".to_string()],
    );
    SyncFilters {
        templates,
        relationtypes: vec!["rel2".to_string()],
    }
}

#[tokio::test]
async fn test_non_syncable_namespaces_never_leave() {
    let store = Arc::new(MemoryStore::new());
    store.seed_change(change(1, "migrations", "m1"));
    store.seed_change(change(2, "settings", "s1"));
    store.seed_change(change(3, "sessions", "x1"));
    store.seed_change(tombstone(4, "migrations", "m2"));
    let transport = Arc::new(MockTransport::default());
    let worker = SyncWorker::new(store.clone(), transport.clone());

    worker.synchronize(&target(SyncFilters::default())).await.unwrap();

    assert!(transport.posts().is_empty());
    assert!(transport.deletes().is_empty());
    // Skipped records still advance the watermark
    assert_eq!(store.sync_cursor().await.unwrap(), Some(4));
}

#[tokio::test]
async fn test_template_leaves_with_pruned_properties() {
    let store = Arc::new(MemoryStore::new());
    seed_schema(&store);
    store.seed_change(change(1, "templates", "t1"));
    store.seed_change(change(2, "templates", "t2"));
    let transport = Arc::new(MockTransport::default());
    let worker = SyncWorker::new(store, transport.clone());

    worker.synchronize(&target(whitelist_t1_full())).await.unwrap();

    let posts = transport.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].namespace, "templates");
    let properties = posts[0].data["properties"].as_array().unwrap();
    let ids: Vec<&str> = properties
        .iter()
        .map(|p| p["_id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["p-sel", "p-rel"]);
}

#[tokio::test]
async fn test_empty_property_whitelist_syncs_the_bare_template_only() {
    let store = Arc::new(MemoryStore::new());
    seed_schema(&store);
    store.seed_change(change(1, "templates", "t1"));
    store.seed_change(change(2, "dictionaries", "dict1"));
    store.seed_change(change(3, "relationtypes", "rel1"));
    let transport = Arc::new(MockTransport::default());
    let worker = SyncWorker::new(store, transport.clone());

    let mut templates = BTreeMap::new();
    templates.insert("t1".to_string(), vec![]);
    let filters = SyncFilters {
        templates,
        relationtypes: vec![],
    };
    worker.synchronize(&target(filters)).await.unwrap();

    let posts = transport.posts();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].namespace, "templates");
    assert!(posts[0].data["properties"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_dictionary_and_relation_type_sync_when_referenced() {
    let store = Arc::new(MemoryStore::new());
    seed_schema(&store);
    store.seed_change(change(1, "dictionaries", "dict1"));
    store.seed_change(change(2, "relationtypes", "rel1"));
    store.seed_change(change(3, "relationtypes", "rel2"));
    let transport = Arc::new(MockTransport::default());
    let worker = SyncWorker::new(store, transport.clone());

    worker.synchronize(&target(whitelist_t1_full())).await.unwrap();

    let posts = transport.posts();
    // dict1 through the whitelisted select, rel1 through the relationship
    // property, rel2 through the explicit list
    assert_eq!(posts.len(), 3);
    let namespaces: Vec<&str> = posts.iter().map(|p| p.namespace.as_str()).collect();
    assert_eq!(
        namespaces,
        vec!["dictionaries", "relationtypes", "relationtypes"]
    );
}

#[tokio::test]
async fn test_entity_metadata_is_pruned_to_whitelisted_properties() {
    let store = Arc::new(MemoryStore::new());
    seed_schema(&store);
    let mut e1 = entity("e1-en", "e1", Some("t1"));
    e1.metadata
        .insert("summary".to_string(), vec!["secret text".to_string()]);
    e1.metadata.insert("issue".to_string(), vec!["v1".to_string()]);
    store.seed_entity(e1);
    store.seed_entity(entity("e2-en", "e2", Some("t2")));
    store.seed_change(change(1, "entities", "e1-en"));
    store.seed_change(change(2, "entities", "e2-en"));
    let transport = Arc::new(MockTransport::default());
    let worker = SyncWorker::new(store, transport.clone());

    worker.synchronize(&target(whitelist_t1_full())).await.unwrap();

    let posts = transport.posts();
    assert_eq!(posts.len(), 1);
    let metadata = posts[0].data["metadata"].as_object().unwrap();
    assert!(metadata.contains_key("issue"));
    assert!(!metadata.contains_key("summary"));
}

#[tokio::test]
async fn test_connections_sync_by_relation_type_or_entity_template() {
    let store = Arc::new(MemoryStore::new());
    seed_schema(&store);
    store.seed_entity(entity("e1-en", "e1", Some("t1")));
    store.seed_entity(entity("e2-en", "e2", Some("t2")));
    store.seed_connection(connection("c1", "e1", None));
    store.seed_connection(connection("c2", "e2", Some("rel2")));
    store.seed_connection(connection("c3", "e2", None));
    store.seed_change(change(1, "connections", "c1"));
    store.seed_change(change(2, "connections", "c2"));
    store.seed_change(change(3, "connections", "c3"));
    let transport = Arc::new(MockTransport::default());
    let worker = SyncWorker::new(store, transport.clone());

    worker.synchronize(&target(whitelist_t1_full())).await.unwrap();

    let posts = transport.posts();
    let ids: Vec<&str> = posts.iter().map(|p| p.data["_id"].as_str().unwrap()).collect();
    assert_eq!(ids, vec!["c1", "c2"]);
}

#[tokio::test]
async fn test_deletions_are_always_forwarded_for_syncable_namespaces() {
    let store = Arc::new(MemoryStore::new());
    // No whitelist at all; the record is gone and the peer may hold a copy
    store.seed_change(tombstone(1, "dictionaries", "dict-gone"));
    store.seed_change(tombstone(2, "connections", "c-gone"));
    let transport = Arc::new(MockTransport::default());
    let worker = SyncWorker::new(store, transport.clone());

    worker.synchronize(&target(SyncFilters::default())).await.unwrap();

    let deletes = transport.deletes();
    assert_eq!(deletes.len(), 2);
    assert_eq!(deletes[0].namespace, "dictionaries");
    assert_eq!(deletes[0].data["_id"], "dict-gone");
    assert_eq!(deletes[1].data["_id"], "c-gone");
}

#[tokio::test]
async fn test_watermark_stops_at_a_failed_push_and_resumes() {
    let store = Arc::new(MemoryStore::new());
    store.seed_change(tombstone(1000, "connections", "ok-1"));
    store.seed_change(tombstone(2000, "connections", "bad-2"));
    store.seed_change(tombstone(3000, "connections", "ok-3"));
    let transport = Arc::new(MockTransport::default());
    transport.fail_on("bad-2", 500);
    let worker = SyncWorker::new(store.clone(), transport.clone());

    let err = worker
        .synchronize(&target(SyncFilters::default()))
        .await
        .unwrap_err();
    assert_eq!(err.downcast_ref::<PushError>().unwrap().status(), Some(500));

    // Only the record before the failure committed
    assert_eq!(store.sync_cursor().await.unwrap(), Some(1000));
    assert_eq!(transport.deletes().len(), 1);

    transport.clear_failure();
    worker
        .synchronize(&target(SyncFilters::default()))
        .await
        .unwrap();

    assert_eq!(store.sync_cursor().await.unwrap(), Some(3000));
    let ids: Vec<String> = transport
        .deletes()
        .iter()
        .map(|d| d.data["_id"].as_str().unwrap().to_string())
        .collect();
    // The pass resumes one second below the watermark, so ok-1 replays
    assert_eq!(ids, vec!["ok-1", "ok-1", "bad-2", "ok-3"]);
}

#[tokio::test]
async fn test_sync_once_requires_active_settings_and_initializes_the_cursor() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::default());
    let worker = SyncWorker::new(store.clone(), transport.clone());

    assert!(!worker.sync_once().await.unwrap());

    let mut settings = target(SyncFilters::default());
    settings.active = false;
    store.seed_settings(settings);
    assert!(!worker.sync_once().await.unwrap());
    assert_eq!(store.sync_cursor().await.unwrap(), None);

    store.seed_settings(target(SyncFilters::default()));
    assert!(worker.sync_once().await.unwrap());
    assert_eq!(store.sync_cursor().await.unwrap(), Some(0));
}

#[tokio::test]
async fn test_start_exits_immediately_when_cancelled() {
    let store = Arc::new(MemoryStore::new());
    store.seed_settings(target(SyncFilters::default()));
    let transport = Arc::new(MockTransport::default());
    let worker = SyncWorker::new(store, transport);

    let cancel = CancelToken::new();
    cancel.cancel();
    let started = worker
        .start(Duration::from_millis(1), &cancel)
        .await
        .unwrap();
    assert!(started);
}

#[tokio::test]
async fn test_unauthorized_push_triggers_relogin_with_default_credentials() {
    let store = Arc::new(MemoryStore::new());
    store.seed_change(tombstone(1, "connections", "needs-auth"));
    store.seed_cursor(0);
    let transport = Arc::new(MockTransport::default());
    transport.fail_on("needs-auth", 401);
    let worker = Arc::new(SyncWorker::new(store, transport.clone()));

    let cancel = CancelToken::new();
    let handle = tokio::spawn({
        let worker = worker.clone();
        let cancel = cancel.clone();
        async move {
            worker
                .interval_sync(
                    &target(SyncFilters::default()),
                    Duration::from_millis(1),
                    &cancel,
                )
                .await;
        }
    });

    for _ in 0..500 {
        if !transport.logins().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    cancel.cancel();
    handle.await.unwrap();

    let logins = transport.logins();
    assert!(!logins.is_empty());
    assert_eq!(logins[0], ("admin".to_string(), "admin".to_string()));
}

#[tokio::test]
async fn test_login_prefers_stored_credentials_over_configured_fallback() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::default());
    let worker = SyncWorker::new(store, transport.clone())
        .with_credentials("config-user", "config-pass");

    // Settings without credentials fall back to the configured pair
    worker.login(&target(SyncFilters::default())).await;

    let mut settings = target(SyncFilters::default());
    settings.username = Some("stored-user".to_string());
    settings.password = Some("stored-pass".to_string());
    worker.login(&settings).await;

    let logins = transport.logins();
    assert_eq!(
        logins,
        vec![
            ("config-user".to_string(), "config-pass".to_string()),
            ("stored-user".to_string(), "stored-pass".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_failed_login_is_swallowed() {
    let store = Arc::new(MemoryStore::new());
    let transport = Arc::new(MockTransport::default());
    *transport.fail_login.lock().unwrap() = true;
    let worker = SyncWorker::new(store, transport.clone());

    // Must not panic or propagate; the next pass will retry
    worker.login(&target(SyncFilters::default())).await;
    assert!(transport.logins().is_empty());
}
