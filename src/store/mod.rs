//! Storage abstraction for hubgraph.
//!
//! The [`Store`] trait defines every persistence operation the relationship
//! engine and the sync dispatcher need, enabling pluggable backends
//! (SQLite, in-memory for tests and embedders).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//! Storage carries no business rules: hub invariant enforcement lives
//! entirely in the engine.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    ChangeRecord, Connection, Dictionary, Entity, RelationType, SyncSettings, Template,
};

/// Abstract storage backend.
///
/// All operations are async (via `async-trait`); in-memory implementations
/// return immediately-ready futures.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`connection`](Store::connection) | Fetch one connection by id |
/// | [`connections_by_entity`](Store::connections_by_entity) | Connections referencing an entity |
/// | [`connections_by_hubs`](Store::connections_by_hubs) | Members of a set of hubs |
/// | [`count_by_relation_type`](Store::count_by_relation_type) | Usage count of a relation type |
/// | [`text_references`](Store::text_references) | Range-anchored connections for a file |
/// | [`upsert_connection`](Store::upsert_connection) | Insert or update a connection |
/// | [`delete_connections`](Store::delete_connections) | Delete connections by id |
/// | [`entity_by_shared_id`](Store::entity_by_shared_id) | One language edition of an entity |
/// | [`entity_editions`](Store::entity_editions) | All language editions of an entity |
/// | [`update_metadata_from_relationships`](Store::update_metadata_from_relationships) | Entity-side metadata refresh hook |
/// | [`template`](Store::template) / [`relation_type`](Store::relation_type) / [`dictionary`](Store::dictionary) | Schema lookups |
/// | [`changes_since`](Store::changes_since) | Change-log scan for sync |
/// | [`sync_cursor`](Store::sync_cursor) / [`set_sync_cursor`](Store::set_sync_cursor) | Watermark persistence |
/// | [`sync_settings`](Store::sync_settings) | Stored sync configuration |
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch a single connection by id.
    async fn connection(&self, id: &str) -> Result<Option<Connection>>;

    /// All connections referencing an entity, optionally scoped to one
    /// language edition. Stable order: (hub, entity, id).
    async fn connections_by_entity(
        &self,
        shared_id: &str,
        language: Option<&str>,
    ) -> Result<Vec<Connection>>;

    /// All members of the given hubs, across every language.
    /// Stable order: (hub, entity, id).
    async fn connections_by_hubs(&self, hubs: &[String]) -> Result<Vec<Connection>>;

    /// Number of connections typed with the given relation type.
    async fn count_by_relation_type(&self, relation_type: &str) -> Result<u64>;

    /// Range-anchored connections for a filename in one language.
    async fn text_references(&self, filename: &str, language: &str) -> Result<Vec<Connection>>;

    /// Insert or update a connection, keyed by its id.
    async fn upsert_connection(&self, connection: &Connection) -> Result<()>;

    /// Delete connections by id. Missing ids are ignored.
    async fn delete_connections(&self, ids: &[String]) -> Result<()>;

    /// One language edition of an entity.
    async fn entity_by_shared_id(&self, shared_id: &str, language: &str)
        -> Result<Option<Entity>>;

    /// An entity by its primary id (any language edition).
    async fn entity_by_id(&self, id: &str) -> Result<Option<Entity>>;

    /// Every language edition sharing an id.
    async fn entity_editions(&self, shared_id: &str) -> Result<Vec<Entity>>;

    /// Entity-side hook keeping relationship-derived metadata in sync.
    ///
    /// Owned by the entity collaborator; assumed idempotent and
    /// side-effect-isolated to entity metadata.
    async fn update_metadata_from_relationships(
        &self,
        entity_ids: &[String],
        language: &str,
    ) -> Result<()>;

    /// Template definition lookup.
    async fn template(&self, id: &str) -> Result<Option<Template>>;

    /// Relation type lookup.
    async fn relation_type(&self, id: &str) -> Result<Option<RelationType>>;

    /// Dictionary (thesaurus) lookup.
    async fn dictionary(&self, id: &str) -> Result<Option<Dictionary>>;

    /// Change-log records with `timestamp >= since`, ascending.
    async fn changes_since(&self, since: i64) -> Result<Vec<ChangeRecord>>;

    /// Current sync watermark, `None` when never initialized.
    async fn sync_cursor(&self) -> Result<Option<i64>>;

    /// Persist the sync watermark.
    async fn set_sync_cursor(&self, last_sync: i64) -> Result<()>;

    /// Stored sync settings, `None` when sync was never configured.
    async fn sync_settings(&self) -> Result<Option<SyncSettings>>;
}

/// Sort connections into the store's canonical (hub, entity, id) order.
///
/// Shared by backends so engine output is deterministic regardless of the
/// storage used.
pub fn sort_connections(connections: &mut [Connection]) {
    connections.sort_by(|a, b| {
        (a.hub.as_str(), a.entity.as_str(), a.id.as_str())
            .cmp(&(b.hub.as_str(), b.entity.as_str(), b.id.as_str()))
    });
}
