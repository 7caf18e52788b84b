//! In-memory [`Store`] implementation for tests and embedders.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Calls to `update_metadata_from_relationships` are recorded so tests can
//! assert the engine notified the entity collaborator.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    ChangeRecord, Connection, Dictionary, Entity, RelationType, SyncSettings, Template,
};

use super::{sort_connections, Store};

/// In-memory store. Cheap to construct, fully seedable.
#[derive(Default)]
pub struct MemoryStore {
    connections: RwLock<HashMap<String, Connection>>,
    entities: RwLock<Vec<Entity>>,
    templates: RwLock<HashMap<String, Template>>,
    relation_types: RwLock<HashMap<String, RelationType>>,
    dictionaries: RwLock<HashMap<String, Dictionary>>,
    changelog: RwLock<Vec<ChangeRecord>>,
    cursor: RwLock<Option<i64>>,
    settings: RwLock<Option<SyncSettings>>,
    metadata_calls: RwLock<Vec<(Vec<String>, String)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_connection(&self, connection: Connection) {
        self.connections
            .write()
            .unwrap()
            .insert(connection.id.clone(), connection);
    }

    pub fn seed_entity(&self, entity: Entity) {
        self.entities.write().unwrap().push(entity);
    }

    pub fn seed_template(&self, template: Template) {
        self.templates
            .write()
            .unwrap()
            .insert(template.id.clone(), template);
    }

    pub fn seed_relation_type(&self, relation_type: RelationType) {
        self.relation_types
            .write()
            .unwrap()
            .insert(relation_type.id.clone(), relation_type);
    }

    pub fn seed_dictionary(&self, dictionary: Dictionary) {
        self.dictionaries
            .write()
            .unwrap()
            .insert(dictionary.id.clone(), dictionary);
    }

    pub fn seed_change(&self, record: ChangeRecord) {
        self.changelog.write().unwrap().push(record);
    }

    pub fn seed_settings(&self, settings: SyncSettings) {
        *self.settings.write().unwrap() = Some(settings);
    }

    pub fn seed_cursor(&self, last_sync: i64) {
        *self.cursor.write().unwrap() = Some(last_sync);
    }

    /// (entity_ids, language) pairs passed to
    /// `update_metadata_from_relationships`, in call order.
    pub fn metadata_calls(&self) -> Vec<(Vec<String>, String)> {
        self.metadata_calls.read().unwrap().clone()
    }

    /// All stored connections in canonical order.
    pub fn all_connections(&self) -> Vec<Connection> {
        let mut all: Vec<Connection> = self.connections.read().unwrap().values().cloned().collect();
        sort_connections(&mut all);
        all
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn connection(&self, id: &str) -> Result<Option<Connection>> {
        Ok(self.connections.read().unwrap().get(id).cloned())
    }

    async fn connections_by_entity(
        &self,
        shared_id: &str,
        language: Option<&str>,
    ) -> Result<Vec<Connection>> {
        let mut found: Vec<Connection> = self
            .connections
            .read()
            .unwrap()
            .values()
            .filter(|c| c.entity == shared_id)
            .filter(|c| language.map_or(true, |l| c.language == l))
            .cloned()
            .collect();
        sort_connections(&mut found);
        Ok(found)
    }

    async fn connections_by_hubs(&self, hubs: &[String]) -> Result<Vec<Connection>> {
        let mut found: Vec<Connection> = self
            .connections
            .read()
            .unwrap()
            .values()
            .filter(|c| hubs.iter().any(|h| *h == c.hub))
            .cloned()
            .collect();
        sort_connections(&mut found);
        Ok(found)
    }

    async fn count_by_relation_type(&self, relation_type: &str) -> Result<u64> {
        Ok(self
            .connections
            .read()
            .unwrap()
            .values()
            .filter(|c| c.template.as_deref() == Some(relation_type))
            .count() as u64)
    }

    async fn text_references(&self, filename: &str, language: &str) -> Result<Vec<Connection>> {
        let mut found: Vec<Connection> = self
            .connections
            .read()
            .unwrap()
            .values()
            .filter(|c| {
                c.range.is_some() && c.filename.as_deref() == Some(filename) && c.language == language
            })
            .cloned()
            .collect();
        sort_connections(&mut found);
        Ok(found)
    }

    async fn upsert_connection(&self, connection: &Connection) -> Result<()> {
        self.connections
            .write()
            .unwrap()
            .insert(connection.id.clone(), connection.clone());
        Ok(())
    }

    async fn delete_connections(&self, ids: &[String]) -> Result<()> {
        let mut connections = self.connections.write().unwrap();
        for id in ids {
            connections.remove(id);
        }
        Ok(())
    }

    async fn entity_by_shared_id(
        &self,
        shared_id: &str,
        language: &str,
    ) -> Result<Option<Entity>> {
        Ok(self
            .entities
            .read()
            .unwrap()
            .iter()
            .find(|e| e.shared_id == shared_id && e.language == language)
            .cloned())
    }

    async fn entity_by_id(&self, id: &str) -> Result<Option<Entity>> {
        Ok(self
            .entities
            .read()
            .unwrap()
            .iter()
            .find(|e| e.id == id)
            .cloned())
    }

    async fn entity_editions(&self, shared_id: &str) -> Result<Vec<Entity>> {
        Ok(self
            .entities
            .read()
            .unwrap()
            .iter()
            .filter(|e| e.shared_id == shared_id)
            .cloned()
            .collect())
    }

    async fn update_metadata_from_relationships(
        &self,
        entity_ids: &[String],
        language: &str,
    ) -> Result<()> {
        self.metadata_calls
            .write()
            .unwrap()
            .push((entity_ids.to_vec(), language.to_string()));
        Ok(())
    }

    async fn template(&self, id: &str) -> Result<Option<Template>> {
        Ok(self.templates.read().unwrap().get(id).cloned())
    }

    async fn relation_type(&self, id: &str) -> Result<Option<RelationType>> {
        Ok(self.relation_types.read().unwrap().get(id).cloned())
    }

    async fn dictionary(&self, id: &str) -> Result<Option<Dictionary>> {
        Ok(self.dictionaries.read().unwrap().get(id).cloned())
    }

    async fn changes_since(&self, since: i64) -> Result<Vec<ChangeRecord>> {
        let mut records: Vec<ChangeRecord> = self
            .changelog
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.timestamp >= since)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }

    async fn sync_cursor(&self) -> Result<Option<i64>> {
        Ok(*self.cursor.read().unwrap())
    }

    async fn set_sync_cursor(&self, last_sync: i64) -> Result<()> {
        *self.cursor.write().unwrap() = Some(last_sync);
        Ok(())
    }

    async fn sync_settings(&self) -> Result<Option<SyncSettings>> {
        Ok(self.settings.read().unwrap().clone())
    }
}
