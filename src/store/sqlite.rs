//! SQLite-backed [`Store`] implementation.
//!
//! Maps each [`Store`] operation to SQL against the schema created by
//! [`crate::migrate`]. Template properties, dictionary values, and entity
//! metadata are stored as JSON columns; everything queried on gets its own
//! column.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::models::{
    ChangeRecord, Connection, Dictionary, DictionaryValue, Entity, EntityKind, Property,
    RelationType, SyncSettings, Template, TextRange,
};

use super::{sort_connections, Store};

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn connection_from_row(row: &sqlx::sqlite::SqliteRow) -> Connection {
    let range_text: Option<String> = row.get("range_text");
    let range = range_text.map(|text| TextRange {
        text,
        start: row.get("range_start"),
        end: row.get("range_end"),
    });
    Connection {
        id: row.get("id"),
        entity: row.get("entity"),
        hub: row.get("hub"),
        template: row.get("template"),
        range,
        filename: row.get("filename"),
        language: row.get("language"),
    }
}

fn entity_from_row(row: &sqlx::sqlite::SqliteRow) -> Entity {
    let kind: String = row.get("kind");
    let kind = if kind == "document" {
        EntityKind::Document
    } else {
        EntityKind::Entity
    };
    let published: Option<i64> = row.get("published");
    let metadata_json: String = row.get("metadata_json");
    let metadata: BTreeMap<String, Vec<String>> =
        serde_json::from_str(&metadata_json).unwrap_or_default();
    Entity {
        id: row.get("id"),
        shared_id: row.get("shared_id"),
        language: row.get("language"),
        title: row.get("title"),
        kind,
        template: row.get("template"),
        published: published.map(|p| p != 0),
        creation_date: row.get("creation_date"),
        file: row.get("filename"),
        metadata,
    }
}

const CONNECTION_COLUMNS: &str =
    "id, entity, hub, template, range_text, range_start, range_end, filename, language";

#[async_trait]
impl Store for SqliteStore {
    async fn connection(&self, id: &str) -> Result<Option<Connection>> {
        let row = sqlx::query(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM connections WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(connection_from_row))
    }

    async fn connections_by_entity(
        &self,
        shared_id: &str,
        language: Option<&str>,
    ) -> Result<Vec<Connection>> {
        let rows = match language {
            Some(lang) => {
                sqlx::query(&format!(
                    "SELECT {CONNECTION_COLUMNS} FROM connections WHERE entity = ? AND language = ?"
                ))
                .bind(shared_id)
                .bind(lang)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {CONNECTION_COLUMNS} FROM connections WHERE entity = ?"
                ))
                .bind(shared_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        let mut found: Vec<Connection> = rows.iter().map(connection_from_row).collect();
        sort_connections(&mut found);
        Ok(found)
    }

    async fn connections_by_hubs(&self, hubs: &[String]) -> Result<Vec<Connection>> {
        let mut found = Vec::new();
        // Hub sets are small (one per relationship instance the caller touched)
        for hub in hubs {
            let rows = sqlx::query(&format!(
                "SELECT {CONNECTION_COLUMNS} FROM connections WHERE hub = ?"
            ))
            .bind(hub)
            .fetch_all(&self.pool)
            .await?;
            found.extend(rows.iter().map(connection_from_row));
        }
        sort_connections(&mut found);
        Ok(found)
    }

    async fn count_by_relation_type(&self, relation_type: &str) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM connections WHERE template = ?")
                .bind(relation_type)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    async fn text_references(&self, filename: &str, language: &str) -> Result<Vec<Connection>> {
        let rows = sqlx::query(&format!(
            "SELECT {CONNECTION_COLUMNS} FROM connections
             WHERE filename = ? AND language = ? AND range_text IS NOT NULL"
        ))
        .bind(filename)
        .bind(language)
        .fetch_all(&self.pool)
        .await?;
        let mut found: Vec<Connection> = rows.iter().map(connection_from_row).collect();
        sort_connections(&mut found);
        Ok(found)
    }

    async fn upsert_connection(&self, connection: &Connection) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO connections (id, entity, hub, template, range_text, range_start, range_end, filename, language)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                entity = excluded.entity,
                hub = excluded.hub,
                template = excluded.template,
                range_text = excluded.range_text,
                range_start = excluded.range_start,
                range_end = excluded.range_end,
                filename = excluded.filename,
                language = excluded.language
            "#,
        )
        .bind(&connection.id)
        .bind(&connection.entity)
        .bind(&connection.hub)
        .bind(&connection.template)
        .bind(connection.range.as_ref().map(|r| r.text.clone()))
        .bind(connection.range.as_ref().map(|r| r.start).unwrap_or(0))
        .bind(connection.range.as_ref().map(|r| r.end).unwrap_or(0))
        .bind(&connection.filename)
        .bind(&connection.language)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_connections(&self, ids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for id in ids {
            sqlx::query("DELETE FROM connections WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn entity_by_shared_id(
        &self,
        shared_id: &str,
        language: &str,
    ) -> Result<Option<Entity>> {
        let row = sqlx::query("SELECT * FROM entities WHERE shared_id = ? AND language = ?")
            .bind(shared_id)
            .bind(language)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(entity_from_row))
    }

    async fn entity_by_id(&self, id: &str) -> Result<Option<Entity>> {
        let row = sqlx::query("SELECT * FROM entities WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(entity_from_row))
    }

    async fn entity_editions(&self, shared_id: &str) -> Result<Vec<Entity>> {
        let rows = sqlx::query("SELECT * FROM entities WHERE shared_id = ? ORDER BY language")
            .bind(shared_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(entity_from_row).collect())
    }

    async fn update_metadata_from_relationships(
        &self,
        entity_ids: &[String],
        language: &str,
    ) -> Result<()> {
        // Entity-side concern; the engine only guarantees the notification
        tracing::debug!(
            count = entity_ids.len(),
            language,
            "metadata refresh requested for entities"
        );
        Ok(())
    }

    async fn template(&self, id: &str) -> Result<Option<Template>> {
        let row = sqlx::query("SELECT id, name, properties_json FROM templates WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => {
                let properties_json: String = row.get("properties_json");
                let properties: Vec<Property> =
                    serde_json::from_str(&properties_json).unwrap_or_default();
                Some(Template {
                    id: row.get("id"),
                    name: row.get("name"),
                    properties,
                })
            }
            None => None,
        })
    }

    async fn relation_type(&self, id: &str) -> Result<Option<RelationType>> {
        let row = sqlx::query("SELECT id, name FROM relationtypes WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|row| RelationType {
            id: row.get("id"),
            name: row.get("name"),
        }))
    }

    async fn dictionary(&self, id: &str) -> Result<Option<Dictionary>> {
        let row = sqlx::query("SELECT id, name, values_json FROM dictionaries WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(match row {
            Some(row) => {
                let values_json: String = row.get("values_json");
                let values: Vec<DictionaryValue> =
                    serde_json::from_str(&values_json).unwrap_or_default();
                Some(Dictionary {
                    id: row.get("id"),
                    name: row.get("name"),
                    values,
                })
            }
            None => None,
        })
    }

    async fn changes_since(&self, since: i64) -> Result<Vec<ChangeRecord>> {
        let rows = sqlx::query(
            "SELECT timestamp, namespace, record_id, deleted FROM changelog
             WHERE timestamp >= ? ORDER BY timestamp ASC",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| ChangeRecord {
                timestamp: row.get("timestamp"),
                namespace: row.get("namespace"),
                record_id: row.get("record_id"),
                deleted: row.get::<i64, _>("deleted") != 0,
            })
            .collect())
    }

    async fn sync_cursor(&self) -> Result<Option<i64>> {
        let last: Option<i64> = sqlx::query_scalar("SELECT last_sync FROM syncs WHERE id = 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(last)
    }

    async fn set_sync_cursor(&self, last_sync: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO syncs (id, last_sync) VALUES (1, ?)
            ON CONFLICT(id) DO UPDATE SET last_sync = excluded.last_sync
            "#,
        )
        .bind(last_sync)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn sync_settings(&self) -> Result<Option<SyncSettings>> {
        let sync_json: Option<Option<String>> =
            sqlx::query_scalar("SELECT sync_json FROM settings WHERE id = 1")
                .fetch_optional(&self.pool)
                .await?;
        Ok(sync_json
            .flatten()
            .and_then(|json| serde_json::from_str(&json).ok()))
    }
}
