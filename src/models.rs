//! Core data models for the relationship graph and sync log.
//!
//! A relationship instance is not a first-class record: it is a *hub*, a
//! plain grouping key shared by two or more [`Connection`] rows. The engine
//! enforces the hub invariant (0 or ≥2 members); storage stays free of
//! business rules.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One endpoint of a relationship.
///
/// Connections referencing the same `hub` form a single logical
/// relationship instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    /// UUID, generated on creation.
    #[serde(rename = "_id")]
    pub id: String,
    /// Shared identifier of the entity this endpoint refers to.
    pub entity: String,
    /// Grouping key linking ≥2 connections into one relationship.
    pub hub: String,
    /// Relation type id; `None` means untyped (grouped by attachment only).
    pub template: Option<String>,
    /// Text anchor within a file, for text references.
    pub range: Option<TextRange>,
    /// File the range belongs to, resolved from the entity at save time.
    pub filename: Option<String>,
    /// Language edition this connection belongs to.
    pub language: String,
}

/// A text-anchored reference within a specific file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRange {
    pub text: String,
    #[serde(default)]
    pub start: i64,
    #[serde(default)]
    pub end: i64,
}

/// Input shape for [`save`](crate::engine::RelationshipEngine::save).
///
/// Ids and hubs may be absent on creation; the engine mints UUIDs.
#[derive(Debug, Clone, Default)]
pub struct ConnectionInput {
    pub id: Option<String>,
    pub entity: String,
    pub hub: Option<String>,
    pub template: Option<String>,
    pub range: Option<TextRange>,
}

impl ConnectionInput {
    pub fn new(entity: &str) -> Self {
        Self {
            entity: entity.to_string(),
            ..Default::default()
        }
    }

    pub fn with_hub(mut self, hub: &str) -> Self {
        self.hub = Some(hub.to_string());
        self
    }

    pub fn with_template(mut self, template: &str) -> Self {
        self.template = Some(template.to_string());
        self
    }

    pub fn with_range(mut self, text: &str) -> Self {
        self.range = Some(TextRange {
            text: text.to_string(),
            start: 0,
            end: 0,
        });
        self
    }
}

/// Kind of entity a connection endpoint can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Document,
    Entity,
}

/// An entity record as seen by the engine.
///
/// Entities are owned by an external collaborator; the engine only reads
/// them for enrichment and filename resolution. Per-language editions of
/// the same logical entity share `shared_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "_id")]
    pub id: String,
    pub shared_id: String,
    pub language: String,
    pub title: String,
    pub kind: EntityKind,
    pub template: Option<String>,
    pub published: Option<bool>,
    pub creation_date: i64,
    /// Filename of the entity's primary file, when it has one.
    pub file: Option<String>,
    /// Property name → list of values (target shared ids for relationship
    /// properties, dictionary value ids for selects, free text otherwise).
    #[serde(default)]
    pub metadata: BTreeMap<String, Vec<String>>,
}

/// Denormalized entity fields attached to enriched connections.
///
/// `file` is present only for document entities.
#[derive(Debug, Clone, Serialize)]
pub struct EntityData {
    pub title: String,
    pub kind: EntityKind,
    pub template: Option<String>,
    pub creation_date: i64,
    pub published: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

/// A connection enriched for API consumers.
///
/// `template` is the stored relation type id resolved against the relation
/// type collection: a dangling id comes back as `None`.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionView {
    #[serde(rename = "_id")]
    pub id: String,
    pub entity: String,
    pub hub: String,
    pub template: Option<String>,
    pub range: Option<TextRange>,
    pub filename: Option<String>,
    pub language: String,
    pub entity_data: Option<EntityData>,
}

/// Property kinds relevant to the engine and the sync filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    Text,
    Select,
    MultiSelect,
    Relationship,
}

/// A template property.
///
/// `content` points at a dictionary for selects and at a relation type for
/// relationship properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub kind: PropertyKind,
    pub content: Option<String>,
}

/// An entity template with its property definitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub properties: Vec<Property>,
}

/// The semantic kind of a relationship (e.g. "friend", "family").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationType {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
}

/// A thesaurus entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DictionaryValue {
    #[serde(rename = "_id")]
    pub id: String,
    pub label: String,
}

/// A thesaurus referenced by select properties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dictionary {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    pub values: Vec<DictionaryValue>,
}

/// One entry of the append-only change log driving incremental sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub timestamp: i64,
    pub namespace: String,
    pub record_id: String,
    pub deleted: bool,
}

/// Per-namespace whitelist policy for outbound sync.
///
/// `templates` maps a template id to the property ids allowed to leave.
/// An empty list means the template itself syncs with no properties, and
/// nothing is considered referenced through it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncFilters {
    #[serde(default)]
    pub templates: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub relationtypes: Vec<String>,
}

/// Stored sync settings; absent or inactive settings disable the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    pub url: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub config: SyncFilters,
}
