//! Relationship engine: connection lifecycle and hub invariant enforcement.
//!
//! A hub must hold either zero or at least two connections. Nothing in
//! storage enforces this; every mutating path here finishes with a sweep
//! over the touched hubs that deletes a last remaining member
//! ([`RelationshipEngine::delete`], [`RelationshipEngine::delete_text_references`],
//! [`RelationshipEngine::save_entity_based_references`]).
//!
//! The engine owns connections exclusively. Entities, templates, and
//! relation types are read through the [`Store`] collaborator; after every
//! mutation the entity side is notified via
//! `update_metadata_from_relationships` so relationship-derived entity
//! metadata stays consistent.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::models::{
    Connection, ConnectionInput, ConnectionView, Entity, EntityData, EntityKind, PropertyKind,
};
use crate::search::{SearchQuery, SearchService};
use crate::store::Store;

/// Default scope cap handed to the search collaborator when the caller
/// does not limit hubs.
const SEARCH_LIMIT: usize = 9999;

/// Input to [`RelationshipEngine::save`].
///
/// A `Group` is one hub's worth of connections saved together; when no
/// member carries a hub yet, a fresh one is minted and shared by all of
/// them. A `One` must already name its hub.
#[derive(Debug, Clone)]
pub enum SaveRequest {
    One(ConnectionInput),
    Group(Vec<ConnectionInput>),
}

/// Condition for [`RelationshipEngine::delete`]; at least one field must
/// be set.
#[derive(Debug, Clone, Default)]
pub struct DeleteQuery {
    pub id: Option<String>,
    pub entity: Option<String>,
}

impl DeleteQuery {
    pub fn by_id(id: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            ..Default::default()
        }
    }

    pub fn by_entity(entity: &str) -> Self {
        Self {
            entity: Some(entity.to_string()),
            ..Default::default()
        }
    }
}

/// A batch of saves and deletes executed in fixed save-then-delete order.
#[derive(Debug, Clone, Default)]
pub struct BulkRequest {
    pub save: Vec<ConnectionInput>,
    pub delete: Vec<DeleteQuery>,
}

/// Result of [`RelationshipEngine::bulk`].
#[derive(Debug)]
pub struct BulkOutcome {
    pub saved: Vec<ConnectionView>,
    pub deleted: usize,
}

/// Options for [`RelationshipEngine::get_groups_by_connection`].
#[derive(Debug, Clone, Default)]
pub struct GroupOptions {
    /// Authenticated caller; unlocks unpublished counterparts.
    pub user: Option<String>,
    /// Skip the raw reference lists, return counts only.
    pub exclude_refs: bool,
}

/// Connections of one relation type, broken down by counterpart template.
#[derive(Debug)]
pub struct ConnectionGroup {
    /// Relation type id; `None` groups untyped connections.
    pub key: Option<String>,
    /// Relation type display name.
    pub connection_label: Option<String>,
    pub templates: Vec<GroupTemplate>,
}

/// One counterpart-template bucket within a [`ConnectionGroup`].
#[derive(Debug)]
pub struct GroupTemplate {
    pub template: Option<String>,
    pub label: Option<String>,
    pub count: usize,
    pub refs: Option<Vec<ConnectionView>>,
}

/// Options for [`RelationshipEngine::search`].
#[derive(Debug, Clone, Default)]
pub struct RelationshipSearchOptions {
    /// Relation type id → counterpart template ids allowed through.
    /// Empty map lets every connection through.
    pub filter: BTreeMap<String, Vec<String>>,
    pub search_term: Option<String>,
    /// Cap on distinct hubs referenced across the result rows.
    pub limit: Option<usize>,
}

/// One row of a relationship search result.
#[derive(Debug)]
pub struct SearchRow {
    pub shared_id: String,
    pub connections: Vec<Connection>,
}

/// Relationship search result: matched rows plus the seed entity, with
/// hub totals before and after the optional cap.
#[derive(Debug)]
pub struct RelationshipSearchResults {
    pub rows: Vec<SearchRow>,
    pub total_hubs: usize,
    pub requested_hubs: Option<usize>,
}

/// The relationship engine.
pub struct RelationshipEngine {
    store: Arc<dyn Store>,
    search: Arc<dyn SearchService>,
}

impl RelationshipEngine {
    pub fn new(store: Arc<dyn Store>, search: Arc<dyn SearchService>) -> Self {
        Self { store, search }
    }

    /// Fetch one connection by id.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Connection>> {
        self.store.connection(id).await
    }

    /// Every connection of every hub the entity participates in for the
    /// given language, across all languages of those hubs, enriched with
    /// counterpart entity data.
    ///
    /// Hubs whose members are only in other languages never show up: the
    /// seed query is language-scoped. Text references are visible only
    /// where their file is still current: a connection carrying a
    /// filename is dropped unless it matches the file of its entity's
    /// edition in the requested language.
    pub async fn get_by_document(
        &self,
        shared_id: &str,
        language: &str,
    ) -> Result<Vec<ConnectionView>> {
        let own = self
            .store
            .connections_by_entity(shared_id, Some(language))
            .await?;
        let hubs = distinct_hubs(&own);
        let mut all = self.store.connections_by_hubs(&hubs).await?;

        let mut files: BTreeMap<String, Option<String>> = BTreeMap::new();
        for connection in all.iter().filter(|c| c.filename.is_some()) {
            if !files.contains_key(&connection.entity) {
                let file = self
                    .store
                    .entity_by_shared_id(&connection.entity, language)
                    .await?
                    .and_then(|e| e.file);
                files.insert(connection.entity.clone(), file);
            }
        }
        all.retain(|c| match &c.filename {
            Some(filename) => {
                files.get(&c.entity).and_then(|f| f.as_deref()) == Some(filename.as_str())
            }
            None => true,
        });

        self.enrich(all, language).await
    }

    /// Counterpart connections grouped by relation type, each group broken
    /// down by counterpart template. Unpublished counterparts require an
    /// authenticated `user`.
    pub async fn get_groups_by_connection(
        &self,
        shared_id: &str,
        language: &str,
        opts: GroupOptions,
    ) -> Result<Vec<ConnectionGroup>> {
        let own = self
            .store
            .connections_by_entity(shared_id, Some(language))
            .await?;
        let hubs = distinct_hubs(&own);
        let all = self.store.connections_by_hubs(&hubs).await?;
        let counterparts: Vec<Connection> = all
            .into_iter()
            .filter(|c| c.entity != shared_id && c.language == language)
            .collect();
        let views = self.enrich(counterparts, language).await?;

        let visible: Vec<ConnectionView> = views
            .into_iter()
            .filter(|v| {
                opts.user.is_some()
                    || v.entity_data
                        .as_ref()
                        .map_or(false, |d| d.published == Some(true))
            })
            .collect();

        let mut by_type: BTreeMap<Option<String>, Vec<ConnectionView>> = BTreeMap::new();
        for view in visible {
            by_type.entry(view.template.clone()).or_default().push(view);
        }

        let mut groups = Vec::new();
        for (key, members) in by_type {
            let connection_label = match &key {
                Some(id) => self.store.relation_type(id).await?.map(|r| r.name),
                None => None,
            };

            let mut by_template: BTreeMap<Option<String>, Vec<ConnectionView>> = BTreeMap::new();
            for member in members {
                let template = member
                    .entity_data
                    .as_ref()
                    .and_then(|d| d.template.clone());
                by_template.entry(template).or_default().push(member);
            }

            let mut templates = Vec::new();
            for (template, refs) in by_template {
                let label = match &template {
                    Some(id) => self.store.template(id).await?.map(|t| t.name),
                    None => None,
                };
                templates.push(GroupTemplate {
                    template,
                    label,
                    count: refs.len(),
                    refs: if opts.exclude_refs { None } else { Some(refs) },
                });
            }

            groups.push(ConnectionGroup {
                key,
                connection_label,
                templates,
            });
        }
        Ok(groups)
    }

    /// Members of one hub, optionally scoped to a language, ordered by
    /// entity id.
    pub async fn get_hub(&self, hub: &str, language: Option<&str>) -> Result<Vec<Connection>> {
        let members = self
            .store
            .connections_by_hubs(&[hub.to_string()])
            .await?;
        Ok(members
            .into_iter()
            .filter(|c| language.map_or(true, |l| c.language == l))
            .collect())
    }

    /// Number of connections typed with a relation type; 0 when unused.
    pub async fn count_by_relation_type(&self, relation_type: &str) -> Result<u64> {
        self.store.count_by_relation_type(relation_type).await
    }

    /// Save one connection into an existing hub, or a group of connections
    /// forming a hub together.
    ///
    /// Upserts by id; a connection carrying a text range gets its
    /// `filename` resolved from the referenced entity's current file.
    /// Afterwards every entity of the touched hubs is reported to the
    /// entity collaborator. Returns the saved connections enriched.
    pub async fn save(
        &self,
        request: SaveRequest,
        language: &str,
    ) -> Result<Vec<ConnectionView>> {
        let inputs = match request {
            SaveRequest::One(input) => {
                if input.hub.is_none() {
                    return Err(ValidationError::new(
                        "a single connection must specify the hub it joins",
                    )
                    .into());
                }
                vec![input]
            }
            SaveRequest::Group(mut inputs) => {
                if inputs.iter().all(|i| i.hub.is_none()) {
                    let hub = Uuid::new_v4().to_string();
                    for input in &mut inputs {
                        input.hub = Some(hub.clone());
                    }
                }
                inputs
            }
        };

        let mut saved = Vec::new();
        for input in inputs {
            let hub = input.hub.ok_or_else(|| {
                ValidationError::new("a single connection must specify the hub it joins")
            })?;
            let filename = match &input.range {
                Some(_) => self
                    .store
                    .entity_by_shared_id(&input.entity, language)
                    .await?
                    .and_then(|e| e.file),
                None => None,
            };
            let connection = Connection {
                id: input.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
                entity: input.entity,
                hub,
                template: input.template,
                range: input.range,
                filename,
                language: language.to_string(),
            };
            self.store.upsert_connection(&connection).await?;
            saved.push(connection);
        }

        let hubs = distinct_hubs(&saved);
        let members = self.store.connections_by_hubs(&hubs).await?;
        let entity_ids: Vec<String> = members
            .iter()
            .map(|c| c.entity.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        self.store
            .update_metadata_from_relationships(&entity_ids, language)
            .await?;

        self.enrich(saved, language).await
    }

    /// Execute all saves, then all deletes. The fixed order keeps a
    /// delete's hub sweep from discarding connections the same batch just
    /// placed into that hub.
    pub async fn bulk(&self, request: BulkRequest, language: &str) -> Result<BulkOutcome> {
        let mut saved = Vec::new();
        for input in request.save {
            saved.extend(self.save(SaveRequest::One(input), language).await?);
        }
        let mut deleted = 0;
        for query in request.delete {
            self.delete(query, language).await?;
            deleted += 1;
        }
        Ok(BulkOutcome { saved, deleted })
    }

    /// Derive connections from the entity's relationship-type metadata
    /// properties and reconcile them against what is stored.
    ///
    /// Each (entity, property) pair owns one hub: the entity's untyped
    /// base connection plus one connection per listed target, typed with
    /// the property's relation type. Repeat calls with identical metadata
    /// change nothing.
    pub async fn save_entity_based_references(
        &self,
        entity: &Entity,
        language: &str,
    ) -> Result<()> {
        let template_id = match &entity.template {
            Some(id) => id,
            None => return Ok(()),
        };
        let template = match self.store.template(template_id).await? {
            Some(t) => t,
            None => return Ok(()),
        };

        let own = self
            .store
            .connections_by_entity(&entity.shared_id, Some(language))
            .await?;
        let hubs = distinct_hubs(&own);
        let members = self.store.connections_by_hubs(&hubs).await?;

        for property in template
            .properties
            .iter()
            .filter(|p| p.kind == PropertyKind::Relationship)
        {
            let relation_type = match &property.content {
                Some(id) => id,
                None => continue,
            };
            let targets = entity
                .metadata
                .get(&property.name)
                .cloned()
                .unwrap_or_default();

            let existing_hub = members
                .iter()
                .find(|c| c.template.as_deref() == Some(relation_type))
                .map(|c| c.hub.clone());

            match existing_hub {
                Some(hub) => {
                    let typed: Vec<&Connection> = members
                        .iter()
                        .filter(|c| {
                            c.hub == hub && c.template.as_deref() == Some(relation_type)
                        })
                        .collect();

                    let stale: Vec<String> = typed
                        .iter()
                        .filter(|c| {
                            c.entity != entity.shared_id && !targets.contains(&c.entity)
                        })
                        .map(|c| c.id.clone())
                        .collect();
                    if !stale.is_empty() {
                        self.store.delete_connections(&stale).await?;
                    }

                    for target in &targets {
                        if !typed.iter().any(|c| &c.entity == target) {
                            let connection = Connection {
                                id: Uuid::new_v4().to_string(),
                                entity: target.clone(),
                                hub: hub.clone(),
                                template: Some(relation_type.clone()),
                                range: None,
                                filename: None,
                                language: language.to_string(),
                            };
                            self.store.upsert_connection(&connection).await?;
                        }
                    }

                    self.sanitize_hubs(&[hub]).await?;
                }
                None => {
                    if targets.is_empty() {
                        continue;
                    }
                    let hub = Uuid::new_v4().to_string();
                    let base = Connection {
                        id: Uuid::new_v4().to_string(),
                        entity: entity.shared_id.clone(),
                        hub: hub.clone(),
                        template: None,
                        range: None,
                        filename: None,
                        language: language.to_string(),
                    };
                    self.store.upsert_connection(&base).await?;
                    for target in &targets {
                        let connection = Connection {
                            id: Uuid::new_v4().to_string(),
                            entity: target.clone(),
                            hub: hub.clone(),
                            template: Some(relation_type.clone()),
                            range: None,
                            filename: None,
                            language: language.to_string(),
                        };
                        self.store.upsert_connection(&connection).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Full-text search scoped to the one-hop neighborhood of an entity.
    ///
    /// Builds the id scope from the entity's hubs (respecting the
    /// relation-type/template filter), delegates text matching to the
    /// search collaborator with `include_unpublished: true`, then attaches
    /// each row's own connections and caps distinct hubs at `limit`
    /// (encounter order over rows, stable across calls).
    pub async fn search(
        &self,
        shared_id: &str,
        opts: RelationshipSearchOptions,
        language: &str,
        user: Option<&str>,
    ) -> Result<RelationshipSearchResults> {
        let own = self
            .store
            .connections_by_entity(shared_id, Some(language))
            .await?;
        let hubs = distinct_hubs(&own);
        let all = self.store.connections_by_hubs(&hubs).await?;

        let mut ids: BTreeSet<String> = BTreeSet::new();
        for connection in all.iter().filter(|c| c.entity != shared_id) {
            if opts.filter.is_empty() {
                ids.insert(connection.entity.clone());
                continue;
            }
            let counterpart_template = self
                .store
                .entity_by_shared_id(&connection.entity, language)
                .await?
                .and_then(|e| e.template);
            if passes_filter(
                &opts.filter,
                connection.template.as_deref(),
                counterpart_template.as_deref(),
            ) {
                ids.insert(connection.entity.clone());
            }
        }

        let query = SearchQuery {
            search_term: opts.search_term.clone(),
            ids: ids.into_iter().collect(),
            include_unpublished: true,
            limit: opts.limit.unwrap_or(SEARCH_LIMIT),
        };
        let hits = self.search.search(&query, language, user).await?;

        let mut rows: Vec<SearchRow> = hits
            .rows
            .iter()
            .map(|hit| SearchRow {
                shared_id: hit.shared_id.clone(),
                connections: all
                    .iter()
                    .filter(|c| c.entity == hit.shared_id)
                    .cloned()
                    .collect(),
            })
            .collect();
        rows.push(SearchRow {
            shared_id: shared_id.to_string(),
            connections: own,
        });

        let mut hub_order: Vec<String> = Vec::new();
        for row in &rows {
            for connection in &row.connections {
                if !hub_order.contains(&connection.hub) {
                    hub_order.push(connection.hub.clone());
                }
            }
        }
        let total_hubs = hub_order.len();

        let requested_hubs = match opts.limit {
            Some(limit) => {
                let allowed = &hub_order[..limit.min(hub_order.len())];
                for row in &mut rows {
                    row.connections.retain(|c| allowed.contains(&c.hub));
                }
                // Rows whose hubs all fell outside the cap carry nothing
                rows.retain(|row| !row.connections.is_empty());
                Some(allowed.len())
            }
            None => None,
        };

        Ok(RelationshipSearchResults {
            rows,
            total_hubs,
            requested_hubs,
        })
    }

    /// Delete by connection id, or every connection of an entity across
    /// all languages. Touched hubs are swept afterwards so no hub is left
    /// with a single member, then the entity collaborator is notified once
    /// per affected language with every entity the operation touched.
    pub async fn delete(&self, query: DeleteQuery, language: &str) -> Result<()> {
        let targets: Vec<Connection> = match (&query.id, &query.entity) {
            (Some(id), _) => self.store.connection(id).await?.into_iter().collect(),
            (None, Some(entity)) => self.store.connections_by_entity(entity, None).await?,
            (None, None) => {
                return Err(ValidationError::new(
                    "delete requires a connection id or an entity",
                )
                .into())
            }
        };
        if targets.is_empty() {
            return Ok(());
        }

        let hubs = distinct_hubs(&targets);
        let members_before = self.store.connections_by_hubs(&hubs).await?;

        let ids: Vec<String> = targets.iter().map(|c| c.id.clone()).collect();
        self.store.delete_connections(&ids).await?;
        self.sanitize_hubs(&hubs).await?;

        let entity_ids: Vec<String> = members_before
            .iter()
            .map(|c| c.entity.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mut languages: BTreeSet<String> =
            members_before.iter().map(|c| c.language.clone()).collect();
        languages.insert(language.to_string());
        for lang in languages {
            self.store
                .update_metadata_from_relationships(&entity_ids, &lang)
                .await?;
        }
        Ok(())
    }

    /// Delete the text references anchored in the entity's current file,
    /// in the requested language only. An entity without a file is a
    /// no-op. Touched hubs are swept afterwards.
    pub async fn delete_text_references(&self, shared_id: &str, language: &str) -> Result<()> {
        let filename = match self.store.entity_by_shared_id(shared_id, language).await? {
            Some(entity) => match entity.file {
                Some(filename) => filename,
                None => return Ok(()),
            },
            None => return Ok(()),
        };
        let targets = self.store.text_references(&filename, language).await?;
        if targets.is_empty() {
            return Ok(());
        }
        let hubs = distinct_hubs(&targets);
        let ids: Vec<String> = targets.iter().map(|c| c.id.clone()).collect();
        self.store.delete_connections(&ids).await?;
        self.sanitize_hubs(&hubs).await?;
        Ok(())
    }

    /// Delete the last remaining member of any hub that was left with
    /// exactly one. Removing a straggler empties its own hub only, so a
    /// single pass per touched hub set suffices.
    async fn sanitize_hubs(&self, hubs: &[String]) -> Result<()> {
        let members = self.store.connections_by_hubs(hubs).await?;
        let mut per_hub: BTreeMap<&str, Vec<&Connection>> = BTreeMap::new();
        for member in &members {
            per_hub.entry(member.hub.as_str()).or_default().push(member);
        }
        let stragglers: Vec<String> = per_hub
            .values()
            .filter(|members| members.len() == 1)
            .map(|members| members[0].id.clone())
            .collect();
        if !stragglers.is_empty() {
            self.store.delete_connections(&stragglers).await?;
        }
        Ok(())
    }

    /// Attach denormalized entity data and resolve relation types.
    async fn enrich(
        &self,
        connections: Vec<Connection>,
        language: &str,
    ) -> Result<Vec<ConnectionView>> {
        let mut entities: BTreeMap<String, Option<Entity>> = BTreeMap::new();
        let mut known_types: BTreeMap<String, bool> = BTreeMap::new();
        for connection in &connections {
            if !entities.contains_key(&connection.entity) {
                let entity = self
                    .store
                    .entity_by_shared_id(&connection.entity, language)
                    .await?;
                entities.insert(connection.entity.clone(), entity);
            }
            if let Some(template) = &connection.template {
                if !known_types.contains_key(template) {
                    let exists = self.store.relation_type(template).await?.is_some();
                    known_types.insert(template.clone(), exists);
                }
            }
        }

        Ok(connections
            .into_iter()
            .map(|connection| {
                let entity_data = entities
                    .get(&connection.entity)
                    .and_then(|e| e.as_ref())
                    .map(|entity| EntityData {
                        title: entity.title.clone(),
                        kind: entity.kind,
                        template: entity.template.clone(),
                        creation_date: entity.creation_date,
                        published: entity.published,
                        file: match entity.kind {
                            EntityKind::Document => entity.file.clone(),
                            EntityKind::Entity => None,
                        },
                    });
                let template = connection
                    .template
                    .clone()
                    .filter(|t| known_types.get(t).copied().unwrap_or(false));
                ConnectionView {
                    id: connection.id,
                    entity: connection.entity,
                    hub: connection.hub,
                    template,
                    range: connection.range,
                    filename: connection.filename,
                    language: connection.language,
                    entity_data,
                }
            })
            .collect())
    }
}

/// Distinct hub ids in first-seen order.
fn distinct_hubs(connections: &[Connection]) -> Vec<String> {
    let mut hubs = Vec::new();
    for connection in connections {
        if !hubs.contains(&connection.hub) {
            hubs.push(connection.hub.clone());
        }
    }
    hubs
}

/// Whether a connection survives the relation-type/template whitelist.
///
/// An empty filter lets everything through. Otherwise the connection must
/// be typed, its type must be a filter key, and the counterpart's template
/// must be listed under that key.
fn passes_filter(
    filter: &BTreeMap<String, Vec<String>>,
    relation_type: Option<&str>,
    counterpart_template: Option<&str>,
) -> bool {
    if filter.is_empty() {
        return true;
    }
    let relation_type = match relation_type {
        Some(rt) => rt,
        None => return false,
    };
    let allowed = match filter.get(relation_type) {
        Some(allowed) => allowed,
        None => return false,
    };
    counterpart_template.map_or(false, |t| allowed.iter().any(|a| a == t))
}
