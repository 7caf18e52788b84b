//! Namespace whitelist and payload shaping for outbound sync.
//!
//! Only a closed set of namespaces ever leaves the instance; change-log
//! entries for anything else (migrations, settings, sessions, ...) are
//! dropped at the dispatch boundary by [`Namespace::parse`] returning
//! `None`.
//!
//! For the namespaces that do sync, [`SyncFilter`] decides per record
//! whether it leaves at all and what shape it leaves in, driven by the
//! stored [`SyncFilters`] configuration:
//!
//! - a template syncs iff its id is a key of `templates`, with its
//!   properties pruned to the whitelisted property ids
//! - an entity syncs iff its template is whitelisted, with metadata pruned
//!   to the names of the whitelisted properties
//! - a dictionary syncs iff some whitelisted select property references it
//! - a relation type syncs iff listed in `relationtypes` or referenced by
//!   a whitelisted relationship property
//! - a connection syncs iff its relation type is listed, or any language
//!   edition of its entity carries a whitelisted template
//!
//! An empty property list under a template id therefore whitelists the
//! template itself and nothing through it.

use std::collections::BTreeSet;

use anyhow::Result;

use crate::models::{Property, PropertyKind, SyncFilters};
use crate::store::Store;

/// The namespaces eligible for sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Templates,
    Dictionaries,
    Entities,
    Connections,
    RelationTypes,
}

impl Namespace {
    /// Map a change-log namespace onto the closed sync set. Anything
    /// unlisted is not syncable.
    pub fn parse(namespace: &str) -> Option<Self> {
        match namespace {
            "templates" => Some(Namespace::Templates),
            "dictionaries" => Some(Namespace::Dictionaries),
            "entities" => Some(Namespace::Entities),
            "connections" => Some(Namespace::Connections),
            "relationtypes" => Some(Namespace::RelationTypes),
            _ => None,
        }
    }

    /// Wire name, as the peer expects it.
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::Templates => "templates",
            Namespace::Dictionaries => "dictionaries",
            Namespace::Entities => "entities",
            Namespace::Connections => "connections",
            Namespace::RelationTypes => "relationtypes",
        }
    }
}

/// Applies the stored whitelist to individual records.
pub struct SyncFilter<'a> {
    store: &'a dyn Store,
    filters: &'a SyncFilters,
}

impl<'a> SyncFilter<'a> {
    pub fn new(store: &'a dyn Store, filters: &'a SyncFilters) -> Self {
        Self { store, filters }
    }

    /// Outbound payload for an upserted record, or `None` when the
    /// whitelist keeps it (or a record that no longer exists) home.
    pub async fn payload(
        &self,
        namespace: Namespace,
        record_id: &str,
    ) -> Result<Option<serde_json::Value>> {
        match namespace {
            Namespace::Templates => self.template_payload(record_id).await,
            Namespace::Dictionaries => self.dictionary_payload(record_id).await,
            Namespace::Entities => self.entity_payload(record_id).await,
            Namespace::Connections => self.connection_payload(record_id).await,
            Namespace::RelationTypes => self.relation_type_payload(record_id).await,
        }
    }

    /// Every property whitelisted under any template, resolved to its
    /// definition.
    async fn whitelisted_properties(&self) -> Result<Vec<Property>> {
        let mut properties = Vec::new();
        for (template_id, allowed) in &self.filters.templates {
            let template = match self.store.template(template_id).await? {
                Some(t) => t,
                None => continue,
            };
            properties.extend(
                template
                    .properties
                    .into_iter()
                    .filter(|p| allowed.contains(&p.id)),
            );
        }
        Ok(properties)
    }

    async fn template_payload(&self, id: &str) -> Result<Option<serde_json::Value>> {
        let allowed = match self.filters.templates.get(id) {
            Some(allowed) => allowed,
            None => return Ok(None),
        };
        let mut template = match self.store.template(id).await? {
            Some(t) => t,
            None => return Ok(None),
        };
        template.properties.retain(|p| allowed.contains(&p.id));
        Ok(Some(serde_json::to_value(template)?))
    }

    async fn dictionary_payload(&self, id: &str) -> Result<Option<serde_json::Value>> {
        let referenced = self.whitelisted_properties().await?.iter().any(|p| {
            matches!(p.kind, PropertyKind::Select | PropertyKind::MultiSelect)
                && p.content.as_deref() == Some(id)
        });
        if !referenced {
            return Ok(None);
        }
        Ok(match self.store.dictionary(id).await? {
            Some(dictionary) => Some(serde_json::to_value(dictionary)?),
            None => None,
        })
    }

    async fn relation_type_payload(&self, id: &str) -> Result<Option<serde_json::Value>> {
        let listed = self.filters.relationtypes.iter().any(|r| r == id);
        let referenced = listed
            || self.whitelisted_properties().await?.iter().any(|p| {
                p.kind == PropertyKind::Relationship && p.content.as_deref() == Some(id)
            });
        if !referenced {
            return Ok(None);
        }
        Ok(match self.store.relation_type(id).await? {
            Some(relation_type) => Some(serde_json::to_value(relation_type)?),
            None => None,
        })
    }

    async fn entity_payload(&self, id: &str) -> Result<Option<serde_json::Value>> {
        let mut entity = match self.store.entity_by_id(id).await? {
            Some(e) => e,
            None => return Ok(None),
        };
        let template_id = match &entity.template {
            Some(t) => t.clone(),
            None => return Ok(None),
        };
        let allowed = match self.filters.templates.get(&template_id) {
            Some(allowed) => allowed,
            None => return Ok(None),
        };
        let allowed_names: BTreeSet<String> = match self.store.template(&template_id).await? {
            Some(template) => template
                .properties
                .into_iter()
                .filter(|p| allowed.contains(&p.id))
                .map(|p| p.name)
                .collect(),
            None => BTreeSet::new(),
        };
        entity.metadata.retain(|name, _| allowed_names.contains(name));
        Ok(Some(serde_json::to_value(entity)?))
    }

    async fn connection_payload(&self, id: &str) -> Result<Option<serde_json::Value>> {
        let connection = match self.store.connection(id).await? {
            Some(c) => c,
            None => return Ok(None),
        };
        let by_type = connection
            .template
            .as_ref()
            .map_or(false, |t| self.filters.relationtypes.contains(t));
        let by_entity = if by_type {
            true
        } else {
            self.store
                .entity_editions(&connection.entity)
                .await?
                .iter()
                .any(|e| {
                    e.template
                        .as_ref()
                        .map_or(false, |t| self.filters.templates.contains_key(t))
                })
        };
        if !(by_type || by_entity) {
            return Ok(None);
        }
        Ok(Some(serde_json::to_value(connection)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_parse_is_a_closed_set() {
        assert_eq!(Namespace::parse("templates"), Some(Namespace::Templates));
        assert_eq!(Namespace::parse("connections"), Some(Namespace::Connections));
        assert_eq!(Namespace::parse("migrations"), None);
        assert_eq!(Namespace::parse("settings"), None);
        assert_eq!(Namespace::parse("sessions"), None);
        assert_eq!(Namespace::parse(""), None);
    }

    #[test]
    fn test_namespace_wire_names_round_trip() {
        for ns in [
            Namespace::Templates,
            Namespace::Dictionaries,
            Namespace::Entities,
            Namespace::Connections,
            Namespace::RelationTypes,
        ] {
            assert_eq!(Namespace::parse(ns.as_str()), Some(ns));
        }
    }
}
