//! Game objects: tree nodes owning components and child entities.
//!
//! A game object never holds references to other objects, only ids; the
//! scene registry is the single place entities live. Cross-component
//! collaboration goes through `component(kind)` lookups on the owning
//! entity: composition plus capability lookup instead of a class
//! hierarchy.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::component::{Component, ComponentKind, ComponentSnapshot};
use crate::error::GameError;
use crate::identity::{ComponentId, ConnectionId, EntityId};

/// Creation data for a game object. The id is minted when absent; the
/// parent may not exist yet at creation time and is resolved once it
/// registers.
#[derive(Debug, Clone, Default)]
pub struct GameObjectSeed {
    pub id: Option<EntityId>,
    pub label: Option<String>,
    pub parent: Option<EntityId>,
    pub tags: Vec<String>,
}

impl GameObjectSeed {
    pub fn with_tags(tags: &[&str]) -> Self {
        Self {
            tags: tags.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn child_of(parent: EntityId, tags: &[&str]) -> Self {
        Self {
            parent: Some(parent),
            ..Self::with_tags(tags)
        }
    }
}

/// Wire snapshot of an entity subtree, used for spawn and late-join resync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySnapshot {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<EntityId>,
    pub tags: Vec<String>,
    pub components: Vec<ComponentSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<EntitySnapshot>>,
}

/// An entity: identity, tags, tree links, and one component per kind.
#[derive(Debug)]
pub struct GameObject {
    id: EntityId,
    label: Option<String>,
    tags: BTreeSet<String>,
    parent: Option<EntityId>,
    children: Vec<EntityId>,
    components: Vec<Component>,
}

impl GameObject {
    /// Builds an entity from already-constructed components. Rejects a
    /// second component of a kind the entity already carries.
    pub fn new(seed: GameObjectSeed, components: Vec<Component>) -> Result<Self, GameError> {
        let mut kinds = BTreeSet::new();
        for component in &components {
            if !kinds.insert(component.kind()) {
                return Err(GameError::DuplicateComponent(
                    component.kind().as_str().to_string(),
                ));
            }
        }

        Ok(Self {
            id: seed.id.unwrap_or_else(EntityId::new_unique),
            label: seed.label,
            tags: seed.tags.into_iter().collect(),
            parent: seed.parent,
            children: Vec::new(),
            components,
        })
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.tags.iter().map(|t| t.as_str())
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn parent(&self) -> Option<EntityId> {
        self.parent
    }

    pub(crate) fn set_parent(&mut self, parent: Option<EntityId>) {
        self.parent = parent;
    }

    pub fn children(&self) -> &[EntityId] {
        &self.children
    }

    pub(crate) fn link_child(&mut self, child: EntityId) -> bool {
        if self.children.contains(&child) {
            return false;
        }
        self.children.push(child);
        true
    }

    pub(crate) fn unlink_child(&mut self, child: EntityId) -> bool {
        let before = self.children.len();
        self.children.retain(|id| *id != child);
        self.children.len() != before
    }

    pub fn component(&self, kind: ComponentKind) -> Option<&Component> {
        self.components.iter().find(|c| c.kind() == kind)
    }

    pub fn component_mut(&mut self, kind: ComponentKind) -> Option<&mut Component> {
        self.components.iter_mut().find(|c| c.kind() == kind)
    }

    pub fn component_by_id(&self, id: ComponentId) -> Option<&Component> {
        self.components.iter().find(|c| c.id() == id)
    }

    pub fn component_by_id_mut(&mut self, id: ComponentId) -> Option<&mut Component> {
        self.components.iter_mut().find(|c| c.id() == id)
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn components_mut(&mut self) -> &mut [Component] {
        &mut self.components
    }

    pub fn has_component(&self, kind: ComponentKind) -> bool {
        self.component(kind).is_some()
    }

    /// Authoritative owner, read from the network object component.
    pub fn owner_id(&self) -> Option<ConnectionId> {
        self.component(ComponentKind::NetworkObject)
            .and_then(|c| c.owner_id())
    }

    /// Serializes id/tags/parent/components; children are attached by the
    /// scene, which owns them.
    pub fn snapshot(&self, role: crate::identity::Role) -> EntitySnapshot {
        EntitySnapshot {
            id: self.id,
            label: self.label.clone(),
            parent: self.parent,
            tags: self.tags.iter().cloned().collect(),
            components: self.components.iter().map(|c| c.snapshot(role)).collect(),
            children: None,
        }
    }
}
