use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use crate::{
    DcrError, Result,
    graph::{EventKey, EventState, Marking, RelationKind, RelationTarget, Relations},
};

/// A relation endpoint as supplied by graph import tooling.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationModel {
    pub workflow_id: String,
    pub event_id: String,
    /// Base URI of the node hosting the target event.
    pub uri: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl RelationModel {
    pub fn key(&self) -> EventKey {
        EventKey::new(self.workflow_id.clone(), self.event_id.clone())
    }

    pub fn to_target(&self) -> RelationTarget {
        RelationTarget {
            key: self.key(),
            uri: self.uri.clone(),
            roles: self.roles.iter().cloned().collect(),
        }
    }
}

fn default_included() -> bool {
    true
}

/// Initial configuration of one event node: identity, roles, initial marking and relations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDefinition {
    pub workflow_id: String,
    pub event_id: String,
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub executed: bool,
    #[serde(default = "default_included")]
    pub included: bool,
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub conditions: Vec<RelationModel>,
    #[serde(default)]
    pub responses: Vec<RelationModel>,
    #[serde(default)]
    pub inclusions: Vec<RelationModel>,
    #[serde(default)]
    pub exclusions: Vec<RelationModel>,
}

impl EventDefinition {
    /// Parses a definition, validating it against [`EventDefinition::schema`] first.
    pub fn from_json(s: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(s)?;
        jsonschema::validate(&Self::schema(), &value)?;
        let definition = serde_json::from_value::<Self>(value)?;
        Ok(definition)
    }

    pub fn schema() -> serde_json::Value {
        let relations = serde_json::json!({
            "type": "array",
            "items": {
                "type": "object",
                "required": ["workflow_id", "event_id", "uri"],
                "properties": {
                    "workflow_id": { "type": "string", "minLength": 1 },
                    "event_id": { "type": "string", "minLength": 1 },
                    "uri": { "type": "string", "minLength": 1 },
                    "roles": { "type": "array", "items": { "type": "string" } }
                }
            }
        });
        serde_json::json!({
            "type": "object",
            "required": ["workflow_id", "event_id", "name"],
            "properties": {
                "workflow_id": { "type": "string", "minLength": 1 },
                "event_id": { "type": "string", "minLength": 1 },
                "name": { "type": "string" },
                "roles": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Roles allowed to execute the event"
                },
                "executed": { "type": "boolean" },
                "included": { "type": "boolean" },
                "pending": { "type": "boolean" },
                "conditions": relations,
                "responses": relations,
                "inclusions": relations,
                "exclusions": relations
            }
        })
    }

    pub fn key(&self) -> EventKey {
        EventKey::new(self.workflow_id.clone(), self.event_id.clone())
    }

    pub fn marking(&self) -> Marking {
        Marking::new(self.executed, self.included, self.pending)
    }

    pub fn relations(
        &self,
        kind: RelationKind,
    ) -> &[RelationModel] {
        match kind {
            RelationKind::Condition => &self.conditions,
            RelationKind::Response => &self.responses,
            RelationKind::Inclusion => &self.inclusions,
            RelationKind::Exclusion => &self.exclusions,
        }
    }

    /// Structural checks that do not need the store.
    pub fn validate(&self) -> Result<()> {
        if self.workflow_id.trim().is_empty() {
            return Err(DcrError::Validation("missing workflow_id in event definition".into()));
        }
        if self.event_id.trim().is_empty() {
            return Err(DcrError::Validation("missing event_id in event definition".into()));
        }
        for kind in RelationKind::iter() {
            for relation in self.relations(kind) {
                if relation.workflow_id.trim().is_empty() || relation.event_id.trim().is_empty() {
                    return Err(DcrError::Validation(format!("{} relation of {} has an empty target id", kind.as_ref(), self.key())));
                }
                if relation.uri.trim().is_empty() {
                    return Err(DcrError::Validation(format!("{} relation of {} to {} has no uri", kind.as_ref(), self.key(), relation.key())));
                }
            }
        }
        Ok(())
    }

    /// Builds the initial state of the node hosting this event at `uri`.
    /// Duplicate targets within one relation list collapse to the first occurrence.
    pub fn to_state(
        &self,
        uri: &str,
    ) -> Result<EventState> {
        self.validate()?;
        let mut relations = Relations::default();
        for kind in RelationKind::iter() {
            *relations.get_mut(kind) = self.relations(kind).iter().map(RelationModel::to_target).collect();
        }
        Ok(EventState {
            key: self.key(),
            name: self.name.clone(),
            uri: uri.to_string(),
            roles: self.roles.iter().cloned().collect(),
            marking: self.marking(),
            initial: self.marking(),
            lock: None,
            relations,
        })
    }
}
