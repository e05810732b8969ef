use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use super::EventKey;

/// The four DCR relation kinds an event can have towards other events.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, strum::AsRefStr, strum::EnumString, strum::EnumIter)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RelationKind {
    /// Target must be executed (or excluded) before the source may execute.
    Condition,
    /// Target becomes pending when the source executes.
    Response,
    /// Target becomes included when the source executes.
    Inclusion,
    /// Target becomes excluded when the source executes.
    Exclusion,
}

/// A relation endpoint: target identity plus the address of the node hosting it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RelationTarget {
    pub key: EventKey,
    /// Base URI of the node hosting the target.
    pub uri: String,
    /// Roles configured on the target, carried for display only.
    #[serde(default)]
    pub roles: BTreeSet<String>,
}

impl RelationTarget {
    pub fn new(
        key: EventKey,
        uri: impl Into<String>,
    ) -> Self {
        Self {
            key,
            uri: uri.into(),
            roles: BTreeSet::new(),
        }
    }
}

/// Set of relation targets, deduplicated and ordered by target identity.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationSet {
    targets: BTreeMap<EventKey, RelationTarget>,
}

impl RelationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a target; returns `false` and leaves the set unchanged if the identity is already present.
    pub fn insert(
        &mut self,
        target: RelationTarget,
    ) -> bool {
        if self.targets.contains_key(&target.key) {
            return false;
        }
        self.targets.insert(target.key.clone(), target);
        true
    }

    /// Removes a target by identity; returns whether it was present.
    pub fn remove(
        &mut self,
        key: &EventKey,
    ) -> bool {
        self.targets.remove(key).is_some()
    }

    pub fn contains(
        &self,
        key: &EventKey,
    ) -> bool {
        self.targets.contains_key(key)
    }

    pub fn get(
        &self,
        key: &EventKey,
    ) -> Option<&RelationTarget> {
        self.targets.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RelationTarget> {
        self.targets.values()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

impl FromIterator<RelationTarget> for RelationSet {
    fn from_iter<I: IntoIterator<Item = RelationTarget>>(iter: I) -> Self {
        let mut set = RelationSet::new();
        for target in iter {
            set.insert(target);
        }
        set
    }
}

/// The four outgoing relation sets of an event.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct Relations {
    #[serde(default)]
    pub conditions: RelationSet,
    #[serde(default)]
    pub responses: RelationSet,
    #[serde(default)]
    pub inclusions: RelationSet,
    #[serde(default)]
    pub exclusions: RelationSet,
}

impl Relations {
    pub fn get(
        &self,
        kind: RelationKind,
    ) -> &RelationSet {
        match kind {
            RelationKind::Condition => &self.conditions,
            RelationKind::Response => &self.responses,
            RelationKind::Inclusion => &self.inclusions,
            RelationKind::Exclusion => &self.exclusions,
        }
    }

    pub fn get_mut(
        &mut self,
        kind: RelationKind,
    ) -> &mut RelationSet {
        match kind {
            RelationKind::Condition => &mut self.conditions,
            RelationKind::Response => &mut self.responses,
            RelationKind::Inclusion => &mut self.inclusions,
            RelationKind::Exclusion => &mut self.exclusions,
        }
    }

    /// Deduplicated union of all targets across the four sets, minus `owner` itself,
    /// in ascending identity order. This is the peer part of the relation-to-lock set.
    pub fn lock_targets(
        &self,
        owner: &EventKey,
    ) -> Vec<&RelationTarget> {
        let mut seen = BTreeMap::new();
        for kind in RelationKind::iter() {
            for target in self.get(kind).iter() {
                if &target.key != owner {
                    seen.entry(&target.key).or_insert(target);
                }
            }
        }
        seen.into_values().collect()
    }
}
