//! Seniority ordering of preferred classes.

use crate::domain::{ClassId, SecurityClass};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::error::{CapTableError, CapTableResult};

/// Sort key for a seniority group; smaller keys are paid first.
///
/// Explicit ranks sort ahead of implicit ones. Implicit keys count rounds
/// back from the latest round, so the most recent series is most senior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum SeniorityKey {
    Explicit(u32),
    RoundsFromLatest(usize),
}

/// Classes that share a seniority and are paid pari passu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeniorityGroup {
    pub key: SeniorityKey,
    pub class_ids: Vec<ClassId>,
}

/// Preferred classes grouped by seniority, most senior first.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceStack {
    pub groups: Vec<SeniorityGroup>,
}

impl PreferenceStack {
    /// Order every preferred class by seniority and group ties.
    ///
    /// # Errors
    /// `InputValidation` when there are no classes, no common-equivalent
    /// shares to receive residual proceeds, duplicate ids, a preferred class
    /// with neither a rank nor an originating round, or classes sharing an
    /// explicit rank without all being marked pari passu.
    pub fn resolve(classes: &[SecurityClass]) -> CapTableResult<Self> {
        if classes.is_empty() {
            return Err(CapTableError::invalid(
                "at least one security class is required",
            ));
        }
        let mut ids = BTreeSet::new();
        for class in classes {
            if !ids.insert(&class.id) {
                return Err(CapTableError::invalid(format!(
                    "duplicate security class id {}",
                    class.id
                )));
            }
        }
        if !classes
            .iter()
            .any(|c| c.is_common_equivalent() && c.shares_outstanding() > 0)
        {
            return Err(CapTableError::invalid(
                "at least one common, option pool or warrant class with shares is required",
            ));
        }

        let latest_round = classes
            .iter()
            .filter(|c| c.is_preferred() && c.seniority_rank.is_none())
            .filter_map(|c| c.round_index)
            .max()
            .unwrap_or(0);

        let mut by_key: BTreeMap<SeniorityKey, Vec<&SecurityClass>> = BTreeMap::new();
        for class in classes.iter().filter(|c| c.is_preferred()) {
            let key = match (class.seniority_rank, class.round_index) {
                (Some(rank), _) => SeniorityKey::Explicit(rank),
                (None, Some(index)) => SeniorityKey::RoundsFromLatest(latest_round - index),
                (None, None) => {
                    return Err(CapTableError::invalid(format!(
                        "class {} needs a seniority rank or an originating round",
                        class.id
                    )))
                }
            };
            by_key.entry(key).or_default().push(class);
        }

        let mut groups = Vec::with_capacity(by_key.len());
        for (key, members) in by_key {
            if let SeniorityKey::Explicit(rank) = key {
                if members.len() > 1 && members.iter().any(|c| !c.pari_passu) {
                    let names: Vec<&str> = members.iter().map(|c| c.id.as_str()).collect();
                    return Err(CapTableError::invalid(format!(
                        "classes {} share seniority rank {} but are not all marked pari passu",
                        names.join(", "),
                        rank
                    )));
                }
            }
            groups.push(SeniorityGroup {
                key,
                class_ids: members.into_iter().map(|c| c.id.clone()).collect(),
            });
        }

        Ok(Self { groups })
    }

    pub fn groups(&self) -> &[SeniorityGroup] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Index of the group a class belongs to, if it is in the stack.
    pub fn group_of(&self, id: &ClassId) -> Option<usize> {
        self.groups
            .iter()
            .position(|g| g.class_ids.iter().any(|c| c == id))
    }
}
