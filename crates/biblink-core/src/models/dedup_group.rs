use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type DedupId = Uuid;

/// A cluster of records believed to describe the same work.
///
/// Groups are never erased; a collapsed group is kept with `deleted` set and
/// an empty member list so its id stays stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupGroup {
    pub id: DedupId,

    #[serde(default)]
    pub member_ids: Vec<String>,

    #[serde(default)]
    pub deleted: bool,

    pub changed: DateTime<Utc>,
}

impl DedupGroup {
    pub fn new(first: impl Into<String>, second: impl Into<String>) -> Self {
        let mut group = Self {
            id: Uuid::now_v7(),
            member_ids: Vec::with_capacity(2),
            deleted: false,
            changed: Utc::now(),
        };
        group.add_member(first);
        group.add_member(second);
        group
    }

    pub fn contains(&self, id: &str) -> bool {
        self.member_ids.iter().any(|member| member == id)
    }

    pub fn len(&self) -> usize {
        self.member_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.member_ids.is_empty()
    }

    /// Adds a member and refreshes `changed`. Returns false if it was already present.
    pub fn add_member(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        self.touch();
        if self.contains(&id) {
            return false;
        }
        self.member_ids.push(id);
        true
    }

    /// Removes a member. Returns false (and leaves `changed` alone) if it was not present.
    pub fn remove_member(&mut self, id: &str) -> bool {
        let before = self.member_ids.len();
        self.member_ids.retain(|member| member != id);
        if self.member_ids.len() == before {
            return false;
        }
        self.touch();
        true
    }

    /// Removes a member and collapses the group when fewer than two remain.
    ///
    /// A collapsed group is marked deleted with no members; a lone member left
    /// behind is returned as the survivor.
    pub fn take_member(&mut self, id: &str) -> Removal {
        if !self.remove_member(id) {
            return Removal::default();
        }
        let mut removal = Removal {
            removed: true,
            ..Removal::default()
        };
        match self.member_ids.len() {
            0 => self.deleted = true,
            1 => {
                removal.survivor = self.member_ids.pop();
                self.deleted = true;
            }
            _ => removal.remaining = self.member_ids.clone(),
        }
        removal
    }

    pub fn touch(&mut self) {
        self.changed = Utc::now();
    }
}

/// What [`DedupGroup::take_member`] did to a group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Removal {
    pub removed: bool,
    /// The only member left when the group collapsed.
    pub survivor: Option<String>,
    /// Members of a group that is still live.
    pub remaining: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_group_has_both_members() {
        let group = DedupGroup::new("a.1", "b.1");
        assert_eq!(group.member_ids, vec!["a.1", "b.1"]);
        assert!(!group.deleted);
    }

    #[test]
    fn test_new_group_with_same_id_twice_has_one_member() {
        let group = DedupGroup::new("a.1", "a.1");
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn test_add_member_is_idempotent_but_refreshes_changed() {
        let mut group = DedupGroup::new("a.1", "b.1");
        let before = group.changed;
        std::thread::sleep(std::time::Duration::from_millis(2));

        assert!(!group.add_member("a.1"));
        assert_eq!(group.len(), 2);
        assert!(group.changed > before);

        assert!(group.add_member("c.1"));
        assert_eq!(group.len(), 3);
    }

    #[test]
    fn test_take_member_collapses_pair() {
        let mut group = DedupGroup::new("a.1", "b.1");
        let removal = group.take_member("a.1");
        assert!(removal.removed);
        assert_eq!(removal.survivor.as_deref(), Some("b.1"));
        assert!(group.deleted);
        assert!(group.is_empty());
    }

    #[test]
    fn test_take_member_keeps_larger_group() {
        let mut group = DedupGroup::new("a.1", "b.1");
        group.add_member("c.1");
        let removal = group.take_member("b.1");
        assert_eq!(removal.remaining, vec!["a.1", "c.1"]);
        assert_eq!(removal.survivor, None);
        assert!(!group.deleted);

        assert_eq!(group.take_member("x.1"), Removal::default());
        assert_eq!(group.len(), 2);
    }

    #[test]
    fn test_remove_member() {
        let mut group = DedupGroup::new("a.1", "b.1");
        assert!(group.remove_member("a.1"));
        assert!(!group.remove_member("a.1"));
        assert_eq!(group.member_ids, vec!["b.1"]);
    }
}
