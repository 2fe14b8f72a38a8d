//! Engine-side membership groups.
//!
//! Every sync references a group that binds databases to roles. Group names
//! are derived, never stored:
//!
//! - bidirectional syncs use the fixed name `bg_<sync>`;
//! - source/target syncs use `sg_<sync>_<hash>`, where `<hash>` is the first
//!   four bytes (hex) of the SHA-256 of the sorted, role-annotated member list.
//!
//! Unchanged membership therefore always maps to the same group, and any
//! membership edit on a source/target sync maps to a different one.

use crate::model::{Membership, SyncSpec, engine_db_name};
use sha2::{Digest, Sha256};
use std::fmt;

/// Role of a database inside a membership group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    Source,
    Target,
}

impl Role {
    /// The engine's name for the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Source => "source",
            Role::Target => "target",
        }
    }
}

/// One database/role pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupMember {
    pub db_id: i64,
    pub role: Role,
}

impl fmt::Display for GroupMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", engine_db_name(self.db_id), self.role.as_str())
    }
}

/// A named membership group computed for a sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipGroup {
    /// Deterministic group name.
    pub name: String,
    /// Members in declaration order (sources before targets).
    pub members: Vec<GroupMember>,
}

impl MembershipGroup {
    /// Computes the group for a sync, or `None` if its membership is incomplete.
    pub fn for_sync(sync: &SyncSpec) -> Option<Self> {
        match sync.membership()? {
            Membership::Bidirectional(participants) => Some(Self {
                name: format!("bg_{}", sync.name),
                // Every participant is a source in a multi-master group.
                members: participants
                    .iter()
                    .map(|&db_id| GroupMember {
                        db_id,
                        role: Role::Source,
                    })
                    .collect(),
            }),
            Membership::SourceTarget { sources, targets } => {
                let members: Vec<GroupMember> = sources
                    .iter()
                    .map(|&db_id| GroupMember {
                        db_id,
                        role: Role::Source,
                    })
                    .chain(targets.iter().map(|&db_id| GroupMember {
                        db_id,
                        role: Role::Target,
                    }))
                    .collect();
                let name = format!("sg_{}_{}", sync.name, content_hash(&members));
                Some(Self { name, members })
            }
        }
    }

    /// Members rendered as engine arguments (`db1:source`).
    pub fn member_args(&self) -> Vec<String> {
        self.members.iter().map(ToString::to_string).collect()
    }
}

fn content_hash(members: &[GroupMember]) -> String {
    let mut rendered: Vec<String> = members.iter().map(ToString::to_string).collect();
    rendered.sort();
    let digest = Sha256::digest(rendered.join(",").as_bytes());
    hex::encode(&digest[..4])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source_target(name: &str, sources: Vec<i64>, targets: Vec<i64>) -> SyncSpec {
        SyncSpec {
            name: name.into(),
            sources,
            targets,
            tables: Some("t".into()),
            ..Default::default()
        }
    }

    #[test]
    fn bidirectional_group_has_fixed_name() {
        let sync = SyncSpec {
            name: "mm".into(),
            bidirectional: vec![1, 2, 3],
            ..Default::default()
        };
        let group = MembershipGroup::for_sync(&sync).unwrap();
        assert_eq!(group.name, "bg_mm");
        assert_eq!(
            group.member_args(),
            vec!["db1:source", "db2:source", "db3:source"]
        );
    }

    #[test]
    fn source_target_group_is_content_addressed() {
        let group = MembershipGroup::for_sync(&source_target("A", vec![1], vec![2])).unwrap();
        assert!(group.name.starts_with("sg_A_"));
        assert_eq!(group.name.len(), "sg_A_".len() + 8);
        assert_eq!(group.member_args(), vec!["db1:source", "db2:target"]);
    }

    #[test]
    fn group_name_ignores_declaration_order() {
        let a = MembershipGroup::for_sync(&source_target("A", vec![1, 3], vec![2, 4])).unwrap();
        let b = MembershipGroup::for_sync(&source_target("A", vec![3, 1], vec![4, 2])).unwrap();
        assert_eq!(a.name, b.name);
    }

    #[test]
    fn group_name_tracks_roles() {
        let a = MembershipGroup::for_sync(&source_target("A", vec![1], vec![2])).unwrap();
        let b = MembershipGroup::for_sync(&source_target("A", vec![2], vec![1])).unwrap();
        assert_ne!(a.name, b.name);
    }

    #[test]
    fn incomplete_membership_has_no_group() {
        assert!(MembershipGroup::for_sync(&source_target("A", vec![1], vec![])).is_none());
    }
}
