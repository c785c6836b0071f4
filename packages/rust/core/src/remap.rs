//! Share/edit permission remapping from source identifiers to target identifiers.
//!
//! Dashboards and filters carry the same permission entry shape, so both
//! pipelines go through [`remap_permissions`]. Entries whose referenced entity
//! has no counterpart on the target are dropped with a warning; everything
//! else keeps its relative order.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::reference::TargetReferences;

// ---------------------------------------------------------------------------
// Source-side entries
// ---------------------------------------------------------------------------

/// A share or edit permission entry as returned by the source instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourcePermission {
    /// Holder kind: `project`, `group`, `user`, `loggedin`, ...
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<ProjectRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<UserRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectRef {
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupRef {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserRef {
    #[serde(default, rename = "accountId")]
    pub account_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Target-side entries
// ---------------------------------------------------------------------------

/// A permission entry ready to be sent to the target instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TargetPermission {
    Project { project: IdRef },
    Group { group: GroupIdRef },
    User { user: AccountRef },
    Authenticated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdRef {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupIdRef {
    #[serde(rename = "groupId")]
    pub group_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountRef {
    #[serde(rename = "accountId")]
    pub account_id: String,
}

/// Which permission list is being remapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionScope {
    Share,
    Edit,
}

impl std::fmt::Display for PermissionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionScope::Share => f.write_str("share"),
            PermissionScope::Edit => f.write_str("edit"),
        }
    }
}

// ---------------------------------------------------------------------------
// Remap result
// ---------------------------------------------------------------------------

/// Why an entry did not make it into the target list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The referenced project/group does not exist on the target.
    NoTargetMatch,
    /// The entry lacks the identifier its kind needs.
    MissingIdentifier,
    /// Logged-in-users holders are only valid for sharing.
    NotAllowedForEdit,
    /// Holder kind the remapper does not handle.
    UnsupportedKind,
}

/// An entry removed during remapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedPermission {
    pub kind: String,
    /// Natural key that was looked up, when there was one.
    pub key: Option<String>,
    pub reason: DropReason,
}

/// Output of [`remap_permissions`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemapResult {
    pub permissions: Vec<TargetPermission>,
    pub dropped: Vec<DroppedPermission>,
}

/// Rewrite every entry's identifier to the target's equivalent.
///
/// - `project` → looked up by key
/// - `group` → looked up by name
/// - `user` → account id passed through (same identity provider on both sides)
/// - `loggedin` / `authenticated` → `authenticated` (share scope only)
/// - anything else → dropped
pub fn remap_permissions(
    entries: &[SourcePermission],
    refs: &TargetReferences,
    scope: PermissionScope,
) -> RemapResult {
    let mut result = RemapResult::default();

    for entry in entries {
        match remap_one(entry, refs, scope) {
            Ok(permission) => result.permissions.push(permission),
            Err(dropped) => {
                match (&dropped.reason, &dropped.key) {
                    (DropReason::NoTargetMatch, Some(key)) => warn!(
                        kind = %dropped.kind, %scope,
                        "{} '{key}' not found in target instance, skipping permission", dropped.kind
                    ),
                    (DropReason::NotAllowedForEdit, _) => warn!(
                        kind = %dropped.kind, %scope,
                        "logged-in users cannot hold edit permissions, skipping permission"
                    ),
                    (DropReason::UnsupportedKind, _) => warn!(
                        kind = %dropped.kind, %scope,
                        "unsupported {scope} permission type '{}', skipping permission", dropped.kind
                    ),
                    _ => warn!(
                        kind = %dropped.kind, %scope,
                        "{} permission has no identifier, skipping permission", dropped.kind
                    ),
                }
                result.dropped.push(dropped);
            }
        }
    }

    result
}

fn remap_one(
    entry: &SourcePermission,
    refs: &TargetReferences,
    scope: PermissionScope,
) -> Result<TargetPermission, DroppedPermission> {
    let drop = |key: Option<&str>, reason| DroppedPermission {
        kind: entry.kind.clone(),
        key: key.map(str::to_string),
        reason,
    };

    match entry.kind.as_str() {
        "project" => {
            let key = entry
                .project
                .as_ref()
                .and_then(|p| p.key.as_deref())
                .ok_or_else(|| drop(None, DropReason::MissingIdentifier))?;
            let id = refs
                .projects
                .lookup(key)
                .ok_or_else(|| drop(Some(key), DropReason::NoTargetMatch))?;
            Ok(TargetPermission::Project {
                project: IdRef { id: id.to_string() },
            })
        }
        "group" => {
            let name = entry
                .group
                .as_ref()
                .and_then(|g| g.name.as_deref())
                .ok_or_else(|| drop(None, DropReason::MissingIdentifier))?;
            let group_id = refs
                .groups
                .lookup(name)
                .ok_or_else(|| drop(Some(name), DropReason::NoTargetMatch))?;
            Ok(TargetPermission::Group {
                group: GroupIdRef {
                    group_id: group_id.to_string(),
                },
            })
        }
        "user" => {
            let account_id = entry
                .user
                .as_ref()
                .and_then(|u| u.account_id.as_deref())
                .filter(|id| !id.is_empty())
                .ok_or_else(|| drop(None, DropReason::MissingIdentifier))?;
            Ok(TargetPermission::User {
                user: AccountRef {
                    account_id: account_id.to_string(),
                },
            })
        }
        "loggedin" | "authenticated" => match scope {
            PermissionScope::Share => Ok(TargetPermission::Authenticated),
            PermissionScope::Edit => Err(drop(None, DropReason::NotAllowedForEdit)),
        },
        _ => Err(drop(None, DropReason::UnsupportedKind)),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::reference::ReferenceTable;

    fn refs() -> TargetReferences {
        TargetReferences {
            projects: ReferenceTable::from_records(
                "project",
                &[json!({"key": "OPS", "id": "20001"})],
                "key",
                "id",
            ),
            groups: ReferenceTable::from_records(
                "group",
                &[json!({"name": "support", "groupId": "g-7"})],
                "name",
                "groupId",
            ),
        }
    }

    fn parse(value: serde_json::Value) -> Vec<SourcePermission> {
        serde_json::from_value(value).expect("source permissions")
    }

    #[test]
    fn maps_every_supported_kind() {
        let entries = parse(json!([
            {"type": "project", "project": {"id": "100", "key": "OPS"}},
            {"type": "group", "group": {"name": "support", "groupId": "old"}},
            {"type": "user", "user": {"accountId": "5b10ac8d82e05b22cc7d4ef5"}},
            {"type": "loggedin"}
        ]));

        let result = remap_permissions(&entries, &refs(), PermissionScope::Share);
        assert!(result.dropped.is_empty());

        let json = serde_json::to_value(&result.permissions).unwrap();
        assert_eq!(
            json,
            json!([
                {"type": "project", "project": {"id": "20001"}},
                {"type": "group", "group": {"groupId": "g-7"}},
                {"type": "user", "user": {"accountId": "5b10ac8d82e05b22cc7d4ef5"}},
                {"type": "authenticated"}
            ])
        );
    }

    #[test]
    fn unmatched_project_is_dropped_and_order_preserved() {
        let entries = parse(json!([
            {"type": "group", "group": {"name": "support"}},
            {"type": "project", "project": {"key": "ABC"}},
            {"type": "user", "user": {"accountId": "acc-1"}}
        ]));

        let result = remap_permissions(&entries, &refs(), PermissionScope::Share);
        assert_eq!(result.permissions.len(), 2);
        assert!(matches!(result.permissions[0], TargetPermission::Group { .. }));
        assert!(matches!(result.permissions[1], TargetPermission::User { .. }));
        assert_eq!(
            result.dropped,
            vec![DroppedPermission {
                kind: "project".into(),
                key: Some("ABC".into()),
                reason: DropReason::NoTargetMatch,
            }]
        );
    }

    #[test]
    fn unmatched_group_is_dropped() {
        let entries = parse(json!([{"type": "group", "group": {"name": "ghosts"}}]));
        let result = remap_permissions(&entries, &refs(), PermissionScope::Edit);
        assert!(result.permissions.is_empty());
        assert_eq!(result.dropped[0].key.as_deref(), Some("ghosts"));
    }

    #[test]
    fn user_without_account_is_dropped() {
        let entries = parse(json!([{"type": "user", "user": null}, {"type": "user"}]));
        let result = remap_permissions(&entries, &refs(), PermissionScope::Share);
        assert!(result.permissions.is_empty());
        assert!(
            result
                .dropped
                .iter()
                .all(|d| d.reason == DropReason::MissingIdentifier)
        );
    }

    #[test]
    fn logged_in_is_share_only() {
        let entries = parse(json!([{"type": "loggedin"}]));
        let share = remap_permissions(&entries, &refs(), PermissionScope::Share);
        assert_eq!(share.permissions, vec![TargetPermission::Authenticated]);

        let edit = remap_permissions(&entries, &refs(), PermissionScope::Edit);
        assert!(edit.permissions.is_empty());
        assert_eq!(edit.dropped[0].reason, DropReason::NotAllowedForEdit);
    }

    #[test]
    fn unknown_kinds_are_dropped() {
        let entries = parse(json!([{"type": "global"}, {"type": "projectRole"}]));
        let result = remap_permissions(&entries, &refs(), PermissionScope::Share);
        assert!(result.permissions.is_empty());
        assert_eq!(result.dropped.len(), 2);
        assert_eq!(result.dropped[1].kind, "projectRole");
        assert_eq!(result.dropped[1].reason, DropReason::UnsupportedKind);
    }
}
