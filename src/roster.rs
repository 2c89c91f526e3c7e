use crate::normalize::normalize_identifier;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::warn;

/// One enrollment as returned by the LMS roster endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RosterMember {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub login_id: Option<String>,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub sis_user_id: Option<String>,
    #[serde(default, deserialize_with = "opt_id_string")]
    pub integration_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub sortable_name: Option<String>,
}

impl RosterMember {
    /// First non-empty of name, short name, sortable name.
    pub fn display_name(&self) -> Option<String> {
        [&self.name, &self.short_name, &self.sortable_name]
            .into_iter()
            .flatten()
            .find(|s| !s.trim().is_empty())
            .cloned()
    }
}

fn json_scalar_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    json_scalar_string(&v).ok_or_else(|| serde::de::Error::custom("id must be a string or number"))
}

fn opt_id_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let v = Value::deserialize(deserializer)?;
    Ok(json_scalar_string(&v))
}

/// Normalized alias -> canonical roster id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentifierIndex {
    by_alias: HashMap<String, String>,
    collisions: usize,
}

impl IdentifierIndex {
    /// Single pass over the roster. An alias claimed by two members resolves
    /// to the later one.
    pub fn build(members: &[RosterMember]) -> Self {
        let mut by_alias: HashMap<String, String> = HashMap::new();
        let mut collisions = 0usize;
        for member in members {
            let canonical = member.id.clone();
            let candidates = [
                Some(member.id.as_str()),
                member.login_id.as_deref(),
                member.sis_user_id.as_deref(),
                member.integration_id.as_deref(),
            ];
            for candidate in candidates {
                let key = normalize_identifier(candidate);
                if key.is_empty() {
                    continue;
                }
                if let Some(previous) = by_alias.insert(key, canonical.clone()) {
                    if previous != canonical {
                        collisions += 1;
                    }
                }
            }
        }
        Self {
            by_alias,
            collisions,
        }
    }

    pub fn lookup(&self, identifier: &str) -> Option<&str> {
        self.by_alias
            .get(&normalize_identifier(Some(identifier)))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_alias.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_alias.is_empty()
    }

    /// Aliases that were reassigned from one member to another during build.
    pub fn collisions(&self) -> usize {
        self.collisions
    }
}

/// A roster together with its index, built once per load.
#[derive(Debug, Clone, Default)]
pub struct RosterSnapshot {
    members: Vec<RosterMember>,
    index: IdentifierIndex,
}

impl RosterSnapshot {
    pub fn new(members: Vec<RosterMember>) -> Self {
        let index = IdentifierIndex::build(&members);
        if index.collisions() > 0 {
            warn!(
                collisions = index.collisions(),
                "roster aliases shared by multiple members; later members win"
            );
        }
        Self { members, index }
    }

    pub fn members(&self) -> &[RosterMember] {
        &self.members
    }

    pub fn index(&self) -> &IdentifierIndex {
        &self.index
    }

    pub fn member(&self, canonical_id: &str) -> Option<&RosterMember> {
        self.members.iter().find(|m| m.id == canonical_id)
    }
}

/// Accepts either a bare array of members or `{ "members": [...] }`.
/// Entries that do not deserialize are skipped.
pub fn members_from_json(v: &Value) -> Option<Vec<RosterMember>> {
    let arr = v
        .as_array()
        .or_else(|| v.get("members").and_then(|m| m.as_array()))?;
    Some(
        arr.iter()
            .filter_map(|m| serde_json::from_value::<RosterMember>(m.clone()).ok())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn member(id: &str) -> RosterMember {
        RosterMember {
            id: id.to_string(),
            ..RosterMember::default()
        }
    }

    #[test]
    fn index_maps_every_alias_to_canonical_id() {
        let roster = vec![RosterMember {
            login_id: Some("jdoe".into()),
            sis_user_id: Some("  ABC123  ".into()),
            integration_id: Some("INT-9".into()),
            ..member("42")
        }];
        let index = IdentifierIndex::build(&roster);
        assert_eq!(index.len(), 4);
        assert_eq!(index.lookup("42"), Some("42"));
        assert_eq!(index.lookup("JDOE"), Some("42"));
        assert_eq!(index.lookup("abc123"), Some("42"));
        assert_eq!(index.lookup("  ABC123 "), Some("42"));
        assert_eq!(index.lookup("int-9"), Some("42"));
        assert_eq!(index.lookup("nobody"), None);
    }

    #[test]
    fn empty_aliases_contribute_nothing() {
        let roster = vec![RosterMember {
            login_id: Some("   ".into()),
            sis_user_id: Some(String::new()),
            ..member("7")
        }];
        let index = IdentifierIndex::build(&roster);
        assert_eq!(index.len(), 1);
        assert_eq!(index.lookup(""), None);
    }

    #[test]
    fn later_member_wins_alias_collision() {
        let roster = vec![
            RosterMember {
                sis_user_id: Some("dup".into()),
                ..member("1")
            },
            RosterMember {
                login_id: Some("DUP".into()),
                ..member("2")
            },
        ];
        let index = IdentifierIndex::build(&roster);
        assert_eq!(index.lookup("dup"), Some("2"));
        assert_eq!(index.collisions(), 1);
    }

    #[test]
    fn display_name_priority_skips_blank_names() {
        let m = RosterMember {
            name: Some("".into()),
            short_name: Some("Jo".into()),
            sortable_name: Some("Doe, Jo".into()),
            ..member("1")
        };
        assert_eq!(m.display_name().as_deref(), Some("Jo"));
        let m = RosterMember {
            sortable_name: Some("Doe, Jo".into()),
            ..member("1")
        };
        assert_eq!(m.display_name().as_deref(), Some("Doe, Jo"));
        assert_eq!(member("1").display_name(), None);
    }

    #[test]
    fn display_name_is_returned_as_given() {
        let m = RosterMember {
            name: Some("   ".into()),
            short_name: Some("Ada ".into()),
            ..member("1")
        };
        assert_eq!(m.display_name().as_deref(), Some("Ada "));
    }

    #[test]
    fn members_deserialize_numeric_ids() {
        let v = json!([
            { "id": 42, "sis_user_id": 1001, "name": "Ada" },
            { "id": "43", "login_id": null },
            { "name": "no id" }
        ]);
        let members = members_from_json(&v).expect("array");
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].id, "42");
        assert_eq!(members[0].sis_user_id.as_deref(), Some("1001"));
        assert_eq!(members[1].login_id, None);

        let wrapped = json!({ "members": [{ "id": 1 }] });
        assert_eq!(members_from_json(&wrapped).map(|m| m.len()), Some(1));
        assert!(members_from_json(&json!("nope")).is_none());
    }

    #[test]
    fn snapshot_finds_member_by_canonical_id() {
        let snapshot = RosterSnapshot::new(vec![member("1"), member("2")]);
        assert_eq!(snapshot.member("2").map(|m| m.id.as_str()), Some("2"));
        assert!(snapshot.member("3").is_none());
        assert_eq!(snapshot.index().lookup("1"), Some("1"));
    }
}
