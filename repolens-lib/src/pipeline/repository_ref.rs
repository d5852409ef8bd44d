use chrono::{DateTime, Utc};
use core::fmt::{Display, Formatter};
use serde::{Deserialize, Serialize};

/// Whether a repository is visible to everyone or only to its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Visibility {
    Public,
    Private,
}

/// A repository as reported by the remote listing.
///
/// Created once at enumeration time and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryRef {
    /// Unique identifier in `owner/name` form.
    pub id: String,
    pub owner: String,
    pub name: String,
    pub visibility: Visibility,
    pub fork: bool,
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub pushed_at: Option<DateTime<Utc>>,
    pub default_branch: Option<String>,
    pub description: Option<String>,
}

impl RepositoryRef {
    /// Create a reference with the identifier derived from `owner` and `name`.
    #[must_use]
    pub fn new(owner: impl Into<String>, name: impl Into<String>, visibility: Visibility, created_at: DateTime<Utc>) -> Self {
        let owner = owner.into();
        let name = name.into();
        Self {
            id: format!("{owner}/{name}"),
            owner,
            name,
            visibility,
            fork: false,
            archived: false,
            created_at,
            pushed_at: None,
            default_branch: None,
            description: None,
        }
    }
}

impl Display for RepositoryRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_builds_identifier() {
        let repo = RepositoryRef::new("octo", "hello", Visibility::Public, Utc::now());
        assert_eq!(repo.id, "octo/hello");
        assert_eq!(repo.to_string(), "octo/hello");
        assert!(!repo.fork);
        assert!(!repo.archived);
    }

    #[test]
    fn test_visibility_serde() {
        assert_eq!(serde_json::to_string(&Visibility::Private).unwrap(), r#""private""#);
        let v: Visibility = serde_json::from_str(r#""public""#).unwrap();
        assert_eq!(v, Visibility::Public);
        assert_eq!(Visibility::Public.to_string(), "public");
    }
}
