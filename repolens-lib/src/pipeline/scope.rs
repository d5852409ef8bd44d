use super::{RepositoryRef, Visibility};
use core::fmt::{Display, Formatter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which repositories to keep by visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VisibilityFilter {
    #[default]
    All,
    Public,
    Private,
}

impl VisibilityFilter {
    #[must_use]
    pub const fn accepts(self, visibility: Visibility) -> bool {
        matches!(
            (self, visibility),
            (Self::All, _) | (Self::Public, Visibility::Public) | (Self::Private, Visibility::Private)
        )
    }
}

/// How much of the scope a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Every repository.
    #[default]
    Full,

    /// The first 10 repositories, for a quick look.
    Demo,

    /// The first repository only.
    Test,

    /// The first N repositories.
    Limit(usize),
}

impl RunMode {
    /// Maximum number of repositories the mode covers.
    #[must_use]
    pub const fn cap(self) -> Option<usize> {
        match self {
            Self::Full => None,
            Self::Demo => Some(10),
            Self::Test => Some(1),
            Self::Limit(n) => Some(n),
        }
    }
}

impl Display for RunMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Full => f.write_str("full"),
            Self::Demo => f.write_str("demo"),
            Self::Test => f.write_str("test"),
            Self::Limit(n) => write!(f, "limit-{n}"),
        }
    }
}

/// The set of repositories a run considers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    /// The user whose repositories are listed.
    pub owner: String,

    /// Organizations whose repositories are included as well.
    pub organizations: Vec<String>,

    pub visibility: VisibilityFilter,
    pub skip_forks: bool,
    pub skip_archived: bool,
    pub mode: RunMode,
}

impl Scope {
    #[must_use]
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            organizations: Vec::new(),
            visibility: VisibilityFilter::All,
            skip_forks: false,
            skip_archived: false,
            mode: RunMode::Full,
        }
    }

    /// Whether a listed repository passes the exclusion filters.
    #[must_use]
    pub const fn accepts(&self, repo: &RepositoryRef) -> bool {
        !(self.skip_forks && repo.fork) && !(self.skip_archived && repo.archived) && self.visibility.accepts(repo.visibility)
    }

    /// Canonical description of the scope, used to tie a checkpoint to the scope that wrote it.
    ///
    /// Account names are case-insensitive on the remote side, and organization order does not
    /// matter, so both are normalized.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let organizations: BTreeSet<String> = self.organizations.iter().map(|org| org.to_lowercase()).collect();
        format!(
            "owner={};orgs={};visibility={};forks={};archived={};mode={}",
            self.owner.to_lowercase(),
            organizations.into_iter().collect::<Vec<_>>().join(","),
            self.visibility,
            if self.skip_forks { "skip" } else { "keep" },
            if self.skip_archived { "skip" } else { "keep" },
            self.mode,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn repo(visibility: Visibility, fork: bool, archived: bool) -> RepositoryRef {
        RepositoryRef {
            fork,
            archived,
            ..RepositoryRef::new("octo", "repo", visibility, Utc::now())
        }
    }

    #[test]
    fn test_mode_caps() {
        assert_eq!(RunMode::Full.cap(), None);
        assert_eq!(RunMode::Demo.cap(), Some(10));
        assert_eq!(RunMode::Test.cap(), Some(1));
        assert_eq!(RunMode::Limit(7).cap(), Some(7));
    }

    #[test]
    fn test_visibility_filter() {
        assert!(VisibilityFilter::All.accepts(Visibility::Private));
        assert!(VisibilityFilter::Public.accepts(Visibility::Public));
        assert!(!VisibilityFilter::Public.accepts(Visibility::Private));
        assert!(!VisibilityFilter::Private.accepts(Visibility::Public));
    }

    #[test]
    fn test_accepts_applies_exclusions() {
        let mut scope = Scope::new("octo");
        assert!(scope.accepts(&repo(Visibility::Public, true, true)));

        scope.skip_forks = true;
        assert!(!scope.accepts(&repo(Visibility::Public, true, false)));
        assert!(scope.accepts(&repo(Visibility::Public, false, true)));

        scope.skip_archived = true;
        assert!(!scope.accepts(&repo(Visibility::Public, false, true)));

        scope.visibility = VisibilityFilter::Private;
        assert!(!scope.accepts(&repo(Visibility::Public, false, false)));
        assert!(scope.accepts(&repo(Visibility::Private, false, false)));
    }

    #[test]
    fn test_fingerprint_is_canonical() {
        let mut a = Scope::new("Octo");
        a.organizations = vec!["Beta".to_string(), "alpha".to_string()];
        let mut b = Scope::new("octo");
        b.organizations = vec!["alpha".to_string(), "beta".to_string()];

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint(), "owner=octo;orgs=alpha,beta;visibility=all;forks=keep;archived=keep;mode=full");
    }

    #[test]
    fn test_fingerprint_distinguishes_scopes() {
        let base = Scope::new("octo");
        let variants = [
            Scope {
                mode: RunMode::Demo,
                ..base.clone()
            },
            Scope {
                mode: RunMode::Limit(10),
                ..base.clone()
            },
            Scope {
                skip_forks: true,
                ..base.clone()
            },
            Scope {
                visibility: VisibilityFilter::Public,
                ..base.clone()
            },
            Scope {
                organizations: vec!["acme".to_string()],
                ..base.clone()
            },
        ];

        let mut seen = BTreeSet::from([base.fingerprint()]);
        for variant in variants {
            assert!(seen.insert(variant.fingerprint()), "duplicate fingerprint for {variant:?}");
        }
    }
}
