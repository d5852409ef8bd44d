use super::{QuotaExhausted, RepositoryRef, Scope};
use core::fmt::{Display, Formatter};
use core::future::Future;
use ohno::{AppError, EnrichableExt};
use std::collections::BTreeMap;

const LOG_TARGET: &str = "enumerator";

/// Why listing repositories failed.
#[derive(Debug)]
pub enum ListingError {
    /// The governor gave up waiting for quota; the run must stop, not fail.
    QuotaExhausted(QuotaExhausted),

    Failed(AppError),
}

impl From<AppError> for ListingError {
    fn from(e: AppError) -> Self {
        Self::Failed(e)
    }
}

impl From<QuotaExhausted> for ListingError {
    fn from(e: QuotaExhausted) -> Self {
        Self::QuotaExhausted(e)
    }
}

impl Display for ListingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::QuotaExhausted(e) => Display::fmt(e, f),
            Self::Failed(e) => f.write_str(&e.message()),
        }
    }
}

impl core::error::Error for ListingError {}

/// Lists the repositories of an account on the remote side.
pub trait RepositoryLister: Send + Sync {
    /// Repositories owned by the user `owner`.
    fn list_owner(&self, owner: &str) -> impl Future<Output = Result<Vec<RepositoryRef>, ListingError>> + Send;

    /// Repositories of the organization `organization`.
    fn list_organization(&self, organization: &str) -> impl Future<Output = Result<Vec<RepositoryRef>, ListingError>> + Send;
}

/// The repositories of a scope, filtered, deduplicated, and capped.
///
/// The sequence is sorted by creation time and identifier, so every run over the same scope
/// sees the same repositories in the same order, and [`Enumeration::iter`] always starts over
/// from the beginning.
#[derive(Debug, Clone, Default)]
pub struct Enumeration {
    repositories: Vec<RepositoryRef>,
    listed: usize,
    filtered: usize,
    capped: usize,
    unavailable_organizations: Vec<String>,
}

impl Enumeration {
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &RepositoryRef> {
        self.repositories.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.repositories.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }

    /// Repositories reported by the remote listing, before any filtering.
    #[must_use]
    pub const fn listed(&self) -> usize {
        self.listed
    }

    /// Repositories removed by the fork, archived, or visibility filters.
    #[must_use]
    pub const fn filtered(&self) -> usize {
        self.filtered
    }

    /// Repositories beyond the run mode's cap.
    #[must_use]
    pub const fn capped(&self) -> usize {
        self.capped
    }

    /// Organizations whose listing failed and were skipped.
    #[must_use]
    pub fn unavailable_organizations(&self) -> &[String] {
        &self.unavailable_organizations
    }
}

/// Turns a [`Scope`] into an [`Enumeration`].
#[derive(Debug)]
pub struct Enumerator<'a, L> {
    lister: &'a L,
}

impl<'a, L: RepositoryLister> Enumerator<'a, L> {
    #[must_use]
    pub const fn new(lister: &'a L) -> Self {
        Self { lister }
    }

    /// List, filter, and cap the repositories of `scope`.
    ///
    /// Failing to list the owner's repositories fails the enumeration. A failing organization
    /// is logged and skipped, unless the quota ran out while listing it.
    pub async fn enumerate(&self, scope: &Scope) -> Result<Enumeration, ListingError> {
        let mut listed = Vec::new();

        let owned = self.lister.list_owner(&scope.owner).await.map_err(|e| match e {
            ListingError::Failed(e) => ListingError::Failed(e.enrich_with(|| format!("could not list the repositories of '{}'", scope.owner))),
            quota @ ListingError::QuotaExhausted(_) => quota,
        })?;
        let before = owned.len();
        listed.extend(owned.into_iter().filter(|repo| repo.owner.eq_ignore_ascii_case(&scope.owner)));
        log::debug!(
            target: LOG_TARGET,
            "Listed {before} repositories for '{}', {} owned by it",
            scope.owner,
            listed.len()
        );

        let mut unavailable_organizations = Vec::new();
        for organization in &scope.organizations {
            match self.lister.list_organization(organization).await {
                Ok(repos) => {
                    log::debug!(target: LOG_TARGET, "Listed {} repositories for organization '{organization}'", repos.len());
                    listed.extend(repos);
                }
                Err(ListingError::QuotaExhausted(e)) => return Err(ListingError::QuotaExhausted(e)),
                Err(ListingError::Failed(e)) => {
                    log::warn!(target: LOG_TARGET, "Skipping organization '{organization}': {}", e.message());
                    unavailable_organizations.push(organization.clone());
                }
            }
        }

        Ok(Self::shape(scope, listed, unavailable_organizations))
    }

    fn shape(scope: &Scope, listed: Vec<RepositoryRef>, unavailable_organizations: Vec<String>) -> Enumeration {
        let listed_count = listed.len();

        let mut unique = BTreeMap::new();
        let mut filtered = 0;
        for repo in listed {
            if !scope.accepts(&repo) {
                filtered += 1;
                continue;
            }
            let _ = unique.entry(repo.id.clone()).or_insert(repo);
        }

        let mut repositories: Vec<_> = unique.into_values().collect();
        repositories.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));

        let mut capped = 0;
        if let Some(cap) = scope.mode.cap()
            && repositories.len() > cap
        {
            capped = repositories.len() - cap;
            repositories.truncate(cap);
        }

        log::info!(
            target: LOG_TARGET,
            "{} repositories in scope ({listed_count} listed, {filtered} filtered, {capped} beyond the {} mode cap)",
            repositories.len(),
            scope.mode
        );

        Enumeration {
            repositories,
            listed: listed_count,
            filtered,
            capped,
            unavailable_organizations,
        }
    }
}
