use super::types::Repository;
use super::{ApiError, GitHub, LOG_TARGET};
use crate::pipeline::{ListingError, RepositoryLister, RepositoryRef};
use ohno::EnrichableExt;
use url::Url;

const PAGE_SIZE: &str = "100";

impl GitHub {
    async fn list(&self, what: &str, mut url: Url) -> Result<Vec<RepositoryRef>, ListingError> {
        let _ = url.query_pairs_mut().append_pair("per_page", PAGE_SIZE);

        let mut repositories = Vec::new();
        let mut next = Some(url);
        while let Some(url) = next {
            let page = self.fetch::<Vec<Repository>>(what, url).await.map_err(|e| match ListingError::from(e) {
                ListingError::Failed(e) => ListingError::Failed(e.enrich_with(|| format!("listing {what}"))),
                quota @ ListingError::QuotaExhausted(_) => quota,
            })?;

            repositories.extend(page.data.iter().map(Repository::to_ref));
            next = page.next;
        }

        log::debug!(target: LOG_TARGET, "Listed {} repositories of {what}", repositories.len());
        Ok(repositories)
    }
}

impl From<ApiError> for ListingError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::QuotaExhausted(e) => Self::QuotaExhausted(e),
            ApiError::Transient(e) | ApiError::Failed(e) => Self::Failed(e),
            e => Self::Failed(e.into()),
        }
    }
}

impl RepositoryLister for GitHub {
    /// Repositories owned by `owner`, including private ones when the token belongs to `owner`.
    async fn list_owner(&self, owner: &str) -> Result<Vec<RepositoryRef>, ListingError> {
        let is_viewer = self.viewer().await?.is_some_and(|viewer| viewer.eq_ignore_ascii_case(owner));

        let (mut url, (key, value)) = if is_viewer {
            (self.client.endpoint(&["user", "repos"]), ("affiliation", "owner"))
        } else {
            (self.client.endpoint(&["users", owner, "repos"]), ("type", "owner"))
        };
        let _ = url.query_pairs_mut().append_pair(key, value);

        self.list(&format!("'{owner}'"), url).await
    }

    async fn list_organization(&self, organization: &str) -> Result<Vec<RepositoryRef>, ListingError> {
        let mut url = self.client.endpoint(&["orgs", organization, "repos"]);
        let _ = url.query_pairs_mut().append_pair("type", "all");

        self.list(&format!("organization '{organization}'"), url).await
    }
}
