//! GitHub-compatible VCS adapter (spec §4.2, §6 "GitHub-compatible REST v3").
//!
//! A thin, stateless wrapper over [`estate_http::HttpClient`] in the shape of
//! `shipper-registry`'s `RegistryClient` (one struct owning a base URL and a
//! blocking client, one method per endpoint, status-code matched into typed
//! outcomes) — generalized from crates.io's handful of endpoints to GitHub's
//! contents/commits/compare/branches/tags/pulls surface.

use anyhow::Context;
use base64::Engine;
use chrono::{DateTime, Utc};
use estate_http::{HttpClient, RequestSpec};
use estate_types::EstateError;
use serde::Deserialize;

pub const DEFAULT_BASE_URL: &str = "https://api.github.com";

#[derive(Debug, Clone)]
pub struct VcsAdapter {
    base_url: String,
    token: String,
    client: HttpClient,
}

#[derive(Debug, Clone)]
pub struct CommitSummary {
    pub sha: String,
    pub message: String,
    pub author: Option<String>,
    pub authored_at: Option<DateTime<Utc>>,
    pub html_url: String,
}

#[derive(Debug, Clone)]
pub struct BranchRef {
    pub name: String,
    pub commit_sha: String,
}

#[derive(Debug, Clone)]
pub struct TagRef {
    pub name: String,
    pub commit_sha: String,
}

#[derive(Debug, Clone)]
pub struct CompareResult {
    pub status: CompareStatus,
    pub ahead_by: u64,
    pub commits: Vec<CommitSummary>,
    pub html_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareStatus {
    Behind,
    Identical,
    Ahead,
    Diverged,
}

#[derive(Deserialize)]
struct ContentsResponse {
    content: Option<String>,
    encoding: Option<String>,
}

#[derive(Deserialize)]
struct CommitApiEntry {
    sha: String,
    commit: CommitApiInner,
    html_url: String,
}

#[derive(Deserialize)]
struct CommitApiInner {
    message: String,
    author: Option<CommitApiAuthor>,
}

#[derive(Deserialize)]
struct CommitApiAuthor {
    name: Option<String>,
    date: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct BranchApiEntry {
    name: String,
    commit: ShaOnly,
}

#[derive(Deserialize)]
struct TagApiEntry {
    name: String,
    commit: ShaOnly,
}

#[derive(Deserialize)]
struct ShaOnly {
    sha: String,
}

#[derive(Deserialize)]
struct CompareApiResponse {
    status: String,
    ahead_by: u64,
    commits: Vec<CommitApiEntry>,
    html_url: String,
}

#[derive(Deserialize)]
struct PullApiEntry {
    number: u64,
    title: String,
    html_url: String,
    user: PullApiUser,
    merged_at: Option<DateTime<Utc>>,
    base: PullApiRef,
    head: PullApiRef,
    merge_commit_sha: Option<String>,
    #[serde(default)]
    body: Option<String>,
}

#[derive(Deserialize)]
struct PullApiUser {
    login: String,
}

#[derive(Deserialize)]
struct PullApiRef {
    #[serde(rename = "ref")]
    git_ref: String,
}

impl VcsAdapter {
    pub fn new(token: impl Into<String>) -> Result<Self, EstateError> {
        Ok(Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            token: token.into(),
            client: HttpClient::new()?,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request(&self, path: &str) -> RequestSpec {
        RequestSpec::get(format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "estate-snapshot")
    }

    /// `fetchFile(owner,repo,path,ref) → text|NotFound` (spec §4.2).
    pub fn fetch_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<String>, EstateError> {
        let spec = self
            .request(&format!("/repos/{owner}/{repo}/contents/{path}"))
            .query("ref", git_ref);
        match self.client.request(&spec) {
            Ok(response) => {
                let body: ContentsResponse = response
                    .json()
                    .map_err(|e| EstateError::DataQuality(format!("invalid contents response: {e}")))?;
                match (body.content, body.encoding.as_deref()) {
                    (Some(content), Some("base64")) => {
                        let cleaned: String = content.chars().filter(|c| !c.is_whitespace()).collect();
                        let decoded = base64::engine::general_purpose::STANDARD
                            .decode(cleaned)
                            .map_err(|e| EstateError::DataQuality(format!("bad base64 content: {e}")))?;
                        Ok(Some(String::from_utf8_lossy(&decoded).to_string()))
                    }
                    (Some(content), _) => Ok(Some(content)),
                    (None, _) => Ok(None),
                }
            }
            Err(EstateError::NotFound(_)) => Ok(None),
            Err(other) => Err(other),
        }
    }

    /// `listCommits(owner,repo,path,ref,perPage,page)` (spec §4.2).
    pub fn list_commits(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
        per_page: u32,
        page: u32,
    ) -> Result<Vec<CommitSummary>, EstateError> {
        let spec = self
            .request(&format!("/repos/{owner}/{repo}/commits"))
            .query("path", path)
            .query("sha", git_ref)
            .query("per_page", per_page.to_string())
            .query("page", page.to_string());
        let response = self.client.request(&spec)?;
        let entries: Vec<CommitApiEntry> = response
            .json()
            .map_err(|e| EstateError::DataQuality(format!("invalid commits response: {e}")))?;
        Ok(entries.into_iter().map(Into::into).collect())
    }

    /// `getLastCommitForFile` (spec §4.2): the most recent commit touching
    /// `path` on `git_ref`, or `None` if the path has never been committed.
    pub fn get_last_commit_for_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<CommitSummary>, EstateError> {
        Ok(self
            .list_commits(owner, repo, path, git_ref, 1, 1)?
            .into_iter()
            .next())
    }

    /// `listRecentMergedPRs(owner,repo,sinceDays,perRepoLimit)` (spec §4.2,
    /// §4.6): merged pull requests feeding the Ticket Index Builder.
    pub fn list_recent_merged_prs(
        &self,
        owner: &str,
        repo: &str,
        since_days: u32,
        per_repo_limit: u32,
    ) -> Result<Vec<estate_types::PullRequest>, EstateError> {
        let cutoff = Utc::now() - chrono::Duration::days(since_days as i64);
        let spec = self
            .request(&format!("/repos/{owner}/{repo}/pulls"))
            .query("state", "closed")
            .query("sort", "updated")
            .query("direction", "desc")
            .query("per_page", per_repo_limit.min(100).to_string());
        let response = self.client.request(&spec)?;
        let entries: Vec<PullApiEntry> = response
            .json()
            .map_err(|e| EstateError::DataQuality(format!("invalid pulls response: {e}")))?;

        let mut out = Vec::new();
        for entry in entries {
            let Some(merged_at) = entry.merged_at else { continue };
            if merged_at < cutoff {
                continue;
            }
            out.push(estate_types::PullRequest::new(
                format!("{owner}/{repo}"),
                entry.number,
                entry.title,
                entry.html_url,
                merged_at,
                entry.user.login,
                entry.base.git_ref,
                entry.head.git_ref,
                entry.merge_commit_sha,
                entry.body,
            ));
            if out.len() as u32 >= per_repo_limit {
                break;
            }
        }
        Ok(out)
    }

    /// `listBranches(owner,repo,limit)` (spec §4.2).
    pub fn list_branches(&self, owner: &str, repo: &str, limit: u32) -> Result<Vec<BranchRef>, EstateError> {
        let spec = self
            .request(&format!("/repos/{owner}/{repo}/branches"))
            .query("per_page", limit.min(100).to_string());
        let response = self.client.request(&spec)?;
        let entries: Vec<BranchApiEntry> = response
            .json()
            .map_err(|e| EstateError::DataQuality(format!("invalid branches response: {e}")))?;
        Ok(entries
            .into_iter()
            .map(|e| BranchRef { name: e.name, commit_sha: e.commit.sha })
            .collect())
    }

    /// `listTags(owner,repo,limit)` (spec §4.2).
    pub fn list_tags(&self, owner: &str, repo: &str, limit: u32) -> Result<Vec<TagRef>, EstateError> {
        let spec = self
            .request(&format!("/repos/{owner}/{repo}/tags"))
            .query("per_page", limit.min(100).to_string());
        let response = self.client.request(&spec)?;
        let entries: Vec<TagApiEntry> = response
            .json()
            .map_err(|e| EstateError::DataQuality(format!("invalid tags response: {e}")))?;
        Ok(entries
            .into_iter()
            .map(|e| TagRef { name: e.name, commit_sha: e.commit.sha })
            .collect())
    }

    /// `compareRefs(owner,repo,base,head) → {commits[], aheadBy, htmlUrl}`
    /// (spec §4.2).
    pub fn compare_refs(
        &self,
        owner: &str,
        repo: &str,
        base: &str,
        head: &str,
    ) -> Result<CompareResult, EstateError> {
        let spec = self.request(&format!("/repos/{owner}/{repo}/compare/{base}...{head}"));
        let response = self.client.request(&spec)?;
        let body: CompareApiResponse = response
            .json()
            .map_err(|e| EstateError::DataQuality(format!("invalid compare response: {e}")))?;
        let status = match body.status.as_str() {
            "behind" => CompareStatus::Behind,
            "identical" => CompareStatus::Identical,
            "ahead" => CompareStatus::Ahead,
            _ => CompareStatus::Diverged,
        };
        Ok(CompareResult {
            status,
            ahead_by: body.ahead_by,
            commits: body.commits.into_iter().map(Into::into).collect(),
            html_url: body.html_url,
        })
    }

    /// `commitInRef(owner,repo,sha,refOrSha)` (spec §4.2): reachability via
    /// the compare endpoint, `status ∈ {behind, identical}` meaning `sha` is
    /// an ancestor of (or equal to) `ref_or_sha`.
    pub fn commit_in_ref(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        ref_or_sha: &str,
    ) -> Result<bool, EstateError> {
        let result = self.compare_refs(owner, repo, sha, ref_or_sha)?;
        Ok(matches!(result.status, CompareStatus::Behind | CompareStatus::Identical))
    }

    /// `refExists(owner,repo,ref)` (spec §4.2): branch first, then tag.
    pub fn ref_exists(&self, owner: &str, repo: &str, git_ref: &str) -> Result<bool, EstateError> {
        let spec = self.request(&format!("/repos/{owner}/{repo}/branches/{git_ref}"));
        match self.client.request(&spec) {
            Ok(_) => return Ok(true),
            Err(EstateError::NotFound(_)) => {}
            Err(other) => return Err(other),
        }
        let spec = self.request(&format!("/repos/{owner}/{repo}/git/refs/tags/{git_ref}"));
        match self.client.request(&spec) {
            Ok(_) => Ok(true),
            Err(EstateError::NotFound(_)) => Ok(false),
            Err(other) => Err(other),
        }
    }
}

impl From<CommitApiEntry> for CommitSummary {
    fn from(entry: CommitApiEntry) -> Self {
        Self {
            sha: entry.sha,
            message: entry.commit.message,
            author: entry.commit.author.as_ref().and_then(|a| a.name.clone()),
            authored_at: entry.commit.author.and_then(|a| a.date),
            html_url: entry.html_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> VcsAdapter {
        VcsAdapter::new("tok").unwrap().with_base_url(server.uri())
    }

    #[tokio::test]
    async fn fetch_file_decodes_base64_content() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/web/contents/README.md"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": "aGVsbG8=",
                "encoding": "base64"
            })))
            .mount(&server)
            .await;

        let file = adapter(&server)
            .fetch_file("acme", "web", "README.md", "main")
            .unwrap();
        assert_eq!(file, Some("hello".to_string()));
    }

    #[tokio::test]
    async fn fetch_file_missing_returns_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/web/contents/missing.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let file = adapter(&server)
            .fetch_file("acme", "web", "missing.txt", "main")
            .unwrap();
        assert_eq!(file, None);
    }

    #[tokio::test]
    async fn compare_refs_classifies_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/web/compare/main...feature"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "ahead",
                "ahead_by": 3,
                "commits": [],
                "html_url": "https://github.com/acme/web/compare/main...feature"
            })))
            .mount(&server)
            .await;

        let result = adapter(&server).compare_refs("acme", "web", "main", "feature").unwrap();
        assert_eq!(result.status, CompareStatus::Ahead);
        assert_eq!(result.ahead_by, 3);
    }

    #[tokio::test]
    async fn list_recent_merged_prs_filters_by_cutoff() {
        let server = MockServer::start().await;
        let recent = Utc::now() - chrono::Duration::days(1);
        let stale = Utc::now() - chrono::Duration::days(400);
        Mock::given(method("GET"))
            .and(path("/repos/acme/web/pulls"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "number": 7, "title": "ABC-1 fix", "html_url": "https://x/7",
                    "user": {"login": "alice"}, "merged_at": recent.to_rfc3339(),
                    "base": {"ref": "main"}, "head": {"ref": "fix"}, "merge_commit_sha": "s1"
                },
                {
                    "number": 3, "title": "old", "html_url": "https://x/3",
                    "user": {"login": "bob"}, "merged_at": stale.to_rfc3339(),
                    "base": {"ref": "main"}, "head": {"ref": "old"}, "merge_commit_sha": "s2"
                },
                {
                    "number": 9, "title": "unmerged", "html_url": "https://x/9",
                    "user": {"login": "carol"}, "merged_at": null,
                    "base": {"ref": "main"}, "head": {"ref": "wip"}, "merge_commit_sha": null
                }
            ])))
            .mount(&server)
            .await;

        let prs = adapter(&server)
            .list_recent_merged_prs("acme", "web", 30, 120)
            .unwrap();
        assert_eq!(prs.len(), 1);
        assert_eq!(prs[0].number, 7);
    }
}
