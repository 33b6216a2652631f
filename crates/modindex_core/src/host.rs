use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::IndexConfig;
use crate::error::ResolveError;

const GITHUB_API_BASE: &str = "https://api.github.com";
const CODEBERG_API_BASE: &str = "https://codeberg.org/api/v1";

/// Code-hosting platforms whose content-listing API we know how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostKind {
    GitHub,
    Codeberg,
}

impl HostKind {
    pub fn from_domain(domain: &str) -> Option<Self> {
        if domain.eq_ignore_ascii_case("github.com") {
            return Some(Self::GitHub);
        }
        if domain.eq_ignore_ascii_case("codeberg.org") {
            return Some(Self::Codeberg);
        }
        None
    }

    pub fn domain(self) -> &'static str {
        match self {
            Self::GitHub => "github.com",
            Self::Codeberg => "codeberg.org",
        }
    }

    pub fn listing_url(self, slug: &str) -> String {
        match self {
            Self::GitHub => format!("{GITHUB_API_BASE}/repos/{slug}/contents"),
            Self::Codeberg => format!("{CODEBERG_API_BASE}/repos/{slug}/contents"),
        }
    }

    pub fn requires_token(self) -> bool {
        matches!(self, Self::GitHub)
    }
}

/// An upstream repository, as parsed out of a descriptor's `repo` url.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub host: HostKind,
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// `owner/name`, without any `.git` suffix.
    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// One entry of a repository root listing. Both platforms return at least
/// these three keys.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RepoEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    #[serde(default)]
    pub download_url: Option<String>,
}

impl RepoEntry {
    pub fn file(name: &str, download_url: &str) -> Self {
        Self {
            name: name.to_string(),
            entry_type: "file".to_string(),
            download_url: Some(download_url.to_string()),
        }
    }
}

pub trait RepositoryApi: Send + Sync {
    fn list_root(&self, repo: &RepoRef) -> Result<Vec<RepoEntry>, ResolveError>;
    fn fetch_raw(&self, url: &str) -> Result<String, ResolveError>;
}

/// Parse `https://<domain>/<owner>/<name>` strictly. Anything else (other
/// schemes, ports, deeper paths, queries, unknown hosts) is rejected.
pub fn parse_repo_url(repo: &str) -> Result<RepoRef, ResolveError> {
    let failure = || ResolveError::RepositoryHost {
        repo: repo.to_string(),
    };

    let rest = repo.trim().strip_prefix("https://").ok_or_else(failure)?;
    let (domain, path) = rest.split_once('/').ok_or_else(failure)?;
    if !is_bare_domain(domain) {
        return Err(failure());
    }
    let path = path.strip_suffix('/').unwrap_or(path);
    let (owner, name) = path.split_once('/').ok_or_else(failure)?;
    let name = name.strip_suffix(".git").unwrap_or(name);
    if !is_path_segment(owner) || !is_path_segment(name) {
        return Err(failure());
    }
    let host = HostKind::from_domain(domain).ok_or_else(failure)?;

    Ok(RepoRef {
        host,
        owner: owner.to_string(),
        name: name.to_string(),
    })
}

fn is_bare_domain(domain: &str) -> bool {
    !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && domain
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '.')
}

fn is_path_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'))
}

#[derive(Debug, Clone)]
pub struct HttpApiConfig {
    pub user_agent: String,
    pub timeout_ms: u64,
    pub retries: usize,
    pub retry_delay_ms: u64,
    pub github_token: Option<String>,
}

impl HttpApiConfig {
    pub fn from_config(config: &IndexConfig) -> Self {
        Self {
            user_agent: config.user_agent(),
            timeout_ms: config.timeout_ms(),
            retries: config.retries(),
            retry_delay_ms: config.retry_delay_ms(),
            github_token: config.github_token(),
        }
    }
}

pub struct HttpRepositoryApi {
    client: Client,
    config: HttpApiConfig,
}

enum Fetched {
    Body(String),
    Status(u16),
}

impl HttpRepositoryApi {
    /// Build the client. A missing GitHub token is a configuration failure and
    /// stops the run before any item is processed.
    pub fn new(config: HttpApiConfig) -> Result<Self> {
        if config
            .github_token
            .as_deref()
            .is_none_or(|token| token.trim().is_empty())
        {
            bail!("GITHUB_TOKEN is not set; it is required to list GitHub repositories");
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .build()
            .context("failed to build repository HTTP client")?;
        Ok(Self { client, config })
    }

    fn get(&self, url: &str, bearer: Option<&str>) -> Result<Fetched, ResolveError> {
        let mut last_status = None::<StatusCode>;
        for attempt in 0..=self.config.retries {
            let mut request = self.client.get(url);
            if let Some(token) = bearer {
                request = request
                    .bearer_auth(token)
                    .header("Accept", "application/vnd.github+json");
            }

            match request.send() {
                Ok(response) => {
                    let status = response.status();
                    if status == StatusCode::OK {
                        let body = response.text().map_err(|error| ResolveError::Request {
                            url: url.to_string(),
                            message: format!("failed to read response body: {error}"),
                        })?;
                        return Ok(Fetched::Body(body));
                    }
                    if attempt < self.config.retries && is_retryable_status(status) {
                        debug!(url, status = status.as_u16(), attempt, "retrying request");
                        last_status = Some(status);
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Ok(Fetched::Status(status.as_u16()));
                }
                Err(error) => {
                    if attempt < self.config.retries && is_retryable_error(&error) {
                        warn!(url, %error, attempt, "request failed, retrying");
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(ResolveError::Request {
                        url: url.to_string(),
                        message: error.to_string(),
                    });
                }
            }
        }

        match last_status {
            Some(status) => Ok(Fetched::Status(status.as_u16())),
            None => Err(ResolveError::Request {
                url: url.to_string(),
                message: "request exhausted retry budget".to_string(),
            }),
        }
    }

    fn wait_before_retry(&self, attempt: usize) {
        sleep(Duration::from_millis(
            self.config
                .retry_delay_ms
                .saturating_mul(attempt as u64 + 1),
        ));
    }
}

impl RepositoryApi for HttpRepositoryApi {
    fn list_root(&self, repo: &RepoRef) -> Result<Vec<RepoEntry>, ResolveError> {
        let url = repo.host.listing_url(&repo.slug());
        let bearer = if repo.host.requires_token() {
            self.config.github_token.as_deref()
        } else {
            None
        };
        let fetched = self.get(&url, bearer)?;
        listing_result(url, fetched)
    }

    fn fetch_raw(&self, url: &str) -> Result<String, ResolveError> {
        let fetched = self.get(url, None)?;
        raw_result(url, fetched)
    }
}

fn listing_result(url: String, fetched: Fetched) -> Result<Vec<RepoEntry>, ResolveError> {
    match fetched {
        Fetched::Body(body) => serde_json::from_str(&body).map_err(|error| ResolveError::Request {
            url,
            message: format!("invalid listing payload: {error}"),
        }),
        Fetched::Status(status) => Err(ResolveError::Listing { url, status }),
    }
}

fn raw_result(url: &str, fetched: Fetched) -> Result<String, ResolveError> {
    match fetched {
        Fetched::Body(body) => Ok(body),
        Fetched::Status(status) => Err(ResolveError::Fetch {
            url: url.to_string(),
            status,
        }),
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}
