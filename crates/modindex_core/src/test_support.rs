use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::ResolveError;
use crate::host::{HostKind, RepoEntry, RepoRef, RepositoryApi};

pub const SMODS_JSON: &str = r#"{
    "id": "bar-json",
    "name": "Bar",
    "author": ["someone"],
    "description": "bar from json",
    "prefix": "bar",
    "main_file": "main.lua",
    "version": "1.2.0",
    "dependencies": ["Steamodded (>=1.0.0~ALPHA)"],
    "provides": ["Bar (1.2.0)"],
}"#;

pub const THUNDERSTORE_JSON: &str = r#"{
    "name": "foo-mod",
    "version_number": "2.1.0",
    "website_url": "https://github.com/acme/foo",
    "description": "foo from thunderstore",
    "dependencies": ["Steamodded-smods-1.0.0"]
}"#;

pub const HEADER_LUA: &str =
    "--- STEAMODDED HEADER\n--- MOD_ID: bar\n--- VERSION: 1.0\n\nSMODS.Atlas {}\n";

pub fn github_repo(owner: &str, name: &str) -> RepoRef {
    RepoRef {
        host: HostKind::GitHub,
        owner: owner.to_string(),
        name: name.to_string(),
    }
}

/// In-memory repository API. Unknown repositories answer 404.
#[derive(Default)]
pub struct MockApi {
    listings: BTreeMap<(String, String), Result<Vec<RepoEntry>, u16>>,
    files: BTreeMap<String, Result<String, u16>>,
    fetched: Mutex<Vec<String>>,
}

impl MockApi {
    pub fn add_listing(&mut self, repo: &RepoRef, entries: Vec<RepoEntry>) {
        self.listings.insert(listing_key(repo), Ok(entries));
    }

    pub fn add_entry(&mut self, repo: &RepoRef, entry: RepoEntry) {
        let listing = self
            .listings
            .entry(listing_key(repo))
            .or_insert_with(|| Ok(Vec::new()));
        if let Ok(entries) = listing {
            entries.push(entry);
        }
    }

    pub fn add_file(&mut self, repo: &RepoRef, name: &str, content: &str) {
        let url = format!("https://raw.example/{}/{}/{name}", repo.owner, repo.name);
        self.add_entry(repo, RepoEntry::file(name, &url));
        self.files.insert(url, Ok(content.to_string()));
    }

    pub fn fail_listing(&mut self, repo: &RepoRef, status: u16) {
        self.listings.insert(listing_key(repo), Err(status));
    }

    pub fn fail_fetch(&mut self, url: &str, status: u16) {
        self.files.insert(url.to_string(), Err(status));
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().expect("fetch log").clone()
    }
}

impl RepositoryApi for MockApi {
    fn list_root(&self, repo: &RepoRef) -> Result<Vec<RepoEntry>, ResolveError> {
        let url = repo.host.listing_url(&repo.slug());
        match self.listings.get(&listing_key(repo)) {
            Some(Ok(entries)) => Ok(entries.clone()),
            Some(Err(status)) => Err(ResolveError::Listing {
                url,
                status: *status,
            }),
            None => Err(ResolveError::Listing { url, status: 404 }),
        }
    }

    fn fetch_raw(&self, url: &str) -> Result<String, ResolveError> {
        self.fetched.lock().expect("fetch log").push(url.to_string());
        match self.files.get(url) {
            Some(Ok(content)) => Ok(content.clone()),
            Some(Err(status)) => Err(ResolveError::Fetch {
                url: url.to_string(),
                status: *status,
            }),
            None => Err(ResolveError::Fetch {
                url: url.to_string(),
                status: 404,
            }),
        }
    }
}

fn listing_key(repo: &RepoRef) -> (String, String) {
    (repo.host.domain().to_string(), repo.slug())
}
