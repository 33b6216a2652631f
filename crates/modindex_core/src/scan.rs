use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::detect::{MetaFormat, RemoteMeta, detect_entry};
use crate::error::ResolveError;
use crate::host::{RepoRef, RepositoryApi};

/// How to pick one metadata file when a repository root holds several.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionStrategy {
    /// Examine the whole listing, then prefer thunderstore over smods over
    /// smods-header. Ties go to the earlier entry.
    #[default]
    Ranked,
    /// Stop at the first entry that detects, in platform listing order.
    FirstMatch,
}

impl SelectionStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ranked => "ranked",
            Self::FirstMatch => "first-match",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ScanOptions {
    pub strategy: SelectionStrategy,
    /// Tolerate a script header without the leading delimiter line.
    pub no_pad: bool,
}

/// List the repository root and run format detection over its entries.
///
/// `Ok(None)` means nothing in the listing matched. A failed listing, or a
/// failed download of any candidate file, aborts the scan.
pub fn scan_repository(
    api: &dyn RepositoryApi,
    repo: &RepoRef,
    options: &ScanOptions,
) -> Result<Option<RemoteMeta>, ResolveError> {
    let entries = api.list_root(repo)?;
    debug!(repo = %repo.slug(), entries = entries.len(), "listed repository root");

    let mut best = None::<RemoteMeta>;
    for entry in &entries {
        let Some(meta) = detect_entry(api, entry, options.no_pad)? else {
            continue;
        };
        debug!(
            repo = %repo.slug(),
            file = %entry.name,
            format = meta.format.as_str(),
            "metadata candidate detected"
        );
        match options.strategy {
            SelectionStrategy::FirstMatch => return Ok(Some(meta)),
            SelectionStrategy::Ranked => {
                let outranks = best
                    .as_ref()
                    .is_none_or(|current| meta.format.priority() > current.format.priority());
                if outranks {
                    let top = meta.format == MetaFormat::Thunderstore;
                    best = Some(meta);
                    if top {
                        break;
                    }
                }
            }
        }
    }
    Ok(best)
}
