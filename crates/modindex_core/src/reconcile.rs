use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::detect::{MetaFormat, RemoteMeta};
use crate::error::ResolveError;
use crate::host::{RepositoryApi, parse_repo_url};
use crate::scan::{ScanOptions, scan_repository};

/// A mod's `meta.json` object, mutated in place into its output record. Keys
/// keep the order they were read in; new keys are appended.
pub type Descriptor = Map<String, Value>;

/// Fields the index no longer publishes.
pub const DEPRECATED_FIELDS: &[&str] = &[
    "automatic-version-check",
    "fixed-release-tag-updates",
    "last-updated",
    "folderName",
];

/// `(from, to)`; the new name is overwritten when both are present.
pub const RENAMED_FIELDS: &[(&str, &str)] = &[
    ("title", "name"),
    ("author", "owner"),
    ("downloadURL", "download_url"),
];

/// `(remote field, record field)` for thunderstore manifests.
pub const THUNDERSTORE_INCLUDES: &[(&str, &str)] = &[
    ("name", "id"),
    ("description", "description"),
    ("version_number", "version"),
    ("dependencies", "deps"),
];

/// `(remote field, record field)` for smods manifests and script headers.
pub const SMODS_INCLUDES: &[(&str, &str)] = &[
    ("id", "id"),
    ("provides", "provides"),
    ("description", "description"),
    ("version", "version"),
    ("dependencies", "deps"),
    ("conflicts", "conflicts"),
];

/// What to do when no file in the upstream listing has recognizable metadata.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissPolicy {
    /// Fail the item with `could not determine meta info`.
    Strict,
    /// Treat the item as an smods mod whose id is its directory name.
    #[default]
    FallbackToPathname,
}

impl MissPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::FallbackToPathname => "fallback-to-pathname",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveOptions {
    pub scan: ScanOptions,
    pub on_miss: MissPolicy,
}

/// Resolve one descriptor against its upstream repository and reconcile it
/// into an output record.
pub fn resolve_descriptor(
    api: &dyn RepositoryApi,
    descriptor: &mut Descriptor,
    options: &ResolveOptions,
) -> Result<(), ResolveError> {
    let repo_url = descriptor
        .get("repo")
        .and_then(Value::as_str)
        .ok_or(ResolveError::MissingRepo)?;
    let repo = parse_repo_url(repo_url)?;

    let meta = match scan_repository(api, &repo, &options.scan)? {
        Some(meta) => meta,
        None => fallback_meta(descriptor, options.on_miss)?,
    };
    reconcile(descriptor, &meta)
}

/// Stand-in metadata for a detection miss, or the miss itself under
/// [`MissPolicy::Strict`].
pub fn fallback_meta(
    descriptor: &Descriptor,
    policy: MissPolicy,
) -> Result<RemoteMeta, ResolveError> {
    match policy {
        MissPolicy::Strict => Err(ResolveError::MetaUndetermined),
        MissPolicy::FallbackToPathname => {
            let pathname = descriptor
                .get("pathname")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let mut fields = Map::new();
            fields.insert("id".to_string(), Value::String(pathname.to_string()));
            fields.insert("description".to_string(), Value::String(String::new()));
            Ok(RemoteMeta::new(MetaFormat::Smods, fields))
        }
    }
}

pub fn inclusion_map(format: MetaFormat) -> &'static [(&'static str, &'static str)] {
    match format {
        MetaFormat::Thunderstore => THUNDERSTORE_INCLUDES,
        MetaFormat::Smods | MetaFormat::SmodsHeader => SMODS_INCLUDES,
    }
}

/// Apply deletes, renames and the format's inclusion map, then stamp
/// `metafmt`. Fails when the record ends up without a usable `id`.
pub fn reconcile(descriptor: &mut Descriptor, meta: &RemoteMeta) -> Result<(), ResolveError> {
    for key in DEPRECATED_FIELDS {
        descriptor.shift_remove(*key);
    }
    for (from, to) in RENAMED_FIELDS {
        if let Some(value) = descriptor.shift_remove(*from) {
            descriptor.insert((*to).to_string(), value);
        }
    }
    for (from, to) in inclusion_map(meta.format) {
        let value = meta.get(from).cloned().unwrap_or(Value::Null);
        descriptor.insert((*to).to_string(), value);
    }
    descriptor.insert(
        "metafmt".to_string(),
        Value::String(meta.format.as_str().to_string()),
    );

    let has_id = descriptor
        .get("id")
        .and_then(Value::as_str)
        .is_some_and(|id| !id.trim().is_empty());
    if !has_id {
        return Err(ResolveError::MissingId);
    }
    Ok(())
}
