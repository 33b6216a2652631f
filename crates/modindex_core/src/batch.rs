use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info};
use walkdir::WalkDir;

use crate::detect::parse_relaxed;
use crate::error::ResolveError;
use crate::host::RepositoryApi;
use crate::reconcile::{Descriptor, ResolveOptions, resolve_descriptor};

pub const MODS_DIR: &str = "mods";
pub const DESCRIPTOR_FILENAME: &str = "meta.json";

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub resolve: ResolveOptions,
    pub jobs: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ItemFailure {
    pub item: String,
    pub repo: Option<String>,
    pub error: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub items: usize,
    pub records: Vec<Descriptor>,
    pub failures: Vec<ItemFailure>,
}

struct ItemOutcome {
    item: String,
    repo: Option<String>,
    result: Result<Descriptor, ResolveError>,
}

/// Mod directories under `mods_dir`, sorted by name. Hidden entries and plain
/// files are skipped.
pub fn list_items(mods_dir: &Path) -> Result<Vec<String>> {
    let mut items = Vec::new();
    for entry in WalkDir::new(mods_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .follow_links(false)
    {
        let entry = entry.with_context(|| format!("failed to list {}", mods_dir.display()))?;
        if !entry.file_type().is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        items.push(name.to_string());
    }
    Ok(items)
}

/// Read `<mods_dir>/<item>/meta.json` and stamp `pathname` and `mtime`.
pub fn load_descriptor(mods_dir: &Path, item: &str) -> Result<Descriptor, ResolveError> {
    let path = mods_dir.join(item).join(DESCRIPTOR_FILENAME);
    let failure = |message: String| ResolveError::Descriptor {
        path: path.display().to_string(),
        message,
    };

    let content = fs::read_to_string(&path).map_err(|error| failure(error.to_string()))?;
    let mut descriptor = match parse_relaxed(&content) {
        Ok(Value::Object(object)) => object,
        Ok(_) => return Err(failure("descriptor is not an object".to_string())),
        Err(error) => return Err(failure(error.to_string())),
    };

    descriptor.insert("pathname".to_string(), Value::String(item.to_string()));
    if let Some(mtime) = fs::metadata(&path)
        .and_then(|metadata| metadata.modified())
        .ok()
        .and_then(|modified| modified.duration_since(UNIX_EPOCH).ok())
    {
        descriptor.insert("mtime".to_string(), Value::from(mtime.as_secs()));
    }
    Ok(descriptor)
}

/// Resolve every mod under `<mirror_dir>/mods`.
pub fn resolve_mirror(
    api: &dyn RepositoryApi,
    mirror_dir: &Path,
    options: &BatchOptions,
) -> Result<BatchReport> {
    let mods_dir = mirror_dir.join(MODS_DIR);
    let items = list_items(&mods_dir)?;
    Ok(resolve_batch(api, &mods_dir, &items, options))
}

/// Resolve `items` on a bounded pool of `options.jobs` workers.
///
/// Failures are logged and collected, never propagated. Records come back in
/// the order of `items`, successes only, one per distinct item.
pub fn resolve_batch(
    api: &dyn RepositoryApi,
    mods_dir: &Path,
    items: &[String],
    options: &BatchOptions,
) -> BatchReport {
    let mut seen = BTreeSet::new();
    let items = items
        .iter()
        .filter(|item| seen.insert(item.as_str()))
        .collect::<Vec<_>>();
    let workers = options.jobs.clamp(1, items.len().max(1));

    let cursor = AtomicUsize::new(0);
    let (sender, receiver) = mpsc::channel::<(usize, ItemOutcome)>();
    let mut outcomes = thread::scope(|scope| {
        for _ in 0..workers {
            let sender = sender.clone();
            let cursor = &cursor;
            let items = &items;
            scope.spawn(move || {
                loop {
                    let index = cursor.fetch_add(1, Ordering::Relaxed);
                    let Some(item) = items.get(index) else {
                        break;
                    };
                    let outcome = resolve_item(api, mods_dir, item, &options.resolve);
                    if sender.send((index, outcome)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(sender);

        // Outcomes are logged on the calling thread, as they arrive.
        let mut outcomes = Vec::with_capacity(items.len());
        for (index, outcome) in receiver {
            log_outcome(&outcome);
            outcomes.push((index, outcome));
        }
        outcomes
    });
    outcomes.sort_by_key(|(index, _)| *index);

    let mut report = BatchReport {
        items: items.len(),
        ..BatchReport::default()
    };
    for (_, outcome) in outcomes {
        match outcome.result {
            Ok(record) => report.records.push(record),
            Err(error) => report.failures.push(ItemFailure {
                item: outcome.item,
                repo: outcome.repo,
                error: error.to_string(),
            }),
        }
    }
    report
}

fn resolve_item(
    api: &dyn RepositoryApi,
    mods_dir: &Path,
    item: &str,
    options: &ResolveOptions,
) -> ItemOutcome {
    let mut descriptor = match load_descriptor(mods_dir, item) {
        Ok(descriptor) => descriptor,
        Err(error) => {
            return ItemOutcome {
                item: item.to_string(),
                repo: None,
                result: Err(error),
            };
        }
    };
    let repo = descriptor
        .get("repo")
        .and_then(Value::as_str)
        .map(ToString::to_string);

    let result = resolve_descriptor(api, &mut descriptor, options).map(|()| descriptor);
    ItemOutcome {
        item: item.to_string(),
        repo,
        result,
    }
}

fn log_outcome(outcome: &ItemOutcome) {
    match &outcome.result {
        Ok(record) => info!("{}", summary_line(&outcome.item, record)),
        Err(failure) => error!(
            item = %outcome.item,
            repo = outcome.repo.as_deref().unwrap_or("<unknown>"),
            "failed to resolve: {failure}"
        ),
    }
}

/// Fixed-width `item id format version` line for eyeballing long runs.
pub fn summary_line(item: &str, record: &Descriptor) -> String {
    let field = |key: &str| {
        record
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or("-")
            .to_string()
    };
    format!(
        "{:<32} {:<32} {:<14} {}",
        item,
        field("id"),
        field("metafmt"),
        field("version")
    )
}
