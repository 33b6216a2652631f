use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;

use crate::reconcile::Descriptor;

pub const OUTPUT_FILENAME: &str = "out.json";
pub const COMPRESSED_OUTPUT_FILENAME: &str = "out.json.gz";

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactReport {
    pub json_path: PathBuf,
    pub gzip_path: PathBuf,
    pub records: usize,
    pub json_bytes: usize,
    pub gzip_bytes: u64,
}

/// The output collection as one compact JSON array.
pub fn render_collection(records: &[Descriptor]) -> Result<String> {
    serde_json::to_string(records).context("failed to serialize output collection")
}

/// Write `out.json` and `out.json.gz` into `output_dir`.
pub fn write_artifacts(output_dir: &Path, records: &[Descriptor]) -> Result<ArtifactReport> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;
    let rendered = render_collection(records)?;

    let json_path = output_dir.join(OUTPUT_FILENAME);
    fs::write(&json_path, &rendered)
        .with_context(|| format!("failed to write {}", json_path.display()))?;

    let gzip_path = output_dir.join(COMPRESSED_OUTPUT_FILENAME);
    let file = File::create(&gzip_path)
        .with_context(|| format!("failed to create {}", gzip_path.display()))?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    encoder
        .write_all(rendered.as_bytes())
        .with_context(|| format!("failed to compress into {}", gzip_path.display()))?;
    encoder
        .finish()
        .and_then(|mut writer| writer.flush())
        .with_context(|| format!("failed to finish {}", gzip_path.display()))?;
    let gzip_bytes = fs::metadata(&gzip_path)
        .with_context(|| format!("failed to inspect {}", gzip_path.display()))?
        .len();

    Ok(ArtifactReport {
        json_path,
        gzip_path,
        records: records.len(),
        json_bytes: rendered.len(),
        gzip_bytes,
    })
}
