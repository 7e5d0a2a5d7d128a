use anyhow::{anyhow, Context};
use serde_json::json;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MANIFEST_ENTRY: &str = "manifest.json";
const WORKSPACE_PREFIX: &str = "workspace/";
pub const BUNDLE_FORMAT_V1: &str = "taskcount-workspace-v1";

/// Workspace files carried by a bundle. Missing ones are left out rather than
/// failing the export; a fresh workspace has no store yet.
pub const BUNDLED_FILES: [&str; 3] = [
    "taskcount.sqlite3",
    "contador_tarefas.csv",
    "contador_tarefas.ledger.json",
];

#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub bundle_format: String,
    pub entry_count: usize,
}

#[derive(Debug, Clone)]
pub struct ImportSummary {
    pub bundle_format_detected: String,
    pub restored_files: Vec<String>,
    /// Workspace files the bundle did not carry, deleted so the store and its
    /// ledger always come from the same bundle.
    pub removed_files: Vec<String>,
}

pub fn export_workspace_bundle(
    workspace_path: &Path,
    out_path: &Path,
) -> anyhow::Result<ExportSummary> {
    let present: Vec<&str> = BUNDLED_FILES
        .iter()
        .copied()
        .filter(|name| workspace_path.join(name).is_file())
        .collect();
    if present.is_empty() {
        return Err(anyhow!(
            "nothing to export in workspace {}",
            workspace_path.to_string_lossy()
        ));
    }

    if let Some(parent) = out_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }

    let out_file = File::create(out_path).with_context(|| {
        format!(
            "failed to create output file {}",
            out_path.to_string_lossy()
        )
    })?;
    let mut zip = ZipWriter::new(out_file);
    let opts = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let exported_at = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let manifest = json!({
        "format": BUNDLE_FORMAT_V1,
        "version": 1,
        "appVersion": env!("CARGO_PKG_VERSION"),
        "exportedAt": exported_at,
        "files": present,
    });
    zip.start_file(MANIFEST_ENTRY, opts)
        .context("failed to start manifest entry")?;
    zip.write_all(
        serde_json::to_string_pretty(&manifest)
            .context("failed to serialize manifest")?
            .as_bytes(),
    )
    .context("failed to write manifest entry")?;

    for name in &present {
        let src = workspace_path.join(name);
        zip.start_file(format!("{}{}", WORKSPACE_PREFIX, name), opts)
            .with_context(|| format!("failed to start entry {}", name))?;
        let mut f = File::open(&src)
            .with_context(|| format!("failed to open {}", src.to_string_lossy()))?;
        std::io::copy(&mut f, &mut zip).with_context(|| format!("failed to write entry {}", name))?;
    }

    zip.finish().context("failed to finalize zip bundle")?;

    Ok(ExportSummary {
        bundle_format: BUNDLE_FORMAT_V1.to_string(),
        entry_count: present.len() + 1,
    })
}

/// Restores a bundle into `workspace_path`. The bundle replaces the whole set
/// of workspace files: each carried file is extracted next to its target and
/// renamed into place, and any bundled file name it lacks is removed.
pub fn import_workspace_bundle(
    in_path: &Path,
    workspace_path: &Path,
) -> anyhow::Result<ImportSummary> {
    if !is_zip_file(in_path)? {
        return Err(anyhow!(
            "not a workspace bundle: {}",
            in_path.to_string_lossy()
        ));
    }
    std::fs::create_dir_all(workspace_path).with_context(|| {
        format!(
            "failed to create workspace {}",
            workspace_path.to_string_lossy()
        )
    })?;

    let in_file = File::open(in_path)
        .with_context(|| format!("failed to open bundle {}", in_path.to_string_lossy()))?;
    let mut archive = ZipArchive::new(in_file).context("invalid zip archive")?;

    let mut manifest_text = String::new();
    archive
        .by_name(MANIFEST_ENTRY)
        .context("bundle missing manifest.json")?
        .read_to_string(&mut manifest_text)
        .context("failed to read manifest.json")?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_text).context("manifest.json is invalid JSON")?;
    let format = manifest
        .get("format")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    if format != BUNDLE_FORMAT_V1 {
        return Err(anyhow!("unsupported bundle format: {}", format));
    }

    let mut restored = Vec::new();
    let mut absent = Vec::new();
    for name in BUNDLED_FILES {
        let entry_name = format!("{}{}", WORKSPACE_PREFIX, name);
        let mut entry = match archive.by_name(&entry_name) {
            Ok(e) => e,
            Err(zip::result::ZipError::FileNotFound) => {
                absent.push(name);
                continue;
            }
            Err(e) => return Err(e).context(format!("failed to read entry {}", entry_name)),
        };

        let dst = workspace_path.join(name);
        let tmp_dst = workspace_path.join(format!("{}.importing", name));
        if tmp_dst.exists() {
            let _ = std::fs::remove_file(&tmp_dst);
        }
        let mut out = File::create(&tmp_dst).with_context(|| {
            format!("failed to create temp file {}", tmp_dst.to_string_lossy())
        })?;
        std::io::copy(&mut entry, &mut out)
            .with_context(|| format!("failed to extract {}", entry_name))?;
        out.flush()
            .with_context(|| format!("failed to flush {}", tmp_dst.to_string_lossy()))?;
        drop(out);

        if dst.exists() {
            std::fs::remove_file(&dst).with_context(|| {
                format!("failed to remove existing {}", dst.to_string_lossy())
            })?;
        }
        std::fs::rename(&tmp_dst, &dst).with_context(|| {
            format!("failed to move extracted file to {}", dst.to_string_lossy())
        })?;
        restored.push(name.to_string());
    }

    let mut removed = Vec::new();
    for name in absent {
        let dst = workspace_path.join(name);
        if dst.exists() {
            std::fs::remove_file(&dst)
                .with_context(|| format!("failed to remove stale {}", dst.to_string_lossy()))?;
            removed.push(name.to_string());
        }
    }

    Ok(ImportSummary {
        bundle_format_detected: BUNDLE_FORMAT_V1.to_string(),
        restored_files: restored,
        removed_files: removed,
    })
}

fn is_zip_file(path: &Path) -> anyhow::Result<bool> {
    let mut f = File::open(path)
        .with_context(|| format!("failed to open input file {}", path.to_string_lossy()))?;
    let mut sig = [0u8; 4];
    let read = f.read(&mut sig).context("failed to read file signature")?;
    if read < 4 {
        return Ok(false);
    }
    Ok(sig == [0x50, 0x4B, 0x03, 0x04])
}
