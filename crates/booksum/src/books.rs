use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use booksum_core::{BookRecord, BookSummary};
use flate2::read::MultiGzDecoder;
use walkdir::WalkDir;

/// Book records under `input`: the file itself, or the `.json` and
/// `.json.gz` files directly inside a directory, sorted by name.
pub fn discover_inputs(input: &Path) -> Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        bail!(
            "input '{}' does not exist or is not a file or directory",
            input.display()
        );
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(input)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if entry.file_type().is_file() && is_book_record(entry.path()) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

fn is_book_record(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    name.ends_with(".json") || name.ends_with(".json.gz")
}

pub fn load_book(path: &Path) -> Result<BookRecord> {
    let file =
        File::open(path).with_context(|| format!("failed to open book {}", path.display()))?;
    let reader: Box<dyn Read> = if has_gz_extension(path) {
        Box::new(MultiGzDecoder::new(file))
    } else {
        Box::new(file)
    };
    serde_json::from_reader(BufReader::new(reader))
        .with_context(|| format!("invalid book record {}", path.display()))
}

fn has_gz_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false)
}

/// `{model}_processed_{stem}.json`, where the stem drops `.json` and `.gz`.
pub fn output_path_for(output_dir: &Path, model: &str, input: &Path) -> PathBuf {
    let name = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut stem = name.as_str();
    for suffix in [".gz", ".json"] {
        let cut = stem.len().saturating_sub(suffix.len());
        if cut > 0
            && stem
                .get(cut..)
                .is_some_and(|tail| tail.eq_ignore_ascii_case(suffix))
        {
            stem = &stem[..cut];
        }
    }
    let model = model.replace(['/', '\\', ':'], "_");
    output_dir.join(format!("{model}_processed_{stem}.json"))
}

pub fn save_summary(path: &Path, summary: &BookSummary) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(summary)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}
