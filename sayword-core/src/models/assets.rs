//! Where model files come from.
//!
//! Resolution order: an explicit local path, then a previously fetched copy in
//! the cache directory, then a download. Downloads land in a `.part` file and
//! are renamed into place, so an interrupted fetch never looks complete.
//! `.tar.gz` / `.tgz` packages are unpacked with their single top-level
//! directory stripped.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, SaywordError};
use crate::worker::ProgressFn;

/// A model location. Either field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelSource {
    pub path: Option<PathBuf>,
    pub url: Option<String>,
}

impl ModelSource {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            url: None,
        }
    }

    pub fn remote(url: impl Into<String>) -> Self {
        Self {
            path: None,
            url: Some(url.into()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.path.is_some() || self.url.is_some()
    }
}

/// Deployment configuration for every offline model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModelAssets {
    /// Downloaded and extracted packages live here.
    pub cache_dir: PathBuf,
    /// Grammar model package per language tag.
    pub grammar: HashMap<String, ModelSource>,
    /// The single free-form transcription model.
    pub free_form: ModelSource,
}

impl Default for ModelAssets {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("models"),
            grammar: HashMap::new(),
            free_form: ModelSource::default(),
        }
    }
}

impl ModelAssets {
    /// Source for `language`, falling back from `en-US` to `en`.
    pub fn grammar_source(&self, language: &str) -> ModelSource {
        let language = language.trim().to_lowercase();
        if let Some(source) = self.grammar.get(&language) {
            return source.clone();
        }
        let primary = language.split(['-', '_']).next().unwrap_or(&language);
        self.grammar
            .iter()
            .find(|(tag, _)| tag.to_lowercase() == primary)
            .map(|(_, source)| source.clone())
            .unwrap_or_default()
    }
}

/// Make the model available on disk and return its path.
///
/// `name` is the cache entry used when `source.path` is not set.
pub fn resolve(
    source: &ModelSource,
    cache_dir: &Path,
    name: &str,
    progress: ProgressFn<'_>,
) -> Result<PathBuf> {
    let target = source
        .path
        .clone()
        .unwrap_or_else(|| cache_dir.join(name));

    if is_populated(&target) {
        progress(1.0);
        return Ok(target);
    }

    let Some(url) = source.url.as_deref() else {
        return Err(SaywordError::ModelNotFound { path: target });
    };

    fetch(url, &target, progress)?;
    progress(1.0);
    Ok(target)
}

fn is_populated(path: &Path) -> bool {
    if path.is_dir() {
        fs::read_dir(path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    } else {
        path.is_file()
    }
}

fn is_archive(url: &str) -> bool {
    let url = url.split(['?', '#']).next().unwrap_or(url);
    url.ends_with(".tar.gz") || url.ends_with(".tgz")
}

fn sibling(target: &Path, suffix: &str) -> PathBuf {
    let mut name = target
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(suffix);
    target.with_file_name(name)
}

#[cfg(feature = "download")]
fn fetch(url: &str, target: &Path, progress: ProgressFn<'_>) -> Result<()> {
    use std::io::{Read, Write};

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    let part = sibling(target, ".part");

    info!(url, target = %target.display(), "downloading model");
    let mut response = reqwest::blocking::get(url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| SaywordError::ModelLoad(format!("download {url}: {e}")))?;
    let total = response.content_length();

    let mut file = fs::File::create(&part)?;
    let mut buf = vec![0u8; 64 * 1024];
    let mut downloaded: u64 = 0;
    loop {
        let n = response.read(&mut buf)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        downloaded += n as u64;
        if let Some(total) = total.filter(|t| *t > 0) {
            // Leave headroom for extraction.
            progress((downloaded as f32 / total as f32).min(1.0) * 0.9);
        }
    }
    file.sync_all()?;
    drop(file);

    if is_archive(url) {
        let staging = sibling(target, ".extract");
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        fs::create_dir_all(&staging)?;
        extract_package(&fs::read(&part)?, &staging)?;
        if target.exists() {
            fs::remove_dir_all(target)?;
        }
        fs::rename(&staging, target)?;
        fs::remove_file(&part)?;
    } else {
        fs::rename(&part, target)?;
    }

    info!(bytes = downloaded, target = %target.display(), "model fetched");
    Ok(())
}

#[cfg(not(feature = "download"))]
fn fetch(url: &str, target: &Path, _progress: ProgressFn<'_>) -> Result<()> {
    info!(url, target = %target.display(), "model missing and downloads are disabled");
    Err(SaywordError::ModelLoad(format!(
        "built without download support; fetch {url} into {}",
        target.display()
    )))
}

/// Unpack a gzip'd tarball into `dest`, dropping the first path component.
#[cfg(feature = "download")]
pub fn extract_package(data: &[u8], dest: &Path) -> Result<()> {
    use flate2::read::GzDecoder;
    use std::path::Component;
    use tar::Archive;

    let mut archive = Archive::new(GzDecoder::new(data));
    for entry in archive.entries()? {
        let mut entry = entry?;
        let relative: PathBuf = {
            let path = entry.path()?;
            if path.components().any(|c| matches!(c, Component::ParentDir)) {
                return Err(SaywordError::ModelLoad(format!(
                    "package entry escapes destination: {}",
                    path.display()
                )));
            }
            path.components().skip(1).collect()
        };
        if relative.as_os_str().is_empty() {
            continue;
        }

        let out = dest.join(&relative);
        if entry.header().entry_type().is_dir() {
            fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        entry.unpack(&out)?;
    }
    Ok(())
}
