use std::{
    io::Cursor,
    path::{Path, PathBuf},
};

use anyhow::Context;
use async_trait::async_trait;
use geojson::GeoJson;
use tracing::{info, warn};

use crate::{
    geography::GeoLayer,
    getter::Getter,
    workbook::{SheetNames, Workbook},
};

/// Inputs published at URLs. Downloads land in `cache_dir` and are reused by later runs.
#[derive(Clone, Debug)]
pub struct Remote {
    pub geography_url: String,
    pub workbook_url: String,
    /// File name the geography download is stored under; its extension picks the reader.
    pub geography_file: String,
    pub workbook_file: String,
    pub cache_dir: PathBuf,
    pub shapefile_member: Option<String>,
    pub sheets: SheetNames,
}

impl Remote {
    /// Reads the cached copy of `file_name` when it is readable. A cached file that fails to
    /// read is removed and downloaded again.
    async fn load<T>(
        &self,
        url: &str,
        file_name: &str,
        read: impl Fn(&Path) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let path = self.cache_dir.join(file_name);
        if path.exists() {
            match read(&path) {
                Ok(value) => {
                    info!(path = %path.display(), "using cached download");
                    return Ok(value);
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "discarding unreadable cached download"
                    );
                    std::fs::remove_file(&path)
                        .with_context(|| format!("failed to remove {}", path.display()))?;
                }
            }
        }
        self.download(url, &path).await?;
        read(&path)
    }

    async fn download(&self, url: &str, path: &Path) -> anyhow::Result<()> {
        info!(%url, "downloading");
        let bytes = reqwest::get(url)
            .await
            .with_context(|| format!("failed to download {url}"))?
            .error_for_status()
            .with_context(|| format!("failed to download {url}"))?
            .bytes()
            .await?;
        check_payload(path, &bytes).with_context(|| format!("unexpected content from {url}"))?;
        store(path, &bytes)
    }
}

// Hosting services answer some requests with an HTML page and status 200; such a body must
// never reach the cache.
fn check_payload(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    match extension.as_str() {
        "zip" | "xlsx" => {
            zip::ZipArchive::new(Cursor::new(bytes))
                .with_context(|| format!("{} is not a zip container", path.display()))?;
        }
        "geojson" | "json" => {
            std::str::from_utf8(bytes)?
                .parse::<GeoJson>()
                .with_context(|| format!("{} is not GeoJSON", path.display()))?;
        }
        _ => {}
    }
    Ok(())
}

// Written to a temporary sibling first so an interrupted download never looks cached.
fn store(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create cache dir {}", dir.display()))?;
    let mut tmpfile = tempfile::NamedTempFile::new_in(dir)?;
    std::io::Write::write_all(&mut tmpfile, bytes)?;
    tmpfile
        .persist(path)
        .with_context(|| format!("failed to store {}", path.display()))?;
    Ok(())
}

#[async_trait]
impl Getter for Remote {
    async fn geography(&self) -> anyhow::Result<GeoLayer> {
        let member = self.shapefile_member.as_deref();
        self.load(&self.geography_url, &self.geography_file, |path| {
            GeoLayer::from_path(path, member)
        })
        .await
    }

    async fn workbook(&self) -> anyhow::Result<Workbook> {
        self.load(&self.workbook_url, &self.workbook_file, |path| {
            Workbook::from_path(path, &self.sheets)
        })
        .await
    }
}
