use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    error::SimplifyError,
    getter::Getter,
    local::Local,
    remote::Remote,
    render::Tooltip,
    simplify::{Tolerance, DEFAULT_TOLERANCE},
    workbook::SheetNames,
};

// Published Minas Gerais 2022 census inputs. The usercontent endpoint with `confirm=t` serves
// the file itself instead of the virus-scan interstitial large files get.
const GEOGRAPHY_URL: &str = "https://drive.usercontent.google.com/download\
     ?id=1NlFEltDlaYxovkorCosZL3bYkryFfFzx&export=download&confirm=t";
const WORKBOOK_URL: &str = "https://drive.usercontent.google.com/download\
     ?id=1ge7dKvhHRYxXWENAwnUAsWGzDdcOATvu&export=download&confirm=t";

/// Where the two inputs come from. Everything downstream is identical for both.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Source {
    Remote {
        geography_url: String,
        workbook_url: String,
        geography_file: String,
        workbook_file: String,
    },
    Local {
        geography: PathBuf,
        workbook: PathBuf,
    },
}

impl Default for Source {
    fn default() -> Self {
        Source::Remote {
            geography_url: GEOGRAPHY_URL.to_string(),
            workbook_url: WORKBOOK_URL.to_string(),
            geography_file: "MG_setores_CD2022.zip".to_string(),
            workbook_file: "DataMG.xlsx".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub source: Source,
    pub cache_dir: PathBuf,
    /// Shapefile to read when the geography archive holds several.
    pub shapefile_member: Option<String>,
    pub sheets: SheetNames,
    pub key_column: String,
    pub tooltip_field: String,
    pub tooltip_label: String,
    pub tolerance: f64,
    pub out_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let tooltip = Tooltip::default();
        Self {
            source: Source::default(),
            cache_dir: PathBuf::from("data"),
            shapefile_member: Some("MG_setores_CD2022.shp".to_string()),
            sheets: SheetNames::default(),
            key_column: "CD_SETOR".to_string(),
            tooltip_field: tooltip.field,
            tooltip_label: tooltip.label,
            tolerance: DEFAULT_TOLERANCE,
            out_dir: PathBuf::from("out"),
        }
    }
}

impl Config {
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn tolerance(&self) -> Result<Tolerance, SimplifyError> {
        Tolerance::new(self.tolerance)
    }

    pub fn tooltip(&self) -> Tooltip {
        Tooltip {
            field: self.tooltip_field.clone(),
            label: self.tooltip_label.clone(),
        }
    }

    pub fn getter(&self) -> Box<dyn Getter + Send + Sync> {
        self.getter_with_cache(&self.cache_dir)
    }

    pub fn getter_with_cache(&self, cache_dir: &Path) -> Box<dyn Getter + Send + Sync> {
        match &self.source {
            Source::Remote {
                geography_url,
                workbook_url,
                geography_file,
                workbook_file,
            } => Box::new(Remote {
                geography_url: geography_url.clone(),
                workbook_url: workbook_url.clone(),
                geography_file: geography_file.clone(),
                workbook_file: workbook_file.clone(),
                cache_dir: cache_dir.to_path_buf(),
                shapefile_member: self.shapefile_member.clone(),
                sheets: self.sheets.clone(),
            }),
            Source::Local {
                geography,
                workbook,
            } => Box::new(Local {
                geography: geography.clone(),
                workbook: workbook.clone(),
                shapefile_member: self.shapefile_member.clone(),
                sheets: self.sheets.clone(),
            }),
        }
    }
}
