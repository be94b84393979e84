use std::{
    collections::BTreeMap,
    fs::File,
    io::{Cursor, Read, Seek},
    path::{Path, PathBuf},
};

use anyhow::{bail, Context};
use geo::{MultiPolygon, Polygon};
use geojson::FeatureCollection;
use polars::prelude::{DataFrame, NamedFrom, Series};
use shapefile::{dbase::FieldValue, Shape};
use tracing::{debug, info};

use crate::{error::DataError, workbook::number_text};

/// Column added to the attribute frame so merged rows can find their geometry again.
pub const ROW_COLUMN: &str = "__row";

#[derive(Clone, Debug)]
pub struct SectorFeature {
    pub attributes: BTreeMap<String, Option<String>>,
    pub geometry: MultiPolygon<f64>,
}

/// Polygons of every census sector plus their text attributes.
#[derive(Clone, Debug, Default)]
pub struct GeoLayer {
    pub features: Vec<SectorFeature>,
}

impl GeoLayer {
    /// Reads `.zip` (zipped shapefile), `.shp` or `.geojson`/`.json` files.
    pub fn from_path(path: &Path, member: Option<&str>) -> anyhow::Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let layer = match extension.as_deref() {
            Some("zip") => {
                let file = File::open(path)
                    .with_context(|| format!("failed to open {}", path.display()))?;
                read_zipped_shapefile(file, member)?
            }
            Some("shp") => read_shapefile(path)?,
            Some("geojson") | Some("json") => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                read_geojson(&text)?
            }
            _ => bail!("unsupported geography file {}", path.display()),
        };
        info!(
            path = %path.display(),
            features = layer.features.len(),
            "loaded geography"
        );
        Ok(layer)
    }

    pub fn from_zip_bytes(bytes: Vec<u8>, member: Option<&str>) -> anyhow::Result<Self> {
        read_zipped_shapefile(Cursor::new(bytes), member)
    }

    /// Union of attribute names, sorted.
    pub fn columns(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .features
            .iter()
            .flat_map(|f| f.attributes.keys().cloned())
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Attributes as text columns plus [`ROW_COLUMN`] holding each feature's index.
    pub fn attribute_frame(&self) -> Result<DataFrame, DataError> {
        let mut series: Vec<Series> = self
            .columns()
            .iter()
            .map(|name| {
                let values: Vec<Option<String>> = self
                    .features
                    .iter()
                    .map(|f| f.attributes.get(name).cloned().flatten())
                    .collect();
                Series::new(name, values)
            })
            .collect();
        let rows: Vec<u32> = (0..self.features.len() as u32).collect();
        series.push(Series::new(ROW_COLUMN, rows));
        Ok(DataFrame::new(series)?)
    }

    pub fn into_geometries(self) -> Vec<MultiPolygon<f64>> {
        self.features.into_iter().map(|f| f.geometry).collect()
    }
}

fn read_zipped_shapefile<R: Read + Seek>(
    reader: R,
    member: Option<&str>,
) -> anyhow::Result<GeoLayer> {
    let mut zip = zip::ZipArchive::new(reader)?;
    // Sidecar files (.shx, .dbf, .prj) must sit next to the .shp, so flatten everything into
    // one directory.
    let dir = tempfile::tempdir()?;
    let mut shp: Option<PathBuf> = None;
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry
            .enclosed_name()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .map(str::to_string)
        else {
            continue;
        };
        let target = dir.path().join(&name);
        let mut out = File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
        debug!(%name, "extracted archive member");

        let is_shp = name.to_ascii_lowercase().ends_with(".shp");
        let wanted = match member {
            Some(member) => name == member,
            None => shp.is_none(),
        };
        if is_shp && wanted {
            shp = Some(target);
        }
    }
    let Some(shp) = shp else {
        match member {
            Some(member) => bail!("{member} not found in archive"),
            None => bail!("archive contains no .shp file"),
        }
    };
    read_shapefile(&shp)
}

fn read_shapefile(path: &Path) -> anyhow::Result<GeoLayer> {
    let mut reader = shapefile::Reader::from_path(path)
        .with_context(|| format!("failed to open shapefile {}", path.display()))?;
    let mut features = Vec::new();
    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result?;
        let geometry = match shape {
            Shape::Polygon(polygon) => MultiPolygon::from(polygon),
            Shape::PolygonM(polygon) => MultiPolygon::from(polygon),
            Shape::PolygonZ(polygon) => MultiPolygon::from(polygon),
            Shape::NullShape => MultiPolygon::new(Vec::new()),
            other => bail!(
                "{} holds {:?} shapes, expected polygons",
                path.display(),
                other.shapetype()
            ),
        };
        let attributes = record
            .into_iter()
            .map(|(name, value)| (name, field_text(value)))
            .collect();
        features.push(SectorFeature {
            attributes,
            geometry,
        });
    }
    Ok(GeoLayer { features })
}

fn field_text(value: FieldValue) -> Option<String> {
    match value {
        FieldValue::Character(s) => s.map(|s| s.trim_end().to_string()),
        FieldValue::Memo(s) => Some(s),
        FieldValue::Numeric(n) => n.map(number_text),
        FieldValue::Float(f) => f.map(|f| number_text(f64::from(f))),
        FieldValue::Double(d) => Some(number_text(d)),
        FieldValue::Currency(c) => Some(number_text(c)),
        FieldValue::Integer(i) => Some(i.to_string()),
        FieldValue::Logical(b) => b.map(|b| b.to_string()),
        _ => None,
    }
}

pub(crate) fn read_geojson(text: &str) -> anyhow::Result<GeoLayer> {
    let collection: FeatureCollection = text.parse()?;
    let mut features = Vec::with_capacity(collection.features.len());
    for feature in collection.features {
        let geometry = match feature.geometry {
            Some(geometry) => match geo::Geometry::<f64>::try_from(geometry.value)? {
                geo::Geometry::Polygon(polygon) => MultiPolygon::new(vec![polygon]),
                geo::Geometry::MultiPolygon(multi) => multi,
                _ => bail!("sector geometry must be a polygon or multipolygon"),
            },
            None => MultiPolygon::<f64>::new(Vec::<Polygon<f64>>::new()),
        };
        let attributes = feature
            .properties
            .unwrap_or_default()
            .into_iter()
            .map(|(name, value)| {
                let text = match value {
                    serde_json::Value::Null => None,
                    serde_json::Value::String(s) => Some(s),
                    serde_json::Value::Number(n) => n.as_f64().map(number_text),
                    other => Some(other.to_string()),
                };
                (name, text)
            })
            .collect();
        features.push(SectorFeature {
            attributes,
            geometry,
        });
    }
    Ok(GeoLayer { features })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": {
                    "CD_SETOR": 310010405000001, "NM_MUN": "Cidadeia", "NM_BAIRRO": null
                },
                "geometry": { "type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]] }
            },
            {
                "type": "Feature",
                "properties": { "CD_SETOR": "310010405000002", "NM_MUN": "Cidadeia" },
                "geometry": {
                    "type": "MultiPolygon", "coordinates": [[[[1,0],[2,0],[2,1],[1,1],[1,0]]]]
                }
            }
        ]
    }"#;

    #[test]
    fn geojson_properties_become_text() {
        let layer = read_geojson(SAMPLE).unwrap();
        assert_eq!(layer.features.len(), 2);
        let first = &layer.features[0];
        assert_eq!(
            first.attributes["CD_SETOR"].as_deref(),
            Some("310010405000001")
        );
        assert_eq!(first.attributes["NM_BAIRRO"], None);
        assert_eq!(first.geometry.0.len(), 1);
        assert_eq!(layer.columns(), vec!["CD_SETOR", "NM_BAIRRO", "NM_MUN"]);
    }

    #[test]
    fn attribute_frame_has_row_index() {
        let layer = read_geojson(SAMPLE).unwrap();
        let frame = layer.attribute_frame().unwrap();
        assert_eq!(frame.height(), 2);
        let rows = frame.column(ROW_COLUMN).unwrap().u32().unwrap();
        assert_eq!(rows.get(1), Some(1));
        let bairro = frame.column("NM_BAIRRO").unwrap().str().unwrap();
        assert_eq!(bairro.get(0), None);
        assert_eq!(bairro.get(1), None);
    }

    #[test]
    fn point_geometry_is_rejected() {
        let text = r#"{"type":"FeatureCollection","features":[
            {"type":"Feature","properties":{},"geometry":{"type":"Point","coordinates":[0,0]}}]}"#;
        assert!(read_geojson(text).is_err());
    }

    #[test]
    fn geojson_file_is_loaded_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sectors.geojson");
        std::fs::write(&path, SAMPLE).unwrap();
        let layer = GeoLayer::from_path(&path, None).unwrap();
        assert_eq!(layer.features.len(), 2);
        assert!(GeoLayer::from_path(&dir.path().join("sectors.kml"), None).is_err());
    }

    #[test]
    fn archive_without_shapefile_is_rejected() {
        let mut buffer = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buffer);
            writer
                .start_file("readme.txt", zip::write::FileOptions::default())
                .unwrap();
            std::io::Write::write_all(&mut writer, b"no shapes here").unwrap();
            writer.finish().unwrap();
        }
        let err = GeoLayer::from_zip_bytes(buffer.into_inner(), None).unwrap_err();
        assert!(err.to_string().contains("no .shp"));
    }
}
