use std::{
    fs::File,
    path::{Path, PathBuf},
};

use geo::{BoundingRect, Rect};
use geojson::{Feature, FeatureCollection, GeoJson};
use polars::prelude::{CsvWriter, SerWriter};
use tracing::info;

use crate::{
    dataset::Measured,
    error::DataError,
    filter::{AggregateTable, View},
    simplify::{simplify, Tolerance},
};

/// YlOrRd, six classes.
const PALETTE: [&str; 6] = ["#ffffb2", "#fed976", "#feb24c", "#fd8d3c", "#f03b20", "#bd0026"];

#[derive(Clone, Debug)]
pub struct Tooltip {
    pub field: String,
    pub label: String,
}

impl Default for Tooltip {
    fn default() -> Self {
        Self {
            field: "NM_BAIRRO".to_string(),
            label: "Bairro:".to_string(),
        }
    }
}

pub struct MapLayer {
    pub title: String,
    /// Property holding the sector code.
    pub key: String,
    pub legend: String,
    pub column: String,
    pub tooltip: Tooltip,
    pub features: FeatureCollection,
    pub bounds: Option<Rect<f64>>,
    /// Smallest and largest measurement value in the layer.
    pub range: (f64, f64),
}

impl MapLayer {
    /// (lat, lon) midpoint of the layer's total bounds.
    pub fn center(&self) -> Option<(f64, f64)> {
        self.bounds.map(|b| {
            let c = b.center();
            (c.y, c.x)
        })
    }

    pub fn to_geojson(&self) -> String {
        GeoJson::from(self.features.clone()).to_string()
    }
}

pub fn build_layer(
    measured: &Measured,
    view: &View,
    tolerance: Tolerance,
    tooltip: &Tooltip,
) -> Result<MapLayer, DataError> {
    let dataset = measured.dataset();
    let column = measured.measurement().column.clone();
    let tooltip_values = dataset.text_column(&tooltip.field)?;

    let mut bounds: Option<Rect<f64>> = None;
    let mut range: Option<(f64, f64)> = None;
    let mut features = Vec::with_capacity(view.records.len());
    for record in &view.records {
        let geometry = simplify(&record.geometry, tolerance);
        if let Some(rect) = geometry.bounding_rect() {
            bounds = Some(match bounds {
                Some(b) => merge_rects(b, rect),
                None => rect,
            });
        }
        let value = measured.value(record);
        range = Some(match range {
            Some((lo, hi)) => (lo.min(value), hi.max(value)),
            None => (value, value),
        });

        let mut feature = Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::from(&geometry))),
            id: None,
            properties: None,
            foreign_members: None,
        };
        feature.set_property(dataset.key(), record.code.clone());
        feature.set_property(
            tooltip.field.clone(),
            tooltip_values.get(record.index()).cloned().flatten(),
        );
        feature.set_property(column.clone(), value);
        features.push(feature);
    }

    let region = view
        .selection
        .name(census::Level::Region)
        .unwrap_or_default();
    Ok(MapLayer {
        title: format!("Mapa - {region}"),
        key: dataset.key().to_string(),
        legend: measured.measurement().description.clone(),
        column,
        tooltip: tooltip.clone(),
        features: features.into_iter().collect(),
        bounds,
        range: range.unwrap_or((0.0, 0.0)),
    })
}

fn merge_rects(a: Rect<f64>, b: Rect<f64>) -> Rect<f64> {
    Rect::new(
        (a.min().x.min(b.min().x), a.min().y.min(b.min().y)),
        (a.max().x.max(b.max().x), a.max().y.max(b.max().y)),
    )
}

/// Equal-width class edges over `range`, one more than the palette length.
pub fn class_breaks((lo, hi): (f64, f64)) -> Vec<f64> {
    let classes = PALETTE.len();
    let step = (hi - lo) / classes as f64;
    (0..=classes).map(|i| lo + step * i as f64).collect()
}

pub fn html_page(layer: &MapLayer) -> String {
    let (lat, lon) = layer.center().unwrap_or((0.0, 0.0));
    let breaks = serde_json::to_string(&class_breaks(layer.range)).unwrap_or_default();
    let palette = serde_json::to_string(&PALETTE).unwrap_or_default();
    // key/column/field index properties; label and legend are inserted into markup
    let strings = serde_json::json!({
        "key": layer.key,
        "column": layer.column,
        "tooltipField": layer.tooltip.field,
        "tooltipLabel": escape_html(&layer.tooltip.label),
        "legend": escape_html(&layer.legend),
    });
    MAP_TEMPLATE
        .replace("{{TITLE}}", &escape_html(&layer.title))
        .replace("{{LAT}}", &lat.to_string())
        .replace("{{LON}}", &lon.to_string())
        .replace("{{BREAKS}}", &breaks)
        .replace("{{PALETTE}}", &palette)
        .replace("{{STRINGS}}", &script_safe(&strings.to_string()))
        .replace("{{GEOJSON}}", &script_safe(&layer.to_geojson()))
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// JSON embedded in a <script> must not close the tag.
fn script_safe(json: &str) -> String {
    json.replace("</", "<\\/")
}

pub fn write_table(path: &Path, table: &AggregateTable) -> anyhow::Result<()> {
    let mut df = table.to_frame()?;
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file).finish(&mut df)?;
    Ok(())
}

/// Writes `map.geojson`, `map.html` and whichever aggregate tables the view has into `dir`.
pub fn write_outputs(dir: &Path, layer: &MapLayer, view: &View) -> anyhow::Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    let mut written = Vec::new();

    let geojson = dir.join("map.geojson");
    std::fs::write(&geojson, layer.to_geojson())?;
    written.push(geojson);

    let html = dir.join("map.html");
    std::fs::write(&html, html_page(layer))?;
    written.push(html);

    let districts = dir.join("districts.csv");
    write_table(&districts, &view.districts)?;
    written.push(districts);

    if let Some(table) = &view.neighborhoods {
        let neighborhoods = dir.join("neighborhoods.csv");
        write_table(&neighborhoods, table)?;
        written.push(neighborhoods);
    }

    info!(dir = %dir.display(), files = written.len(), "wrote map outputs");
    Ok(written)
}

const MAP_TEMPLATE: &str = r##"<!doctype html>
<html lang="pt-BR">
<head>
  <meta charset="UTF-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1.0" />
  <title>{{TITLE}}</title>
  <link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css" />
  <script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>
  <style>
    html, body { height: 100%; margin: 0; font-family: sans-serif; }
    #map { height: calc(100% - 3rem); }
    h1 { font-size: 1.2rem; margin: 0; padding: 0.75rem 1rem; }
    .legend { background: white; padding: 6px 8px; line-height: 18px; }
    .legend i { width: 18px; height: 18px; float: left; margin-right: 8px; opacity: 0.8; }
    .leaflet-tooltip { font-weight: bold; border-radius: 5px; }
  </style>
</head>
<body>
  <h1>{{TITLE}}</h1>
  <div id="map"></div>
  <script>
    const sectors = {{GEOJSON}};
    const breaks = {{BREAKS}};
    const palette = {{PALETTE}};
    const labels = {{STRINGS}};

    function esc(text) {
      const span = document.createElement("span");
      span.textContent = String(text ?? "");
      return span.innerHTML;
    }

    function color(value) {
      for (let i = palette.length - 1; i > 0; i--) {
        if (value >= breaks[i]) return palette[i];
      }
      return palette[0];
    }

    const map = L.map("map").setView([{{LAT}}, {{LON}}], 12);
    L.tileLayer("https://{s}.basemaps.cartocdn.com/light_all/{z}/{x}/{y}{r}.png", {
      attribution: "&copy; OpenStreetMap contributors &copy; CARTO",
    }).addTo(map);

    const layer = L.geoJSON(sectors, {
      style: (f) => ({
        fillColor: color(f.properties[labels.column]),
        fillOpacity: 0.8,
        color: "#555",
        weight: 1,
        opacity: 0.5,
      }),
      onEachFeature: (f, l) => {
        const p = f.properties;
        l.bindTooltip(
          `<b>Setor:</b> ${esc(p[labels.key])}<br><b>${labels.tooltipLabel}</b> ` +
          `${esc(p[labels.tooltipField])}<br><b>${labels.legend}:</b> ` +
          `${Number(p[labels.column]).toLocaleString()}`,
          { sticky: true }
        );
      },
    }).addTo(map);
    if (layer.getBounds().isValid()) map.fitBounds(layer.getBounds());

    const legend = L.control({ position: "bottomright" });
    legend.onAdd = () => {
      const div = L.DomUtil.create("div", "legend");
      div.innerHTML = `<b>${labels.legend}</b><br>` + palette.map((c, i) =>
        `<i style="background:${c}"></i>${breaks[i].toLocaleString()} – ` +
        `${breaks[i + 1].toLocaleString()}`
      ).join("<br>");
      return div;
    };
    legend.addTo(map);
  </script>
</body>
</html>
"##;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dataset::fixtures::{dataset, moradores, Row},
        filter::{apply, Outcome, Selection},
    };

    const ROWS: &[Row] = &[
        ("10", "Sul", "Cidadeia", Some("Sede"), Some("Centro"), Some("4")),
        ("11", "Sul", "Cidadeia", Some("Sede"), Some("Vila"), Some("8")),
        ("12", "Sul", "Cidadeia", Some("Rural"), None, Some("x")),
    ];

    fn layer_for(selection: &Selection) -> (MapLayer, usize) {
        let dataset = dataset(ROWS);
        let measured = dataset.measure(&moradores()).unwrap();
        let Outcome::Ready(view) = apply(&measured, selection).unwrap() else {
            panic!("expected a view");
        };
        let layer =
            build_layer(&measured, &view, Tolerance::default(), &Tooltip::default()).unwrap();
        (layer, view.records.len())
    }

    #[test]
    fn features_carry_tooltip_properties() {
        let mut selection = Selection::new("Sul");
        selection.select(census::Level::Municipality, "Cidadeia").unwrap();
        let (layer, count) = layer_for(&selection);
        assert_eq!(layer.features.features.len(), count);
        let first = &layer.features.features[0];
        assert_eq!(first.property("CD_SETOR").and_then(|v| v.as_str()), Some("10"));
        assert_eq!(first.property("NM_BAIRRO").and_then(|v| v.as_str()), Some("Centro"));
        assert_eq!(first.property("V0001").and_then(|v| v.as_f64()), Some(4.0));
        let third = &layer.features.features[2];
        assert_eq!(third.property("V0001").and_then(|v| v.as_f64()), Some(0.0));
        assert!(third.property("NM_BAIRRO").unwrap().is_null());
        assert_eq!(layer.range, (0.0, 8.0));
        assert_eq!(layer.title, "Mapa - Sul");
    }

    #[test]
    fn center_is_midpoint_of_bounds() {
        let mut selection = Selection::new("Sul");
        selection.select(census::Level::Municipality, "Cidadeia").unwrap();
        let (layer, _) = layer_for(&selection);
        // fixture squares span x 0..3, y 0..1
        assert_eq!(layer.center(), Some((0.5, 1.5)));
    }

    #[test]
    fn breaks_cover_range() {
        let breaks = class_breaks((0.0, 12.0));
        assert_eq!(breaks, vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0, 12.0]);
    }

    #[test]
    fn html_embeds_layer() {
        let mut selection = Selection::new("Sul");
        selection.select(census::Level::Municipality, "Cidadeia").unwrap();
        let (layer, _) = layer_for(&selection);
        let html = html_page(&layer);
        assert!(html.contains("<title>Mapa - Sul</title>"));
        assert!(html.contains("\"tooltipLabel\":\"Bairro:\""));
        assert!(html.contains("color: \"#555\""));
        assert!(!html.contains("{{"));
    }

    #[test]
    fn labels_are_escaped_in_page() {
        let mut selection = Selection::new("Sul");
        selection.select(census::Level::Municipality, "Cidadeia").unwrap();
        let (mut layer, _) = layer_for(&selection);
        layer.legend = "<img src=x onerror=alert(1)>".to_string();
        layer.tooltip.label = "Bairro & <i>".to_string();
        let html = html_page(&layer);
        assert!(!html.contains("<img src=x"));
        assert!(html.contains("&lt;img src=x onerror=alert(1)&gt;"));
        assert!(html.contains("Bairro &amp; &lt;i&gt;"));
        // property values come from the data and are escaped in the browser
        assert!(html.contains("${esc(p[labels.tooltipField])}"));
        assert!(html.contains("${esc(p[labels.key])}"));
    }

    #[test]
    fn outputs_are_written() {
        let dataset = dataset(ROWS);
        let measured = dataset.measure(&moradores()).unwrap();
        let selection = Selection::from_names(
            Some("Sul".to_string()),
            Some("Cidadeia".to_string()),
            Some("Sede".to_string()),
            None,
        )
        .unwrap();
        let Outcome::Ready(view) = apply(&measured, &selection).unwrap() else {
            panic!("expected a view");
        };
        let layer =
            build_layer(&measured, &view, Tolerance::default(), &Tooltip::default()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let written = write_outputs(dir.path(), &layer, &view).unwrap();
        assert_eq!(written.len(), 4);
        let districts = std::fs::read_to_string(dir.path().join("districts.csv")).unwrap();
        assert!(districts.starts_with("NM_DIST,V0001"));
        assert!(districts.contains("Sede,12"));
    }
}
