//! JSON files of annotations and detections
//!
//! ```json
//! [
//!   { "class": "Tumor", "kind": "Annotation", "z": 0, "t": 0,
//!     "polygons": [ { "exterior": [[0, 0], [10, 0], [10, 10], [0, 10]], "holes": [] } ] }
//! ]
//! ```
//!
//! Coordinates are full-resolution pixels. Rings may be left open.

use anyhow::{Context, Result};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use pixclass_core::{ObjectKind, PathClass, PathObject};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonRecord {
    pub exterior: Vec<[f64; 2]>,
    #[serde(default)]
    pub holes: Vec<Vec<[f64; 2]>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default = "default_kind")]
    pub kind: ObjectKind,
    #[serde(default)]
    pub z: usize,
    #[serde(default)]
    pub t: usize,
    /// Area in full-resolution pixels; written, ignored on read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<f64>,
    pub polygons: Vec<PolygonRecord>,
}

fn default_kind() -> ObjectKind {
    ObjectKind::Annotation
}

fn ring(points: &[[f64; 2]]) -> LineString<f64> {
    points.iter().map(|&[x, y]| Coord { x, y }).collect()
}

fn points(ring: &LineString<f64>) -> Vec<[f64; 2]> {
    ring.coords().map(|c| [c.x, c.y]).collect()
}

impl ObjectRecord {
    pub fn into_object(self) -> PathObject {
        let roi: MultiPolygon<f64> = self
            .polygons
            .iter()
            .map(|p| Polygon::new(ring(&p.exterior), p.holes.iter().map(|h| ring(h)).collect()))
            .collect();
        let class = self.class.map(PathClass::new);
        let object = match self.kind {
            ObjectKind::Annotation => PathObject::annotation(roi, class),
            ObjectKind::Detection => PathObject::detection(roi, class),
        };
        object.on_plane(self.z, self.t)
    }

    pub fn from_object(object: &PathObject) -> Self {
        Self {
            class: object.class.as_ref().map(|c| c.name().to_string()),
            kind: object.kind,
            z: object.z,
            t: object.t,
            area: Some(object.area()),
            polygons: object
                .roi
                .iter()
                .map(|p| PolygonRecord {
                    exterior: points(p.exterior()),
                    holes: p.interiors().iter().map(points).collect(),
                })
                .collect(),
        }
    }
}

/// Read objects from a JSON file.
pub fn read_objects(path: &Path) -> Result<Vec<PathObject>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let records: Vec<ObjectRecord> = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Invalid object file {}", path.display()))?;
    Ok(records.into_iter().map(ObjectRecord::into_object).collect())
}

/// Write objects to a JSON file.
pub fn write_objects<'a>(path: &Path, objects: impl IntoIterator<Item = &'a PathObject>) -> Result<()> {
    let records: Vec<ObjectRecord> = objects.into_iter().map(ObjectRecord::from_object).collect();
    let file = File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &records).context("Failed to write objects")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    #[test]
    fn test_read_open_ring_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("annotations.json");
        std::fs::write(
            &path,
            r#"[{"class": "Tumor", "polygons": [{"exterior": [[0,0],[10,0],[10,10],[0,10]]}]},
                {"polygons": [{"exterior": [[20,20],[30,20],[30,30]]}], "kind": "Detection", "z": 1}]"#,
        )
        .unwrap();
        let objects = read_objects(&path).unwrap();
        assert_eq!(objects.len(), 2);
        assert!(objects[0].is_annotation());
        assert_eq!(objects[0].class, Some(PathClass::new("Tumor")));
        assert_eq!(objects[0].area(), 100.0);
        assert!(objects[1].is_detection());
        assert_eq!((objects[1].z, objects[1].class.clone()), (1, None));
    }

    #[test]
    fn test_written_objects_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("objects.json");
        let square = geo::polygon![(x: 0.0, y: 0.0), (x: 4.0, y: 0.0), (x: 4.0, y: 4.0), (x: 0.0, y: 4.0)];
        let object = PathObject::detection(square, Some(PathClass::new("Cell")));
        write_objects(&path, [&object]).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"area\": 16.0"));
        let back = read_objects(&path).unwrap();
        assert_eq!(back[0].roi, object.roi);
        assert_eq!(back[0].class, object.class);
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = read_objects(Path::new("/nonexistent/annotations.json")).unwrap_err();
        assert!(err.to_string().contains("Failed to open"));
    }
}
