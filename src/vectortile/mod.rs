//! Mapbox Vector Tile encoding and decoding
//!
//! Encoding turns a set of terrain-classified contour segments into a
//! single-layer MVT tile. Decoding goes the other way for a companion
//! terrain-polygon tile: it locates a named source layer, keeps only
//! polygon features whose configured `type` attribute matches a glacier or
//! rock value list, and hands back their rings in normalized `[0, 1]^2`
//! tile coordinates. A missing layer or malformed payload is not fatal —
//! decoding just returns no polygons.

use crate::error::Result;
use crate::isoline::Threshold;
use crate::terrain::{ClassifiedIsolineSet, SegmentTerrain, TerrainPolygon, TerrainType};
use prost::Message;
use std::collections::HashMap;
use tracing::warn;

mod proto {
    use prost::Message;

    #[derive(Clone, PartialEq, Message)]
    pub struct Tile {
        #[prost(message, repeated, tag = "3")]
        pub layers: Vec<tile::Layer>,
    }

    pub mod tile {
        use prost::Message;

        #[derive(Clone, PartialEq, Message)]
        pub struct Layer {
            #[prost(uint32, required, tag = "15")]
            pub version: u32,
            #[prost(string, required, tag = "1")]
            pub name: String,
            #[prost(message, repeated, tag = "2")]
            pub features: Vec<Feature>,
            #[prost(string, repeated, tag = "3")]
            pub keys: Vec<String>,
            #[prost(message, repeated, tag = "4")]
            pub values: Vec<Value>,
            #[prost(uint32, optional, tag = "5")]
            pub extent: Option<u32>,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct Feature {
            #[prost(uint64, optional, tag = "1")]
            pub id: Option<u64>,
            #[prost(uint32, repeated, packed = "true", tag = "2")]
            pub tags: Vec<u32>,
            #[prost(enumeration = "GeomType", optional, tag = "3")]
            pub r#type: Option<i32>,
            #[prost(uint32, repeated, packed = "true", tag = "4")]
            pub geometry: Vec<u32>,
        }

        #[derive(Clone, PartialEq, Message)]
        pub struct Value {
            #[prost(string, optional, tag = "1")]
            pub string_value: Option<String>,
            #[prost(float, optional, tag = "2")]
            pub float_value: Option<f32>,
            #[prost(double, optional, tag = "3")]
            pub double_value: Option<f64>,
            #[prost(int64, optional, tag = "4")]
            pub int_value: Option<i64>,
            #[prost(uint64, optional, tag = "5")]
            pub uint_value: Option<u64>,
            #[prost(sint64, optional, tag = "6")]
            pub sint_value: Option<i64>,
            #[prost(bool, optional, tag = "7")]
            pub bool_value: Option<bool>,
        }

        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(i32)]
        pub enum GeomType {
            Unknown = 0,
            Point = 1,
            Linestring = 2,
            Polygon = 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum MvtValue {
    String(String),
    Int(i64),
}

fn key_id(k: &str, keys: &mut Vec<String>, key_index: &mut HashMap<String, u32>) -> u32 {
    if let Some(&idx) = key_index.get(k) {
        return idx;
    }
    let idx = keys.len() as u32;
    keys.push(k.to_string());
    key_index.insert(k.to_string(), idx);
    idx
}

fn value_id(v: MvtValue, values: &mut Vec<MvtValue>, value_index: &mut HashMap<MvtValue, u32>) -> u32 {
    if let Some(&idx) = value_index.get(&v) {
        return idx;
    }
    let idx = values.len() as u32;
    value_index.insert(v.clone(), idx);
    values.push(v);
    idx
}

fn encode_value(value: &MvtValue) -> proto::tile::Value {
    let mut v = proto::tile::Value::default();
    match value {
        MvtValue::String(s) => v.string_value = Some(s.clone()),
        MvtValue::Int(i) => v.int_value = Some(*i),
    }
    v
}

fn command(id: u32, count: u32) -> u32 {
    (id & 0x7) | (count << 3)
}

fn zigzag(n: i64) -> u32 {
    ((n << 1) ^ (n >> 63)) as u32
}

fn dezigzag(n: u32) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

/// Options controlling the encoded contour layer's name and attribute keys.
pub struct ContourEncodeOptions {
    pub layer_name: String,
    pub extent: u32,
    pub elevation_key: String,
    pub level_key: String,
}

/// Encode classified contour segments as a single-layer MVT tile. Each
/// segment becomes one LINESTRING feature carrying elevation, level, and
/// terrain_type attributes. `thresholds` is the configured
/// `[minor, major1, major2, ...]` list used to compute each feature's level.
pub fn encode_contours(
    isolines: &ClassifiedIsolineSet,
    thresholds: &[f64],
    options: &ContourEncodeOptions,
) -> Result<Vec<u8>> {
    let mut keys: Vec<String> = Vec::new();
    let mut key_index: HashMap<String, u32> = HashMap::new();
    let mut values: Vec<MvtValue> = Vec::new();
    let mut value_index: HashMap<MvtValue, u32> = HashMap::new();

    let elevation_key_id = key_id(&options.elevation_key, &mut keys, &mut key_index);
    let level_key_id = key_id(&options.level_key, &mut keys, &mut key_index);
    let terrain_key_id = key_id("terrain_type", &mut keys, &mut key_index);

    let mut features = Vec::new();
    for (threshold, segments) in isolines {
        let elevation = threshold.0;
        let level = compute_level(elevation, thresholds);
        let elevation_value_id = value_id(
            MvtValue::Int(elevation.round() as i64),
            &mut values,
            &mut value_index,
        );
        let level_value_id = value_id(MvtValue::Int(level), &mut values, &mut value_index);

        for segment in segments {
            if segment.geometry.len() < 4 {
                continue;
            }
            let terrain_value_id = value_id(
                MvtValue::String(segment.terrain_type.as_str().to_string()),
                &mut values,
                &mut value_index,
            );

            let tags = vec![
                elevation_key_id,
                elevation_value_id,
                level_key_id,
                level_value_id,
                terrain_key_id,
                terrain_value_id,
            ];

            features.push(proto::tile::Feature {
                id: None,
                tags,
                r#type: Some(proto::tile::GeomType::Linestring as i32),
                geometry: encode_linestring(&segment.geometry),
            });
        }
    }

    let layer = proto::tile::Layer {
        version: 2,
        name: options.layer_name.clone(),
        features,
        keys,
        values: values.iter().map(encode_value).collect(),
        extent: Some(options.extent),
    };

    let tile = proto::Tile {
        layers: vec![layer],
    };

    Ok(tile.encode_to_vec())
}

fn compute_level(elevation: f64, thresholds: &[f64]) -> i64 {
    const EPSILON: f64 = 1e-6;
    let mut level = 0i64;
    for (i, &t) in thresholds.iter().enumerate() {
        if t <= 0.0 {
            continue;
        }
        let remainder = elevation.rem_euclid(t);
        if remainder < EPSILON || (t - remainder) < EPSILON {
            level = i as i64;
        }
    }
    level
}

fn encode_linestring(flat: &[i64]) -> Vec<u32> {
    let mut geom = Vec::new();
    let mut cursor = (0i64, 0i64);

    geom.push(command(1, 1)); // MoveTo(1)
    geom.push(zigzag(flat[0] - cursor.0));
    geom.push(zigzag(flat[1] - cursor.1));
    cursor = (flat[0], flat[1]);

    let remaining = flat.len() / 2 - 1;
    if remaining > 0 {
        geom.push(command(2, remaining as u32)); // LineTo(remaining)
        for chunk in flat[2..].chunks(2) {
            geom.push(zigzag(chunk[0] - cursor.0));
            geom.push(zigzag(chunk[1] - cursor.1));
            cursor = (chunk[0], chunk[1]);
        }
    }
    geom
}

/// Options controlling how a companion polygon tile's features are matched
/// to terrain types when decoding.
pub struct PolygonDecodeOptions {
    pub source_layer: String,
    pub type_key: String,
    pub glacier_values: Vec<String>,
    pub rock_values: Vec<String>,
}

impl Default for PolygonDecodeOptions {
    fn default() -> Self {
        Self {
            source_layer: "terrain".to_string(),
            type_key: "type".to_string(),
            glacier_values: vec!["ice".to_string(), "glacier".to_string()],
            rock_values: vec!["rock".to_string(), "bare_rock".to_string(), "scree".to_string()],
        }
    }
}

/// Parse a companion vector tile and extract the glacier/rock polygons it
/// carries. Any parse failure or a missing layer yields an empty list
/// rather than an error.
pub fn decode_terrain_polygons(bytes: &[u8], options: &PolygonDecodeOptions) -> Vec<TerrainPolygon> {
    let tile = match proto::Tile::decode(bytes) {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "terrain tile parse failed, treating as no polygons");
            return Vec::new();
        }
    };

    let Some(layer) = tile.layers.iter().find(|l| l.name == options.source_layer) else {
        return Vec::new();
    };

    let extent = layer.extent.unwrap_or(4096) as f64;
    let mut polygons = Vec::new();

    for feature in &layer.features {
        if feature.r#type != Some(proto::tile::GeomType::Polygon as i32) {
            continue;
        }

        let terrain_type = match classify_feature(feature, layer, options) {
            Some(t) => t,
            None => continue,
        };

        for ring in decode_rings(&feature.geometry) {
            if ring.len() < 4 {
                continue;
            }
            let normalized: Vec<(f64, f64)> = ring
                .iter()
                .map(|&(x, y)| (x as f64 / extent, y as f64 / extent))
                .collect();
            polygons.push(TerrainPolygon::new(normalized, terrain_type));
        }
    }

    polygons
}

fn classify_feature(
    feature: &proto::tile::Feature,
    layer: &proto::tile::Layer,
    options: &PolygonDecodeOptions,
) -> Option<TerrainType> {
    let mut type_value: Option<String> = None;
    for pair in feature.tags.chunks(2) {
        if pair.len() != 2 {
            continue;
        }
        let key = layer.keys.get(pair[0] as usize)?;
        if key != &options.type_key {
            continue;
        }
        let value = layer.values.get(pair[1] as usize)?;
        type_value = value.string_value.clone();
    }

    let type_value = type_value?;
    if options.glacier_values.iter().any(|v| v == &type_value) {
        Some(TerrainType::Glacier)
    } else if options.rock_values.iter().any(|v| v == &type_value) {
        Some(TerrainType::Rock)
    } else {
        None
    }
}

/// Decode the command/zigzag geometry stream into closed polygon rings (each
/// ring's first point repeated as its last).
fn decode_rings(geometry: &[u32]) -> Vec<Vec<(i64, i64)>> {
    let mut rings = Vec::new();
    let mut cursor = (0i64, 0i64);
    let mut idx = 0;
    let mut current: Vec<(i64, i64)> = Vec::new();

    while idx < geometry.len() {
        let cmd_int = geometry[idx];
        idx += 1;
        let id = cmd_int & 0x7;
        let count = cmd_int >> 3;

        match id {
            1 => {
                // MoveTo: starts a new ring.
                if !current.is_empty() {
                    rings.push(std::mem::take(&mut current));
                }
                for _ in 0..count {
                    if idx + 1 >= geometry.len() {
                        break;
                    }
                    let dx = dezigzag(geometry[idx]);
                    let dy = dezigzag(geometry[idx + 1]);
                    idx += 2;
                    cursor = (cursor.0 + dx, cursor.1 + dy);
                    current.push(cursor);
                }
            }
            2 => {
                // LineTo
                for _ in 0..count {
                    if idx + 1 >= geometry.len() {
                        break;
                    }
                    let dx = dezigzag(geometry[idx]);
                    let dy = dezigzag(geometry[idx + 1]);
                    idx += 2;
                    cursor = (cursor.0 + dx, cursor.1 + dy);
                    current.push(cursor);
                }
            }
            7 => {
                // ClosePath
                if let Some(&first) = current.first() {
                    current.push(first);
                }
            }
            _ => break,
        }
    }
    if !current.is_empty() {
        rings.push(current);
    }
    rings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isoline::IsolineSet;
    use crate::terrain::ClassifiedSegment;

    #[test]
    fn test_compute_level_minor_is_zero() {
        assert_eq!(compute_level(100.0, &[100.0, 500.0]), 0);
    }

    #[test]
    fn test_compute_level_major_is_one() {
        assert_eq!(compute_level(500.0, &[100.0, 500.0]), 1);
    }

    #[test]
    fn test_encode_then_decode_roundtrips_linestring_geometry() {
        let flat = vec![0, 0, 100, 0, 100, 100];
        let encoded = encode_linestring(&flat);
        // MoveTo(1), x,y; LineTo(2), dx,dy,dx,dy
        assert_eq!(encoded[0], command(1, 1));
        assert_eq!(encoded[3], command(2, 2));
    }

    #[test]
    fn test_encode_contours_produces_nonempty_tile() {
        let mut isolines: ClassifiedIsolineSet = IsolineSet::new();
        isolines.insert(
            Threshold(100.0),
            vec![ClassifiedSegment {
                geometry: vec![0, 0, 100, 0],
                terrain_type: SegmentTerrain::Normal,
            }],
        );
        let options = ContourEncodeOptions {
            layer_name: "contours".to_string(),
            extent: 4096,
            elevation_key: "ele".to_string(),
            level_key: "level".to_string(),
        };
        let bytes = encode_contours(&isolines, &[100.0, 500.0], &options).unwrap();
        assert!(!bytes.is_empty());

        let tile = proto::Tile::decode(bytes.as_slice()).unwrap();
        assert_eq!(tile.layers.len(), 1);
        assert_eq!(tile.layers[0].features.len(), 1);
    }

    #[test]
    fn test_decode_terrain_polygons_matches_glacier() {
        let layer = proto::tile::Layer {
            version: 2,
            name: "terrain".to_string(),
            keys: vec!["type".to_string()],
            values: vec![proto::tile::Value {
                string_value: Some("glacier".to_string()),
                ..Default::default()
            }],
            extent: Some(4096),
            features: vec![proto::tile::Feature {
                id: None,
                tags: vec![0, 0],
                r#type: Some(proto::tile::GeomType::Polygon as i32),
                geometry: encode_linestring_as_ring(&[(0, 0), (100, 0), (100, 100), (0, 100)]),
            }],
        };
        let tile = proto::Tile {
            layers: vec![layer],
        };
        let bytes = tile.encode_to_vec();

        let polygons = decode_terrain_polygons(&bytes, &PolygonDecodeOptions::default());
        assert_eq!(polygons.len(), 1);
        assert_eq!(polygons[0].terrain_type, TerrainType::Glacier);
    }

    #[test]
    fn test_decode_missing_layer_is_empty() {
        let tile = proto::Tile { layers: vec![] };
        let bytes = tile.encode_to_vec();
        let polygons = decode_terrain_polygons(&bytes, &PolygonDecodeOptions::default());
        assert!(polygons.is_empty());
    }

    #[test]
    fn test_decode_malformed_bytes_is_empty() {
        let polygons = decode_terrain_polygons(&[0xff, 0x01, 0x02], &PolygonDecodeOptions::default());
        assert!(polygons.is_empty());
    }

    fn encode_linestring_as_ring(points: &[(i64, i64)]) -> Vec<u32> {
        let mut geom = Vec::new();
        let mut cursor = (0i64, 0i64);
        geom.push(command(1, 1));
        geom.push(zigzag(points[0].0 - cursor.0));
        geom.push(zigzag(points[0].1 - cursor.1));
        cursor = points[0];
        geom.push(command(2, (points.len() - 1) as u32));
        for &p in &points[1..] {
            geom.push(zigzag(p.0 - cursor.0));
            geom.push(zigzag(p.1 - cursor.1));
            cursor = p;
        }
        geom.push(command(7, 1));
        geom
    }
}
