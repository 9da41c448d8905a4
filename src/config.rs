//! Request configuration: contour tile options and their URL grammar
//!
//! A request is addressed as `dem-contour://{z}/{x}/{y}?k1=v1&k2=v2...`.
//! Every option has a default, so an empty query string is valid and
//! produces the same options a caller would get by constructing
//! [`ContourTileOptions::default`] directly.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// How terrain polygons interact with contour splitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SplitMode {
    /// Fetch the companion terrain tile and classify contour segments.
    Classic,
    /// Skip terrain classification; every segment is `normal`.
    NoSplit,
}

/// The `[minor, major1, major2, ...]` interval list selected for one zoom
/// range. Each major interval after the first must evenly divide the one
/// before it; this is validated at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Thresholds {
    pub min_zoom: u8,
    pub intervals: Vec<f64>,
}

impl Thresholds {
    pub fn new(min_zoom: u8, intervals: Vec<f64>) -> Result<Self> {
        if intervals.is_empty() {
            return Err(Error::config("thresholds must have at least a minor interval"));
        }
        for w in intervals.windows(2) {
            let (minor, major) = (w[0], w[1]);
            if minor <= 0.0 || major <= 0.0 {
                return Err(Error::config("threshold intervals must be positive"));
            }
            if (major / minor).fract().abs() > 1e-9 {
                return Err(Error::config(format!(
                    "threshold {} does not evenly divide {}",
                    major, minor
                )));
            }
        }
        Ok(Self { min_zoom, intervals })
    }

    pub fn minor(&self) -> f64 {
        self.intervals[0]
    }
}

/// Parse the `thresholds` query value: `z1*minor1*major1~z2*minor2*major2...`.
/// Entries are returned sorted by zoom so callers can pick the entry with
/// the largest `min_zoom <= z`.
pub fn parse_thresholds(raw: &str) -> Result<Vec<Thresholds>> {
    let mut out = Vec::new();
    for entry in raw.split('~') {
        let parts: Vec<&str> = entry.split('*').collect();
        if parts.len() < 2 {
            return Err(Error::config(format!("malformed thresholds entry: {}", entry)));
        }
        let zoom: u8 = parts[0]
            .parse()
            .map_err(|_| Error::config(format!("invalid zoom in thresholds entry: {}", entry)))?;
        let intervals: Vec<f64> = parts[1..]
            .iter()
            .map(|p| {
                p.parse::<f64>()
                    .map_err(|_| Error::config(format!("invalid interval in thresholds entry: {}", entry)))
            })
            .collect::<Result<_>>()?;
        out.push(Thresholds::new(zoom, intervals)?);
    }
    out.sort_by_key(|t| t.min_zoom);
    Ok(out)
}

/// Select the entry with the largest `min_zoom <= z`, or `None` if every
/// entry requires a higher zoom than `z`.
pub fn select_thresholds(schedule: &[Thresholds], z: u8) -> Option<&Thresholds> {
    schedule.iter().filter(|t| t.min_zoom <= z).last()
}

/// Full set of options governing one `fetchContourTile` call.
#[derive(Debug, Clone)]
pub struct ContourTileOptions {
    pub contour_layer: String,
    pub elevation_key: String,
    pub level_key: String,
    pub multiplier: f64,
    pub extent: u32,
    pub buffer: f64,
    pub subsample_below: u32,
    pub overzoom: u8,
    pub simplify: f64,
    pub split_mode: SplitMode,
    pub thresholds: Vec<Thresholds>,
}

impl Default for ContourTileOptions {
    fn default() -> Self {
        Self {
            contour_layer: "contours".to_string(),
            elevation_key: "ele".to_string(),
            level_key: "level".to_string(),
            multiplier: 1.0,
            extent: 4096,
            buffer: 1.0,
            subsample_below: 100,
            overzoom: 0,
            simplify: 1.0,
            split_mode: SplitMode::Classic,
            thresholds: Vec::new(),
        }
    }
}

impl ContourTileOptions {
    /// Parse a `dem-contour://` request's query string into options,
    /// starting from the defaults for any key not present.
    pub fn from_query(query: &str) -> Result<Self> {
        let mut options = Self::default();

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| Error::config(format!("malformed query parameter: {}", pair)))?;
            let value = urlencoding_decode(value);

            match key {
                "contourLayer" => options.contour_layer = value,
                "elevationKey" => options.elevation_key = value,
                "levelKey" => options.level_key = value,
                "multiplier" => options.multiplier = parse_f64(key, &value)?,
                "extent" => options.extent = parse_f64(key, &value)? as u32,
                "buffer" => options.buffer = parse_f64(key, &value)?,
                "subsampleBelow" => options.subsample_below = parse_f64(key, &value)? as u32,
                "overzoom" => options.overzoom = parse_f64(key, &value)? as u8,
                "simplify" => options.simplify = parse_f64(key, &value)?,
                "splitMode" => {
                    options.split_mode = match value.as_str() {
                        "classic" => SplitMode::Classic,
                        "no-split" => SplitMode::NoSplit,
                        other => {
                            return Err(Error::config(format!("unknown splitMode: {}", other)))
                        }
                    }
                }
                "thresholds" => options.thresholds = parse_thresholds(&value)?,
                other => {
                    return Err(Error::config(format!("unrecognized query parameter: {}", other)))
                }
            }
        }

        Ok(options)
    }

    /// Select the threshold schedule entry active at zoom `z`.
    pub fn thresholds_for_zoom(&self, z: u8) -> Option<&Thresholds> {
        select_thresholds(&self.thresholds, z)
    }

    /// A canonical string encoding of these options, sorted by key, used as
    /// part of a result cache key.
    pub fn canonical_key(&self) -> String {
        let thresholds_key = self
            .thresholds
            .iter()
            .map(|t| {
                let intervals = t
                    .intervals
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                format!("{}:{}", t.min_zoom, intervals)
            })
            .collect::<Vec<_>>()
            .join("~");

        format!(
            "buffer={}&contourLayer={}&elevationKey={}&extent={}&levelKey={}&multiplier={}&overzoom={}&simplify={}&splitMode={}&subsampleBelow={}&thresholds={}",
            self.buffer,
            self.contour_layer,
            self.elevation_key,
            self.extent,
            self.level_key,
            self.multiplier,
            self.overzoom,
            self.simplify,
            match self.split_mode {
                SplitMode::Classic => "classic",
                SplitMode::NoSplit => "no-split",
            },
            self.subsample_below,
            thresholds_key,
        )
    }
}

fn parse_f64(key: &str, value: &str) -> Result<f64> {
    value
        .parse()
        .map_err(|_| Error::config(format!("invalid numeric value for {}: {}", key, value)))
}

fn urlencoding_decode(value: &str) -> String {
    value.replace("%2A", "*").replace("%7E", "~").replace('+', " ")
}
