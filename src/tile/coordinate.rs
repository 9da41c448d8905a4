//! Tile coordinate systems (TMS, ZXY)

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tile coordinate in ZXY format (Slippy Map)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileCoordinate {
    /// Zoom level (0-24)
    pub z: u8,
    /// Column (X coordinate)
    pub x: u32,
    /// Row (Y coordinate, top to bottom)
    pub y: u32,
}

impl TileCoordinate {
    /// Create a new tile coordinate
    pub fn new(z: u8, x: u32, y: u32) -> Self {
        Self { z, x, y }
    }

    /// Parse from Z/X/Y string format
    pub fn from_zxy_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('/').collect();
        if parts.len() != 3 {
            return Err(Error::config(format!(
                "invalid ZXY format: {}, expected Z/X/Y",
                s
            )));
        }

        let z = parts[0]
            .parse()
            .map_err(|_| Error::config(format!("invalid zoom level: {}", parts[0])))?;
        let x = parts[1]
            .parse()
            .map_err(|_| Error::config(format!("invalid X coordinate: {}", parts[1])))?;
        let y = parts[2]
            .parse()
            .map_err(|_| Error::config(format!("invalid Y coordinate: {}", parts[2])))?;

        let coord = Self::new(z, x, y);
        coord.validate()?;
        Ok(coord)
    }

    /// Validate the tile coordinate
    pub fn validate(&self) -> Result<()> {
        if self.z > crate::MAX_ZOOM_LEVEL {
            return Err(Error::config(format!(
                "zoom {} exceeds maximum of {}",
                self.z,
                crate::MAX_ZOOM_LEVEL
            )));
        }

        let max_coord = 1u32 << self.z;
        if self.x >= max_coord || self.y >= max_coord {
            return Err(Error::config(format!(
                "coordinate ({}, {}) out of range for zoom {}, max {}",
                self.x,
                self.y,
                self.z,
                max_coord - 1
            )));
        }

        Ok(())
    }

    /// Get parent tile at lower zoom
    pub fn parent(&self) -> Option<Self> {
        if self.z == 0 {
            return None;
        }
        Some(Self::new(self.z - 1, self.x / 2, self.y / 2))
    }

    /// Get the tile's immediate neighbor in one of the eight compass
    /// directions, wrapping X around the antimeridian. Returns `None` if the
    /// neighbor would fall off the top or bottom of the pyramid.
    pub fn neighbor(&self, dx: i32, dy: i32) -> Option<Self> {
        let n = 1i64 << self.z;
        let y = self.y as i64 + dy as i64;
        if y < 0 || y >= n {
            return None;
        }
        let x = (self.x as i64 + dx as i64).rem_euclid(n);
        Some(Self::new(self.z, x as u32, y as u32))
    }

    /// Format as Z/X/Y string
    pub fn to_zxy_string(&self) -> String {
        format!("{}/{}/{}", self.z, self.x, self.y)
    }
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}
