//! Tile coordinate systems

pub mod coordinate;

pub use coordinate::TileCoordinate;
