//! Terrain polygon classification of contour polylines

pub mod grid;
pub mod polygon;
pub mod splitter;

pub use grid::GridIndex;
pub use polygon::{IndexedPolygon, PolygonSimplification, TerrainPolygon, TerrainType};
pub use splitter::{split, ClassifiedIsolineSet, ClassifiedSegment, SegmentTerrain};
