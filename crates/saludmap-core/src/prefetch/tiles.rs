use std::f64::consts::PI;
use std::fmt;

use crate::geo::BoundingBox;

/// Web Mercator cannot represent the poles; latitudes are clamped to this.
const MAX_MERCATOR_LAT: f64 = 85.0511;

/// Deepest zoom served by standard OSM tile servers.
pub const MAX_TILE_ZOOM: u8 = 19;

/// Subdomains rotated through for `{s}` in tile URL templates.
const SUBDOMAINS: [&str; 3] = ["a", "b", "c"];

/// One slippy-map tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileCoord {
    pub z: u8,
    pub x: u32,
    pub y: u32,
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

impl TileCoord {
    /// Tile containing the point at zoom `z`, with `z` capped at [`MAX_TILE_ZOOM`].
    pub fn containing(lat: f64, lng: f64, z: u8) -> Self {
        let z = z.min(MAX_TILE_ZOOM);
        let n = f64::from(1u32 << z);
        let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
        let lat_rad = lat.to_radians();

        let x = ((lng + 180.0) / 360.0 * n).floor();
        let y = ((1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * n).floor();

        let max = n - 1.0;
        Self {
            z,
            x: x.clamp(0.0, max) as u32,
            y: y.clamp(0.0, max) as u32,
        }
    }

    /// Expand a `{z}/{x}/{y}` template, with `{s}` rotated over a/b/c.
    pub fn url_for(&self, template: &str) -> String {
        let subdomain = SUBDOMAINS[((self.x + self.y) % 3) as usize];
        template
            .replace("{s}", subdomain)
            .replace("{z}", &self.z.to_string())
            .replace("{x}", &self.x.to_string())
            .replace("{y}", &self.y.to_string())
    }
}

/// Every tile at zoom `z` that intersects `bbox`, row by row. Lazy, so a
/// caller can stop after as many tiles as it needs.
pub fn tiles_in_bbox(bbox: &BoundingBox, z: u8) -> impl Iterator<Item = TileCoord> {
    // North maps to the smaller y
    let top_left = TileCoord::containing(bbox.north, bbox.west, z);
    let bottom_right = TileCoord::containing(bbox.south, bbox.east, z);
    let z = top_left.z;

    let columns = top_left.x..=bottom_right.x;
    (top_left.y..=bottom_right.y).flat_map(move |y| columns.clone().map(move |x| TileCoord { z, x, y }))
}
