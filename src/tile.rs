//! Slippy map tile addressing in Web Mercator (EPSG:3857 derived).
//!
//! Tiles are addressed in XYZ format: `x` grows eastward, `y` grows southward
//! and `zoom` quarters the area of the parent tile.
use std::f64::consts::PI;
use std::fmt;

use geo::{coord, Rect};
use slippy_map_tilenames::tile2lonlat;

use crate::error::{Error, Result};

/// Deepest zoom level the server addresses.
pub const MAX_ZOOM: u8 = 24;

/// Latitude at which the Web Mercator square ends.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

pub const DEFAULT_TILE_SIZE: u32 = 256;
pub const DEFAULT_BUFFER_PERCENT: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileCoordinate {
    zoom: u8,
    x: u32,
    y: u32,
}

/// WGS84 bounding box in degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoBoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl TileCoordinate {
    pub fn new(zoom: u8, x: u32, y: u32) -> Result<TileCoordinate> {
        if zoom > MAX_ZOOM {
            return Err(Error::InvalidTileCoordinate(format!(
                "zoom {} is above the maximum of {}",
                zoom, MAX_ZOOM
            )));
        }

        let n = 1u32 << zoom;
        if x >= n || y >= n {
            return Err(Error::InvalidTileCoordinate(format!(
                "{}/{}/{} is outside the {}x{} grid of zoom {}",
                zoom, x, y, n, n, zoom
            )));
        }

        Ok(TileCoordinate { zoom, x, y })
    }

    /// Parses the `{z}`, `{x}` and `{y}.mvt` segments of a tile URL.
    pub fn from_path(z: &str, x: &str, y: &str) -> Result<TileCoordinate> {
        let y = y.strip_suffix(".mvt").ok_or_else(|| {
            Error::InvalidTileCoordinate(format!("{:?} does not end in .mvt", y))
        })?;

        // Plain digits without leading zeros, so every tile has exactly one URL
        fn parse<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
            let canonical = !value.is_empty()
                && value.bytes().all(|b| b.is_ascii_digit())
                && (value == "0" || !value.starts_with('0'));

            canonical
                .then(|| value.parse().ok())
                .flatten()
                .ok_or_else(|| {
                    Error::InvalidTileCoordinate(format!("{} {:?} is not a valid integer", name, value))
                })
        }

        let zoom: u32 = parse("zoom", z)?;
        let zoom = u8::try_from(zoom).unwrap_or(u8::MAX);
        TileCoordinate::new(zoom, parse("x", x)?, parse("y", y)?)
    }

    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    pub fn x(&self) -> u32 {
        self.x
    }

    pub fn y(&self) -> u32 {
        self.y
    }

    /// Number of tiles along one axis at this tile's zoom.
    fn grid_size(&self) -> f64 {
        f64::from(1u32 << self.zoom)
    }

    /// The exact geographic extent of this tile.
    pub fn bounds(&self) -> GeoBoundingBox {
        // y grows southward, so the top edge (y) bounds max_lat
        let (min_lon, max_lat) = tile2lonlat(self.x, self.y, self.zoom);
        let (max_lon, min_lat) = tile2lonlat(self.x + 1, self.y + 1, self.zoom);

        GeoBoundingBox {
            min_lon,
            min_lat,
            max_lon,
            max_lat,
        }
    }

    /// The tile extent grown by `buffer_pixels` on every side, measured in
    /// Web Mercator space and clamped to the world.
    pub fn buffered_bounds(&self, tile_size: u32, buffer_pixels: u32) -> GeoBoundingBox {
        let n = self.grid_size();
        let b = f64::from(buffer_pixels) / f64::from(tile_size.max(1));
        let (x, y) = (f64::from(self.x), f64::from(self.y));

        GeoBoundingBox {
            min_lon: grid_lon((x - b).max(0.0), n),
            min_lat: grid_lat((y + 1.0 + b).min(n), n),
            max_lon: grid_lon((x + 1.0 + b).min(n), n),
            max_lat: grid_lat((y - b).max(0.0), n),
        }
    }

    /// Projects a WGS84 position into this tile's local grid of `extent` units,
    /// with the origin at the tile's top-left corner.
    pub fn project(&self, lon: f64, lat: f64, extent: u32) -> (f64, f64) {
        let (gx, gy) = lonlat_to_grid(lon, lat, self.zoom);
        let extent = f64::from(extent);
        (
            (gx - f64::from(self.x)) * extent,
            (gy - f64::from(self.y)) * extent,
        )
    }
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

impl GeoBoundingBox {
    pub fn width(&self) -> f64 {
        self.max_lon - self.min_lon
    }

    pub fn height(&self) -> f64 {
        self.max_lat - self.min_lat
    }

    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            coord! { x: self.min_lon, y: self.min_lat },
            coord! { x: self.max_lon, y: self.max_lat },
        )
    }
}

/// Returns the bounding box of a slippy map tile in XYZ format.
pub fn bounds_for_tile(zoom: u8, x: u32, y: u32) -> Result<GeoBoundingBox> {
    Ok(TileCoordinate::new(zoom, x, y)?.bounds())
}

/// Buffer around a tile in tile pixels, rounded down.
pub fn buffer_pixels(tile_size: u32, buffer_percent: u32) -> u32 {
    (u64::from(tile_size) * u64::from(buffer_percent) / 100) as u32
}

fn grid_lon(x: f64, n: f64) -> f64 {
    x / n * 360.0 - 180.0
}

fn grid_lat(y: f64, n: f64) -> f64 {
    (PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees()
}

/// Fractional tile grid position of a WGS84 coordinate at `zoom`.
pub fn lonlat_to_grid(lon: f64, lat: f64, zoom: u8) -> (f64, f64) {
    let n = f64::from(1u32 << zoom.min(MAX_ZOOM));
    let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();

    let x = (lon + 180.0) / 360.0 * n;
    let y = (1.0 - lat.tan().asinh() / PI) / 2.0 * n;
    (x, y)
}
