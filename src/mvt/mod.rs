//! Encoding of WGS84 features into a single Mapbox vector tile layer.
//!
//! Geometry is projected into the tile's local grid, clipped to the buffered
//! tile square, snapped to integers and written with the MVT command encoding.
//! Output is a pure function of the inputs, so equal inputs always produce
//! byte-identical tiles.
use std::collections::HashMap;

use geo::{Coord, CoordsIter, Geometry, LineString, Polygon};
use prost::Message;

use crate::error::{Error, Result};
use crate::feature::{PropertyValue, SourceFeature};
use crate::tile::TileCoordinate;

pub mod clip;
pub mod vector_tile;

use clip::{clip_line, clip_ring, ClipBox};
use vector_tile::tile::{Feature, GeomType, Layer, Value};
use vector_tile::Tile;

pub const DEFAULT_EXTENT: u32 = 4096;
pub const MVT_VERSION: u32 = 2;

const MOVE_TO: u32 = 1;
const LINE_TO: u32 = 2;
const CLOSE_PATH: u32 = 7;

type TilePoint = (i32, i32);

/// Geometry in tile-local integer coordinates, ready to be written.
#[derive(Clone, Debug, PartialEq)]
enum TileGeometry {
    Point(Vec<TilePoint>),
    LineString(Vec<Vec<TilePoint>>),
    /// Open rings; every exterior ring is followed by its holes.
    Polygon(Vec<Vec<TilePoint>>),
}

/// Writes features into MVT layers of a fixed extent.
#[derive(Clone, Copy, Debug)]
pub struct MvtEncoder {
    extent: u32,
}

impl Default for MvtEncoder {
    fn default() -> Self {
        MvtEncoder::new(DEFAULT_EXTENT)
    }
}

/// Encodes `features` as the single layer `layer_name` of `tile` using the
/// default extent.
pub fn encode(
    tile: &TileCoordinate,
    features: &[SourceFeature],
    layer_name: &str,
    tile_size: u32,
    buffer_pixels: u32,
) -> Vec<u8> {
    MvtEncoder::default().encode(tile, features, layer_name, tile_size, buffer_pixels)
}

impl MvtEncoder {
    pub fn new(extent: u32) -> MvtEncoder {
        MvtEncoder { extent }
    }

    pub fn extent(&self) -> u32 {
        self.extent
    }

    /// Encodes `features` into one MVT layer. Returns an empty buffer when no
    /// feature has anything left inside the buffered tile.
    pub fn encode(
        &self,
        tile: &TileCoordinate,
        features: &[SourceFeature],
        layer_name: &str,
        tile_size: u32,
        buffer_pixels: u32,
    ) -> Vec<u8> {
        if features.is_empty() {
            return Vec::new();
        }

        let buffer = f64::from(buffer_pixels) * f64::from(self.extent) / f64::from(tile_size.max(1));
        let clip = ClipBox::new(self.extent, buffer);
        let mut layer = LayerBuilder::new(layer_name, self.extent);

        for feature in features {
            match self.tile_geometries(tile, &feature.geometry, &clip) {
                Ok(geometries) => {
                    for geometry in geometries {
                        layer.add(geometry, &feature.attributes);
                    }
                }
                Err(e) => log::warn!("{}: skipping feature in layer {}: {}", tile, layer_name, e),
            }
        }

        match layer.finish() {
            Some(layer) => Tile {
                layers: vec![layer],
            }
            .encode_to_vec(),
            None => Vec::new(),
        }
    }

    fn project(&self, tile: &TileCoordinate, c: &Coord<f64>) -> Coord<f64> {
        let (x, y) = tile.project(c.x, c.y, self.extent);
        Coord { x, y }
    }

    fn project_all(&self, tile: &TileCoordinate, line: &LineString<f64>) -> Vec<Coord<f64>> {
        line.coords().map(|c| self.project(tile, c)).collect()
    }

    /// Converts one source geometry into the tile geometries that survive
    /// clipping. Collections may yield several.
    fn tile_geometries(
        &self,
        tile: &TileCoordinate,
        geometry: &Geometry<f64>,
        clip: &ClipBox,
    ) -> Result<Vec<TileGeometry>> {
        if !geometry
            .coords_iter()
            .all(|c| c.x.is_finite() && c.y.is_finite())
        {
            return Err(Error::EncodingFailure(String::from(
                "geometry has non-finite coordinates",
            )));
        }

        let encoded = match geometry {
            Geometry::Point(p) => self.points(tile, std::iter::once(p.0), clip),
            Geometry::MultiPoint(mp) => self.points(tile, mp.iter().map(|p| p.0), clip),
            Geometry::Line(l) => self.lines(tile, [LineString::from(vec![l.start, l.end])].iter(), clip),
            Geometry::LineString(ls) => self.lines(tile, std::iter::once(ls), clip),
            Geometry::MultiLineString(mls) => self.lines(tile, mls.iter(), clip),
            Geometry::Polygon(p) => self.polygons(tile, std::iter::once(p), clip),
            Geometry::MultiPolygon(mp) => self.polygons(tile, mp.iter(), clip),
            Geometry::Rect(r) => self.polygons(tile, std::iter::once(&r.to_polygon()), clip),
            Geometry::Triangle(t) => self.polygons(tile, std::iter::once(&t.to_polygon()), clip),
            Geometry::GeometryCollection(gc) => {
                let mut all = Vec::new();
                for member in gc.iter() {
                    all.extend(self.tile_geometries(tile, member, clip)?);
                }
                return Ok(all);
            }
        };

        Ok(encoded.into_iter().collect())
    }

    fn points<I>(&self, tile: &TileCoordinate, points: I, clip: &ClipBox) -> Option<TileGeometry>
    where
        I: Iterator<Item = Coord<f64>>,
    {
        let points: Vec<TilePoint> = points
            .map(|c| self.project(tile, &c))
            .filter(|c| clip.contains(*c))
            .map(snap)
            .collect();

        (!points.is_empty()).then_some(TileGeometry::Point(points))
    }

    fn lines<'a, I>(&self, tile: &TileCoordinate, lines: I, clip: &ClipBox) -> Option<TileGeometry>
    where
        I: Iterator<Item = &'a LineString<f64>>,
    {
        let mut parts = Vec::new();
        for line in lines {
            for piece in clip_line(&self.project_all(tile, line), clip) {
                let piece = snap_path(&piece);
                if piece.len() >= 2 {
                    parts.push(piece);
                }
            }
        }

        (!parts.is_empty()).then_some(TileGeometry::LineString(parts))
    }

    fn polygons<'a, I>(&self, tile: &TileCoordinate, polygons: I, clip: &ClipBox) -> Option<TileGeometry>
    where
        I: Iterator<Item = &'a Polygon<f64>>,
    {
        let mut rings = Vec::new();
        for polygon in polygons {
            let Some(exterior) = self.ring(tile, polygon.exterior(), clip, true) else {
                // A hole cannot outlive its exterior
                continue;
            };
            rings.push(exterior);
            rings.extend(
                polygon
                    .interiors()
                    .iter()
                    .filter_map(|interior| self.ring(tile, interior, clip, false)),
            );
        }

        (!rings.is_empty()).then_some(TileGeometry::Polygon(rings))
    }

    /// Clips and snaps one ring, oriented so exteriors have positive area in
    /// tile coordinates and holes negative. Rings without area are dropped.
    fn ring(
        &self,
        tile: &TileCoordinate,
        ring: &LineString<f64>,
        clip: &ClipBox,
        exterior: bool,
    ) -> Option<Vec<TilePoint>> {
        let mut ring = snap_path(&clip_ring(&self.project_all(tile, ring), clip));
        while ring.len() > 1 && ring.first() == ring.last() {
            ring.pop();
        }
        if ring.len() < 3 {
            return None;
        }

        let area = signed_area(&ring);
        if area == 0 {
            return None;
        }
        if (area > 0) != exterior {
            ring.reverse();
        }
        Some(ring)
    }
}

fn snap(c: Coord<f64>) -> TilePoint {
    (c.x.round() as i32, c.y.round() as i32)
}

/// Snaps a path to the integer grid, dropping repeated points.
fn snap_path(path: &[Coord<f64>]) -> Vec<TilePoint> {
    let mut snapped: Vec<TilePoint> = Vec::with_capacity(path.len());
    for c in path {
        let p = snap(*c);
        if snapped.last() != Some(&p) {
            snapped.push(p);
        }
    }
    snapped
}

/// Twice the signed area of an open ring (shoelace formula).
fn signed_area(ring: &[TilePoint]) -> i64 {
    let mut sum = 0i64;
    for (i, &(x0, y0)) in ring.iter().enumerate() {
        let (x1, y1) = ring[(i + 1) % ring.len()];
        sum += i64::from(x0) * i64::from(y1) - i64::from(x1) * i64::from(y0);
    }
    sum
}

fn command(id: u32, count: u32) -> u32 {
    (id & 0x7) | (count << 3)
}

fn zigzag(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

/// Command-encodes geometry, moving a cursor through the delta coordinates.
struct GeometryWriter {
    commands: Vec<u32>,
    cursor: TilePoint,
}

impl GeometryWriter {
    fn new() -> Self {
        GeometryWriter {
            commands: Vec::new(),
            cursor: (0, 0),
        }
    }

    fn point(&mut self, p: TilePoint) {
        self.commands.push(zigzag(p.0 - self.cursor.0));
        self.commands.push(zigzag(p.1 - self.cursor.1));
        self.cursor = p;
    }

    fn path(&mut self, path: &[TilePoint]) {
        let Some((first, rest)) = path.split_first() else {
            return;
        };
        self.commands.push(command(MOVE_TO, 1));
        self.point(*first);
        if !rest.is_empty() {
            self.commands.push(command(LINE_TO, rest.len() as u32));
            for p in rest {
                self.point(*p);
            }
        }
    }

    fn write(mut self, geometry: &TileGeometry) -> (GeomType, Vec<u32>) {
        let geom_type = match geometry {
            TileGeometry::Point(points) => {
                self.commands.push(command(MOVE_TO, points.len() as u32));
                for p in points {
                    self.point(*p);
                }
                GeomType::Point
            }
            TileGeometry::LineString(lines) => {
                for line in lines {
                    self.path(line);
                }
                GeomType::Linestring
            }
            TileGeometry::Polygon(rings) => {
                for ring in rings {
                    self.path(ring);
                    self.commands.push(command(CLOSE_PATH, 1));
                }
                GeomType::Polygon
            }
        };
        (geom_type, self.commands)
    }
}

/// Hashable identity of a property value, used to share value slots.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum ValueKey {
    String(String),
    Int(i64),
    UInt(u64),
    Double(u64),
    Bool(bool),
}

impl From<&PropertyValue> for ValueKey {
    fn from(value: &PropertyValue) -> Self {
        match value {
            PropertyValue::String(s) => ValueKey::String(s.clone()),
            PropertyValue::Int(i) => ValueKey::Int(*i),
            PropertyValue::UInt(u) => ValueKey::UInt(*u),
            PropertyValue::Double(d) => ValueKey::Double(d.to_bits()),
            PropertyValue::Bool(b) => ValueKey::Bool(*b),
        }
    }
}

impl From<&PropertyValue> for Value {
    fn from(value: &PropertyValue) -> Self {
        match value {
            PropertyValue::String(s) => Value {
                string_value: Some(s.clone()),
                ..Value::default()
            },
            PropertyValue::Int(i) => Value {
                int_value: Some(*i),
                ..Value::default()
            },
            PropertyValue::UInt(u) => Value {
                uint_value: Some(*u),
                ..Value::default()
            },
            PropertyValue::Double(d) => Value {
                double_value: Some(*d),
                ..Value::default()
            },
            PropertyValue::Bool(b) => Value {
                bool_value: Some(*b),
                ..Value::default()
            },
        }
    }
}

/// Accumulates features of one layer, sharing keys and values in first-seen order.
struct LayerBuilder {
    name: String,
    extent: u32,
    features: Vec<Feature>,
    keys: Vec<String>,
    key_index: HashMap<String, u32>,
    values: Vec<Value>,
    value_index: HashMap<ValueKey, u32>,
}

impl LayerBuilder {
    fn new(name: &str, extent: u32) -> Self {
        LayerBuilder {
            name: name.to_string(),
            extent,
            features: Vec::new(),
            keys: Vec::new(),
            key_index: HashMap::new(),
            values: Vec::new(),
            value_index: HashMap::new(),
        }
    }

    fn key(&mut self, key: &str) -> u32 {
        if let Some(index) = self.key_index.get(key) {
            return *index;
        }
        let index = self.keys.len() as u32;
        self.keys.push(key.to_string());
        self.key_index.insert(key.to_string(), index);
        index
    }

    fn value(&mut self, value: &PropertyValue) -> u32 {
        let key = ValueKey::from(value);
        if let Some(index) = self.value_index.get(&key) {
            return *index;
        }
        let index = self.values.len() as u32;
        self.values.push(Value::from(value));
        self.value_index.insert(key, index);
        index
    }

    fn add(&mut self, geometry: TileGeometry, attributes: &[(String, Option<PropertyValue>)]) {
        let mut tags = Vec::with_capacity(attributes.len() * 2);
        // Nulls are left out; absent and null render the same
        for (key, value) in attributes {
            if let Some(value) = value {
                tags.push(self.key(key));
                tags.push(self.value(value));
            }
        }

        let (geom_type, geometry) = GeometryWriter::new().write(&geometry);
        self.features.push(Feature {
            id: None,
            tags,
            r#type: Some(geom_type as i32),
            geometry,
        });
    }

    fn finish(self) -> Option<Layer> {
        if self.features.is_empty() {
            return None;
        }

        Some(Layer {
            version: MVT_VERSION,
            name: self.name,
            features: self.features,
            keys: self.keys,
            values: self.values,
            extent: Some(self.extent),
        })
    }
}

#[cfg(test)]
mod tests {
    use geo::{line_string, point, polygon, MultiPolygon};

    use super::*;

    fn decode(bytes: &[u8]) -> Layer {
        let mut tile = Tile::decode(bytes).expect("valid tile");
        assert_eq!(1, tile.layers.len());
        tile.layers.remove(0)
    }

    fn tile(zoom: u8, x: u32, y: u32) -> TileCoordinate {
        TileCoordinate::new(zoom, x, y).unwrap()
    }

    /// A square polygon in degrees.
    fn square(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Geometry<f64> {
        Geometry::Polygon(polygon![
            (x: min_lon, y: min_lat),
            (x: max_lon, y: min_lat),
            (x: max_lon, y: max_lat),
            (x: min_lon, y: max_lat),
            (x: min_lon, y: min_lat),
        ])
    }

    #[test]
    fn test_empty_input_is_empty_output() {
        assert!(encode(&tile(3, 1, 1), &[], "schemes", 256, 25).is_empty());
    }

    #[test]
    fn test_point_at_the_tile_corner() {
        let features = vec![SourceFeature::new(Geometry::Point(point!(x: 0.0, y: 0.0)))];
        let layer = decode(&encode(&tile(1, 1, 0), &features, "facilities", 256, 25));

        assert_eq!("facilities", layer.name);
        assert_eq!(MVT_VERSION, layer.version);
        assert_eq!(Some(DEFAULT_EXTENT), layer.extent);
        assert_eq!(1, layer.features.len());

        let feature = &layer.features[0];
        assert_eq!(Some(GeomType::Point as i32), feature.r#type);
        // MoveTo(1) to (0, 4096): lat 0 is the bottom edge of tile 1/1/0
        assert_eq!(vec![command(MOVE_TO, 1), zigzag(0), zigzag(4096)], feature.geometry);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let features = vec![
            SourceFeature::new(Geometry::Point(point!(x: 10.0, y: 10.0)))
                .with_attribute("name", Some(PropertyValue::from("Well 7")))
                .with_attribute("depth", Some(PropertyValue::from(42.5))),
            SourceFeature::new(square(5.0, 5.0, 20.0, 20.0))
                .with_attribute("name", Some(PropertyValue::from("Zone A")))
                .with_attribute("active", Some(PropertyValue::from(true))),
        ];

        let first = encode(&tile(2, 2, 1), &features, "schemes", 256, 25);
        let second = encode(&tile(2, 2, 1), &features, "schemes", 256, 25);
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn test_null_attributes_are_omitted_and_values_shared() {
        let features = vec![
            SourceFeature::new(Geometry::Point(point!(x: 10.0, y: 10.0)))
                .with_attribute("material", Some(PropertyValue::from("PVC")))
                .with_attribute("diameter_mm", None),
            SourceFeature::new(Geometry::Point(point!(x: 11.0, y: 11.0)))
                .with_attribute("material", Some(PropertyValue::from("PVC")))
                .with_attribute("diameter_mm", Some(PropertyValue::Int(150))),
        ];

        let layer = decode(&encode(&tile(2, 2, 1), &features, "pipelines", 256, 25));
        assert_eq!(vec!["material", "diameter_mm"], layer.keys);
        assert_eq!(2, layer.values.len());
        assert_eq!(Some(String::from("PVC")), layer.values[0].string_value);
        assert_eq!(Some(150), layer.values[1].int_value);

        assert_eq!(vec![0, 0], layer.features[0].tags);
        assert_eq!(vec![0, 0, 1, 1], layer.features[1].tags);
    }

    #[test]
    fn test_polygon_outside_the_buffer_is_dropped() {
        // Tile 2/2/1 spans lon 0..90; this square sits far to the west
        let features = vec![SourceFeature::new(square(-120.0, 10.0, -100.0, 20.0))];
        assert!(encode(&tile(2, 2, 1), &features, "schemes", 256, 25).is_empty());
    }

    #[test]
    fn test_polygon_straddling_a_tile_edge_lands_in_both_tiles() {
        // Straddles lon 0, the boundary between 2/1/1 and 2/2/1
        let features = vec![SourceFeature::new(square(-10.0, 10.0, 10.0, 30.0))];

        for (x, inside_edge) in [(1u32, 4096), (2u32, 0)] {
            let layer = decode(&encode(&tile(2, x, 1), &features, "schemes", 256, 25));
            assert_eq!(1, layer.features.len());
            assert_eq!(Some(GeomType::Polygon as i32), layer.features[0].r#type);

            // The part in the neighbour is cut at the buffer edge (25px = 400 units)
            let geometry = &layer.features[0].geometry;
            assert_eq!(command(MOVE_TO, 1), geometry[0]);
            assert_eq!(command(CLOSE_PATH, 1), *geometry.last().unwrap());
            let xs = decode_xs(geometry);
            let min = *xs.iter().min().unwrap();
            let max = *xs.iter().max().unwrap();
            assert!(min < inside_edge && inside_edge < max);
            assert!(min >= -400 && max <= 4096 + 400);
        }
    }

    #[test]
    fn test_polygon_winding() {
        // Counter-clockwise in lon/lat becomes clockwise on screen: positive area
        let features = vec![SourceFeature::new(square(10.0, 10.0, 20.0, 20.0))];
        let layer = decode(&encode(&tile(2, 2, 1), &features, "schemes", 256, 25));
        let ring = decode_points(&layer.features[0].geometry);
        assert!(signed_area(&ring) > 0);

        let mut reversed = square(10.0, 10.0, 20.0, 20.0);
        if let Geometry::Polygon(p) = &mut reversed {
            p.exterior_mut(|ring| ring.0.reverse());
        }
        let layer = decode(&encode(&tile(2, 2, 1), &[SourceFeature::new(reversed)], "schemes", 256, 25));
        assert!(signed_area(&decode_points(&layer.features[0].geometry)) > 0);
    }

    #[test]
    fn test_polygon_with_hole() {
        let polygon = polygon!(
            exterior: [
                (x: 10.0, y: 10.0),
                (x: 40.0, y: 10.0),
                (x: 40.0, y: 40.0),
                (x: 10.0, y: 40.0),
                (x: 10.0, y: 10.0),
            ],
            interiors: [[
                (x: 20.0, y: 20.0),
                (x: 30.0, y: 20.0),
                (x: 30.0, y: 30.0),
                (x: 20.0, y: 30.0),
                (x: 20.0, y: 20.0),
            ]]
        );
        let features = vec![SourceFeature::new(Geometry::MultiPolygon(MultiPolygon(vec![polygon])))];
        let layer = decode(&encode(&tile(2, 2, 1), &features, "schemes", 256, 25));

        let geometry = &layer.features[0].geometry;
        let closes = geometry.iter().filter(|c| **c == command(CLOSE_PATH, 1)).count();
        assert_eq!(2, closes);
    }

    #[test]
    fn test_degenerate_geometry_is_dropped() {
        // Both vertices snap onto the same grid point at zoom 0
        let line = Geometry::LineString(line_string![(x: 10.0, y: 10.0), (x: 10.0000001, y: 10.0000001)]);
        // A sliver thinner than one tile unit
        let sliver = square(10.0, 10.0, 30.0, 10.0000001);

        let features = vec![SourceFeature::new(line), SourceFeature::new(sliver)];
        assert!(encode(&tile(0, 0, 0), &features, "pipelines", 256, 25).is_empty());
    }

    #[test]
    fn test_line_is_clipped_to_the_buffer() {
        let line = Geometry::LineString(line_string![(x: -170.0, y: 40.0), (x: 170.0, y: 40.0)]);
        let layer = decode(&encode(&tile(2, 2, 1), &[SourceFeature::new(line)], "pipelines", 256, 25));

        let geometry = &layer.features[0].geometry;
        assert_eq!(Some(GeomType::Linestring as i32), layer.features[0].r#type);
        assert_eq!(vec![-400, 4096 + 400], decode_xs(geometry));
    }

    #[test]
    fn test_bad_geometry_is_skipped() {
        let features = vec![
            SourceFeature::new(Geometry::Point(point!(x: f64::NAN, y: 10.0))),
            SourceFeature::new(Geometry::Point(point!(x: 10.0, y: 10.0))),
        ];
        let layer = decode(&encode(&tile(2, 2, 1), &features, "facilities", 256, 25));
        assert_eq!(1, layer.features.len());
    }

    /// Absolute coordinates of every vertex in a command stream.
    fn decode_points(geometry: &[u32]) -> Vec<TilePoint> {
        fn unzig(v: u32) -> i32 {
            ((v >> 1) as i32) ^ -((v & 1) as i32)
        }

        let mut points = Vec::new();
        let mut cursor = (0, 0);
        let mut i = 0;
        while i < geometry.len() {
            let (id, count) = (geometry[i] & 0x7, geometry[i] >> 3);
            i += 1;
            if id == CLOSE_PATH {
                continue;
            }
            for _ in 0..count {
                cursor = (cursor.0 + unzig(geometry[i]), cursor.1 + unzig(geometry[i + 1]));
                points.push(cursor);
                i += 2;
            }
        }
        points
    }

    fn decode_xs(geometry: &[u32]) -> Vec<i32> {
        decode_points(geometry).into_iter().map(|p| p.0).collect()
    }
}
