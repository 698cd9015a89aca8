use geo::Geometry;
use serde_json::Value;

/// A geometry as it comes out of the geometry store, in WGS84, together with
/// the layer's attribute columns in configuration order. `None` marks a SQL null.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceFeature {
    pub geometry: Geometry<f64>,
    pub attributes: Vec<(String, Option<PropertyValue>)>,
}

/// Scalar feature property.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyValue {
    String(String),
    Int(i64),
    UInt(u64),
    Double(f64),
    Bool(bool),
}

impl SourceFeature {
    pub fn new(geometry: Geometry<f64>) -> SourceFeature {
        SourceFeature {
            geometry,
            attributes: Vec::new(),
        }
    }

    pub fn with_attribute<K: Into<String>>(mut self, key: K, value: Option<PropertyValue>) -> Self {
        self.attributes.push((key.into(), value));
        self
    }
}

impl PropertyValue {
    /// Maps a JSON value onto a tile property. Nested arrays and objects are
    /// kept as their JSON text; `null` has no property representation.
    pub fn from_json(value: Value) -> Option<PropertyValue> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(PropertyValue::Bool(b)),
            Value::Number(n) => n
                .as_i64()
                .map(PropertyValue::Int)
                .or_else(|| n.as_u64().map(PropertyValue::UInt))
                .or_else(|| n.as_f64().map(PropertyValue::Double)),
            Value::String(s) => Some(PropertyValue::String(s)),
            nested => Some(PropertyValue::String(nested.to_string())),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Int(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Double(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Bool(value)
    }
}
