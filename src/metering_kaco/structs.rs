use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Converter {
    Int,
    Float,
}

/// One position of a command reply, defined once per command code.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub converter: Option<Converter>,
    /* only used for Home Assistant discovery */
    pub unit: Option<&'static str>,
    pub device_class: Option<&'static str>,
    /* the device sends the real value multiplied by this */
    pub scale: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Int(v) => serde_json::Value::from(*v),
            FieldValue::Float(v) => serde_json::Value::from(*v),
            FieldValue::Text(v) => serde_json::Value::from(v.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedField {
    pub name: String,
    pub description: String,
    pub value: FieldValue,
}

/// Decoded fields of a single reply line keyed by their position.
pub type DecodedRecord = BTreeMap<usize, DecodedField>;

/// Everything decoded during one inverter poll, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct MeasurementSet {
    fields: BTreeMap<String, DecodedField>,
}

impl MeasurementSet {
    pub fn new() -> Self {
        return MeasurementSet { fields: BTreeMap::new() };
    }

    /* later records win on colliding names (e_day, last_command_sent) */
    pub fn merge(&mut self, record: DecodedRecord) {
        for (_, field) in record {
            self.fields.insert(field.name.clone(), field);
        }
    }

    pub fn get(&self, name: &str) -> Option<&DecodedField> {
        return self.fields.get(name);
    }

    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        return self.fields.get(name).map(|f| &f.value);
    }

    pub fn len(&self) -> usize {
        return self.fields.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.fields.is_empty();
    }

    pub fn to_values(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut map = serde_json::Map::new();
        for (name, field) in self.fields.iter() {
            map.insert(name.clone(), field.value.to_json());
        }
        return map;
    }
}

/// What the device sent back for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawResponse {
    pub request: String,
    pub lines: Vec<String>,
}
