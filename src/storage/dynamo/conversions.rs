//! JSON-shaped items to and from DynamoDB attribute maps.

use std::collections::HashMap;

use aws_sdk_dynamodb::types::AttributeValue;
use serde_json::{Map, Number, Value};

use crate::storage::Item;

pub type AttributeMap = HashMap<String, AttributeValue>;

pub fn item_to_attributes(item: &Item) -> AttributeMap {
    item.iter()
        .map(|(k, v)| (k.clone(), json_to_attr(v)))
        .collect()
}

/// Binary and set attributes have no JSON shape here and are dropped.
pub fn attributes_to_item(attributes: &AttributeMap) -> Item {
    attributes
        .iter()
        .filter_map(|(k, v)| attr_to_json(v).map(|value| (k.clone(), value)))
        .collect()
}

pub fn json_to_attr(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(items) => AttributeValue::L(items.iter().map(json_to_attr).collect()),
        Value::Object(map) => AttributeValue::M(
            map.iter()
                .map(|(k, v)| (k.clone(), json_to_attr(v)))
                .collect(),
        ),
    }
}

pub fn attr_to_json(attr: &AttributeValue) -> Option<Value> {
    match attr {
        AttributeValue::S(s) => Some(Value::String(s.clone())),
        AttributeValue::N(n) => parse_number(n),
        AttributeValue::Bool(b) => Some(Value::Bool(*b)),
        AttributeValue::Null(_) => Some(Value::Null),
        AttributeValue::L(items) => Some(Value::Array(
            items.iter().filter_map(attr_to_json).collect(),
        )),
        AttributeValue::M(map) => Some(Value::Object(
            map.iter()
                .filter_map(|(k, v)| attr_to_json(v).map(|value| (k.clone(), value)))
                .collect::<Map<_, _>>(),
        )),
        _ => None,
    }
}

fn parse_number(n: &str) -> Option<Value> {
    if let Ok(u) = n.parse::<u64>() {
        return Some(Value::Number(u.into()));
    }
    if let Ok(i) = n.parse::<i64>() {
        return Some(Value::Number(i.into()));
    }
    n.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}
