use apache_avro::Schema;
use apache_avro::types::Value;
use reelz_api::BackendError;

// ═══════════════════════════════════════════════════════════════
//  Wire envelope
// ═══════════════════════════════════════════════════════════════

/// First byte of every schema-framed value.
pub const MAGIC_BYTE: u8 = 0;

const HEADER_LEN: usize = 5;

/// Parsed Avro schema for one topic, together with the JSON text that is
/// registered under the topic's subject.
#[derive(Debug, Clone)]
pub struct TopicSchema {
    definition: String,
    schema: Schema,
}

impl TopicSchema {
    pub fn parse(definition: &str) -> Result<Self, BackendError> {
        let schema = Schema::parse_str(definition)
            .map_err(|e| BackendError::format_err(format!("avro schema: {e}")))?;
        Ok(Self { definition: definition.to_string(), schema })
    }

    pub fn definition(&self) -> &str {
        &self.definition
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }
}

/// Encode a JSON value as `0x00 | schema_id (BE i32) | avro datum`.
pub fn encode(schema: &TopicSchema, schema_id: i32, value: &serde_json::Value) -> Result<Vec<u8>, BackendError> {
    let avro = value_to_avro(value, schema.schema())?;
    let datum = apache_avro::to_avro_datum(schema.schema(), avro)
        .map_err(|e| BackendError::format_err(format!("avro: {e}")))?;

    let mut out = Vec::with_capacity(HEADER_LEN + datum.len());
    out.push(MAGIC_BYTE);
    out.extend_from_slice(&schema_id.to_be_bytes());
    out.extend_from_slice(&datum);
    Ok(out)
}

// ═══════════════════════════════════════════════════════════════
//  JSON → Avro conversion
// ═══════════════════════════════════════════════════════════════

fn value_to_avro(val: &serde_json::Value, schema: &Schema) -> Result<Value, BackendError> {
    match (val, schema) {
        (val, Schema::Union(union_schema)) => {
            for (idx, variant) in union_schema.variants().iter().enumerate() {
                if let Ok(v) = value_to_avro(val, variant) {
                    return Ok(Value::Union(idx as u32, Box::new(v)));
                }
            }
            Err(mismatch(val, "union"))
        }
        (serde_json::Value::Null, Schema::Null) => Ok(Value::Null),
        (serde_json::Value::Bool(b), Schema::Boolean) => Ok(Value::Boolean(*b)),
        (serde_json::Value::Number(n), Schema::Int) => n
            .as_i64()
            .and_then(|i| i32::try_from(i).ok())
            .map(Value::Int)
            .ok_or_else(|| mismatch(val, "int")),
        (serde_json::Value::Number(n), Schema::Long) => {
            n.as_i64().map(Value::Long).ok_or_else(|| mismatch(val, "long"))
        }
        (serde_json::Value::Number(n), Schema::Float) => {
            n.as_f64().map(|f| Value::Float(f as f32)).ok_or_else(|| mismatch(val, "float"))
        }
        (serde_json::Value::Number(n), Schema::Double) => {
            n.as_f64().map(Value::Double).ok_or_else(|| mismatch(val, "double"))
        }
        (serde_json::Value::String(s), Schema::String) => Ok(Value::String(s.clone())),
        (serde_json::Value::String(s), Schema::Enum(e)) if e.symbols.contains(s) => {
            let idx = e.symbols.iter().position(|sym| sym == s).unwrap_or_default();
            Ok(Value::Enum(idx as u32, s.clone()))
        }
        (serde_json::Value::Array(items), Schema::Array(inner)) => {
            let avro_items: Result<Vec<Value>, BackendError> = items
                .iter()
                .map(|item| value_to_avro(item, &inner.items))
                .collect();
            Ok(Value::Array(avro_items?))
        }
        (serde_json::Value::Object(map), Schema::Record(record_schema)) => {
            let mut fields = Vec::with_capacity(record_schema.fields.len());
            for field in &record_schema.fields {
                let field_val = map.get(&field.name).unwrap_or(&serde_json::Value::Null);
                let avro_val = value_to_avro(field_val, &field.schema)
                    .map_err(|e| e.with_context(&field.name))?;
                fields.push((field.name.clone(), avro_val));
            }
            Ok(Value::Record(fields))
        }
        _ => Err(mismatch(val, "schema")),
    }
}

fn mismatch(val: &serde_json::Value, expected: &str) -> BackendError {
    BackendError::format_err(format!("avro: cannot convert {val} to {expected}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Inverse of [`encode`]: the embedded schema id and the value as JSON.
    fn decode(schema: &TopicSchema, bytes: &[u8]) -> Result<(i32, serde_json::Value), BackendError> {
        if bytes.len() < HEADER_LEN || bytes[0] != MAGIC_BYTE {
            return Err(BackendError::format_err("avro: missing schema id header"));
        }
        let schema_id = i32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        let mut datum = &bytes[HEADER_LEN..];
        let value = apache_avro::from_avro_datum(schema.schema(), &mut datum, None)
            .map_err(|e| BackendError::format_err(format!("avro: {e}")))?;
        Ok((schema_id, avro_to_value(&value)))
    }

    fn avro_to_value(value: &Value) -> serde_json::Value {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Boolean(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::json!(i),
            Value::Long(l) => serde_json::json!(l),
            Value::Float(f) => serde_json::json!(f),
            Value::Double(d) => serde_json::json!(d),
            Value::String(s) | Value::Enum(_, s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) | Value::Fixed(_, b) => serde_json::json!(b),
            Value::Union(_, inner) => avro_to_value(inner),
            Value::Array(items) => serde_json::Value::Array(items.iter().map(avro_to_value).collect()),
            Value::Map(entries) => serde_json::Value::Object(
                entries.iter().map(|(k, v)| (k.clone(), avro_to_value(v))).collect(),
            ),
            Value::Record(fields) => serde_json::Value::Object(
                fields.iter().map(|(k, v)| (k.clone(), avro_to_value(v))).collect(),
            ),
            Value::Uuid(u) => serde_json::Value::String(u.to_string()),
            Value::TimestampMillis(t) | Value::TimestampMicros(t) => serde_json::json!(t),
            _ => serde_json::Value::Null,
        }
    }

    const SCHEMA: &str = r#"{
        "type": "record",
        "name": "Sample",
        "fields": [
            {"name": "id", "type": "string"},
            {"name": "count", "type": "long"},
            {"name": "tags", "type": {"type": "array", "items": "string"}},
            {"name": "note", "type": ["null", "string"], "default": null}
        ]
    }"#;

    #[test]
    fn envelope_carries_schema_id() {
        let schema = TopicSchema::parse(SCHEMA).unwrap();
        let value = serde_json::json!({"id": "a", "count": 7, "tags": ["x", "y"], "note": null});
        let bytes = encode(&schema, 42, &value).unwrap();
        assert_eq!(bytes[0], MAGIC_BYTE);
        assert_eq!(&bytes[1..5], &42i32.to_be_bytes());

        let (id, decoded) = decode(&schema, &bytes).unwrap();
        assert_eq!(id, 42);
        assert_eq!(decoded, value);
    }

    #[test]
    fn type_mismatch_is_format_error() {
        let schema = TopicSchema::parse(SCHEMA).unwrap();
        let value = serde_json::json!({"id": "a", "count": "seven", "tags": []});
        let err = encode(&schema, 1, &value).unwrap_err();
        assert_eq!(err.kind(), reelz_api::ErrorKind::Format);
        assert!(err.message().starts_with("count:"));
    }

    #[test]
    fn truncated_envelope_is_rejected() {
        let schema = TopicSchema::parse(SCHEMA).unwrap();
        assert!(decode(&schema, &[0, 0, 1]).is_err());
        assert!(decode(&schema, &[1, 0, 0, 0, 1, 2]).is_err());
    }

    #[test]
    fn invalid_schema_text_fails_parse() {
        assert!(TopicSchema::parse(r#"{"type": "record"}"#).is_err());
    }
}
