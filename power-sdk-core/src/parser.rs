use std::collections::HashMap;
use std::sync::Mutex;
use std::time::SystemTime;

use log::warn;

use crate::datatype::DecodeError;
use crate::error::ParserError;
use crate::record::{ParsedRecord, Value};
use crate::schema::{ArrayField, BlockSchema, Field, FieldSpec, PackedField};

/// Protocol version assumed when a caller does not supply one.
pub const DEFAULT_PROTOCOL_VERSION: u32 = 2000;

/// Resolves block schemas by id and parses normalized payload bytes into
/// `ParsedRecord`s, gating individual fields by protocol version.
pub struct BlockParser {
    schemas: Mutex<HashMap<u32, BlockSchema>>,
}

impl Default for BlockParser {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockParser {
    pub fn new() -> Self {
        BlockParser {
            schemas: Mutex::new(HashMap::new()),
        }
    }

    /// Register a schema by block id. Idempotent if an identical schema is
    /// already registered at that id; a structurally different schema at
    /// the same id is a configuration error.
    pub fn register_schema(&self, schema: BlockSchema) -> Result<(), ParserError> {
        let mut schemas = self.schemas.lock().expect("schema registry poisoned");
        match schemas.get(&schema.block_id) {
            Some(existing) if *existing == schema => Ok(()),
            Some(existing) => Err(ParserError::SchemaConflict {
                block_id: schema.block_id,
                reason: format!(
                    "existing schema '{}' differs from new schema '{}'",
                    existing.name, schema.name
                ),
            }),
            None => {
                schemas.insert(schema.block_id, schema);
                Ok(())
            }
        }
    }

    pub fn get_schema(&self, block_id: u32) -> Option<BlockSchema> {
        self.schemas
            .lock()
            .expect("schema registry poisoned")
            .get(&block_id)
            .cloned()
    }

    pub fn list_schemas(&self) -> HashMap<u32, String> {
        self.schemas
            .lock()
            .expect("schema registry poisoned")
            .iter()
            .map(|(id, s)| (*id, s.name.clone()))
            .collect()
    }

    /// Parse `data` for `block_id` against its registered schema.
    pub fn parse_block(
        &self,
        block_id: u32,
        data: &[u8],
        validate: bool,
        protocol_version: Option<u32>,
    ) -> Result<ParsedRecord, ParserError> {
        let schema = self
            .get_schema(block_id)
            .ok_or(ParserError::SchemaNotRegistered { block_id })?;

        let effective_version = protocol_version
            .or(schema.protocol_version)
            .unwrap_or(DEFAULT_PROTOCOL_VERSION);

        let validation = if validate {
            let result = schema.validate(data);
            if !result.valid && schema.strict {
                return Err(ParserError::StrictValidationFailed {
                    block_id,
                    errors: result.errors,
                });
            }
            Some(result)
        } else {
            None
        };

        let mut values = HashMap::new();
        for field in &schema.fields {
            match field {
                FieldSpec::Field(f) => {
                    let v = parse_plain_field(f, data, effective_version)?;
                    values.insert(f.name.clone(), v);
                }
                FieldSpec::Array(a) => {
                    let v = parse_array_field(a, data, effective_version)?;
                    values.insert(a.name.clone(), v);
                }
                FieldSpec::Packed(p) => {
                    let v = parse_packed_field(p, data, effective_version)?;
                    values.insert(p.name.clone(), v);
                }
                FieldSpec::Group(g) => {
                    let mut nested = HashMap::new();
                    for f in &g.fields {
                        let v = parse_plain_field(f, data, effective_version)?;
                        nested.insert(f.name.clone(), v);
                    }
                    values.insert(g.name.clone(), Value::Map(nested));
                }
            }
        }

        Ok(ParsedRecord {
            block_id,
            name: schema.name.clone(),
            values,
            raw: data.to_vec(),
            length: data.len(),
            protocol_version: Some(effective_version),
            schema_version: schema.schema_version.clone(),
            timestamp: SystemTime::now(),
            validation,
        })
    }
}

/// Apply a field's own transform chain, if any.
fn transformed(value: Value, transform: &Option<crate::transform::TransformChain>) -> Value {
    match transform {
        Some(chain) => chain.apply(&value),
        None => value,
    }
}

/// Version-gate, bounds-gate, then decode one plain `Field`. Returns
/// `Value::Null` for version-gated or out-of-bounds optional fields; a
/// required-field decode failure propagates as `ParserError`.
fn parse_plain_field(
    field: &Field,
    data: &[u8],
    protocol_version: u32,
) -> Result<Value, ParserError> {
    if let Some(min_v) = field.min_protocol_version {
        if min_v > protocol_version {
            return Ok(Value::Null);
        }
    }
    if field.end() > data.len() {
        if field.required {
            warn!(
                "required field '{}' out of bounds at offset {} (buffer length {})",
                field.name,
                field.offset,
                data.len()
            );
        }
        return Ok(Value::Null);
    }
    match field.dtype.parse(data, field.offset) {
        Ok(v) => Ok(transformed(v, &field.transform)),
        Err(e) => handle_decode_error(&field.name, field.offset, field.required, e),
    }
}

fn parse_array_field(
    field: &ArrayField,
    data: &[u8],
    protocol_version: u32,
) -> Result<Value, ParserError> {
    if let Some(min_v) = field.min_protocol_version {
        if min_v > protocol_version {
            return Ok(Value::Null);
        }
    }
    if field.end() > data.len() {
        if field.required {
            warn!(
                "required array field '{}' out of bounds at offset {} (buffer length {})",
                field.name,
                field.offset,
                data.len()
            );
        }
        return Ok(Value::Null);
    }
    let mut items = Vec::with_capacity(field.count);
    for i in 0..field.count {
        let item_offset = field.offset + i * field.stride;
        match field.item_type.parse(data, item_offset) {
            Ok(v) => items.push(transformed(v, &field.transform)),
            Err(e) => return handle_decode_error(&field.name, item_offset, field.required, e),
        }
    }
    Ok(Value::List(items))
}

fn parse_packed_field(
    field: &PackedField,
    data: &[u8],
    protocol_version: u32,
) -> Result<Value, ParserError> {
    if let Some(min_v) = field.min_protocol_version {
        if min_v > protocol_version {
            return Ok(Value::Null);
        }
    }
    if field.end() > data.len() {
        if field.required {
            warn!(
                "required packed field '{}' out of bounds at offset {} (buffer length {})",
                field.name,
                field.offset,
                data.len()
            );
        }
        return Ok(Value::Null);
    }
    let mut items = Vec::with_capacity(field.count);
    for i in 0..field.count {
        let elem_offset = field.offset + i * field.stride;
        let packed = match field.base_type.parse(data, elem_offset) {
            Ok(Value::Int(raw)) => raw,
            Ok(_) => unreachable!("base_type always decodes to Value::Int"),
            Err(e) => return handle_decode_error(&field.name, elem_offset, field.required, e),
        };
        let mut sub_values = HashMap::new();
        for sub in &field.fields {
            let raw = (packed >> sub.shift()) & sub.mask() as i64;
            let value = if let Some(map) = &sub.enum_map {
                let label = map
                    .get(&raw)
                    .cloned()
                    .unwrap_or_else(|| format!("UNKNOWN_{raw}"));
                Value::Enum { raw, label }
            } else {
                Value::Int(raw)
            };
            sub_values.insert(sub.name.clone(), transformed(value, &sub.transform));
        }
        items.push(Value::Map(sub_values));
    }
    Ok(Value::List(items))
}

fn handle_decode_error(
    name: &str,
    offset: usize,
    required: bool,
    err: DecodeError,
) -> Result<Value, ParserError> {
    if required {
        Err(ParserError::RequiredFieldFailed {
            field: name.to_string(),
            offset,
            reason: err.to_string(),
        })
    } else {
        Ok(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatype::DataType;
    use crate::schema::{BlockSchemaBuilder, SubField};
    use crate::transform::TransformChain;

    #[test]
    fn grid_info_block_1300() {
        let schema = BlockSchema::builder(1300, "grid_info")
            .min_length(32)
            .field(Field {
                name: "frequency".to_string(),
                offset: 0,
                dtype: DataType::UInt16,
                unit: Some("Hz".to_string()),
                required: true,
                transform: Some(TransformChain::compile(&["scale:0.1"]).unwrap()),
                min_protocol_version: None,
            })
            .field(Field {
                name: "phase_0_voltage".to_string(),
                offset: 28,
                dtype: DataType::UInt16,
                unit: Some("V".to_string()),
                required: true,
                transform: Some(TransformChain::compile(&["scale:0.1"]).unwrap()),
                min_protocol_version: None,
            })
            .field(Field {
                name: "phase_0_current".to_string(),
                offset: 30,
                dtype: DataType::Int16,
                unit: Some("A".to_string()),
                required: true,
                transform: Some(TransformChain::compile(&["abs", "scale:0.1"]).unwrap()),
                min_protocol_version: None,
            })
            .build()
            .unwrap();

        let parser = BlockParser::new();
        parser.register_schema(schema).unwrap();

        let mut data = vec![0u8; 32];
        data[0] = 0x01;
        data[1] = 0xF4;
        data[28] = 0x08;
        data[29] = 0xFC;
        data[30] = 0xFF;
        data[31] = 0xCC;

        let record = parser.parse_block(1300, &data, true, None).unwrap();
        assert_eq!(record.get_float("frequency"), Some(50.0));
        assert_eq!(record.get_float("phase_0_voltage"), Some(230.0));
        assert_eq!(record.get_float("phase_0_current"), Some(5.2));
    }

    #[test]
    fn packed_cells() {
        let packed = crate::schema::PackedField {
            name: "cells".to_string(),
            offset: 0,
            count: 2,
            stride: 2,
            base_type: DataType::UInt16,
            fields: vec![
                SubField {
                    name: "voltage".to_string(),
                    start: 0,
                    end: 14,
                    enum_map: None,
                    transform: Some(TransformChain::compile(&["scale:0.001"]).unwrap()),
                },
                SubField {
                    name: "status".to_string(),
                    start: 14,
                    end: 16,
                    enum_map: None,
                    transform: None,
                },
            ],
            required: true,
            min_protocol_version: None,
        };
        let schema = BlockSchema::builder(2, "cells")
            .min_length(4)
            .packed(packed)
            .unwrap()
            .build()
            .unwrap();
        let parser = BlockParser::new();
        parser.register_schema(schema).unwrap();

        let data = [0x8C, 0xAD, 0x4C, 0xB8];
        let record = parser.parse_block(2, &data, true, None).unwrap();
        let cells = record.get("cells").unwrap().get_list().unwrap();
        assert_eq!(cells.len(), 2);
        let c0 = cells[0].get_map().unwrap();
        let v0 = c0.get("voltage").unwrap().get_float().unwrap();
        assert!((v0 - 3.245).abs() < 1e-6);
        assert_eq!(c0.get("status").unwrap().get_int(), Some(2));
        let c1 = cells[1].get_map().unwrap();
        let v1 = c1.get("voltage").unwrap().get_float().unwrap();
        assert!((v1 - 3.256).abs() < 1e-6);
        assert_eq!(c1.get("status").unwrap().get_int(), Some(1));
    }

    #[test]
    fn protocol_gating() {
        let schema = BlockSchemaBuilder::new(3, "gated")
            .min_length(4)
            .field(Field {
                name: "always".to_string(),
                offset: 0,
                dtype: DataType::UInt16,
                unit: None,
                required: true,
                transform: None,
                min_protocol_version: None,
            })
            .field(Field {
                name: "new".to_string(),
                offset: 2,
                dtype: DataType::UInt16,
                unit: None,
                required: false,
                transform: None,
                min_protocol_version: Some(2003),
            })
            .build()
            .unwrap();
        let parser = BlockParser::new();
        parser.register_schema(schema).unwrap();

        let data = [0x00, 0x01, 0x00, 0x02];
        let at_2000 = parser.parse_block(3, &data, true, Some(2000)).unwrap();
        assert_eq!(at_2000.get_int("always"), Some(1));
        assert!(at_2000.get("new").unwrap().is_null());

        let at_2003 = parser.parse_block(3, &data, true, Some(2003)).unwrap();
        assert_eq!(at_2003.get_int("always"), Some(1));
        assert_eq!(at_2003.get_int("new"), Some(2));
    }

    #[test]
    fn empty_schema_identity() {
        let schema = BlockSchema::builder(4, "empty").min_length(0).build().unwrap();
        let parser = BlockParser::new();
        parser.register_schema(schema).unwrap();
        let data = [1, 2, 3, 4, 5];
        let record = parser.parse_block(4, &data, true, None).unwrap();
        assert!(record.values.is_empty());
        assert_eq!(record.length, 5);
        assert_eq!(record.raw, data.to_vec());
    }

    #[test]
    fn registry_idempotence() {
        let parser = BlockParser::new();
        let schema = BlockSchema::builder(5, "dup").build().unwrap();
        parser.register_schema(schema.clone()).unwrap();
        parser.register_schema(schema).unwrap();

        let conflicting = BlockSchema::builder(5, "different").build().unwrap();
        assert!(parser.register_schema(conflicting).is_err());
    }
}
