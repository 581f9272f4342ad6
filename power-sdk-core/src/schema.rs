use std::collections::HashMap;

use crate::datatype::DataType;
use crate::error::ParserError;
use crate::transform::TransformChain;

/// A single fixed-offset field.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub offset: usize,
    pub dtype: DataType,
    pub unit: Option<String>,
    pub required: bool,
    pub transform: Option<TransformChain>,
    pub min_protocol_version: Option<u32>,
}

impl Field {
    pub fn size(&self) -> usize {
        self.dtype.size()
    }

    pub fn end(&self) -> usize {
        self.offset + self.size()
    }
}

/// A fixed-count, fixed-stride array of one primitive type.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayField {
    pub name: String,
    pub offset: usize,
    pub count: usize,
    pub stride: usize,
    pub item_type: DataType,
    pub transform: Option<TransformChain>,
    pub required: bool,
    pub min_protocol_version: Option<u32>,
}

impl ArrayField {
    pub fn size(&self) -> usize {
        self.count * self.stride
    }

    pub fn end(&self) -> usize {
        self.offset + self.size()
    }
}

/// A bit-packed sub-field of a `PackedField` element. `end` is exclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct SubField {
    pub name: String,
    pub start: usize,
    pub end: usize,
    pub enum_map: Option<HashMap<i64, String>>,
    pub transform: Option<TransformChain>,
}

impl SubField {
    pub fn mask(&self) -> u64 {
        if self.end - self.start >= 64 {
            u64::MAX
        } else {
            (1u64 << (self.end - self.start)) - 1
        }
    }

    pub fn shift(&self) -> usize {
        self.start
    }
}

/// A fixed-count, fixed-stride array of bit-packed elements sharing one
/// integer base type.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedField {
    pub name: String,
    pub offset: usize,
    pub count: usize,
    pub stride: usize,
    pub base_type: DataType,
    pub fields: Vec<SubField>,
    pub required: bool,
    pub min_protocol_version: Option<u32>,
}

impl PackedField {
    pub fn size(&self) -> usize {
        self.count * self.stride
    }

    pub fn end(&self) -> usize {
        self.offset + self.size()
    }
}

/// A named bundle of `Field`s with absolute offsets into the block.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldGroup {
    pub name: String,
    pub fields: Vec<Field>,
    /// Advisory only: each sub-field's own `required` drives validation.
    pub required: bool,
}

impl FieldGroup {
    pub fn offset(&self) -> usize {
        self.fields.iter().map(|f| f.offset).min().unwrap_or(0)
    }

    pub fn end(&self) -> usize {
        self.fields.iter().map(Field::end).max().unwrap_or(0)
    }

    pub fn size(&self) -> usize {
        self.end().saturating_sub(self.offset())
    }
}

/// A tagged union over the four field shapes a schema can declare.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldSpec {
    Field(Field),
    Array(ArrayField),
    Packed(PackedField),
    Group(FieldGroup),
}

impl FieldSpec {
    pub fn name(&self) -> &str {
        match self {
            FieldSpec::Field(f) => &f.name,
            FieldSpec::Array(a) => &a.name,
            FieldSpec::Packed(p) => &p.name,
            FieldSpec::Group(g) => &g.name,
        }
    }

    pub fn offset(&self) -> usize {
        match self {
            FieldSpec::Field(f) => f.offset,
            FieldSpec::Array(a) => a.offset,
            FieldSpec::Packed(p) => p.offset,
            FieldSpec::Group(g) => g.offset(),
        }
    }

    pub fn end(&self) -> usize {
        match self {
            FieldSpec::Field(f) => f.end(),
            FieldSpec::Array(a) => a.end(),
            FieldSpec::Packed(p) => p.end(),
            FieldSpec::Group(g) => g.end(),
        }
    }

    pub fn required(&self) -> bool {
        match self {
            FieldSpec::Field(f) => f.required,
            FieldSpec::Array(a) => a.required,
            FieldSpec::Packed(p) => p.required,
            FieldSpec::Group(g) => g.required,
        }
    }

    pub fn min_protocol_version(&self) -> Option<u32> {
        match self {
            FieldSpec::Field(f) => f.min_protocol_version,
            FieldSpec::Array(a) => a.min_protocol_version,
            FieldSpec::Packed(p) => p.min_protocol_version,
            FieldSpec::Group(_) => None,
        }
    }
}

/// Result of validating a byte buffer against a `BlockSchema`, see
/// `crate::record::ValidationResult`.
pub use crate::record::ValidationResult;

/// An immutable, validated block schema: the fixed contract for one block id.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockSchema {
    pub block_id: u32,
    pub name: String,
    pub description: String,
    pub min_length: usize,
    pub fields: Vec<FieldSpec>,
    pub protocol_version: Option<u32>,
    pub schema_version: String,
    pub strict: bool,
    pub verification_status: String,
}

impl BlockSchema {
    /// Maximum end-offset across all fields, descending into `FieldGroup`
    /// sub-fields.
    pub fn max_field_end(&self) -> usize {
        self.fields.iter().map(FieldSpec::end).max().unwrap_or(0)
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name() == name)
    }

    /// Validate a byte buffer against this schema's declared shape.
    pub fn validate(&self, data: &[u8]) -> ValidationResult {
        let mut result = ValidationResult {
            valid: true,
            ..Default::default()
        };
        if data.len() < self.min_length {
            result.valid = false;
            result.errors.push(format!(
                "buffer too short: {} bytes, need at least {}",
                data.len(),
                self.min_length
            ));
        }
        for field in &self.fields {
            match field {
                FieldSpec::Group(group) => {
                    for sub in &group.fields {
                        self.check_field_bounds(sub.required, &sub.name, sub.offset, sub.end(), data, &mut result);
                    }
                }
                _ => {
                    self.check_field_bounds(
                        field.required(),
                        field.name(),
                        field.offset(),
                        field.end(),
                        data,
                        &mut result,
                    );
                }
            }
        }
        if self.strict && data.len() > self.max_field_end() {
            result
                .warnings
                .push("extra data beyond declared field range".to_string());
        }
        result
    }

    fn check_field_bounds(
        &self,
        required: bool,
        name: &str,
        offset: usize,
        end: usize,
        data: &[u8],
        result: &mut ValidationResult,
    ) {
        if end > data.len() {
            if required {
                result.valid = false;
                result
                    .errors
                    .push(format!("required field '{name}' out of bounds at offset {offset}"));
            } else {
                result.missing_fields.push(name.to_string());
            }
        }
    }

    pub fn builder(block_id: u32, name: impl Into<String>) -> BlockSchemaBuilder {
        BlockSchemaBuilder::new(block_id, name)
    }
}

/// Builder for `BlockSchema`, validated at `build()`.
///
/// Replaces the decorator-based schema DSL the source system uses with an
/// explicit, typed construction sequence.
pub struct BlockSchemaBuilder {
    block_id: u32,
    name: String,
    description: String,
    min_length: usize,
    fields: Vec<FieldSpec>,
    protocol_version: Option<u32>,
    schema_version: String,
    strict: bool,
    verification_status: String,
}

impl BlockSchemaBuilder {
    pub fn new(block_id: u32, name: impl Into<String>) -> Self {
        BlockSchemaBuilder {
            block_id,
            name: name.into(),
            description: String::new(),
            min_length: 0,
            fields: Vec::new(),
            protocol_version: None,
            schema_version: "1.0.0".to_string(),
            strict: false,
            verification_status: "unverified".to_string(),
        }
    }

    pub fn description(mut self, d: impl Into<String>) -> Self {
        self.description = d.into();
        self
    }

    pub fn min_length(mut self, n: usize) -> Self {
        self.min_length = n;
        self
    }

    pub fn protocol_version(mut self, v: u32) -> Self {
        self.protocol_version = Some(v);
        self
    }

    pub fn schema_version(mut self, v: impl Into<String>) -> Self {
        self.schema_version = v.into();
        self
    }

    pub fn strict(mut self, s: bool) -> Self {
        self.strict = s;
        self
    }

    pub fn verification_status(mut self, v: impl Into<String>) -> Self {
        self.verification_status = v.into();
        self
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(FieldSpec::Field(field));
        self
    }

    pub fn array(mut self, field: ArrayField) -> Result<Self, ParserError> {
        if field.count == 0 {
            return Err(ParserError::InvalidSchema(format!(
                "array field '{}' count must be >= 1, got 0",
                field.name
            )));
        }
        if field.stride == 0 {
            return Err(ParserError::InvalidSchema(format!(
                "array field '{}' stride must be >= 1, got 0",
                field.name
            )));
        }
        self.fields.push(FieldSpec::Array(field));
        Ok(self)
    }

    pub fn group(mut self, group: FieldGroup) -> Self {
        self.fields.push(FieldSpec::Group(group));
        self
    }

    pub fn packed(mut self, field: PackedField) -> Result<Self, ParserError> {
        let base_bits = field.base_type.size() * 8;
        for sub in &field.fields {
            if sub.end > base_bits {
                return Err(ParserError::InvalidSchema(format!(
                    "packed field '{}' sub-field '{}' bit_end {} exceeds base type width {}",
                    field.name, sub.name, sub.end, base_bits
                )));
            }
            if sub.start >= sub.end {
                return Err(ParserError::InvalidSchema(format!(
                    "packed field '{}' sub-field '{}' has start >= end",
                    field.name, sub.name
                )));
            }
        }
        self.fields.push(FieldSpec::Packed(field));
        Ok(self)
    }

    pub fn build(self) -> Result<BlockSchema, ParserError> {
        Ok(BlockSchema {
            block_id: self.block_id,
            name: self.name,
            description: self.description,
            min_length: self.min_length,
            fields: self.fields,
            protocol_version: self.protocol_version,
            schema_version: self.schema_version,
            strict: self.strict,
            verification_status: self.verification_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_rejects_packed_field_exceeding_base_width() {
        let packed = PackedField {
            name: "cells".to_string(),
            offset: 0,
            count: 1,
            stride: 2,
            base_type: DataType::UInt16,
            fields: vec![SubField {
                name: "overrun".to_string(),
                start: 0,
                end: 17,
                enum_map: None,
                transform: None,
            }],
            required: true,
            min_protocol_version: None,
        };
        let err = BlockSchema::builder(1, "x").packed(packed).unwrap_err();
        assert!(matches!(err, ParserError::InvalidSchema(_)));
    }

    #[test]
    fn builder_rejects_array_field_count_zero() {
        let array = ArrayField {
            name: "cells".to_string(),
            offset: 0,
            count: 0,
            stride: 2,
            item_type: DataType::UInt16,
            transform: None,
            required: true,
            min_protocol_version: None,
        };
        let err = BlockSchema::builder(1, "x").array(array).unwrap_err();
        assert!(matches!(err, ParserError::InvalidSchema(_)));
    }

    #[test]
    fn builder_rejects_array_field_stride_zero() {
        let array = ArrayField {
            name: "cells".to_string(),
            offset: 0,
            count: 2,
            stride: 0,
            item_type: DataType::UInt16,
            transform: None,
            required: true,
            min_protocol_version: None,
        };
        let err = BlockSchema::builder(1, "x").array(array).unwrap_err();
        assert!(matches!(err, ParserError::InvalidSchema(_)));
    }

    #[test]
    fn max_field_end_descends_into_groups() {
        let group = FieldGroup {
            name: "g".to_string(),
            fields: vec![Field {
                name: "a".to_string(),
                offset: 10,
                dtype: DataType::UInt16,
                unit: None,
                required: true,
                transform: None,
                min_protocol_version: None,
            }],
            required: false,
        };
        let schema = BlockSchema::builder(1, "x").group(group).build().unwrap();
        assert_eq!(schema.max_field_end(), 12);
    }
}
