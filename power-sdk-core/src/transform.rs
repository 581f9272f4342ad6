use thiserror::Error;

use crate::record::Value;

/// Error raised when a transform chain is malformed. Raised at schema
/// construction time, never while parsing a block.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransformBuildError {
    #[error("unknown transform '{0}'")]
    UnknownTransform(String),
    #[error("transform '{name}' expects args like '{expected}', got '{got}'")]
    BadArgs {
        name: String,
        expected: String,
        got: String,
    },
    #[error("scale factor must be finite and non-zero, got {0}")]
    BadScaleFactor(f64),
    #[error("clamp min ({min}) must be less than max ({max})")]
    BadClampRange { min: f64, max: f64 },
    #[error("hex_enable_list index out of range: {0}")]
    BadHexEnableListIndex(i64),
}

/// A single step in a transform chain, already parsed and validated.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformStep {
    Abs,
    Scale(f64),
    Minus(f64),
    Bitmask(u64),
    Shift(i32),
    Clamp { min: f64, max: f64 },
    HexEnableList { mode: u8, index: usize },
}

impl TransformStep {
    /// Parse one `name[:args]` spec, e.g. `"scale:0.1"` or `"hex_enable_list:0:3"`.
    pub fn parse(spec: &str) -> Result<Self, TransformBuildError> {
        let mut parts = spec.split(':');
        let name = parts.next().unwrap_or("");
        let rest: Vec<&str> = parts.collect();
        match name {
            "abs" => Ok(TransformStep::Abs),
            "scale" => {
                let raw = rest.first().copied().ok_or_else(|| bad_args(name, "scale:<float>", spec))?;
                let factor: f64 = raw
                    .parse()
                    .map_err(|_| bad_args(name, "scale:<float>", spec))?;
                if !factor.is_finite() || factor == 0.0 {
                    return Err(TransformBuildError::BadScaleFactor(factor));
                }
                Ok(TransformStep::Scale(factor))
            }
            "minus" => {
                let raw = rest.first().copied().ok_or_else(|| bad_args(name, "minus:<float>", spec))?;
                let c: f64 = raw.parse().map_err(|_| bad_args(name, "minus:<float>", spec))?;
                Ok(TransformStep::Minus(c))
            }
            "bitmask" => {
                let raw = rest.first().copied().ok_or_else(|| bad_args(name, "bitmask:<hex|int>", spec))?;
                let mask = parse_int_literal(raw)
                    .ok_or_else(|| bad_args(name, "bitmask:<hex|int>", spec))?;
                Ok(TransformStep::Bitmask(mask as u64))
            }
            "shift" => {
                let raw = rest.first().copied().ok_or_else(|| bad_args(name, "shift:<int>", spec))?;
                let n: i32 = raw.parse().map_err(|_| bad_args(name, "shift:<int>", spec))?;
                Ok(TransformStep::Shift(n))
            }
            "clamp" => {
                if rest.len() != 2 {
                    return Err(bad_args(name, "clamp:<min>:<max>", spec));
                }
                let min: f64 = rest[0].parse().map_err(|_| bad_args(name, "clamp:<min>:<max>", spec))?;
                let max: f64 = rest[1].parse().map_err(|_| bad_args(name, "clamp:<min>:<max>", spec))?;
                if !(min < max) {
                    return Err(TransformBuildError::BadClampRange { min, max });
                }
                Ok(TransformStep::Clamp { min, max })
            }
            "hex_enable_list" => {
                if rest.len() != 2 {
                    return Err(bad_args(name, "hex_enable_list:<mode>:<index>", spec));
                }
                let mode: u8 = rest[0]
                    .parse()
                    .map_err(|_| bad_args(name, "hex_enable_list:<mode>:<index>", spec))?;
                let index: i64 = rest[1]
                    .parse()
                    .map_err(|_| bad_args(name, "hex_enable_list:<mode>:<index>", spec))?;
                if index < 0 {
                    return Err(TransformBuildError::BadHexEnableListIndex(index));
                }
                // Only full chunks are addressable; a trailing partial chunk
                // (16 not evenly divisible by chunk_size) is never valid.
                let chunk_size: usize = if mode == 3 { 3 } else { 2 };
                let num_chunks = 16 / chunk_size;
                if index as usize >= num_chunks {
                    return Err(TransformBuildError::BadHexEnableListIndex(index));
                }
                Ok(TransformStep::HexEnableList {
                    mode,
                    index: index as usize,
                })
            }
            other => Err(TransformBuildError::UnknownTransform(other.to_string())),
        }
    }

    fn apply(&self, input: Num) -> Num {
        match self {
            TransformStep::Abs => match input {
                Num::Int(i) => Num::Int(i.abs()),
                Num::Float(f) => Num::Float(f.abs()),
            },
            TransformStep::Scale(factor) => Num::Float(input.as_f64() * factor),
            TransformStep::Minus(c) => Num::Float(input.as_f64() - c),
            TransformStep::Bitmask(mask) => Num::Int(input.as_i64() & *mask as i64),
            TransformStep::Shift(n) => Num::Int(input.as_i64() >> n),
            TransformStep::Clamp { min, max } => Num::Float(input.as_f64().clamp(*min, *max)),
            TransformStep::HexEnableList { mode, index } => {
                Num::Int(hex_enable_list(input.as_i64() as u16, *mode, *index) as i64)
            }
        }
    }
}

fn bad_args(name: &str, expected: &str, got: &str) -> TransformBuildError {
    TransformBuildError::BadArgs {
        name: name.to_string(),
        expected: expected.to_string(),
        got: got.to_string(),
    }
}

fn parse_int_literal(s: &str) -> Option<i64> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

#[derive(Debug, Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    fn as_i64(self) -> i64 {
        match self {
            Num::Int(i) => i,
            Num::Float(f) => f as i64,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Num::Int(i) => Value::Int(i),
            Num::Float(f) => Value::Float(f),
        }
    }
}

/// Extract the `index`-th chunk of `raw`, read MSB-first as a 16-bit vector
/// and chunked into 2-bit (mode != 3) or 3-bit (mode == 3) groups, each
/// chunk decoded LSB-first within itself. Only full chunks are valid;
/// callers must reject `index >= 16 / chunk_size` before calling this
/// (`TransformStep::parse` does).
fn hex_enable_list(raw: u16, mode: u8, index: usize) -> u32 {
    let bits: Vec<u32> = (0..16).map(|i| ((raw >> (15 - i)) & 1) as u32).collect();
    let chunk_size: usize = if mode == 3 { 3 } else { 2 };
    let start = index * chunk_size;
    if start >= bits.len() {
        return 0;
    }
    let end = (start + chunk_size).min(bits.len());
    let chunk = &bits[start..end];
    chunk
        .iter()
        .enumerate()
        .map(|(j, &b)| b * (1 << j))
        .sum()
}

/// An ordered, compiled sequence of transform steps. Construction validates
/// every step; `apply` is then a pure function with no further failure mode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformChain {
    steps: Vec<TransformStep>,
}

impl TransformChain {
    pub fn new(steps: Vec<TransformStep>) -> Self {
        TransformChain { steps }
    }

    /// Parse and compile a sequence of `"name:args"` specs in declaration order.
    pub fn compile(specs: &[&str]) -> Result<Self, TransformBuildError> {
        let steps = specs
            .iter()
            .map(|s| TransformStep::parse(s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(TransformChain { steps })
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Apply every step in order to `raw`, folding left to right.
    pub fn apply(&self, raw: &Value) -> Value {
        let mut acc = match raw {
            Value::Int(i) => Num::Int(*i),
            Value::Float(f) => Num::Float(*f),
            other => return other.clone(),
        };
        for step in &self.steps {
            acc = step.apply(acc);
        }
        acc.into_value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_enable_list_matches_spec_example() {
        // 0x1234 = 0001 0010 0011 0100
        assert_eq!(hex_enable_list(0x1234, 0, 3), 1);
        assert_eq!(hex_enable_list(0x1234, 0, 5), 3);
        let expected = [0, 2, 0, 1, 0, 3, 2, 0];
        for (i, &e) in expected.iter().enumerate() {
            assert_eq!(hex_enable_list(0x1234, 0, i), e);
        }
    }

    #[test]
    fn scale_and_abs_compose_left_to_right() {
        let chain = TransformChain::compile(&["abs", "scale:0.1"]).unwrap();
        assert_eq!(chain.apply(&Value::Int(-52)), Value::Float(5.2));
    }

    #[test]
    fn rejects_zero_scale_factor() {
        assert_eq!(
            TransformStep::parse("scale:0").unwrap_err(),
            TransformBuildError::BadScaleFactor(0.0)
        );
    }

    #[test]
    fn rejects_bad_clamp_range() {
        assert!(matches!(
            TransformStep::parse("clamp:5:1"),
            Err(TransformBuildError::BadClampRange { .. })
        ));
    }

    #[test]
    fn rejects_unknown_transform() {
        assert!(matches!(
            TransformStep::parse("frobnicate:1"),
            Err(TransformBuildError::UnknownTransform(_))
        ));
    }

    #[test]
    fn bitmask_accepts_hex_literal() {
        let step = TransformStep::parse("bitmask:0x0F").unwrap();
        assert_eq!(step, TransformStep::Bitmask(0x0F));
    }

    #[test]
    fn rejects_hex_enable_list_index_past_last_full_chunk() {
        // mode 0 has chunk_size 2, so 16/2 = 8 valid indices: 0..=7.
        assert!(TransformStep::parse("hex_enable_list:0:7").is_ok());
        assert_eq!(
            TransformStep::parse("hex_enable_list:0:8").unwrap_err(),
            TransformBuildError::BadHexEnableListIndex(8)
        );

        // mode 3 has chunk_size 3, so 16/3 = 5 valid indices: 0..=4. Index 5
        // would read a partial trailing chunk and must be rejected too.
        assert!(TransformStep::parse("hex_enable_list:3:4").is_ok());
        assert_eq!(
            TransformStep::parse("hex_enable_list:3:5").unwrap_err(),
            TransformBuildError::BadHexEnableListIndex(5)
        );
    }

    #[test]
    fn rejects_negative_hex_enable_list_index() {
        assert_eq!(
            TransformStep::parse("hex_enable_list:0:-1").unwrap_err(),
            TransformBuildError::BadHexEnableListIndex(-1)
        );
    }
}
