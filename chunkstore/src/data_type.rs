//! Element types.
//!
//! A [`DataType`] is deserialised from the `type` member of a dataset document, for example
//! ```json
//! {"class": "H5T_COMPOUND", "fields": [
//!     {"name": "symbol", "type": {"class": "H5T_STRING", "length": 4}},
//!     {"name": "open", "type": {"class": "H5T_FLOAT", "base": "H5T_IEEE_F32LE"}},
//!     {"name": "notes", "type": {"class": "H5T_STRING", "length": "H5T_VARIABLE"}}
//! ]}
//! ```
//!
//! ### Element encoding
//! Every element has a self-delimiting byte encoding:
//!  - numeric types are little endian,
//!  - fixed-length strings are zero padded to their length,
//!  - variable-length strings and sequences are a `u32` little endian byte length followed by the payload,
//!  - compound elements are the concatenation of their field encodings.
//!
//! Elements of types with a fixed [`size`](DataType::size) are exactly that many bytes.

use std::{fmt::Display, ops::Range};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use thiserror::Error;

/// The width of the length prefix of variable-length elements.
pub const LENGTH_PREFIX_SIZE: usize = size_of::<u32>();

/// A numeric base type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NumericType {
    /// `i8`
    #[serde(rename = "H5T_STD_I8LE")]
    Int8,
    /// `i16`
    #[serde(rename = "H5T_STD_I16LE")]
    Int16,
    /// `i32`
    #[serde(rename = "H5T_STD_I32LE")]
    Int32,
    /// `i64`
    #[serde(rename = "H5T_STD_I64LE")]
    Int64,
    /// `u8`
    #[serde(rename = "H5T_STD_U8LE")]
    UInt8,
    /// `u16`
    #[serde(rename = "H5T_STD_U16LE")]
    UInt16,
    /// `u32`
    #[serde(rename = "H5T_STD_U32LE")]
    UInt32,
    /// `u64`
    #[serde(rename = "H5T_STD_U64LE")]
    UInt64,
    /// `f32`
    #[serde(rename = "H5T_IEEE_F32LE")]
    Float32,
    /// `f64`
    #[serde(rename = "H5T_IEEE_F64LE")]
    Float64,
}

/// The length of a string type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "StringLengthRepr", into = "StringLengthRepr")]
pub enum StringLength {
    /// A fixed number of bytes.
    Fixed(usize),
    /// A variable number of bytes (`"H5T_VARIABLE"`).
    Variable,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum StringLengthRepr {
    Fixed(usize),
    Named(String),
}

impl TryFrom<StringLengthRepr> for StringLength {
    type Error = String;

    fn try_from(repr: StringLengthRepr) -> Result<Self, Self::Error> {
        match repr {
            StringLengthRepr::Fixed(length) => Ok(Self::Fixed(length)),
            StringLengthRepr::Named(name) if name == "H5T_VARIABLE" => Ok(Self::Variable),
            StringLengthRepr::Named(name) => Err(format!("invalid string length {name:?}")),
        }
    }
}

impl From<StringLength> for StringLengthRepr {
    fn from(length: StringLength) -> Self {
        match length {
            StringLength::Fixed(length) => Self::Fixed(length),
            StringLength::Variable => Self::Named("H5T_VARIABLE".to_string()),
        }
    }
}

/// The element type of a dataset.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "class")]
pub enum DataType {
    /// An integer.
    #[serde(rename = "H5T_INTEGER")]
    Integer {
        /// The base type.
        base: NumericType,
    },
    /// A floating point number.
    #[serde(rename = "H5T_FLOAT")]
    Float {
        /// The base type.
        base: NumericType,
    },
    /// A string.
    #[serde(rename = "H5T_STRING")]
    String {
        /// The string length.
        length: StringLength,
    },
    /// A variable-length sequence of `base` elements.
    #[serde(rename = "H5T_VLEN")]
    VariableLength {
        /// The sequence element type.
        base: Box<DataType>,
    },
    /// A record of named fields.
    #[serde(rename = "H5T_COMPOUND")]
    Compound {
        /// The fields, in storage order.
        fields: Vec<CompoundField>,
    },
}

/// A field of a [`DataType::Compound`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompoundField {
    /// The field name.
    pub name: String,
    /// The field type.
    #[serde(rename = "type")]
    pub data_type: DataType,
}

impl CompoundField {
    /// Create a new compound field.
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// A data type error.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum DataTypeError {
    /// An element encoding ends early.
    #[error("truncated element encoding for {0}")]
    Truncated(String),
    /// A value cannot be represented by the type.
    #[error("invalid value {value} for {data_type}: {reason}")]
    InvalidValue {
        /// The offending value.
        value: String,
        /// The type.
        data_type: String,
        /// Why it cannot be represented.
        reason: String,
    },
    /// A field does not exist in a compound type.
    #[error("unknown field {0:?}")]
    UnknownField(String),
    /// A compound type operation was applied to another type.
    #[error("{0} is not a compound type")]
    NotCompound(String),
}

impl NumericType {
    /// The size of the type in bytes.
    #[must_use]
    pub const fn size(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
        }
    }

    /// Returns true for the floating point types.
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }

    fn name(self) -> &'static str {
        match self {
            Self::Int8 => "H5T_STD_I8LE",
            Self::Int16 => "H5T_STD_I16LE",
            Self::Int32 => "H5T_STD_I32LE",
            Self::Int64 => "H5T_STD_I64LE",
            Self::UInt8 => "H5T_STD_U8LE",
            Self::UInt16 => "H5T_STD_U16LE",
            Self::UInt32 => "H5T_STD_U32LE",
            Self::UInt64 => "H5T_STD_U64LE",
            Self::Float32 => "H5T_IEEE_F32LE",
            Self::Float64 => "H5T_IEEE_F64LE",
        }
    }

    fn decode_value(self, element: &[u8]) -> Result<Value, DataTypeError> {
        let truncated = || DataTypeError::Truncated(self.name().to_string());
        macro_rules! le {
            ($t:ty) => {
                <$t>::from_le_bytes(element.try_into().map_err(|_| truncated())?)
            };
        }
        Ok(match self {
            Self::Int8 => Value::from(le!(i8)),
            Self::Int16 => Value::from(le!(i16)),
            Self::Int32 => Value::from(le!(i32)),
            Self::Int64 => Value::from(le!(i64)),
            Self::UInt8 => Value::from(le!(u8)),
            Self::UInt16 => Value::from(le!(u16)),
            Self::UInt32 => Value::from(le!(u32)),
            Self::UInt64 => Value::from(le!(u64)),
            Self::Float32 => float_value(f64::from(le!(f32))),
            Self::Float64 => float_value(le!(f64)),
        })
    }

    fn encode_value(self, value: &Value) -> Result<Vec<u8>, DataTypeError> {
        let invalid = |reason: &str| DataTypeError::InvalidValue {
            value: value.to_string(),
            data_type: self.name().to_string(),
            reason: reason.to_string(),
        };
        macro_rules! int {
            ($t:ty) => {{
                let value = value.as_i64().ok_or_else(|| invalid("expected an integer"))?;
                <$t>::try_from(value)
                    .map_err(|_| invalid("out of range"))?
                    .to_le_bytes()
                    .to_vec()
            }};
        }
        macro_rules! uint {
            ($t:ty) => {{
                let value = value
                    .as_u64()
                    .ok_or_else(|| invalid("expected a non-negative integer"))?;
                <$t>::try_from(value)
                    .map_err(|_| invalid("out of range"))?
                    .to_le_bytes()
                    .to_vec()
            }};
        }
        Ok(match self {
            Self::Int8 => int!(i8),
            Self::Int16 => int!(i16),
            Self::Int32 => int!(i32),
            Self::Int64 => int!(i64),
            Self::UInt8 => uint!(u8),
            Self::UInt16 => uint!(u16),
            Self::UInt32 => uint!(u32),
            Self::UInt64 => uint!(u64),
            Self::Float32 => {
                #[allow(clippy::cast_possible_truncation)]
                let value = value_to_float(value).ok_or_else(|| invalid("expected a number"))? as f32;
                value.to_le_bytes().to_vec()
            }
            Self::Float64 => value_to_float(value)
                .ok_or_else(|| invalid("expected a number"))?
                .to_le_bytes()
                .to_vec(),
        })
    }
}

fn float_value(value: f64) -> Value {
    Number::from_f64(value).map_or_else(
        || {
            Value::from(if value.is_nan() {
                "NaN"
            } else if value.is_sign_positive() {
                "Infinity"
            } else {
                "-Infinity"
            })
        },
        Value::Number,
    )
}

fn value_to_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(string) => match string.as_str() {
            "NaN" => Some(f64::NAN),
            "Infinity" => Some(f64::INFINITY),
            "-Infinity" => Some(f64::NEG_INFINITY),
            _ => None,
        },
        _ => None,
    }
}

fn read_length_prefix(bytes: &[u8]) -> Option<usize> {
    let prefix = bytes.get(..LENGTH_PREFIX_SIZE)?;
    let length = u32::from_le_bytes(prefix.try_into().ok()?);
    usize::try_from(length).ok()
}

impl DataType {
    /// Create an integer type.
    #[must_use]
    pub const fn integer(base: NumericType) -> Self {
        Self::Integer { base }
    }

    /// Create a floating point type.
    #[must_use]
    pub const fn float(base: NumericType) -> Self {
        Self::Float { base }
    }

    /// Create a fixed-length string type.
    #[must_use]
    pub const fn fixed_string(length: usize) -> Self {
        Self::String {
            length: StringLength::Fixed(length),
        }
    }

    /// Create a variable-length string type.
    #[must_use]
    pub const fn variable_string() -> Self {
        Self::String {
            length: StringLength::Variable,
        }
    }

    /// Create a compound type.
    #[must_use]
    pub fn compound(fields: Vec<CompoundField>) -> Self {
        Self::Compound { fields }
    }

    /// The size of an element in bytes, or [`None`] if the type contains variable-length members.
    #[must_use]
    pub fn size(&self) -> Option<usize> {
        match self {
            Self::Integer { base } | Self::Float { base } => Some(base.size()),
            Self::String {
                length: StringLength::Fixed(length),
            } => Some(*length),
            Self::String {
                length: StringLength::Variable,
            }
            | Self::VariableLength { .. } => None,
            Self::Compound { fields } => fields
                .iter()
                .map(|field| field.data_type.size())
                .sum::<Option<usize>>(),
        }
    }

    /// Returns true if the type contains variable-length members.
    #[must_use]
    pub fn is_variable(&self) -> bool {
        self.size().is_none()
    }

    /// The fields of a compound type.
    #[must_use]
    pub fn fields(&self) -> Option<&[CompoundField]> {
        match self {
            Self::Compound { fields } => Some(fields),
            _ => None,
        }
    }

    /// Returns true if the type is a compound type.
    #[must_use]
    pub fn is_compound(&self) -> bool {
        matches!(self, Self::Compound { .. })
    }

    /// An estimate of the in-memory size of an element, counting 16 bytes for each variable-length member.
    #[must_use]
    pub fn nominal_size(&self) -> usize {
        match self {
            Self::String {
                length: StringLength::Variable,
            }
            | Self::VariableLength { .. } => 16,
            Self::Compound { fields } => fields
                .iter()
                .map(|field| field.data_type.nominal_size())
                .sum(),
            Self::Integer { .. } | Self::Float { .. } | Self::String { .. } => {
                self.size().unwrap_or_default()
            }
        }
    }

    fn truncated(&self) -> DataTypeError {
        DataTypeError::Truncated(self.to_string())
    }

    /// The length of the element encoding at the start of `bytes`.
    ///
    /// # Errors
    /// Returns [`DataTypeError::Truncated`] if `bytes` ends before the element.
    pub fn encoded_len(&self, bytes: &[u8]) -> Result<usize, DataTypeError> {
        let require = |len: usize| {
            if bytes.len() >= len {
                Ok(len)
            } else {
                Err(self.truncated())
            }
        };
        match self {
            Self::Integer { .. }
            | Self::Float { .. }
            | Self::String {
                length: StringLength::Fixed(_),
            } => require(self.size().unwrap_or_default()),
            Self::String {
                length: StringLength::Variable,
            }
            | Self::VariableLength { .. } => {
                let length = read_length_prefix(bytes).ok_or_else(|| self.truncated())?;
                require(LENGTH_PREFIX_SIZE + length)
            }
            Self::Compound { fields } => {
                let mut offset = 0;
                for field in fields {
                    offset += field.data_type.encoded_len(&bytes[offset..])?;
                }
                Ok(offset)
            }
        }
    }

    /// The byte ranges of each field within a compound `element`.
    ///
    /// # Errors
    /// Returns [`DataTypeError::NotCompound`] if the type is not a compound type or [`DataTypeError::Truncated`] if `element` is truncated.
    pub fn field_spans(&self, element: &[u8]) -> Result<Vec<Range<usize>>, DataTypeError> {
        let fields = self
            .fields()
            .ok_or_else(|| DataTypeError::NotCompound(self.to_string()))?;
        let mut offset = 0;
        fields
            .iter()
            .map(|field| {
                let len = field.data_type.encoded_len(&element[offset..])?;
                let span = offset..offset + len;
                offset += len;
                Ok(span)
            })
            .collect()
    }

    /// The encoding of the default element: zero numbers, empty strings and sequences.
    #[must_use]
    pub fn zero_element(&self) -> Vec<u8> {
        match self {
            Self::Integer { .. }
            | Self::Float { .. }
            | Self::String {
                length: StringLength::Fixed(_),
            } => vec![0; self.size().unwrap_or_default()],
            Self::String {
                length: StringLength::Variable,
            }
            | Self::VariableLength { .. } => vec![0; LENGTH_PREFIX_SIZE],
            Self::Compound { fields } => fields
                .iter()
                .flat_map(|field| field.data_type.zero_element())
                .collect(),
        }
    }

    /// Resolve the positions of the compound fields named `names`.
    ///
    /// # Errors
    /// Returns [`DataTypeError::NotCompound`] or [`DataTypeError::UnknownField`].
    pub fn field_indices(&self, names: &[String]) -> Result<Vec<usize>, DataTypeError> {
        let fields = self
            .fields()
            .ok_or_else(|| DataTypeError::NotCompound(self.to_string()))?;
        names
            .iter()
            .map(|name| {
                fields
                    .iter()
                    .position(|field| &field.name == name)
                    .ok_or_else(|| DataTypeError::UnknownField(name.clone()))
            })
            .collect()
    }

    /// The compound type made of the fields named `names`, in that order.
    ///
    /// # Errors
    /// Returns [`DataTypeError::NotCompound`] or [`DataTypeError::UnknownField`].
    pub fn sub_type(&self, names: &[String]) -> Result<DataType, DataTypeError> {
        let indices = self.field_indices(names)?;
        let fields = self.fields().unwrap_or_default();
        Ok(Self::compound(
            indices.into_iter().map(|i| fields[i].clone()).collect(),
        ))
    }

    /// Project a compound `element` onto the fields at `indices` (see [`field_indices`](Self::field_indices)).
    ///
    /// # Errors
    /// Returns a [`DataTypeError`] if `element` is not a valid encoding.
    pub fn project(&self, element: &[u8], indices: &[usize]) -> Result<Vec<u8>, DataTypeError> {
        let spans = self.field_spans(element)?;
        Ok(indices
            .iter()
            .flat_map(|&i| element[spans[i].clone()].iter().copied())
            .collect())
    }

    /// Replace the fields at `indices` of a compound `element` with the fields of `projected`,
    /// an element of the [`sub_type`](Self::sub_type) selecting those fields.
    ///
    /// This is the inverse of [`project`](Self::project).
    ///
    /// # Errors
    /// Returns a [`DataTypeError`] if `element` or `projected` is not a valid encoding.
    pub fn merge_projected(
        &self,
        element: &[u8],
        indices: &[usize],
        sub_type: &DataType,
        projected: &[u8],
    ) -> Result<Vec<u8>, DataTypeError> {
        let spans = self.field_spans(element)?;
        let projected_spans = sub_type.field_spans(projected)?;
        let mut merged = Vec::with_capacity(element.len());
        for (i, span) in spans.into_iter().enumerate() {
            match indices
                .iter()
                .rposition(|&index| index == i)
                .and_then(|position| projected_spans.get(position))
            {
                Some(projected_span) => merged.extend_from_slice(&projected[projected_span.clone()]),
                None => merged.extend_from_slice(&element[span]),
            }
        }
        Ok(merged)
    }

    /// Replace the fields of a compound `element` named in `update` with the encoding of their new values.
    ///
    /// # Errors
    /// Returns [`DataTypeError::UnknownField`] if `update` names a field that does not exist, or another [`DataTypeError`] if a value is invalid.
    pub fn update_fields(
        &self,
        element: &[u8],
        update: &Map<String, Value>,
    ) -> Result<Vec<u8>, DataTypeError> {
        let fields = self
            .fields()
            .ok_or_else(|| DataTypeError::NotCompound(self.to_string()))?;
        if let Some(unknown) = update
            .keys()
            .find(|name| !fields.iter().any(|field| &field.name == *name))
        {
            return Err(DataTypeError::UnknownField(unknown.clone()));
        }
        let spans = self.field_spans(element)?;
        let mut updated = Vec::with_capacity(element.len());
        for (field, span) in std::iter::zip(fields, spans) {
            match update.get(&field.name) {
                Some(value) => updated.extend(field.data_type.encode_value(value)?),
                None => updated.extend_from_slice(&element[span]),
            }
        }
        Ok(updated)
    }

    /// Convert an element encoding to JSON.
    ///
    /// Compound elements convert to an array of field values.
    ///
    /// # Errors
    /// Returns a [`DataTypeError`] if `element` is not a valid encoding.
    pub fn decode_value(&self, element: &[u8]) -> Result<Value, DataTypeError> {
        match self {
            Self::Integer { base } | Self::Float { base } => base.decode_value(element),
            Self::String {
                length: StringLength::Fixed(_),
            } => {
                let end = element
                    .iter()
                    .rposition(|&byte| byte != 0)
                    .map_or(0, |i| i + 1);
                Ok(Value::from(String::from_utf8_lossy(&element[..end])))
            }
            Self::String {
                length: StringLength::Variable,
            } => {
                let payload = element
                    .get(LENGTH_PREFIX_SIZE..)
                    .ok_or_else(|| self.truncated())?;
                Ok(Value::from(String::from_utf8_lossy(payload)))
            }
            Self::VariableLength { base } => {
                let mut payload = element
                    .get(LENGTH_PREFIX_SIZE..)
                    .ok_or_else(|| self.truncated())?;
                let mut values = Vec::new();
                while !payload.is_empty() {
                    let len = base.encoded_len(payload)?;
                    values.push(base.decode_value(&payload[..len])?);
                    payload = &payload[len..];
                }
                Ok(Value::Array(values))
            }
            Self::Compound { fields } => {
                let spans = self.field_spans(element)?;
                std::iter::zip(fields, spans)
                    .map(|(field, span)| field.data_type.decode_value(&element[span]))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array)
            }
        }
    }

    /// Convert a compound element encoding to a record of field name to value.
    ///
    /// # Errors
    /// Returns a [`DataTypeError`] if the type is not compound or `element` is not a valid encoding.
    pub fn decode_record(&self, element: &[u8]) -> Result<Map<String, Value>, DataTypeError> {
        let fields = self
            .fields()
            .ok_or_else(|| DataTypeError::NotCompound(self.to_string()))?;
        let spans = self.field_spans(element)?;
        std::iter::zip(fields, spans)
            .map(|(field, span)| Ok((field.name.clone(), field.data_type.decode_value(&element[span])?)))
            .collect()
    }

    /// Convert a JSON value to an element encoding.
    ///
    /// Compound values are either an array of field values in field order or an object keyed by field name.
    ///
    /// # Errors
    /// Returns [`DataTypeError::InvalidValue`] if `value` cannot be represented by the type.
    pub fn encode_value(&self, value: &Value) -> Result<Vec<u8>, DataTypeError> {
        let invalid = |reason: &str| DataTypeError::InvalidValue {
            value: value.to_string(),
            data_type: self.to_string(),
            reason: reason.to_string(),
        };
        match self {
            Self::Integer { base } | Self::Float { base } => base.encode_value(value),
            Self::String { length } => {
                let string = value.as_str().ok_or_else(|| invalid("expected a string"))?;
                match length {
                    StringLength::Fixed(length) => {
                        if string.len() > *length {
                            return Err(invalid("the string is longer than the fixed length"));
                        }
                        let mut element = string.as_bytes().to_vec();
                        element.resize(*length, 0);
                        Ok(element)
                    }
                    StringLength::Variable => with_length_prefix(string.as_bytes().to_vec())
                        .ok_or_else(|| invalid("the string is too long")),
                }
            }
            Self::VariableLength { base } => {
                let values = value.as_array().ok_or_else(|| invalid("expected an array"))?;
                let mut payload = Vec::new();
                for value in values {
                    payload.extend(base.encode_value(value)?);
                }
                with_length_prefix(payload).ok_or_else(|| invalid("the sequence is too long"))
            }
            Self::Compound { fields } => match value {
                Value::Array(values) if values.len() == fields.len() => {
                    let mut element = Vec::new();
                    for (field, value) in std::iter::zip(fields, values) {
                        element.extend(field.data_type.encode_value(value)?);
                    }
                    Ok(element)
                }
                Value::Object(record) => {
                    let mut element = Vec::new();
                    for field in fields {
                        let value = record
                            .get(&field.name)
                            .ok_or_else(|| invalid(&format!("missing field {:?}", field.name)))?;
                        element.extend(field.data_type.encode_value(value)?);
                    }
                    Ok(element)
                }
                _ => Err(invalid("expected an array or object with one value per field")),
            },
        }
    }
}

fn with_length_prefix(payload: Vec<u8>) -> Option<Vec<u8>> {
    let length = u32::try_from(payload.len()).ok()?;
    let mut element = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    element.extend_from_slice(&length.to_le_bytes());
    element.extend(payload);
    Some(element)
}

impl Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer { base } | Self::Float { base } => write!(f, "{}", base.name()),
            Self::String {
                length: StringLength::Fixed(length),
            } => write!(f, "H5T_STRING({length})"),
            Self::String {
                length: StringLength::Variable,
            } => write!(f, "H5T_STRING(H5T_VARIABLE)"),
            Self::VariableLength { base } => write!(f, "H5T_VLEN({base})"),
            Self::Compound { fields } => write!(
                f,
                "H5T_COMPOUND{{{}}}",
                itertools::join(
                    fields
                        .iter()
                        .map(|field| format!("{}: {}", field.name, field.data_type)),
                    ", "
                )
            ),
        }
    }
}
