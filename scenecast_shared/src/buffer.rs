//! Typed numeric buffers.
//!
//! Producers hand over rank-1 or rank-2 arrays; the encoder turns them into
//! a buffer attribute whose raw bytes travel as a MessagePack extension value.
//! The extension code and the `type` name must agree, since the receiver
//! rebuilds its typed array from the code alone:
//!
//! | element type | `type`         | ext code |
//! |--------------|----------------|----------|
//! | `u8`         | `Uint8Array`   | `0x12`   |
//! | `i32`        | `Int32Array`   | `0x15`   |
//! | `u32`        | `Uint32Array`  | `0x16`   |
//! | `f32`        | `Float32Array` | `0x17`   |
//!
//! `f64` input is narrowed to `f32` before encoding. This is lossy.
//!
//! A rank-2 array of shape `(k, n)` encodes with `itemSize = k` and is laid
//! out item by item: column `j` of the array becomes the `j`-th item.

use std::fmt;

use bytes::{Buf, BufMut, BytesMut};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_bytes::ByteBuf;
use tracing::debug;

/// Element type of a numeric array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElementType::U8 => "uint8",
            ElementType::I8 => "int8",
            ElementType::U16 => "uint16",
            ElementType::I16 => "int16",
            ElementType::U32 => "uint32",
            ElementType::I32 => "int32",
            ElementType::U64 => "uint64",
            ElementType::I64 => "int64",
            ElementType::F32 => "float32",
            ElementType::F64 => "float64",
        };
        f.write_str(name)
    }
}

/// Flat element storage of a [`NumericArray`], row-major.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    U8(Vec<u8>),
    I8(Vec<i8>),
    U16(Vec<u16>),
    I16(Vec<i16>),
    U32(Vec<u32>),
    I32(Vec<i32>),
    U64(Vec<u64>),
    I64(Vec<i64>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

macro_rules! array_data_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<Vec<$ty>> for ArrayData {
                fn from(v: Vec<$ty>) -> Self {
                    ArrayData::$variant(v)
                }
            }
        )*

        impl ArrayData {
            pub fn len(&self) -> usize {
                match self {
                    $(ArrayData::$variant(v) => v.len(),)*
                }
            }

            pub fn element_type(&self) -> ElementType {
                match self {
                    $(ArrayData::$variant(_) => ElementType::$variant,)*
                }
            }
        }
    };
}

array_data_from! {
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    u64 => U64,
    i64 => I64,
    f32 => F32,
    f64 => F64,
}

impl ArrayData {
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An n-dimensional array with row-major storage.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericArray {
    data: ArrayData,
    shape: Vec<usize>,
}

impl NumericArray {
    /// Wraps `data` with an explicit shape. The shape's product must equal
    /// the element count.
    pub fn new(data: impl Into<ArrayData>, shape: Vec<usize>) -> Result<Self, EncodeError> {
        let data = data.into();
        let expected = shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d));
        if expected != Some(data.len()) {
            return Err(EncodeError::ShapeMismatch {
                shape,
                len: data.len(),
            });
        }
        Ok(Self { data, shape })
    }

    /// Rank-1 array.
    pub fn vector(data: impl Into<ArrayData>) -> Self {
        let data = data.into();
        let shape = vec![data.len()];
        Self { data, shape }
    }

    /// Rank-2 array of `rows` x `cols`, e.g. 3 x N for xyz points.
    pub fn matrix(
        data: impl Into<ArrayData>,
        rows: usize,
        cols: usize,
    ) -> Result<Self, EncodeError> {
        Self::new(data, vec![rows, cols])
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn element_type(&self) -> ElementType {
        self.data.element_type()
    }

    pub fn data(&self) -> &ArrayData {
        &self.data
    }
}

/// Typed-array kind understood by the receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypedArrayKind {
    Uint8,
    Int32,
    Uint32,
    Float32,
}

impl TypedArrayKind {
    pub const ALL: [TypedArrayKind; 4] = [
        TypedArrayKind::Uint8,
        TypedArrayKind::Int32,
        TypedArrayKind::Uint32,
        TypedArrayKind::Float32,
    ];

    /// MessagePack extension code carrying this kind's bytes.
    pub const fn ext_code(self) -> i8 {
        match self {
            TypedArrayKind::Uint8 => 0x12,
            TypedArrayKind::Int32 => 0x15,
            TypedArrayKind::Uint32 => 0x16,
            TypedArrayKind::Float32 => 0x17,
        }
    }

    pub const fn type_name(self) -> &'static str {
        match self {
            TypedArrayKind::Uint8 => "Uint8Array",
            TypedArrayKind::Int32 => "Int32Array",
            TypedArrayKind::Uint32 => "Uint32Array",
            TypedArrayKind::Float32 => "Float32Array",
        }
    }

    /// Bytes per element.
    pub const fn width(self) -> usize {
        match self {
            TypedArrayKind::Uint8 => 1,
            _ => 4,
        }
    }

    pub fn from_type_name(name: &str) -> Result<Self, DecodeError> {
        Self::ALL
            .into_iter()
            .find(|k| k.type_name() == name)
            .ok_or_else(|| DecodeError::UnknownTypeName(name.to_string()))
    }

    pub fn from_ext_code(code: i8) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.ext_code() == code)
    }
}

impl Serialize for TypedArrayKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.type_name())
    }
}

impl<'de> Deserialize<'de> for TypedArrayKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        TypedArrayKind::from_type_name(&name).map_err(de::Error::custom)
    }
}

/// MessagePack extension value: `(code, bytes)`.
///
/// `rmp-serde` writes a newtype struct with this exact name as an ext type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename = "_ExtStruct")]
pub struct ExtPayload(pub (i8, ByteBuf));

impl ExtPayload {
    pub fn new(code: i8, bytes: Vec<u8>) -> Self {
        Self((code, ByteBuf::from(bytes)))
    }

    pub fn code(&self) -> i8 {
        self.0 .0
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0 .1
    }
}

/// Encoded buffer attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferAttribute {
    #[serde(rename = "itemSize")]
    pub item_size: u32,
    #[serde(rename = "type")]
    pub kind: TypedArrayKind,
    pub array: ExtPayload,
    pub normalized: bool,
}

/// Why a buffer could not be encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsupportedBuffer {
    Rank(usize),
    ElementType(ElementType),
    /// Rank-2 array with no rows, i.e. an item size of zero.
    EmptyItem,
}

impl fmt::Display for UnsupportedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnsupportedBuffer::Rank(rank) => {
                write!(f, "only rank-1 or rank-2 arrays can be packed, got rank {rank}")
            }
            UnsupportedBuffer::ElementType(ty) => write!(f, "unsupported element type {ty}"),
            UnsupportedBuffer::EmptyItem => write!(f, "rank-2 array has zero rows"),
        }
    }
}

/// Encode-time errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    UnsupportedBufferType(UnsupportedBuffer),
    ShapeMismatch { shape: Vec<usize>, len: usize },
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::UnsupportedBufferType(why) => write!(f, "unsupported buffer type: {why}"),
            EncodeError::ShapeMismatch { shape, len } => {
                write!(f, "shape {shape:?} does not match {len} elements")
            }
        }
    }
}

impl std::error::Error for EncodeError {}

/// Errors rebuilding a typed array from a received attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    ExtCodeMismatch { expected: i8, found: i8 },
    UnknownTypeName(String),
    TruncatedPayload { len: usize, width: usize },
    ItemSizeMismatch { count: usize, item_size: usize },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::ExtCodeMismatch { expected, found } => {
                write!(f, "ext code {found:#x} does not match type (expected {expected:#x})")
            }
            DecodeError::UnknownTypeName(name) => write!(f, "unknown typed array {name:?}"),
            DecodeError::TruncatedPayload { len, width } => {
                write!(f, "{len} bytes is not a multiple of element width {width}")
            }
            DecodeError::ItemSizeMismatch { count, item_size } => {
                write!(f, "{count} elements cannot be split into items of {item_size}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}

#[derive(Clone, Copy)]
enum Layout {
    Flat,
    Columns { rows: usize, cols: usize },
}

fn write_items<T: Copy>(values: &[T], layout: Layout, put: impl Fn(&mut BytesMut, T)) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(values.len() * std::mem::size_of::<T>());
    match layout {
        Layout::Flat => {
            for &v in values {
                put(&mut buf, v);
            }
        }
        Layout::Columns { rows, cols } => {
            for j in 0..cols {
                for i in 0..rows {
                    put(&mut buf, values[i * cols + j]);
                }
            }
        }
    }
    buf.to_vec()
}

/// Packs `array` into a buffer attribute.
pub fn pack_array(array: &NumericArray) -> Result<BufferAttribute, EncodeError> {
    let (item_size, layout) = match array.shape() {
        [_] => (1, Layout::Flat),
        [0, _] => return Err(EncodeError::UnsupportedBufferType(UnsupportedBuffer::EmptyItem)),
        [rows, cols] => (
            *rows,
            Layout::Columns {
                rows: *rows,
                cols: *cols,
            },
        ),
        shape => {
            return Err(EncodeError::UnsupportedBufferType(UnsupportedBuffer::Rank(
                shape.len(),
            )))
        }
    };

    let (kind, bytes) = match array.data() {
        ArrayData::U8(v) => (TypedArrayKind::Uint8, write_items(v, layout, |b, x| b.put_u8(x))),
        ArrayData::I32(v) => (
            TypedArrayKind::Int32,
            write_items(v, layout, |b, x| b.put_i32_le(x)),
        ),
        ArrayData::U32(v) => (
            TypedArrayKind::Uint32,
            write_items(v, layout, |b, x| b.put_u32_le(x)),
        ),
        ArrayData::F32(v) => (
            TypedArrayKind::Float32,
            write_items(v, layout, |b, x| b.put_f32_le(x)),
        ),
        ArrayData::F64(v) => {
            debug!(len = v.len(), "narrowing float64 buffer to float32");
            (
                TypedArrayKind::Float32,
                write_items(v, layout, |b, x| b.put_f32_le(x as f32)),
            )
        }
        other => {
            return Err(EncodeError::UnsupportedBufferType(
                UnsupportedBuffer::ElementType(other.element_type()),
            ))
        }
    };

    Ok(BufferAttribute {
        item_size: item_size as u32,
        kind,
        array: ExtPayload::new(kind.ext_code(), bytes),
        normalized: false,
    })
}

fn read_values<T>(mut raw: &[u8], get: impl Fn(&mut &[u8]) -> T) -> Vec<T> {
    let mut out = Vec::new();
    while raw.has_remaining() {
        out.push(get(&mut raw));
    }
    out
}

fn from_item_major<T: Copy>(values: Vec<T>, item_size: usize) -> Vec<T> {
    if item_size <= 1 {
        return values;
    }
    let cols = values.len() / item_size;
    let mut out = Vec::with_capacity(values.len());
    for i in 0..item_size {
        for j in 0..cols {
            out.push(values[j * item_size + i]);
        }
    }
    out
}

/// Rebuilds the array a receiver would see from `attr`.
///
/// `itemSize == 1` yields a rank-1 array, anything larger a `(itemSize, n)`
/// array in the producer's original orientation.
pub fn unpack_attribute(attr: &BufferAttribute) -> Result<NumericArray, DecodeError> {
    let expected = attr.kind.ext_code();
    if attr.array.code() != expected {
        return Err(DecodeError::ExtCodeMismatch {
            expected,
            found: attr.array.code(),
        });
    }

    let raw = attr.array.bytes();
    let width = attr.kind.width();
    if raw.len() % width != 0 {
        return Err(DecodeError::TruncatedPayload {
            len: raw.len(),
            width,
        });
    }

    let count = raw.len() / width;
    let item_size = attr.item_size as usize;
    if item_size == 0 || count % item_size != 0 {
        return Err(DecodeError::ItemSizeMismatch { count, item_size });
    }

    let data = match attr.kind {
        TypedArrayKind::Uint8 => ArrayData::U8(from_item_major(read_values(raw, |b| b.get_u8()), item_size)),
        TypedArrayKind::Int32 => {
            ArrayData::I32(from_item_major(read_values(raw, |b| b.get_i32_le()), item_size))
        }
        TypedArrayKind::Uint32 => {
            ArrayData::U32(from_item_major(read_values(raw, |b| b.get_u32_le()), item_size))
        }
        TypedArrayKind::Float32 => {
            ArrayData::F32(from_item_major(read_values(raw, |b| b.get_f32_le()), item_size))
        }
    };

    let shape = if item_size == 1 {
        vec![count]
    } else {
        vec![item_size, count / item_size]
    };
    Ok(NumericArray { data, shape })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(array: &NumericArray) -> NumericArray {
        let attr = pack_array(array).unwrap();
        let bytes = rmp_serde::to_vec_named(&attr).unwrap();
        let back: BufferAttribute = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(back, attr);
        unpack_attribute(&back).unwrap()
    }

    #[test]
    fn rank1_roundtrip_every_supported_type() {
        let arrays = [
            NumericArray::vector(vec![0u8, 1, 127, 255]),
            NumericArray::vector(vec![i32::MIN, -1, 0, 7, i32::MAX]),
            NumericArray::vector(vec![0u32, 1, 65_536, u32::MAX]),
            NumericArray::vector(vec![-1.5f32, 0.0, 3.25, f32::MAX]),
        ];
        for array in &arrays {
            assert_eq!(&roundtrip(array), array);
        }
    }

    #[test]
    fn ext_code_matches_type_name() {
        let cases = [
            (NumericArray::vector(vec![1u8]), "Uint8Array", 0x12),
            (NumericArray::vector(vec![1i32]), "Int32Array", 0x15),
            (NumericArray::vector(vec![1u32]), "Uint32Array", 0x16),
            (NumericArray::vector(vec![1f32]), "Float32Array", 0x17),
        ];
        for (array, name, code) in cases {
            let attr = pack_array(&array).unwrap();
            assert_eq!(attr.kind.type_name(), name);
            assert_eq!(attr.array.code(), code);
            assert!(!attr.normalized);
        }
    }

    #[test]
    fn rank2_item_size_is_first_dimension() {
        for k in 1..=4usize {
            let n = 5;
            let data: Vec<f32> = (0..k * n).map(|v| v as f32).collect();
            let array = NumericArray::matrix(data, k, n).unwrap();
            let attr = pack_array(&array).unwrap();
            assert_eq!(attr.item_size, k as u32);
            assert_eq!(attr.array.bytes().len(), k * n * 4);
        }
    }

    #[test]
    fn rank2_is_laid_out_item_by_item() {
        // Rows are x, y, z; columns are points.
        let array = NumericArray::matrix(vec![1u8, 2, 3, 10, 20, 30, 100, 200, 250], 3, 3).unwrap();
        let attr = pack_array(&array).unwrap();
        assert_eq!(attr.array.bytes(), [1, 10, 100, 2, 20, 200, 3, 30, 250]);
        assert_eq!(unpack_attribute(&attr).unwrap(), array);
    }

    #[test]
    fn rank3_is_rejected() {
        let array = NumericArray::new(vec![0f32; 8], vec![2, 2, 2]).unwrap();
        assert_eq!(
            pack_array(&array),
            Err(EncodeError::UnsupportedBufferType(UnsupportedBuffer::Rank(3)))
        );
    }

    #[test]
    fn zero_row_matrix_is_rejected() {
        let array = NumericArray::matrix(Vec::<f32>::new(), 0, 4).unwrap();
        assert_eq!(
            pack_array(&array),
            Err(EncodeError::UnsupportedBufferType(UnsupportedBuffer::EmptyItem))
        );
        // An empty vector still packs, with item size 1.
        let attr = pack_array(&NumericArray::vector(Vec::<f32>::new())).unwrap();
        assert_eq!(attr.item_size, 1);
    }

    #[test]
    fn unsupported_element_type_is_rejected() {
        let array = NumericArray::vector(vec![1i16, 2, 3]);
        assert_eq!(
            pack_array(&array),
            Err(EncodeError::UnsupportedBufferType(
                UnsupportedBuffer::ElementType(ElementType::I16)
            ))
        );
    }

    #[test]
    fn float64_is_narrowed_to_float32() {
        let original = vec![0.1f64, 1.0 / 3.0, 1e10 + 0.5];
        let attr = pack_array(&NumericArray::vector(original.clone())).unwrap();
        assert_eq!(attr.kind, TypedArrayKind::Float32);

        let narrowed: Vec<f32> = original.iter().map(|&v| v as f32).collect();
        let back = unpack_attribute(&attr).unwrap();
        assert_eq!(back.data(), &ArrayData::F32(narrowed));
        match back.data() {
            ArrayData::F32(v) => assert_ne!(v[1] as f64, original[1]),
            other => panic!("unexpected data {other:?}"),
        }
    }

    #[test]
    fn shape_must_match_len() {
        let err = NumericArray::matrix(vec![0f32; 7], 3, 2).unwrap_err();
        assert_eq!(
            err,
            EncodeError::ShapeMismatch {
                shape: vec![3, 2],
                len: 7
            }
        );
    }

    #[test]
    fn overflowing_shape_is_a_mismatch() {
        let err = NumericArray::new(Vec::<u8>::new(), vec![usize::MAX, 2]).unwrap_err();
        assert_eq!(
            err,
            EncodeError::ShapeMismatch {
                shape: vec![usize::MAX, 2],
                len: 0
            }
        );
    }

    #[test]
    fn mismatched_ext_code_is_detected() {
        let mut attr = pack_array(&NumericArray::vector(vec![1f32, 2.0])).unwrap();
        attr.array = ExtPayload::new(TypedArrayKind::Int32.ext_code(), attr.array.bytes().to_vec());
        assert_eq!(
            unpack_attribute(&attr),
            Err(DecodeError::ExtCodeMismatch {
                expected: 0x17,
                found: 0x15
            })
        );
    }

    #[test]
    fn unknown_type_name_fails_to_deserialize() {
        assert!(TypedArrayKind::from_type_name("Float64Array").is_err());
    }
}
