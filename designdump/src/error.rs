use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Failed to open file: {0}")]
    File(String),

    #[error("Buffer not enough: {0}")]
    BufferNotEnough(String),

    #[error("Invalid UTF-8 string: {0}")]
    Utf8(String),

    #[error("LEB128 value longer than 10 bytes")]
    Leb128Overflow,

    #[error("Design index file not found: {0}")]
    IndexNotFound(String),

    #[error("No container entry for {0}")]
    MissingEntry(String),

    #[error("Invalid lookup: {0}")]
    Lookup(String),

    #[error("Unknown class {0}")]
    UnknownClass(String),

    #[error("Class {0} has no fields")]
    EmptyClass(String),

    #[error("Unknown subclass index {1} for class {0}")]
    UnknownSubclass(String, u64),

    #[error("Unknown value {1} for enum {0}")]
    UnknownEnumValue(String, i64),

    #[error("Unsupported generic field {0}")]
    UnsupportedGeneric(String),

    #[error("Unknown field type {0}")]
    UnknownFieldType(String),

    #[error("Unknown opcode {0}")]
    UnknownOpcode(u8),

    #[error("Inconsistent expression operands: {0}")]
    Expression(String),

    #[error("Unknown dynamic value tag {0}")]
    UnknownValueTag(i64),

    #[error("Malformed JSON: {0}")]
    Json(String),
}
