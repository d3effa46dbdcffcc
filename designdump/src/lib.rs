pub mod class_map;
pub mod decoder;
pub mod design_index;
pub mod error;
pub mod extractor;
pub mod hash;
pub mod reader;
pub mod textmap;

pub use class_map::{ClassMap, EnumDecl, EnumKind, FieldDecl};
pub use decoder::Decoder;
pub use design_index::{ChunkEntry, DesignIndex, FileEntry};
pub use error::DecodeError;
pub use extractor::Extractor;
pub use hash::stable_hash;
pub use reader::BinaryReader;
pub use textmap::{Language, Textmap};
