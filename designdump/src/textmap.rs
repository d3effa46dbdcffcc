use std::path::Path;

use serde_json::{Map, Value};

use crate::design_index::DesignIndex;
use crate::error::DecodeError;
use crate::extractor::write_json;
use crate::reader::BinaryReader;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Language {
    ChineseSimplified,
    ChineseTraditional,
    German,
    English,
    Spanish,
    French,
    Indonesian,
    Japanese,
    Korean,
    Portuguese,
    Russian,
    Thai,
    Vietnamese,
}

impl Language {
    pub const ALL: [Language; 13] = [
        Language::ChineseSimplified,
        Language::ChineseTraditional,
        Language::German,
        Language::English,
        Language::Spanish,
        Language::French,
        Language::Indonesian,
        Language::Japanese,
        Language::Korean,
        Language::Portuguese,
        Language::Russian,
        Language::Thai,
        Language::Vietnamese,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Language::ChineseSimplified => "cn",
            Language::ChineseTraditional => "cht",
            Language::German => "de",
            Language::English => "en",
            Language::Spanish => "es",
            Language::French => "fr",
            Language::Indonesian => "id",
            Language::Japanese => "jp",
            Language::Korean => "kr",
            Language::Portuguese => "pt",
            Language::Russian => "ru",
            Language::Thai => "th",
            Language::Vietnamese => "vi",
        }
    }
}

/// Hash-keyed text table for one language.
#[derive(Default)]
pub struct Textmap {
    entries: Map<String, Value>,
}

impl Textmap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the table with the given language's entries. A missing
    /// table is not an error; the bundle may ship a language subset.
    pub fn load_language(
        &mut self,
        design: &DesignIndex,
        language: Language,
    ) -> Result<(), DecodeError> {
        self.entries.clear();
        let name = format!("BakedConfig/ExcelOutput/Textmap_{}.bytes", language.code());
        let mut reader = match design.reader_by_name(&name)? {
            Some(reader) => reader,
            None => {
                log::warn!("Textmap_{}.bytes not found.", language.code());
                return Ok(());
            }
        };
        let count = reader.read_array_len()?;
        log::info!("Loading textmap for {:?}. Entry count: {}", language, count);
        self.entries = Self::read_entries(&mut reader, count)?;
        log::info!("Successfully loaded textmap for {:?}.", language);
        Ok(())
    }

    fn read_entries(
        reader: &mut BinaryReader,
        count: usize,
    ) -> Result<Map<String, Value>, DecodeError> {
        let mut entries = Map::new();
        for _ in 0..count {
            let mask = reader.read_uleb128()?;
            let hash = reader.read_hash()?;
            let text = reader.read_string()?;
            if mask & 0b100 != 0 {
                // trailing parameter marker, not part of the text
                reader.read_bool()?;
            }
            entries.insert(hash.to_string(), Value::String(text));
        }
        Ok(entries)
    }

    pub fn text(&self, hash: i32) -> Option<&str> {
        self.entries.get(&hash.to_string()).and_then(Value::as_str)
    }

    pub fn dump(&self, path: &Path) -> Result<(), DecodeError> {
        write_json(path, &Value::Object(self.entries.clone()))
    }
}
