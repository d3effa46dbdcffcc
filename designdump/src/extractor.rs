use std::collections::HashMap;
use std::path::Path;

use serde_json::{Map, Value};

use crate::class_map::ClassMap;
use crate::decoder::{json_key, Decoder};
use crate::design_index::DesignIndex;
use crate::error::DecodeError;
use crate::reader::BinaryReader;

const MANIFEST_NAME: &str = "BakedConfig/ConfigManifest.json";
const STORY_TABLE_PATH: &str = "BakedConfig/ExcelOutput/PerformanceC.bytes";

/// Manifest names whose record class does not follow from the item
/// path. Preserved verbatim from the asset pipeline.
fn config_map(config_name: &str) -> Option<&'static str> {
    Some(match config_name {
        "AdventureAbilityConfigList" => "AdventureAbilityConfigList",
        "TurnBasedAbilityConfigList" => "TurnBasedAbilityConfigList",
        "ChessAbilityConfigList" => "ChessAbilityConfigList",
        "BattleLineupConfigList" => "BattleLineupConfig",
        "BattleLineupAvatarConfigList" => "BattleLineupAvatarConfig",
        "BattleLineupMazeBuffConfigList" => "LineupMazeBuffConfig",
        "BattleLineupSkillTreePresetConfigList" => "SkillTreePointPresetConfig",
        "BattleLineupCEPresetConfigList" => "CEBattlePresetConfig",
        "LevelConfigList" => "LevelGraphConfig",
        "GlobalModifierConfigList" => "GlobalModifierConfig",
        "AdventureModifierConfigList" => "AdventureModifierConfig",
        "ComplexSkillAIGlobalGroupConfigList" => "ComplexSkillAIGlobalGroupLookup",
        "GlobalTaskTemplateList" => "GlobalTaskListTemplateConfig",
        _ => return None,
    })
}

/// Batch driver: walks the manifest and the excel-row catalog, routes
/// each logical record through the decoder and writes JSON trees under
/// an output root. Failed items are collected, never fatal.
pub struct Extractor<'a> {
    design: &'a DesignIndex,
    classes: &'a ClassMap,
    decoder: Decoder<'a>,
    manifest: Map<String, Value>,
}

impl<'a> Extractor<'a> {
    pub fn new(design: &'a DesignIndex, classes: &'a ClassMap, beta: bool) -> Self {
        let manifest = match Self::load_manifest(design) {
            Ok(manifest) => manifest,
            Err(e) => {
                log::warn!("Config manifest unavailable ({}); continuing without it", e);
                Map::new()
            }
        };
        Self {
            design,
            classes,
            decoder: Decoder::new(classes, beta),
            manifest,
        }
    }

    fn load_manifest(design: &DesignIndex) -> Result<Map<String, Value>, DecodeError> {
        let mut reader = design
            .reader_by_name(MANIFEST_NAME)?
            .ok_or_else(|| DecodeError::MissingEntry(MANIFEST_NAME.to_string()))?;
        serde_json::from_slice(reader.read_all()).map_err(|e| DecodeError::Json(e.to_string()))
    }

    pub fn manifest(&self) -> &Map<String, Value> {
        &self.manifest
    }

    /// Decodes one logical config. The manifest stores item paths with
    /// their source extension; the container keys the baked twin.
    pub fn load_binary_config(
        &self,
        s_config: &str,
        class_name: &str,
    ) -> Result<Value, DecodeError> {
        let stem = match s_config.rfind('.') {
            Some(idx) => &s_config[..idx],
            None => s_config,
        };
        let name = format!("BakedConfig/{}.bytes", stem);
        let mut reader = self
            .design
            .reader_by_name(&name)?
            .ok_or_else(|| DecodeError::MissingEntry(name.clone()))?;
        self.decoder.load_class(&mut reader, class_name, true, true)
    }

    pub fn load_all_configs(&self, output_dir: &Path) -> HashMap<String, Vec<String>> {
        let mut errors = HashMap::new();
        for config_name in self.manifest.keys() {
            let failed = self.load_config(config_name, output_dir);
            if !failed.is_empty() {
                errors.insert(config_name.clone(), failed);
            }
        }
        errors
    }

    pub fn load_config(&self, config_name: &str, output_dir: &Path) -> Vec<String> {
        let mut failed = Vec::new();
        let items = match self.manifest.get(config_name).and_then(Value::as_array) {
            Some(items) => items,
            None => return failed,
        };
        for item in items {
            let item = match item.as_str() {
                Some(item) => item,
                None => continue,
            };
            log::info!("Parsing {}", item);
            if let Err(e) = self.extract_config_item(config_name, item, output_dir) {
                log::warn!("Failed to parse {}. Error: {}", item, e);
                failed.push(item.to_string());
            }
        }
        log::info!(
            "Parsing complete. Extracted {} of {} files.",
            items.len() - failed.len(),
            items.len()
        );
        failed
    }

    fn extract_config_item(
        &self,
        config_name: &str,
        item: &str,
        output_dir: &Path,
    ) -> Result<(), DecodeError> {
        let class_name = self.route_config_class(config_name, item);
        let data = self.load_binary_config(item, &class_name)?;
        write_json(&output_dir.join(item), &data)
    }

    /// A few manifest families carry record types that only the item
    /// path reveals; everything else goes through the alias table.
    fn route_config_class(&self, config_name: &str, item: &str) -> String {
        let basename = item.rsplit('/').next().unwrap_or(item);
        if basename.starts_with("MissionInfo") {
            return "MainMissionInfoConfig".to_string();
        }
        if basename.starts_with("MunicipalChatConfig") {
            return "ConfigMunicipalNPCChatGroup".to_string();
        }
        if item.contains("/NPCOverrideConfig/") {
            return "LevelNPCInfoOverride".to_string();
        }
        match config_map(config_name) {
            Some(class_name) => class_name.to_string(),
            None => {
                log::warn!(
                    "Can't find class name for config {}. Roll back to item name.",
                    config_name
                );
                config_name.to_string()
            }
        }
    }

    fn excel_candidates(base_class: &str) -> Vec<String> {
        let mut names = vec![base_class.to_string()];
        match base_class.strip_suffix("Config") {
            Some(stripped) => names.push(stripped.to_string()),
            None => names.push(format!("{}Config", base_class)),
        }
        let mut candidates = Vec::with_capacity(names.len() * 2);
        for name in names {
            candidates.push(format!("BakedConfig/ExcelOutput/{}.bytes", name));
            candidates.push(format!("BakedConfig/ExcelOutputGameCore/{}.bytes", name));
        }
        candidates
    }

    fn excel_reader(&self, base_class: &str) -> Result<Option<BinaryReader>, DecodeError> {
        for name in Self::excel_candidates(base_class) {
            if let Some(reader) = self.design.reader_by_name(&name)? {
                return Ok(Some(reader));
            }
        }
        Ok(None)
    }

    /// Decodes one excel table: an array of `<Name>Row` records keyed
    /// by their first field. Rows are seeded with the running index so
    /// tables whose key column is masked out stay addressable.
    pub fn load_binary_excel(
        &self,
        base_class: &str,
        s_path: Option<&str>,
    ) -> Result<Option<Value>, DecodeError> {
        let reader = match s_path {
            Some(path) => self.design.reader_by_name(path)?,
            None => self.excel_reader(base_class)?,
        };
        let mut reader = match reader {
            Some(reader) => reader,
            None => return Ok(None),
        };
        let row_count = reader.read_array_len()?;
        log::info!("{} excel item count: {}", base_class, row_count);
        let row_class = format!("{}Row", base_class);
        let fields = self
            .classes
            .fields(&row_class)
            .ok_or_else(|| DecodeError::UnknownClass(row_class.clone()))?;
        let key_field = fields
            .first()
            .ok_or_else(|| DecodeError::EmptyClass(row_class.clone()))?
            .name
            .clone();
        let mut result = Map::new();
        for index in 0..row_count {
            let mut row = Map::new();
            row.insert(key_field.clone(), Value::from(index as u64));
            if let Value::Object(decoded) =
                self.decoder.load_class(&mut reader, &row_class, false, false)?
            {
                for (name, value) in decoded {
                    row.insert(name, value);
                }
            }
            let key = json_key(&row[&key_field]);
            result.insert(key, Value::Object(row));
        }
        Ok(Some(Value::Object(result)))
    }

    pub fn load_all_excels(
        &self,
        output_dir: &Path,
        mapping: Option<&Map<String, Value>>,
    ) -> Vec<String> {
        let mut failed = Vec::new();
        match mapping {
            Some(mapping) => {
                for (class_name, s_path) in mapping {
                    let s_path = match s_path.as_str() {
                        Some(s_path) => s_path,
                        None => {
                            failed.push(class_name.clone());
                            continue;
                        }
                    };
                    let basename = s_path.rsplit('/').next().unwrap_or(s_path);
                    let stem = basename.strip_suffix(".bytes").unwrap_or(basename);
                    let target = output_dir.join(format!("{}.json", stem));
                    if let Err(e) = self.extract_excel_table(class_name, Some(s_path), &target) {
                        log::warn!("Failed to extract excel {}. Error: {}", class_name, e);
                        failed.push(class_name.clone());
                    }
                }
            }
            None => {
                for class_name in self.classes.excel_row_classes() {
                    let target = output_dir.join(format!("{}.json", class_name));
                    if let Err(e) = self.extract_excel_table(class_name, None, &target) {
                        log::warn!("Failed to extract excel {}. Error: {}", class_name, e);
                        failed.push(class_name.clone());
                    }
                }
            }
        }
        failed
    }

    fn extract_excel_table(
        &self,
        class_name: &str,
        s_path: Option<&str>,
        target: &Path,
    ) -> Result<(), DecodeError> {
        let data = self
            .load_binary_excel(class_name, s_path)?
            .ok_or_else(|| DecodeError::MissingEntry(class_name.to_string()))?;
        write_json(target, &data)
    }

    /// The story batch follows the `PerformanceC` table: every row
    /// names a graph config to decode and mirror under the output root.
    pub fn load_all_story(&self, output_dir: &Path) -> Result<Vec<String>, DecodeError> {
        let story = self
            .load_binary_excel("PerformanceC", Some(STORY_TABLE_PATH))?
            .ok_or_else(|| DecodeError::MissingEntry(STORY_TABLE_PATH.to_string()))?;
        let mut failed = Vec::new();
        let rows = match story.as_object() {
            Some(rows) => rows,
            None => return Ok(failed),
        };
        for row in rows.values() {
            let path = match row.get("PerformancePath").and_then(Value::as_str) {
                Some(path) => path,
                None => continue,
            };
            if let Err(e) = self.extract_story_item(path, output_dir) {
                log::warn!("Failed to parse story {}. Error: {}", path, e);
                failed.push(path.to_string());
            }
        }
        Ok(failed)
    }

    fn extract_story_item(&self, path: &str, output_dir: &Path) -> Result<(), DecodeError> {
        let stem = path.strip_suffix(".json").unwrap_or(path);
        let data = self.load_binary_config(&format!("{}.bytes", stem), "LevelGraphConfig")?;
        write_json(&output_dir.join(path), &data)
    }
}

/// Writes a decoded tree as pretty JSON, creating parent directories.
pub(crate) fn write_json(path: &Path, data: &Value) -> Result<(), DecodeError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| DecodeError::File(format!("{}: {}", parent.display(), e)))?;
    }
    let text =
        serde_json::to_string_pretty(data).map_err(|e| DecodeError::Json(e.to_string()))?;
    std::fs::write(path, text).map_err(|e| DecodeError::File(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::stable_hash;
    use anyhow::Result;
    use serde_json::json;
    use std::path::PathBuf;

    const DUMP: &str = r#"
// Namespace: RPG.GameCore
public class ItemConfig
{
	public uint ItemId;
	public string ItemName;
}
public class AvatarConfigRow
{
	public uint AvatarID;
	public string Name;
}
public class X
{
	public static void COMPILED(Dictionary<string, int> AAA, string[] BBB, out AvatarConfigRow CCC) { }
}
"#;

    struct Bundle {
        chunks: Vec<(i32, Vec<u8>)>,
    }

    impl Bundle {
        fn new() -> Self {
            Self { chunks: Vec::new() }
        }

        fn add(&mut self, name: &str, data: Vec<u8>) {
            self.chunks.push((stable_hash(name), data));
        }

        fn write(&self, dir: &Path) -> Result<PathBuf> {
            let name16 = [0x11u8; 16];
            let filename: String = name16.iter().map(|b| format!("{:02x}", b)).collect();
            let mut blob = Vec::new();
            let mut index = Vec::new();
            index.extend_from_slice(&1u32.to_be_bytes());
            index.extend_from_slice(&0x77i32.to_be_bytes());
            index.extend_from_slice(&name16);
            let total: u64 = self.chunks.iter().map(|(_, d)| d.len() as u64).sum();
            index.extend_from_slice(&total.to_be_bytes());
            index.extend_from_slice(&(self.chunks.len() as u32).to_be_bytes());
            for (hash, data) in &self.chunks {
                index.extend_from_slice(&hash.to_be_bytes());
                index.extend_from_slice(&(data.len() as u64).to_be_bytes());
                index.extend_from_slice(&(blob.len() as u64).to_be_bytes());
                blob.extend_from_slice(data);
            }
            index.push(0);
            std::fs::write(dir.join(format!("{}.bytes", filename)), &blob)?;
            let index_path = dir.join("DesignV_7f.bytes");
            std::fs::write(&index_path, &index)?;
            Ok(index_path)
        }
    }

    fn encode_str(s: &str) -> Vec<u8> {
        let mut out = vec![s.len() as u8];
        out.extend_from_slice(s.as_bytes());
        out
    }

    #[test]
    fn test_config_batch_end_to_end() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut bundle = Bundle::new();
        let manifest = br#"{"ItemConfig": ["Config/Item/Sword.json", "Config/Item/Missing.json"]}"#;
        bundle.add("BakedConfig/ConfigManifest.json", manifest.to_vec());
        // ItemConfig record: ItemId = 9, ItemName = "Sword"
        let mut record = vec![0x03, 0x09];
        record.extend_from_slice(&encode_str("Sword"));
        bundle.add("BakedConfig/Config/Item/Sword.bytes", record);
        bundle.write(dir.path())?;

        let classes = ClassMap::parse(DUMP);
        let design = DesignIndex::load(dir.path())?;
        let extractor = Extractor::new(&design, &classes, true);

        let output = dir.path().join("out");
        let errors = extractor.load_all_configs(&output);
        assert_eq!(errors["ItemConfig"], vec!["Config/Item/Missing.json"]);

        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(output.join("Config/Item/Sword.json"))?)?;
        assert_eq!(written, json!({ "ItemId": 9, "ItemName": "Sword" }));
        Ok(())
    }

    #[test]
    fn test_excel_batch_keys_rows_by_first_field() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut bundle = Bundle::new();
        bundle.add("BakedConfig/ConfigManifest.json", b"{}".to_vec());
        // two rows; the second leaves AvatarID masked out
        let mut table = vec![0x04];
        table.extend_from_slice(&[0x03, 0x2a]);
        table.extend_from_slice(&encode_str("Stelle"));
        table.extend_from_slice(&[0x02]);
        table.extend_from_slice(&encode_str("Caelus"));
        bundle.add("BakedConfig/ExcelOutput/AvatarConfig.bytes", table);
        bundle.write(dir.path())?;

        let classes = ClassMap::parse(DUMP);
        let design = DesignIndex::load(dir.path())?;
        let extractor = Extractor::new(&design, &classes, true);

        // no candidate path resolves for this class
        let data = extractor.load_binary_excel("Weapon", None)?;
        assert!(data.is_none());

        let data = extractor.load_binary_excel("AvatarConfig", None)?.unwrap();
        assert_eq!(
            data,
            json!({
                "42": { "AvatarID": 42, "Name": "Stelle" },
                "1": { "AvatarID": 1, "Name": "Caelus" },
            })
        );
        Ok(())
    }

    #[test]
    fn test_missing_row_class_is_schema_error() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut bundle = Bundle::new();
        bundle.add("BakedConfig/ConfigManifest.json", b"{}".to_vec());
        bundle.add("BakedConfig/ExcelOutput/ItemConfig.bytes", vec![0x02, 0x00]);
        bundle.write(dir.path())?;

        let classes = ClassMap::parse(DUMP);
        let design = DesignIndex::load(dir.path())?;
        let extractor = Extractor::new(&design, &classes, true);
        let err = extractor.load_binary_excel("ItemConfig", None).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownClass(_)));
        Ok(())
    }

    #[test]
    fn test_route_config_class() {
        let dir = tempfile::tempdir().unwrap();
        let mut bundle = Bundle::new();
        bundle.add("BakedConfig/ConfigManifest.json", b"{}".to_vec());
        bundle.write(dir.path()).unwrap();
        let classes = ClassMap::parse(DUMP);
        let design = DesignIndex::load(dir.path()).unwrap();
        let extractor = Extractor::new(&design, &classes, true);

        assert_eq!(
            extractor.route_config_class("AnyList", "Level/Mission/MissionInfo_1001.json"),
            "MainMissionInfoConfig"
        );
        assert_eq!(
            extractor.route_config_class("AnyList", "Chat/MunicipalChatConfig_7.json"),
            "ConfigMunicipalNPCChatGroup"
        );
        assert_eq!(
            extractor.route_config_class("AnyList", "Level/NPCOverrideConfig/O1.json"),
            "LevelNPCInfoOverride"
        );
        assert_eq!(
            extractor.route_config_class("LevelConfigList", "Level/L1.json"),
            "LevelGraphConfig"
        );
        assert_eq!(
            extractor.route_config_class("ItemConfig", "Config/Item/Sword.json"),
            "ItemConfig"
        );
    }

    #[test]
    fn test_excel_candidates_cascade() {
        assert_eq!(
            Extractor::excel_candidates("AvatarConfig"),
            [
                "BakedConfig/ExcelOutput/AvatarConfig.bytes",
                "BakedConfig/ExcelOutputGameCore/AvatarConfig.bytes",
                "BakedConfig/ExcelOutput/Avatar.bytes",
                "BakedConfig/ExcelOutputGameCore/Avatar.bytes",
            ]
        );
        assert_eq!(
            Extractor::excel_candidates("Textmap"),
            [
                "BakedConfig/ExcelOutput/Textmap.bytes",
                "BakedConfig/ExcelOutputGameCore/Textmap.bytes",
                "BakedConfig/ExcelOutput/TextmapConfig.bytes",
                "BakedConfig/ExcelOutputGameCore/TextmapConfig.bytes",
            ]
        );
    }
}
