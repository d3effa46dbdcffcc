use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use regex::Regex;

use crate::error::DecodeError;

// Known-bad descendants that must never receive a subclass index slot.
const SUBCLASS_BLACKLIST: &[(&str, &[&str])] =
    &[("TaskConfig", &["LevelShowDialog", "OCDJOKABOEP"])];

// Classes below this marker base serialize with a subclass preamble.
const JSON_CONFIG_ROOT: &str = "JsonConfig";

// The dump duplicates some class names across namespaces; this one wins.
const PRIVILEGED_NAMESPACE: &str = "RPG.GameCore";

/// One field of a record schema, in wire order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDecl {
    pub name: String,
    pub type_name: String,
    pub is_array: bool,
    pub generic_args: Vec<String>,
}

impl FieldDecl {
    pub fn is_generic(&self) -> bool {
        !self.generic_args.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnumKind {
    Signed32,
    Uint16,
    Uint32,
}

#[derive(Clone, Debug)]
pub struct EnumDecl {
    pub name: String,
    pub kind: EnumKind,
    by_name: HashMap<String, i64>,
    by_value: HashMap<i64, String>,
}

impl EnumDecl {
    fn new(name: String) -> Self {
        Self {
            name,
            kind: EnumKind::Signed32,
            by_name: HashMap::new(),
            by_value: HashMap::new(),
        }
    }

    fn add(&mut self, member: String, value: i64) {
        self.by_name.insert(member.clone(), value);
        self.by_value.insert(value, member);
    }

    pub fn name_of(&self, value: i64) -> Option<&str> {
        self.by_value.get(&value).map(String::as_str)
    }

    pub fn value_of(&self, member: &str) -> Option<i64> {
        self.by_name.get(member).copied()
    }
}

struct LinePatterns {
    namespace: Regex,
    class_hint: Regex,
    class_decl: Regex,
    field: Regex,
    generic_field: Regex,
    excel_row: Regex,
    enum_decl: Regex,
    enum_member: Regex,
    enum_value: Regex,
}

impl LinePatterns {
    fn new() -> Self {
        Self {
            namespace: Regex::new(r"^// Namespace: (.*)").unwrap(),
            class_hint: Regex::new(r"public(.*)? class").unwrap(),
            class_decl: Regex::new(
                r"public(?: .*)? class ([a-zA-Z0-9_]+(?:\.[a-zA-Z0-9_]+)?)(?: : ([a-zA-Z0-9_]+))?",
            )
            .unwrap(),
            field: Regex::new(r"public ([a-zA-Z0-9_]+)(\[\])? ([a-zA-Z0-9_]+);").unwrap(),
            generic_field: Regex::new(r"public(?: readonly)? (\w+)<([\w.,\s]+)> (\w+);").unwrap(),
            excel_row: Regex::new(
                r"public static void [A-Z]+\(Dictionary<string, int> [A-Z]+, string\[\] [A-Z]+, out ([a-zA-Z0-9]+)Row [A-Z]+\) \{ \}",
            )
            .unwrap(),
            enum_decl: Regex::new(r"public enum ([a-zA-Z0-9_]+)").unwrap(),
            enum_member: Regex::new(r"public const ([a-zA-Z0-9_]+) ([a-zA-Z0-9_]+) = (-?[0-9]+);")
                .unwrap(),
            enum_value: Regex::new(r"public (\w+) value__;").unwrap(),
        }
    }
}

/// Catalog of record schemas recovered from the runtime metadata dump.
///
/// Built once at startup and read-only afterwards. Classes and enums
/// are keyed by name; inheritance is resolved by repeated lookup.
pub struct ClassMap {
    classes: HashMap<String, Vec<FieldDecl>>,
    enums: HashMap<String, EnumDecl>,
    base_classes: HashMap<String, String>,
    subclasses: HashMap<String, Vec<String>>,
    excel_row_classes: Vec<String>,
    class_index: HashMap<String, HashMap<u64, String>>,
}

impl ClassMap {
    pub fn load(dump_path: &Path, index_path: Option<&Path>) -> Result<Self, DecodeError> {
        let text = std::fs::read_to_string(dump_path)
            .map_err(|e| DecodeError::File(format!("{}: {}", dump_path.display(), e)))?;
        let overrides = match index_path {
            Some(path) => load_index_overrides(path)?,
            None => HashMap::new(),
        };
        Ok(Self::parse_with_index(&text, overrides))
    }

    pub fn parse(text: &str) -> Self {
        Self::parse_with_index(text, HashMap::new())
    }

    fn parse_with_index(text: &str, class_index: HashMap<String, HashMap<u64, String>>) -> Self {
        let patterns = LinePatterns::new();
        let lines: Vec<&str> = text.lines().collect();
        let mut map = Self {
            classes: HashMap::new(),
            enums: HashMap::new(),
            base_classes: HashMap::new(),
            subclasses: HashMap::new(),
            excel_row_classes: Vec::new(),
            class_index,
        };
        let mut namespace = String::new();
        let mut idx = 0;
        while idx < lines.len() {
            let line = lines[idx];
            if let Some(caps) = patterns.namespace.captures(line) {
                namespace = caps[1].to_string();
            }
            if patterns.class_hint.is_match(line) {
                idx = map.scan_class(&patterns, &lines, idx, &namespace);
            } else if line.starts_with("public enum") {
                idx = map.scan_enum(&patterns, &lines, idx);
            } else {
                idx += 1;
            }
        }
        map.excel_row_classes.sort();
        map.excel_row_classes.dedup();
        log::info!(
            "Loaded {} classes and {} enums",
            map.classes.len(),
            map.enums.len()
        );
        log::info!("Found {} excel row classes", map.excel_row_classes.len());
        map.derive_class_index();
        map
    }

    /// Consumes one class declaration starting at `idx`; returns the
    /// index of the first line past its closing brace.
    fn scan_class(
        &mut self,
        patterns: &LinePatterns,
        lines: &[&str],
        mut idx: usize,
        namespace: &str,
    ) -> usize {
        let caps = match patterns.class_decl.captures(lines[idx]) {
            Some(caps) => caps,
            None => {
                log::warn!("Failed to read class decl: {}", lines[idx].trim());
                return idx + 1;
            }
        };
        let class_name = caps[1].to_string();
        let base_class = caps.get(2).map(|m| m.as_str().to_string());
        if self.classes.contains_key(&class_name) && namespace != PRIVILEGED_NAMESPACE {
            // duplicate declaration from another namespace; first wins
            idx += 1;
            while idx < lines.len() && !lines[idx].starts_with('}') {
                idx += 1;
            }
            return idx + 1;
        }
        if let Some(base) = base_class {
            self.base_classes.insert(class_name.clone(), base.clone());
            self.subclasses.entry(base).or_default().push(class_name.clone());
        }
        let mut fields = Vec::new();
        idx += 1;
        while idx < lines.len() && !lines[idx].starts_with('}') {
            let line = lines[idx];
            if let Some(caps) = patterns.field.captures(line) {
                fields.push(FieldDecl {
                    name: caps[3].to_string(),
                    type_name: caps[1].to_string(),
                    is_array: caps.get(2).is_some(),
                    generic_args: Vec::new(),
                });
            } else if let Some(caps) = patterns.generic_field.captures(line) {
                fields.push(FieldDecl {
                    name: caps[3].to_string(),
                    type_name: caps[1].to_string(),
                    is_array: false,
                    generic_args: caps[2].split(',').map(|a| a.trim().to_string()).collect(),
                });
            }
            if line.contains("Row") {
                if let Some(caps) = patterns.excel_row.captures(line) {
                    self.excel_row_classes.push(caps[1].to_string());
                }
            }
            idx += 1;
        }
        self.classes.insert(class_name, fields);
        idx + 1
    }

    fn scan_enum(&mut self, patterns: &LinePatterns, lines: &[&str], mut idx: usize) -> usize {
        let caps = match patterns.enum_decl.captures(lines[idx]) {
            Some(caps) => caps,
            None => return idx + 1,
        };
        let mut decl = EnumDecl::new(caps[1].to_string());
        idx += 1;
        while idx < lines.len() && !lines[idx].starts_with('}') {
            let line = lines[idx];
            if let Some(caps) = patterns.enum_member.captures(line) {
                if caps[1] == decl.name {
                    if let Ok(value) = caps[3].parse::<i64>() {
                        decl.add(caps[2].to_string(), value);
                    }
                }
            } else if let Some(caps) = patterns.enum_value.captures(line) {
                decl.kind = match &caps[1] {
                    "ushort" => EnumKind::Uint16,
                    "uint" => EnumKind::Uint32,
                    _ => EnumKind::Signed32,
                };
            }
            idx += 1;
        }
        self.enums.insert(decl.name.clone(), decl);
        idx + 1
    }

    /// Assigns wire indices to every polymorphic hierarchy rooted under
    /// `JsonConfig`: slot 0 is the base itself, slots 1..N its sorted
    /// descendants. Bases covered by an override file keep the override.
    fn derive_class_index(&mut self) {
        log::info!("Deriving subclass index tables...");
        let obfuscated = Regex::new(r"^[A-Z]{11,}$").unwrap();
        let mut bases: BTreeSet<String> = BTreeSet::new();
        for name in self.classes.keys() {
            if !self.is_json_config(name) {
                continue;
            }
            if let Some(base) = self.base_classes.get(name) {
                if base != JSON_CONFIG_ROOT {
                    bases.insert(base.clone());
                }
            }
        }
        for base in bases {
            if self.class_index.contains_key(&base) {
                log::info!("Skipping {}: index table provided by override file", base);
                continue;
            }
            let mut descendants: BTreeSet<String> = BTreeSet::new();
            self.collect_descendants(&base, &mut descendants);
            for (root, names) in SUBCLASS_BLACKLIST {
                if *root == base {
                    for name in *names {
                        descendants.remove(*name);
                    }
                }
            }
            let mut table: HashMap<u64, String> = HashMap::new();
            table.insert(0, base.clone());
            let keep = descendants.into_iter().filter(|n| !obfuscated.is_match(n));
            for (slot, name) in keep.enumerate() {
                table.insert(slot as u64 + 1, name);
            }
            self.class_index.insert(base, table);
        }
    }

    fn collect_descendants(&self, base: &str, out: &mut BTreeSet<String>) {
        if let Some(children) = self.subclasses.get(base) {
            for child in children {
                if out.insert(child.clone()) {
                    self.collect_descendants(child, out);
                }
            }
        }
    }

    /// Own fields of a class, without the inherited prefix.
    pub fn fields(&self, name: &str) -> Option<&[FieldDecl]> {
        self.classes.get(name).map(Vec::as_slice)
    }

    /// Ancestor fields prepended to own fields, in wire order.
    pub fn effective_fields(&self, name: &str) -> Option<Vec<FieldDecl>> {
        let mut fields = self.classes.get(name)?.clone();
        let mut base = self.base_classes.get(name);
        while let Some(current) = base {
            if let Some(own) = self.classes.get(current) {
                let mut merged = own.clone();
                merged.extend(fields);
                fields = merged;
            }
            base = self.base_classes.get(current);
        }
        Some(fields)
    }

    pub fn contains_class(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn enum_decl(&self, name: &str) -> Option<&EnumDecl> {
        self.enums.get(name)
    }

    pub fn contains_enum(&self, name: &str) -> bool {
        self.enums.contains_key(name)
    }

    pub fn base_class(&self, name: &str) -> Option<&str> {
        self.base_classes.get(name).map(String::as_str)
    }

    /// Whether the ancestor chain of `name` reaches the marker base.
    pub fn is_json_config(&self, name: &str) -> bool {
        let mut current = name;
        loop {
            if current == JSON_CONFIG_ROOT {
                return true;
            }
            if !self.classes.contains_key(current) {
                return false;
            }
            match self.base_classes.get(current) {
                Some(base) => current = base,
                None => return false,
            }
        }
    }

    /// Whether `name` or any of its ancestors roots a subclass index
    /// table, i.e. the class serializes behind a dispatch preamble
    /// somewhere along its chain.
    pub fn is_derivation_class(&self, name: &str) -> bool {
        let mut current = name;
        loop {
            if self.class_index.contains_key(current) {
                return true;
            }
            match self.base_classes.get(current) {
                Some(base) => current = base,
                None => return false,
            }
        }
    }

    pub fn has_subclass_table(&self, name: &str) -> bool {
        self.class_index.contains_key(name)
    }

    pub fn subclass_name(&self, base: &str, index: u64) -> Option<&str> {
        self.class_index.get(base)?.get(&index).map(String::as_str)
    }

    pub fn excel_row_classes(&self) -> &[String] {
        &self.excel_row_classes
    }
}

/// Override file shape: `{ base: { "0": base, "1": sub, ... } }`.
fn load_index_overrides(
    path: &Path,
) -> Result<HashMap<String, HashMap<u64, String>>, DecodeError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| DecodeError::File(format!("{}: {}", path.display(), e)))?;
    let raw: HashMap<String, HashMap<String, String>> =
        serde_json::from_str(&text).map_err(|e| DecodeError::Json(e.to_string()))?;
    let mut overrides = HashMap::new();
    for (base, table) in raw {
        let mut slots = HashMap::new();
        for (slot, name) in table {
            let slot: u64 = slot
                .parse()
                .map_err(|_| DecodeError::Json(format!("bad index key {:?} for {}", slot, base)))?;
            slots.insert(slot, name);
        }
        overrides.insert(base, slots);
    }
    Ok(overrides)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    const DUMP: &str = r#"
// Namespace: RPG.GameCore
public class JsonConfig
{
}
public class TaskConfig : JsonConfig
{
	public bool IsClientOnly;
}
public class PlayTimeline : TaskConfig
{
	public string TimelinePath;
	public int[] TargetIds;
}
public class LevelShowDialog : TaskConfig
{
	public string DialogId;
}
public class ABCDEFGHIJKL : TaskConfig
{
}
public class AvatarConfig
{
	public uint AvatarId;
	public Dictionary<string, int> Tags;
}
public class AvatarExcelRow : AvatarConfig
{
	public static void COMPILED(Dictionary<string, int> AAA, string[] BBB, out AvatarExcelRow CCC) { }
}
public enum DialogKind
{
	public int value__;
	public const DialogKind Plain = 0;
	public const DialogKind Choice = 1;
	public const DialogKind Hidden = -2;
}
public enum AvatarRank
{
	public ushort value__;
	public const AvatarRank Common = 1;
	public const AvatarRank Rare = 2;
}
// Namespace: RPG.Client
public class AvatarConfig
{
	public int ShadowCopy;
}
"#;

    #[test]
    fn test_fields_and_inheritance() -> Result<()> {
        let map = ClassMap::parse(DUMP);
        let fields = map.fields("PlayTimeline").unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "TimelinePath");
        assert!(fields[1].is_array);

        let effective = map.effective_fields("PlayTimeline").unwrap();
        assert_eq!(
            effective.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
            ["IsClientOnly", "TimelinePath", "TargetIds"]
        );
        assert_eq!(map.base_class("PlayTimeline"), Some("TaskConfig"));
        Ok(())
    }

    #[test]
    fn test_duplicate_class_keeps_first() {
        let map = ClassMap::parse(DUMP);
        // the RPG.Client copy of AvatarConfig must not clobber the real one
        let fields = map.fields("AvatarConfig").unwrap();
        assert_eq!(fields[0].name, "AvatarId");
        assert_eq!(fields.len(), 2);
    }

    #[test]
    fn test_generic_field() {
        let map = ClassMap::parse(DUMP);
        let fields = map.fields("AvatarConfig").unwrap();
        assert!(fields[1].is_generic());
        assert_eq!(fields[1].type_name, "Dictionary");
        assert_eq!(fields[1].generic_args, ["string", "int"]);
    }

    #[test]
    fn test_enum_decls() {
        let map = ClassMap::parse(DUMP);
        let dialog = map.enum_decl("DialogKind").unwrap();
        assert_eq!(dialog.kind, EnumKind::Signed32);
        assert_eq!(dialog.name_of(-2), Some("Hidden"));
        assert_eq!(dialog.value_of("Choice"), Some(1));
        let rank = map.enum_decl("AvatarRank").unwrap();
        assert_eq!(rank.kind, EnumKind::Uint16);
        assert_eq!(rank.name_of(2), Some("Rare"));
    }

    #[test]
    fn test_excel_row_classes() {
        let map = ClassMap::parse(DUMP);
        assert_eq!(map.excel_row_classes(), ["AvatarExcel"]);
    }

    #[test]
    fn test_subclass_index_derivation() {
        let map = ClassMap::parse(DUMP);
        assert!(map.has_subclass_table("TaskConfig"));
        assert_eq!(map.subclass_name("TaskConfig", 0), Some("TaskConfig"));
        // LevelShowDialog is blacklisted, ABCDEFGHIJKL is obfuscated
        assert_eq!(map.subclass_name("TaskConfig", 1), Some("PlayTimeline"));
        assert_eq!(map.subclass_name("TaskConfig", 2), None);
        assert!(map.is_json_config("PlayTimeline"));
        assert!(!map.is_json_config("AvatarConfig"));
    }

    #[test]
    fn test_is_derivation_class_walks_ancestors() {
        let map = ClassMap::parse(DUMP);
        // only TaskConfig roots a table; its subclasses inherit the trait
        assert!(map.is_derivation_class("TaskConfig"));
        assert!(map.is_derivation_class("PlayTimeline"));
        assert!(map.is_derivation_class("LevelShowDialog"));
        assert!(!map.is_derivation_class("JsonConfig"));
        assert!(!map.is_derivation_class("AvatarConfig"));
        assert!(!map.has_subclass_table("PlayTimeline"));
    }

    #[test]
    fn test_index_override_wins() {
        let mut overrides = HashMap::new();
        let mut table = HashMap::new();
        table.insert(0u64, "TaskConfig".to_string());
        table.insert(1u64, "LevelShowDialog".to_string());
        overrides.insert("TaskConfig".to_string(), table);
        let map = ClassMap::parse_with_index(DUMP, overrides);
        assert_eq!(map.subclass_name("TaskConfig", 1), Some("LevelShowDialog"));
    }
}
