use serde_json::{json, Map, Value};

use crate::class_map::{ClassMap, EnumDecl, EnumKind, FieldDecl};
use crate::error::DecodeError;
use crate::reader::BinaryReader;

// Classes whose serialized form is empty; decoded as a fixed constant.
const ZIPPED_CLASSES: &[&str] = &[
    "ChangePropState",
    "SyncAllSubPropState",
    "SyncSubPropState",
    "LoopWaitBeHit",
    "WaitPredicateSucc",
    "ComparePropState",
];

// Obfuscated names from the dump, preserved verbatim.
const DYNAMIC_VALUES_ALIAS: &str = "FMIOFJDICOO";
const DYNAMIC_VALUES_FIELDS: [&str; 3] = ["LGKGOMNMBAH", "JKFHANPDGCA", "LCADBHMMDED"];
const DYNAMIC_VALUES_READ_TYPE: &str = "IMMOBDAEDCL";

// Opcodes 2..=8 of both expression dialects, in wire order.
const OP_NAMES: [&str; 7] = ["Add", "Sub", "Mul", "Div", "Neg", "Floor", "Round"];

// FixPoint scalars are 32.32 fixed-point: zigzag integer over 2^32.
const FIXED_POINT_SCALE: f64 = 4294967296.0;

/// Schema-driven recursive decoder. Holds no per-record state; the
/// cursor is passed explicitly so records decode independently.
pub struct Decoder<'a> {
    classes: &'a ClassMap,
    beta: bool,
}

impl<'a> Decoder<'a> {
    pub fn new(classes: &'a ClassMap, beta: bool) -> Self {
        Self { classes, beta }
    }

    /// Decodes one record of `class_name` from the cursor.
    ///
    /// `parse_derivation` enables the subclass-index preamble for
    /// polymorphic roots; the dispatch recursion switches it off and
    /// tags the result with `$type` so the concrete type survives.
    pub fn load_class(
        &self,
        reader: &mut BinaryReader,
        class_name: &str,
        parse_derivation: bool,
        add_typing: bool,
    ) -> Result<Value, DecodeError> {
        log::debug!("Loading class {} at 0x{:x}", class_name, reader.tell());
        let mut result = Map::new();
        if !parse_derivation && add_typing {
            result.insert(
                "$type".to_string(),
                Value::String(format!("RPG.GameCore.{}", class_name)),
            );
        }
        if ZIPPED_CLASSES.contains(&class_name) {
            result.insert("TaskEnabled".to_string(), Value::Bool(true));
            return Ok(Value::Object(result));
        }
        if parse_derivation
            && self.classes.is_derivation_class(class_name)
            && self.classes.has_subclass_table(class_name)
        {
            let index = reader.read_uleb128()?;
            let concrete = self
                .classes
                .subclass_name(class_name, index)
                .ok_or_else(|| DecodeError::UnknownSubclass(class_name.to_string(), index))?
                .to_string();
            return self.load_class(reader, &concrete, false, true);
        }
        let fields = self
            .classes
            .effective_fields(class_name)
            .ok_or_else(|| DecodeError::UnknownClass(class_name.to_string()))?;
        let mask = reader.read_uleb128()?;
        for (bit, field) in fields.iter().enumerate() {
            if bit >= 64 || mask & (1u64 << bit) == 0 {
                continue;
            }
            let value = if field.is_array {
                let count = reader.read_array_len()?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.load_field(reader, field)?);
                }
                Value::Array(items)
            } else {
                self.load_field(reader, field)?
            };
            result.insert(field.name.clone(), value);
        }
        Ok(Value::Object(result))
    }

    fn load_field(&self, reader: &mut BinaryReader, field: &FieldDecl) -> Result<Value, DecodeError> {
        if field.is_generic() {
            if field.type_name == "Dictionary" {
                let key_type = &field.generic_args[0];
                let value_type = &field.generic_args[field.generic_args.len() - 1];
                return self.load_dictionary(reader, key_type, value_type);
            }
            return Err(DecodeError::UnsupportedGeneric(format!(
                "{}<{}> {}",
                field.type_name,
                field.generic_args.join(", "),
                field.name
            )));
        }
        self.load_value(reader, &field.type_name)
    }

    fn load_value(&self, reader: &mut BinaryReader, type_name: &str) -> Result<Value, DecodeError> {
        match type_name {
            "string" => Ok(Value::String(reader.read_string()?)),
            "bool" => Ok(Value::Bool(reader.read_bool()?)),
            "uint" => Ok(Value::from(reader.read_uleb128()?)),
            "int" => Ok(Value::from(reader.read_sleb128()?)),
            "byte" => Ok(Value::from(reader.read_byte()?)),
            "float" => Ok(Value::from(reader.read_f32()? as f64)),
            "double" => Ok(Value::from(reader.read_f64()?)),
            "FixPoint" => Ok(Value::from(reader.read_sleb128()? as f64 / FIXED_POINT_SCALE)),
            "TextID" | "StringHash" => Ok(json!({ "Hash": reader.read_hash()? })),
            "DynamicFloat" => {
                if self.beta {
                    self.load_dynamic_float(reader)
                } else {
                    self.load_dynamic_float_rel(reader)
                }
            }
            "DynamicValue" => self.load_dynamic_value(reader),
            DYNAMIC_VALUES_ALIAS => self.load_dynamic_values(reader),
            _ => {
                if let Some(rest) = type_name.strip_prefix("MVector") {
                    return self.load_vector(reader, type_name, rest);
                }
                if let Some(decl) = self.classes.enum_decl(type_name) {
                    return self.load_enum(reader, decl);
                }
                if self.classes.contains_class(type_name) {
                    return self.load_class(reader, type_name, true, true);
                }
                Err(DecodeError::UnknownFieldType(type_name.to_string()))
            }
        }
    }

    fn load_dictionary(
        &self,
        reader: &mut BinaryReader,
        key_type: &str,
        value_type: &str,
    ) -> Result<Value, DecodeError> {
        // dictionaries alone carry a zigzag count on the wire
        let count = reader.read_sleb128()?;
        let mut result = Map::new();
        for _ in 0..count.max(0) {
            let key = self.load_value(reader, key_type)?;
            let value = self.load_value(reader, value_type)?;
            result.insert(json_key(&key), value);
        }
        Ok(Value::Object(result))
    }

    fn load_vector(
        &self,
        reader: &mut BinaryReader,
        type_name: &str,
        suffix: &str,
    ) -> Result<Value, DecodeError> {
        let arity = match suffix.chars().next() {
            Some('2') => 2,
            Some('3') => 3,
            Some('4') => 4,
            _ => return Err(DecodeError::UnknownFieldType(type_name.to_string())),
        };
        let mut result = Map::new();
        for axis in ["X", "Y", "Z", "W"].iter().take(arity) {
            result.insert(axis.to_string(), Value::from(reader.read_f32()? as f64));
        }
        Ok(Value::Object(result))
    }

    fn load_enum(&self, reader: &mut BinaryReader, decl: &EnumDecl) -> Result<Value, DecodeError> {
        let value = match decl.kind {
            EnumKind::Signed32 => reader.read_sleb128()?,
            EnumKind::Uint16 | EnumKind::Uint32 => reader.read_uleb128()? as i64,
        };
        let member = decl
            .name_of(value)
            .ok_or_else(|| DecodeError::UnknownEnumValue(decl.name.clone(), value))?;
        Ok(Value::String(member.to_string()))
    }

    /// Interleaved expression dialect: the opcode list and both operand
    /// pools are read up front, then stitched back together. A pool
    /// mismatch keeps the raw triple and annotates it instead of
    /// failing the record.
    fn load_dynamic_float(&self, reader: &mut BinaryReader) -> Result<Value, DecodeError> {
        if !reader.read_bool()? {
            let value = reader.read_sleb128()? as f64 / FIXED_POINT_SCALE;
            return Ok(json!({ "IsDynamic": false, "FixedValue": { "Value": value } }));
        }
        let op_count = reader.read_byte()?;
        let mut ops = Vec::with_capacity(op_count as usize);
        for _ in 0..op_count {
            ops.push(reader.read_byte()?);
        }
        let fixed_count = reader.read_byte()?;
        let mut fixed = Vec::with_capacity(fixed_count as usize);
        for _ in 0..fixed_count {
            fixed.push(reader.read_sleb128()?);
        }
        let dynamic_count = reader.read_byte()?;
        let mut dynamic = Vec::with_capacity(dynamic_count as usize);
        for _ in 0..dynamic_count {
            dynamic.push(reader.read_hash()?);
        }
        let expressions = match rebuild_expression(&ops, &fixed, &dynamic) {
            Ok(nodes) => Value::Array(nodes),
            Err(e) => {
                log::warn!("Failed to rebuild expression ({}); keeping raw operands", e);
                json!({
                    "Op": ops,
                    "Fixed": fixed,
                    "Dynamic": dynamic,
                    "$warning": "failed to rebuild expression from operand pools",
                })
            }
        };
        Ok(json!({ "IsDynamic": true, "Expressions": expressions }))
    }

    /// Streaming expression dialect: every opcode carries its operand
    /// inline. Unknown opcodes are fatal here.
    fn load_dynamic_float_rel(&self, reader: &mut BinaryReader) -> Result<Value, DecodeError> {
        if !reader.read_bool()? {
            let value = reader.read_sleb128()? as f64 / FIXED_POINT_SCALE;
            return Ok(json!({ "IsDynamic": false, "FixedValue": { "Value": value } }));
        }
        let op_count = reader.read_byte()?;
        let mut nodes = Vec::with_capacity(op_count as usize);
        for _ in 0..op_count {
            let op = reader.read_byte()?;
            let node = match op {
                0 => {
                    let value = reader.read_sleb128()? as f64 / FIXED_POINT_SCALE;
                    json!({ "Type": "FixedNumber", "FixedValue": { "Value": value } })
                }
                1 => json!({ "Type": "DynamicNumber", "DynamicHash": reader.read_hash()? }),
                2..=8 => json!({ "Type": OP_NAMES[(op - 2) as usize] }),
                9 => json!({ "Type": "Int" }),
                _ => return Err(DecodeError::UnknownOpcode(op)),
            };
            nodes.push(node);
        }
        Ok(json!({ "IsDynamic": true, "Expressions": nodes }))
    }

    /// Recursive tagged union of plain values.
    fn load_dynamic_value(&self, reader: &mut BinaryReader) -> Result<Value, DecodeError> {
        let tag = reader.read_sleb128()?;
        let mut result = Map::new();
        match tag {
            0 => {
                result.insert("Type".to_string(), json!("INT"));
                result.insert("IntValue".to_string(), Value::from(reader.read_sleb128()?));
            }
            1 => {
                result.insert("Type".to_string(), json!("FLOAT"));
                result.insert(
                    "FloatValue".to_string(),
                    Value::from(reader.read_f32()? as f64),
                );
            }
            2 => {
                result.insert("Type".to_string(), json!("BOOL"));
                result.insert("BoolValue".to_string(), Value::Bool(reader.read_bool()?));
            }
            3 => {
                result.insert("Type".to_string(), json!("ARRAY"));
                let count = reader.read_array_len()?;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(self.load_dynamic_value(reader)?);
                }
                result.insert("ArrayValue".to_string(), Value::Array(items));
            }
            4 => {
                result.insert("Type".to_string(), json!("MAP"));
                let count = reader.read_array_len()?;
                let mut pairs = Vec::with_capacity(count);
                for _ in 0..count {
                    let key = self.load_dynamic_value(reader)?;
                    let value = self.load_dynamic_value(reader)?;
                    pairs.push(json!({ "Key": key, "Value": value }));
                }
                result.insert("MapValue".to_string(), Value::Array(pairs));
            }
            5 => {
                result.insert("Type".to_string(), json!("STRING"));
                result.insert("StringValue".to_string(), Value::String(reader.read_string()?));
            }
            6 => {
                result.insert("Type".to_string(), json!("NULL"));
            }
            _ => return Err(DecodeError::UnknownValueTag(tag)),
        }
        Ok(Value::Object(result))
    }

    /// Keyed aggregate of expression triples (the dump only names this
    /// by its obfuscated alias). The three sub-fields always use the
    /// interleaved dialect, in either mode.
    fn load_dynamic_values(&self, reader: &mut BinaryReader) -> Result<Value, DecodeError> {
        let count = reader.read_uleb128()?;
        let mut result = Map::new();
        for _ in 0..count {
            let key = reader.read_hash()?;
            let mut item = Map::new();
            if reader.read_bool()? {
                for name in DYNAMIC_VALUES_FIELDS {
                    item.insert(name.to_string(), self.load_dynamic_float(reader)?);
                }
            } else {
                reader.read_hash()?;
                if reader.read_bool()? {
                    reader.read_hash()?;
                    reader.read_hash()?;
                }
            }
            let (kind, read_type) = load_read_type(reader)?;
            if kind != 0 {
                item.insert(DYNAMIC_VALUES_READ_TYPE.to_string(), read_type);
            }
            result.insert(key.to_string(), Value::Object(item));
        }
        Ok(Value::Object(result))
    }
}

fn load_read_type(reader: &mut BinaryReader) -> Result<(u8, Value), DecodeError> {
    let kind = reader.read_byte()?;
    if kind == 0 {
        return Ok((0, json!({ "DynamicValueReadType": 0 })));
    }
    let string = reader.read_string()?;
    let integer = reader.read_hash()?;
    Ok((
        kind,
        json!({ "DynamicValueReadType": kind, "String": string, "Integer": integer }),
    ))
}

fn rebuild_expression(ops: &[u8], fixed: &[i64], dynamic: &[i32]) -> Result<Vec<Value>, DecodeError> {
    let mut nodes = Vec::new();
    let mut idx = 0;
    while idx < ops.len() {
        match ops[idx] {
            0 => {
                idx += 1;
                let slot = *ops
                    .get(idx)
                    .ok_or_else(|| DecodeError::Expression("truncated opcode list".to_string()))?;
                let raw = *fixed.get(slot as usize).ok_or_else(|| {
                    DecodeError::Expression(format!("fixed pool has no slot {}", slot))
                })?;
                let value = raw as f64 / FIXED_POINT_SCALE;
                nodes.push(json!({ "Type": "FixedNumber", "FixedValue": { "Value": value } }));
            }
            1 => {
                idx += 1;
                let slot = *ops
                    .get(idx)
                    .ok_or_else(|| DecodeError::Expression("truncated opcode list".to_string()))?;
                let hash = *dynamic.get(slot as usize).ok_or_else(|| {
                    DecodeError::Expression(format!("dynamic pool has no slot {}", slot))
                })?;
                nodes.push(json!({ "Type": "DynamicNumber", "DynamicHash": hash }));
            }
            op @ 2..=8 => nodes.push(json!({ "Type": OP_NAMES[(op - 2) as usize] })),
            9 => {} // Int markers carry no expression node in this dialect
            op => return Err(DecodeError::UnknownOpcode(op)),
        }
        idx += 1;
    }
    Ok(nodes)
}

/// Object keys must be strings; string values pass through verbatim,
/// everything else keeps its JSON rendering.
pub(crate) fn json_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
