//! Path rewriting over arbitrary JSON trees.
//!
//! Every object key spelled "file" (any ASCII case) whose value is a string
//! found in the lookup map is replaced; everything else is left untouched.
//! Lookups never fail: an unmapped path passes through verbatim.

use std::collections::HashMap;

use serde_json::Value;

use crate::mapping::PathTranslationTable;

const FILE_KEY: &str = "file";

/// Which way a message is travelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Browser → debugger: original paths become instrumented paths.
    ToInstrumented,
    /// Debugger → browser: instrumented paths become original paths.
    ToOriginal,
}

impl PathTranslationTable {
    #[must_use]
    pub fn lookup(&self, direction: Direction) -> &HashMap<String, String> {
        match direction {
            Direction::ToInstrumented => self.to_instrumented(),
            Direction::ToOriginal => self.to_original(),
        }
    }

    pub fn translate_in_place(&self, direction: Direction, message: &mut Value) {
        translate_in_place(message, self.lookup(direction));
    }
}

/// Returns a rewritten copy of `message`.
#[must_use]
pub fn translate(message: &Value, map: &HashMap<String, String>) -> Value {
    let mut copy = message.clone();
    translate_in_place(&mut copy, map);
    copy
}

pub fn translate_in_place(message: &mut Value, map: &HashMap<String, String>) {
    if map.is_empty() {
        return;
    }
    match message {
        Value::Object(fields) => {
            for (key, value) in fields.iter_mut() {
                if key.eq_ignore_ascii_case(FILE_KEY) {
                    if let Value::String(path) = &mut *value {
                        if let Some(mapped) = map.get(path.as_str()) {
                            path.clone_from(mapped);
                        }
                        continue;
                    }
                }
                translate_in_place(value, map);
            }
        }
        Value::Array(items) => {
            for item in items {
                translate_in_place(item, map);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => {}
    }
}
