use std::collections::HashMap;

use mlua::{Lua, StdLib, Value};

/// A value returned from evaluating an expression in the sandbox. Lua tables
/// only decode as `Table` when every key is a string and every value a
/// number — the shape the pixel extractor expressions return (spec §4.2).
/// Anything else the loaded source produces collapses to `Scalar`/`Nil`.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue {
    Nil,
    Bool(bool),
    Number(f64),
    Text(String),
    Table(HashMap<String, f64>),
}

impl std::fmt::Display for ScriptValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptValue::Nil => write!(f, "nil"),
            ScriptValue::Bool(b) => write!(f, "{b}"),
            ScriptValue::Number(n) => write!(f, "{n}"),
            ScriptValue::Text(s) => write!(f, "{s}"),
            ScriptValue::Table(_) => write!(f, "[table]"),
        }
    }
}

/// One loaded source evaluated in a fresh, capability-stripped Lua VM: no
/// `io`, no `os`, no `require`. A throw inside the loaded source or the
/// expression becomes a `ScriptValue::Text` of the error message rather than
/// an `Err` — the isolation contract only fails hard if the VM itself cannot
/// be constructed (`IsolateCrashed`).
pub struct Isolate {
    lua: Lua,
}

impl Isolate {
    pub fn new(source: &str) -> Result<Self, mlua::Error> {
        let lua = Lua::new_with(
            StdLib::BASE | StdLib::STRING | StdLib::TABLE | StdLib::MATH,
            mlua::LuaOptions::default(),
        )?;
        lua.globals().set("require", Value::Nil)?;
        lua.globals().set("dofile", Value::Nil)?;
        lua.globals().set("loadfile", Value::Nil)?;
        lua.load(source).set_name("source").exec()?;
        Ok(Self { lua })
    }

    pub fn execute(&self, expression: &str) -> ScriptValue {
        match self.lua.load(expression).eval::<Value>() {
            Ok(value) => lua_value_to_script_value(&self.lua, value),
            Err(err) => ScriptValue::Text(err.to_string()),
        }
    }

    pub fn terminate(self) {
        drop(self);
    }
}

fn lua_value_to_script_value(lua: &Lua, value: Value) -> ScriptValue {
    match value {
        Value::Nil => ScriptValue::Nil,
        Value::Boolean(b) => ScriptValue::Bool(b),
        Value::Integer(i) => ScriptValue::Number(i as f64),
        Value::Number(n) => ScriptValue::Number(n),
        Value::String(s) => ScriptValue::Text(s.to_string_lossy().to_string()),
        Value::Table(table) => {
            let mut map = HashMap::new();
            for pair in table.pairs::<Value, Value>() {
                let Ok((k, v)) = pair else { continue };
                let (Value::String(k), Some(v)) = (k, as_number(&v)) else {
                    continue;
                };
                map.insert(k.to_string_lossy().to_string(), v);
            }
            let _ = lua;
            ScriptValue::Table(map)
        }
        _ => ScriptValue::Nil,
    }
}

fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Integer(i) => Some(*i as f64),
        Value::Number(n) => Some(*n),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_simple_expression() {
        let isolate = Isolate::new("x = 41").unwrap();
        assert_eq!(isolate.execute("x + 1"), ScriptValue::Number(42.0));
    }

    #[test]
    fn throw_becomes_text_value() {
        let isolate = Isolate::new("").unwrap();
        match isolate.execute("error('boom')") {
            ScriptValue::Text(msg) => assert!(msg.contains("boom")),
            other => panic!("expected Text, got {other:?}"),
        }
    }

    #[test]
    fn has_no_io_or_os_globals() {
        let isolate = Isolate::new("").unwrap();
        assert_eq!(isolate.execute("io"), ScriptValue::Nil);
        assert_eq!(isolate.execute("os"), ScriptValue::Nil);
        assert_eq!(isolate.execute("require"), ScriptValue::Nil);
    }

    #[test]
    fn extracts_string_to_number_table() {
        let isolate = Isolate::new("map = { stone = 1, sand = 2 }").unwrap();
        match isolate.execute("map") {
            ScriptValue::Table(t) => {
                assert_eq!(t.get("stone"), Some(&1.0));
                assert_eq!(t.get("sand"), Some(&2.0));
            }
            other => panic!("expected Table, got {other:?}"),
        }
    }
}
