//! The `mw` helper namespace exposed to Lua guests.
//!
//! ```lua
//! mw.title(text)          -- first heading, or nil
//! mw.is_redirect(text)    -- boolean
//! mw.categories(text)     -- { "Foo", "Bar", ... }
//! mw.log(msg)             -- host debug log
//! mw.text.trim(s)
//! mw.text.gsub(s, pattern, repl)
//! mw.json.encode(value)
//! mw.json.decode(s)
//! ```
//!
//! Every helper is registered explicitly as a host function; nothing is
//! bound by reflection.

use mlua::{Lua, Table, Value};

use crate::wikitext;

/// Maximum nesting depth accepted by the JSON helpers.
pub const MAX_JSON_DEPTH: usize = 64;

/// Install the `mw` table into the guest's globals.
pub(crate) fn register(lua: &Lua, plugin: &str) -> mlua::Result<()> {
    let mw = lua.create_table()?;

    mw.set(
        "title",
        lua.create_function(|_, text: String| Ok(wikitext::title(&text).map(str::to_owned)))?,
    )?;
    mw.set(
        "is_redirect",
        lua.create_function(|_, text: String| Ok(wikitext::is_redirect(&text)))?,
    )?;
    mw.set(
        "categories",
        lua.create_function(|lua, text: String| {
            lua.create_sequence_from(wikitext::categories(&text))
        })?,
    )?;

    let plugin = plugin.to_owned();
    mw.set(
        "log",
        lua.create_function(move |_, msg: String| {
            tracing::debug!(plugin = %plugin, plugin_log = %msg, "guest log");
            Ok(())
        })?,
    )?;

    mw.set("text", text_table(lua)?)?;
    mw.set("json", json_table(lua)?)?;

    lua.globals().set("mw", mw)
}

fn text_table(lua: &Lua) -> mlua::Result<Table> {
    let text = lua.create_table()?;
    text.set(
        "trim",
        lua.create_function(|_, s: String| Ok(s.trim().to_owned()))?,
    )?;
    // Delegates to the guest's own string.gsub, so the pattern language is Lua's.
    text.set(
        "gsub",
        lua.create_function(
            |lua, (s, pattern, replacement): (String, String, Value)| {
                let string: Table = lua.globals().get("string")?;
                let gsub: mlua::Function = string.get("gsub")?;
                gsub.call::<String>((s, pattern, replacement))
            },
        )?,
    )?;
    Ok(text)
}

fn json_table(lua: &Lua) -> mlua::Result<Table> {
    let json = lua.create_table()?;
    json.set(
        "decode",
        lua.create_function(|lua, s: String| {
            let value: serde_json::Value = serde_json::from_str(&s)
                .map_err(|e| mlua::Error::RuntimeError(format!("json decode: {e}")))?;
            json_to_lua(lua, &value, 0)
        })?,
    )?;
    json.set(
        "encode",
        lua.create_function(|_, value: Value| {
            let json = lua_to_json(&value, 0)?;
            serde_json::to_string(&json)
                .map_err(|e| mlua::Error::RuntimeError(format!("json encode: {e}")))
        })?,
    )?;
    Ok(json)
}

fn depth_exceeded() -> mlua::Error {
    mlua::Error::RuntimeError(format!("json nesting deeper than {MAX_JSON_DEPTH} levels"))
}

fn json_to_lua(lua: &Lua, value: &serde_json::Value, depth: usize) -> mlua::Result<Value> {
    if depth > MAX_JSON_DEPTH {
        return Err(depth_exceeded());
    }
    Ok(match value {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => n.as_f64().map_or(Value::Nil, Value::Number),
        },
        serde_json::Value::String(s) => Value::String(lua.create_string(s)?),
        serde_json::Value::Array(items) => {
            let table = lua.create_table()?;
            for (i, item) in items.iter().enumerate() {
                table.raw_set(i + 1, json_to_lua(lua, item, depth + 1)?)?;
            }
            Value::Table(table)
        }
        serde_json::Value::Object(map) => {
            let table = lua.create_table()?;
            for (key, item) in map {
                table.raw_set(key.as_str(), json_to_lua(lua, item, depth + 1)?)?;
            }
            Value::Table(table)
        }
    })
}

/// Tables with a non-zero border encode as arrays (string keys are dropped);
/// everything else encodes as an object.
fn lua_to_json(value: &Value, depth: usize) -> mlua::Result<serde_json::Value> {
    if depth > MAX_JSON_DEPTH {
        return Err(depth_exceeded());
    }
    match value {
        Value::Nil => Ok(serde_json::Value::Null),
        Value::Boolean(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Integer(i) => Ok(serde_json::Value::from(*i)),
        Value::Number(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .ok_or_else(|| mlua::Error::RuntimeError("json encode: NaN or infinity".into())),
        Value::String(s) => Ok(serde_json::Value::String(s.to_str()?.to_string())),
        Value::Table(table) => {
            let len = table.raw_len();
            if len > 0 {
                let mut items = Vec::with_capacity(len);
                for i in 1..=len {
                    let item: Value = table.raw_get(i)?;
                    items.push(lua_to_json(&item, depth + 1)?);
                }
                return Ok(serde_json::Value::Array(items));
            }
            let mut map = serde_json::Map::new();
            for pair in table.clone().pairs::<Value, Value>() {
                let (key, item) = pair?;
                let key = match key {
                    Value::String(s) => s.to_str()?.to_string(),
                    Value::Integer(i) => i.to_string(),
                    other => {
                        return Err(mlua::Error::RuntimeError(format!(
                            "json encode: unsupported key type {}",
                            other.type_name()
                        )));
                    }
                };
                map.insert(key, lua_to_json(&item, depth + 1)?);
            }
            Ok(serde_json::Value::Object(map))
        }
        other => Err(mlua::Error::RuntimeError(format!(
            "json encode: unsupported value type {}",
            other.type_name()
        ))),
    }
}
