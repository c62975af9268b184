use std::path::PathBuf;

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::document::{CanvasOptions, ReorderDirection};
use crate::error::{CanvasError, Result};
use crate::objects::Element;
use crate::session::Session;
use crate::storage::FsStorage;
use crate::svg::ExportOptions;
use crate::templates::{SaveOptions, TemplateFilter};
use crate::types::{ClipPath, Filter, Gradient, Pattern, Symbol};

#[derive(Deserialize)]
struct Command {
    action: String,
    #[serde(default)]
    params: Value,
}

struct Reply {
    message: String,
    data: Map<String, Value>,
}

impl Reply {
    fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), data: Map::new() }
    }

    fn with(mut self, key: &str, value: Value) -> Self {
        self.data.insert(key.to_string(), value);
        self
    }
}

fn respond(result: Result<Reply>) -> String {
    let mut body = Map::new();
    match result {
        Ok(reply) => {
            body.insert("success".into(), Value::Bool(true));
            body.insert("message".into(), Value::String(reply.message));
            body.extend(reply.data);
        }
        Err(e) => {
            body.insert("success".into(), Value::Bool(false));
            body.insert("error".into(), Value::String(e.to_string()));
            body.insert("kind".into(), Value::String(e.kind().to_string()));
        }
    }
    Value::Object(body).to_string()
}

fn missing(key: &str) -> CanvasError {
    CanvasError::InvalidArgument(format!("missing parameter `{}`", key))
}

fn str_param<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params.get(key).and_then(Value::as_str).ok_or_else(|| missing(key))
}

fn f64_param(params: &Value, key: &str) -> Result<f64> {
    params.get(key).and_then(Value::as_f64).ok_or_else(|| missing(key))
}

fn f64_or(params: &Value, key: &str, default: f64) -> f64 {
    params.get(key).and_then(Value::as_f64).unwrap_or(default)
}

fn bool_param(params: &Value, key: &str) -> Result<bool> {
    params.get(key).and_then(Value::as_bool).ok_or_else(|| missing(key))
}

fn usize_or(params: &Value, key: &str, default: usize) -> usize {
    params.get(key).and_then(Value::as_u64).map_or(default, |v| v as usize)
}

fn typed_param<T: DeserializeOwned>(params: &Value, key: &str) -> Result<T> {
    let value = params.get(key).cloned().ok_or_else(|| missing(key))?;
    serde_json::from_value(value).map_err(|e| CanvasError::InvalidArgument(format!("invalid `{}`: {}", key, e)))
}

fn typed_params<T: DeserializeOwned>(params: &Value) -> Result<T> {
    let value = if params.is_null() { Value::Object(Map::new()) } else { params.clone() };
    serde_json::from_value(value).map_err(|e| CanvasError::InvalidArgument(e.to_string()))
}

fn found(found: bool, kind: &'static str, id: &str, message: String) -> Result<Reply> {
    if found {
        Ok(Reply::new(message).with("id", json!(id)))
    } else {
        Err(CanvasError::not_found(kind, id))
    }
}

impl Session {
    pub fn execute_command(&mut self, cmd_json: &str) -> String {
        let cmd: Command = match serde_json::from_str(cmd_json) {
            Ok(c) => c,
            Err(e) => return respond(Err(e.into())),
        };
        debug!(action = cmd.action.as_str(); "Executing command");
        let result = self.dispatch(&cmd.action, &cmd.params);
        if let Err(e) = &result {
            warn!(action = cmd.action.as_str(), error:% = e; "Command failed");
        }
        respond(result)
    }

    fn dispatch(&mut self, action: &str, params: &Value) -> Result<Reply> {
        match action {
            "create_canvas" => {
                let width = f64_param(params, "width")?;
                let height = f64_param(params, "height")?;
                let options: CanvasOptions = typed_params(params)?;
                self.create_canvas(width, height, options)?;
                Ok(Reply::new(format!("Created {}x{} canvas", width, height)))
            }
            "resize_canvas" => {
                let width = f64_param(params, "width")?;
                let height = f64_param(params, "height")?;
                self.resize_canvas(width, height)?;
                Ok(Reply::new(format!("Resized canvas to {}x{}", width, height)))
            }
            "set_background" => {
                let background = params.get("background").and_then(Value::as_str).map(str::to_string);
                self.set_background(background);
                Ok(Reply::new("Background updated"))
            }
            "add_element" => {
                let element: Element = typed_param(params, "element")?;
                let id = self.add_element(element.with_default_style())?;
                Ok(Reply::new(format!("Added {}", id)).with("id", json!(id)))
            }
            "get_element" => {
                let id = str_param(params, "id")?;
                let element = self.document().get_element(id).ok_or_else(|| CanvasError::not_found("element", id))?;
                let value = serde_json::to_value(element)?;
                Ok(Reply::new(format!("Found {}", id)).with("element", value))
            }
            "update_element" => {
                let id = str_param(params, "id")?;
                let changes: Map<String, Value> = typed_param(params, "changes")?;
                let updated = self.update_element(id, &changes)?;
                found(updated, "element", id, format!("Updated {}", id))
            }
            "remove_element" => {
                let id = str_param(params, "id")?;
                let removed = self.remove_element(id);
                found(removed, "element", id, format!("Removed {}", id))
            }
            "duplicate_element" => {
                let id = str_param(params, "id")?;
                let dx = f64_or(params, "dx", 10.0);
                let dy = f64_or(params, "dy", 10.0);
                let copy = self.duplicate_element(id, dx, dy)?.ok_or_else(|| CanvasError::not_found("element", id))?;
                Ok(Reply::new(format!("Duplicated {} as {}", id, copy)).with("id", json!(copy)))
            }
            "reorder_element" => {
                let id = str_param(params, "id")?;
                let direction: ReorderDirection = typed_param(params, "direction")?;
                let moved = self.reorder_element(id, direction);
                found(moved, "element", id, format!("Moved {}", id))
            }
            "list_elements" => {
                let ids = self.document().element_ids();
                Ok(Reply::new(format!("{} elements", ids.len()))
                    .with("count", json!(ids.len()))
                    .with("ids", json!(ids)))
            }
            "add_gradient" => {
                let id = self.add_gradient(typed_param::<Gradient>(params, "gradient")?)?;
                Ok(Reply::new(format!("Added gradient {}", id)).with("id", json!(id)))
            }
            "add_pattern" => {
                let id = self.add_pattern(typed_param::<Pattern>(params, "pattern")?)?;
                Ok(Reply::new(format!("Added pattern {}", id)).with("id", json!(id)))
            }
            "add_filter" => {
                let id = self.add_filter(typed_param::<Filter>(params, "filter")?);
                Ok(Reply::new(format!("Added filter {}", id)).with("id", json!(id)))
            }
            "add_symbol" => {
                let id = self.add_symbol(typed_param::<Symbol>(params, "symbol")?);
                Ok(Reply::new(format!("Added symbol {}", id)).with("id", json!(id)))
            }
            "add_clip_path" => {
                let id = self.add_clip_path(typed_param::<ClipPath>(params, "clipPath")?);
                Ok(Reply::new(format!("Added clip path {}", id)).with("id", json!(id)))
            }
            "add_defs" => {
                let id = self.add_defs(str_param(params, "markup")?);
                Ok(Reply::new("Added definition").with("id", json!(id)))
            }
            "remove_defs" => {
                let id = str_param(params, "id")?;
                let removed = self.remove_defs(id);
                found(removed, "definition", id, format!("Removed definition {}", id))
            }
            "add_raw_element" => {
                let id = self.add_raw_element(str_param(params, "markup")?)?;
                Ok(Reply::new("Added raw element").with("id", json!(id)))
            }
            "remove_raw_element" => {
                let id = str_param(params, "id")?;
                let removed = self.remove_raw_element(id);
                found(removed, "raw element", id, format!("Removed raw element {}", id))
            }
            "create_layer" => {
                let name = params.get("name").and_then(Value::as_str);
                let insert_at = params.get("insertAt").and_then(Value::as_u64).map(|i| i as usize);
                let id = self.layers_mut().create_layer(name, insert_at);
                Ok(Reply::new(format!("Created layer {}", id)).with("id", json!(id)))
            }
            "delete_layer" => {
                let id = str_param(params, "id")?;
                self.layers_mut().delete_layer(id)?;
                Ok(Reply::new(format!("Deleted layer {}", id)))
            }
            "reorder_layer" => {
                let id = str_param(params, "id")?;
                let index = params.get("index").and_then(Value::as_u64).ok_or_else(|| missing("index"))?;
                self.layers_mut().reorder_layer(id, index as usize)?;
                Ok(Reply::new(format!("Moved layer {} to {}", id, index)))
            }
            "rename_layer" => {
                let id = str_param(params, "id")?;
                let name = str_param(params, "name")?;
                self.layers_mut().rename_layer(id, name)?;
                Ok(Reply::new(format!("Renamed layer {} to {}", id, name)))
            }
            "set_layer_visibility" => {
                let id = str_param(params, "id")?;
                let visible = bool_param(params, "visible")?;
                self.layers_mut().set_visibility(id, visible)?;
                Ok(Reply::new(format!("Layer {} {}", id, if visible { "shown" } else { "hidden" })))
            }
            "set_layer_lock" => {
                let id = str_param(params, "id")?;
                let locked = bool_param(params, "locked")?;
                self.layers_mut().set_lock(id, locked)?;
                Ok(Reply::new(format!("Layer {} {}", id, if locked { "locked" } else { "unlocked" })))
            }
            "set_layer_opacity" => {
                let id = str_param(params, "id")?;
                let opacity = f64_param(params, "opacity")?;
                self.layers_mut().set_opacity(id, opacity)?;
                Ok(Reply::new(format!("Layer {} opacity set to {}", id, opacity)))
            }
            "set_layer_blend_mode" => {
                let id = str_param(params, "id")?;
                let mode = params.get("blendMode").and_then(Value::as_str);
                self.layers_mut().set_blend_mode(id, mode)?;
                Ok(Reply::new(format!("Layer {} blend mode updated", id)))
            }
            "set_active_layer" => {
                let id = str_param(params, "id")?;
                self.layers_mut().set_active(id)?;
                Ok(Reply::new(format!("Active layer is {}", id)))
            }
            "move_to_layer" => {
                let element_id = str_param(params, "elementId")?;
                let layer_id = str_param(params, "layerId")?;
                self.move_to_layer(element_id, layer_id)?;
                Ok(Reply::new(format!("Moved {} to {}", element_id, layer_id)))
            }
            "merge_layers" => {
                let source = str_param(params, "source")?;
                let target = str_param(params, "target")?;
                self.layers_mut().merge_layers(source, target)?;
                Ok(Reply::new(format!("Merged {} into {}", source, target)))
            }
            "duplicate_layer" => {
                let id = str_param(params, "id")?;
                let copy = self.layers_mut().duplicate_layer(id)?;
                Ok(Reply::new(format!("Duplicated layer {} as {}", id, copy)).with("id", json!(copy)))
            }
            "list_layers" => {
                let layers = serde_json::to_value(self.layers().layers())?;
                Ok(Reply::new(format!("{} layers", self.layers().len()))
                    .with("active", json!(self.layers().active_layer_id()))
                    .with("layers", layers))
            }
            "undo" | "redo" => {
                let steps = usize_or(params, "steps", 1);
                let moved = if action == "undo" { self.undo(steps) } else { self.redo(steps) };
                let reply = if moved { Reply::new(format!("{} {} step(s)", action, steps)) } else { Reply::new(format!("Nothing to {}", action)) };
                Ok(reply
                    .with("changed", json!(moved))
                    .with("currentIndex", json!(self.history().current_index())))
            }
            "goto" => {
                let index = params.get("index").and_then(Value::as_u64).ok_or_else(|| missing("index"))?;
                if !self.goto(index as usize) {
                    return Err(CanvasError::InvalidArgument(format!("history index {} out of range", index)));
                }
                Ok(Reply::new(format!("Jumped to history entry {}", index)))
            }
            "history" => {
                let summary = serde_json::to_value(self.history().summary())?;
                Ok(Reply::new(format!("{} entries", self.history().entries().len()))
                    .with("canUndo", json!(self.history().can_undo()))
                    .with("canRedo", json!(self.history().can_redo()))
                    .with("history", summary))
            }
            "export" => {
                let options = ExportOptions {
                    minify: params.get("minify").and_then(Value::as_bool).unwrap_or(false),
                    pretty: params.get("pretty").and_then(Value::as_bool).unwrap_or(true),
                };
                Ok(Reply::new("Exported markup").with("markup", json!(self.export_markup(options))))
            }
            "to_json" => {
                let state = serde_json::to_value(self.document().to_json())?;
                Ok(Reply::new("Document state").with("document", state))
            }
            "save" => {
                let path = params.get("path").and_then(Value::as_str).map(PathBuf::from);
                let saved = self.save(&FsStorage, path.as_deref())?;
                Ok(Reply::new(format!("Saved {}", saved.display())).with("path", json!(saved)))
            }
            "open" => {
                let path = PathBuf::from(str_param(params, "path")?);
                self.open(&FsStorage, &path)?;
                Ok(Reply::new(format!("Opened {}", path.display())))
            }
            "list_templates" => {
                let filter: TemplateFilter = typed_params(params)?;
                self.templates_mut().load();
                let templates = serde_json::to_value(self.templates().list(&filter))?;
                Ok(Reply::new("Templates").with("templates", templates))
            }
            "save_template" => {
                let name = str_param(params, "name")?;
                let content = str_param(params, "content")?;
                let options: SaveOptions = typed_params(params)?;
                let template = self.templates_mut().save(name, content, options)?;
                Ok(Reply::new(format!("Saved template {}", template.name)).with("id", json!(template.id)))
            }
            "insert_template" => {
                let id = str_param(params, "id")?;
                let group = self.insert_template(id, f64_or(params, "x", 0.0), f64_or(params, "y", 0.0))?;
                Ok(Reply::new(format!("Inserted template {}", id)).with("id", json!(group)))
            }
            _ => Err(CanvasError::InvalidArgument(format!("unknown action `{}`", action))),
        }
    }
}
