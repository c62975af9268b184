use std::path::{Path, PathBuf};

use log::{debug, info};
use serde_json::{Map, Value};

use crate::config::Config;
use crate::document::{CanvasOptions, Document, DocumentState, ReorderDirection};
use crate::error::{CanvasError, Result};
use crate::history::HistoryManager;
use crate::layers::LayerManager;
use crate::objects::Element;
use crate::storage::Storage;
use crate::svg::ExportOptions;
use crate::templates::TemplateManager;
use crate::types::{ClipPath, Filter, Gradient, Pattern, Symbol};

pub struct Session {
    document: Document,
    layers: LayerManager,
    history: HistoryManager,
    templates: TemplateManager,
    config: Config,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        let mut session = Self::from_parts(Config::default());
        session.record("create_canvas", "Created 800x600 canvas");
        session
    }

    pub fn with_config(config: Config) -> Result<Self> {
        let mut session = Self::from_parts(config);
        let canvas = session.config.canvas.clone();
        let options = CanvasOptions { background: canvas.background, ..CanvasOptions::default() };
        session.create_canvas(canvas.width, canvas.height, options)?;
        Ok(session)
    }

    fn from_parts(config: Config) -> Self {
        Self {
            document: Document::new(),
            layers: LayerManager::new(),
            history: HistoryManager::new(config.history.max_entries),
            templates: TemplateManager::new(config.templates.root.clone()),
            config,
        }
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Direct document access. Changes made here are not recorded in history.
    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    pub fn layers(&self) -> &LayerManager {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut LayerManager {
        &mut self.layers
    }

    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn templates(&self) -> &TemplateManager {
        &self.templates
    }

    pub fn templates_mut(&mut self) -> &mut TemplateManager {
        &mut self.templates
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn record(&mut self, action: &str, description: &str) {
        self.history.record(action, description, self.document.to_json());
    }

    pub fn create_canvas(&mut self, width: f64, height: f64, options: CanvasOptions) -> Result<()> {
        self.document.create_canvas(width, height, options)?;
        self.layers = LayerManager::new();
        self.history.clear();
        self.record("create_canvas", &format!("Created {}x{} canvas", width, height));
        Ok(())
    }

    pub fn resize_canvas(&mut self, width: f64, height: f64) -> Result<()> {
        self.document.resize(width, height)?;
        self.record("resize_canvas", &format!("Resized canvas to {}x{}", width, height));
        Ok(())
    }

    pub fn set_background(&mut self, background: Option<String>) {
        self.document.set_background(background);
        self.record("set_background", "Changed canvas background");
    }

    fn ensure_active_layer_unlocked(&self) -> Result<()> {
        match self.layers.active_layer() {
            Some(layer) if layer.locked => Err(CanvasError::LayerLocked(layer.id.clone())),
            _ => Ok(()),
        }
    }

    pub fn add_element(&mut self, element: Element) -> Result<String> {
        self.ensure_active_layer_unlocked()?;
        let action = format!("draw_{}", element.kind.prefix().replace('-', "_"));
        let id = self.document.add_element(element);
        self.layers.add_element_to_active_layer(&id)?;
        self.record(&action, &format!("Added {}", id));
        Ok(id)
    }

    pub fn update_element(&mut self, id: &str, changes: &Map<String, Value>) -> Result<bool> {
        let found = self.document.update_element(id, changes)?;
        if found {
            self.record("update_element", &format!("Updated {}", id));
        }
        Ok(found)
    }

    pub fn modify_element(&mut self, id: &str, action: &str, edit: impl FnOnce(&mut Element)) -> bool {
        let found = self.document.modify_element(id, edit);
        if found {
            self.record(action, &format!("Modified {}", id));
        }
        found
    }

    pub fn remove_element(&mut self, id: &str) -> bool {
        let mut ids = Vec::new();
        match self.document.get_element(id) {
            Some(element) => element.collect_ids(&mut ids),
            None => return false,
        }
        self.document.remove_element(id);
        for removed in &ids {
            self.layers.remove_element(removed);
        }
        self.record("remove_element", &format!("Removed {}", id));
        true
    }

    pub fn duplicate_element(&mut self, id: &str, dx: f64, dy: f64) -> Result<Option<String>> {
        let target = match self.layers.layer_of(id) {
            Some(layer) => layer.id.clone(),
            None => self.layers.active_layer_id().map(str::to_string).unwrap_or_default(),
        };
        if self.layers.get(&target).is_some_and(|l| l.locked) {
            return Err(CanvasError::LayerLocked(target));
        }
        let Some(copy) = self.document.duplicate_element(id, dx, dy) else {
            return Ok(None);
        };
        if self.layers.get(&target).is_some() {
            self.layers.add_element_to_layer(&target, &copy)?;
        } else {
            self.layers.add_element_to_active_layer(&copy)?;
        }
        self.record("duplicate_element", &format!("Duplicated {} as {}", id, copy));
        Ok(Some(copy))
    }

    pub fn reorder_element(&mut self, id: &str, direction: ReorderDirection) -> bool {
        let found = self.document.reorder_element(id, direction);
        if found {
            self.record("reorder_element", &format!("Moved {} {:?}", id, direction));
        }
        found
    }

    pub fn move_to_layer(&mut self, element_id: &str, layer_id: &str) -> Result<()> {
        if self.document.get_element(element_id).is_none()
            && !self.document.state().all_ids().iter().any(|id| id == element_id)
        {
            return Err(CanvasError::not_found("element", element_id));
        }
        self.layers.add_element_to_layer(layer_id, element_id)
    }

    pub fn embed_image(&mut self, bytes: &[u8], x: f64, y: f64) -> Result<String> {
        self.ensure_active_layer_unlocked()?;
        let id = self.document.embed_image(bytes, x, y)?;
        self.layers.add_element_to_active_layer(&id)?;
        self.record("embed_image", &format!("Embedded {}", id));
        Ok(id)
    }

    pub fn add_gradient(&mut self, gradient: Gradient) -> Result<String> {
        let id = self.document.add_gradient(gradient)?;
        self.record("add_gradient", &format!("Added gradient {}", id));
        Ok(id)
    }

    pub fn add_pattern(&mut self, pattern: Pattern) -> Result<String> {
        let id = self.document.add_pattern(pattern)?;
        self.record("add_pattern", &format!("Added pattern {}", id));
        Ok(id)
    }

    pub fn add_filter(&mut self, filter: Filter) -> String {
        let id = self.document.add_filter(filter);
        self.record("add_filter", &format!("Added filter {}", id));
        id
    }

    pub fn add_symbol(&mut self, symbol: Symbol) -> String {
        let id = self.document.add_symbol(symbol);
        self.record("add_symbol", &format!("Added symbol {}", id));
        id
    }

    pub fn add_clip_path(&mut self, clip: ClipPath) -> String {
        let id = self.document.add_clip_path(clip);
        self.record("add_clip_path", &format!("Added clip path {}", id));
        id
    }

    pub fn add_defs(&mut self, markup: &str) -> Option<String> {
        let id = self.document.add_defs(markup);
        self.record("add_defs", "Added raw definition");
        id
    }

    pub fn remove_defs(&mut self, id: &str) -> bool {
        let removed = self.document.remove_defs(id);
        if removed {
            self.record("remove_defs", &format!("Removed definition {}", id));
        }
        removed
    }

    pub fn add_raw_element(&mut self, markup: &str) -> Result<Option<String>> {
        self.ensure_active_layer_unlocked()?;
        let id = self.document.add_raw_element(markup);
        if let Some(id) = &id {
            self.layers.add_element_to_active_layer(id)?;
        }
        self.record("add_raw_element", "Added raw element");
        Ok(id)
    }

    pub fn remove_raw_element(&mut self, id: &str) -> bool {
        let removed = self.document.remove_raw_element(id);
        if removed {
            self.layers.remove_element(id);
            self.record("remove_raw_element", &format!("Removed raw element {}", id));
        }
        removed
    }

    pub fn insert_template(&mut self, template_id: &str, x: f64, y: f64) -> Result<String> {
        self.templates.load();
        let content = self
            .templates
            .get(template_id)
            .map(|t| t.content.clone())
            .ok_or_else(|| CanvasError::not_found("template", template_id))?;
        self.ensure_active_layer_unlocked()?;
        let id = self.document.next_id("group");
        let markup = format!(r#"<g id="{}" transform="translate({} {})">{}</g>"#, id, x, y, content);
        self.document.add_raw_element(&markup);
        self.layers.add_element_to_active_layer(&id)?;
        self.record("insert_template", &format!("Inserted template {}", template_id));
        Ok(id)
    }

    pub fn begin_group(&mut self) {
        self.history.begin_group();
    }

    pub fn end_group(&mut self, action: &str, description: &str) -> Option<String> {
        self.history.end_group(action, description, self.document.to_json())
    }

    fn restore(&mut self, state: DocumentState) {
        self.document.from_json(state);
        let top_level: Vec<String> = self.document.elements().iter().map(|e| e.id.clone()).collect();
        self.layers.reconcile(&self.document.state().all_ids(), &top_level);
    }

    pub fn undo(&mut self, steps: usize) -> bool {
        match self.history.undo(steps) {
            Some(state) => {
                self.restore(state);
                true
            }
            None => false,
        }
    }

    pub fn redo(&mut self, steps: usize) -> bool {
        match self.history.redo(steps) {
            Some(state) => {
                self.restore(state);
                true
            }
            None => false,
        }
    }

    pub fn goto(&mut self, index: usize) -> bool {
        match self.history.goto(index) {
            Some(state) => {
                self.restore(state);
                true
            }
            None => false,
        }
    }

    pub fn export_markup(&self, options: ExportOptions) -> String {
        self.document.export_markup(options)
    }

    pub fn save(&mut self, storage: &dyn Storage, path: Option<&Path>) -> Result<PathBuf> {
        let mut metadata = self.document.metadata();
        metadata.layers = self.layers.to_json();
        metadata.history = self.history.summary();
        self.document.save_with_metadata(storage, path, &metadata)
    }

    /// Opens a file, restoring layers from its sidecar when present. History
    /// restarts with a single `open` entry.
    pub fn open(&mut self, storage: &dyn Storage, path: &Path) -> Result<()> {
        let metadata = self.document.open(storage, path)?;
        self.layers = LayerManager::new();
        if let Some(meta) = metadata {
            debug!(layers = meta.layers.len(); "Restoring layers from sidecar");
            self.layers.from_json(meta.layers);
            let top_level: Vec<String> = self.document.elements().iter().map(|e| e.id.clone()).collect();
            self.layers.reconcile(&self.document.state().all_ids(), &top_level);
        }
        self.history.clear();
        self.record("open", &path.display().to_string());
        info!(path:? = path, layers = self.layers.len(); "Session opened document");
        Ok(())
    }
}
