use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use log::{debug, info, trace, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CanvasError, Result};
use crate::history::HistorySummary;
use crate::ids::IdAllocator;
use crate::layers::Layer;
use crate::objects::{Element, ElementKind};
use crate::storage::Storage;
use crate::svg::{self, ExportOptions};
use crate::types::{CanvasConfig, ClipPath, Defs, Filter, Gradient, Pattern, Symbol, ViewBox};

pub const METADATA_VERSION: &str = "1.0";

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct DocumentState {
    pub canvas: CanvasConfig,
    #[serde(default)]
    pub defs: Defs,
    #[serde(default)]
    pub elements: Vec<Element>,
    #[serde(default)]
    pub raw_defs: Vec<String>,
    #[serde(default)]
    pub raw_elements: Vec<String>,
}

impl DocumentState {
    pub fn all_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for element in &self.elements {
            element.collect_ids(&mut ids);
        }
        ids.extend(self.defs.ids());
        for fragment in self.raw_defs.iter().chain(&self.raw_elements) {
            ids.extend(svg::all_attr_values(fragment, "id"));
        }
        ids
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    ElementAdded,
    ElementRemoved,
    ElementUpdated,
    CanvasChanged,
    DefsChanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentEvent {
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
}

pub type Listener = Box<dyn FnMut(&DocumentEvent)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReorderDirection {
    Front,
    Back,
    Forward,
    Backward,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasOptions {
    #[serde(default)]
    pub view_box: Option<ViewBox>,
    #[serde(default)]
    pub background: Option<String>,
    #[serde(default)]
    pub preserve_aspect_ratio: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CanvasSummary {
    pub width: f64,
    pub height: f64,
    #[serde(default, rename = "viewBox")]
    pub view_box: Option<String>,
    #[serde(default)]
    pub background: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct Metadata {
    pub version: String,
    pub canvas: CanvasSummary,
    #[serde(default)]
    pub layers: Vec<Layer>,
    #[serde(default)]
    pub symbols: BTreeMap<String, Symbol>,
    #[serde(default)]
    pub history: HistorySummary,
}

pub fn sidecar_path(path: &Path) -> PathBuf {
    path.with_extension("meta.json")
}

pub struct Document {
    state: DocumentState,
    ids: IdAllocator,
    path: Option<PathBuf>,
    dirty: bool,
    listeners: Vec<Listener>,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        Self::with_ids(IdAllocator::new())
    }

    pub fn with_ids(ids: IdAllocator) -> Self {
        Self { state: DocumentState::default(), ids, path: None, dirty: false, listeners: Vec::new() }
    }

    pub fn state(&self) -> &DocumentState {
        &self.state
    }

    pub fn canvas(&self) -> &CanvasConfig {
        &self.state.canvas
    }

    pub fn elements(&self) -> &[Element] {
        &self.state.elements
    }

    pub fn defs(&self) -> &Defs {
        &self.state.defs
    }

    pub fn raw_defs(&self) -> &[String] {
        &self.state.raw_defs
    }

    pub fn raw_elements(&self) -> &[String] {
        &self.state.raw_elements
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    pub fn next_id(&mut self, prefix: &str) -> String {
        self.ids.short_id(prefix)
    }

    pub fn create(&mut self, kind: ElementKind) -> Element {
        let id = self.next_id(kind.prefix());
        Element::new(id, kind)
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&DocumentEvent) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    fn emit(&mut self, kind: EventKind, element_id: Option<&str>) {
        let event = DocumentEvent { kind, element_id: element_id.map(str::to_string) };
        trace!(event:?; "Document event");
        for listener in self.listeners.iter_mut() {
            listener(&event);
        }
    }

    fn touch(&mut self, kind: EventKind, element_id: Option<&str>) {
        self.dirty = true;
        self.emit(kind, element_id);
    }

    pub fn create_canvas(&mut self, width: f64, height: f64, options: CanvasOptions) -> Result<()> {
        let mut canvas = CanvasConfig::new(width, height)?;
        canvas.view_box = options.view_box;
        canvas.background = options.background;
        canvas.preserve_aspect_ratio = options.preserve_aspect_ratio;
        self.state = DocumentState { canvas, ..DocumentState::default() };
        self.ids.reset_all();
        self.path = None;
        self.dirty = false;
        info!(width, height; "Created canvas");
        self.emit(EventKind::CanvasChanged, None);
        Ok(())
    }

    pub fn resize(&mut self, width: f64, height: f64) -> Result<()> {
        let resized = CanvasConfig::new(width, height)?;
        self.state.canvas.width = resized.width;
        self.state.canvas.height = resized.height;
        self.touch(EventKind::CanvasChanged, None);
        Ok(())
    }

    pub fn set_background(&mut self, background: Option<String>) {
        self.state.canvas.background = background;
        self.touch(EventKind::CanvasChanged, None);
    }

    pub fn set_view_box(&mut self, view_box: Option<ViewBox>) {
        self.state.canvas.view_box = view_box;
        self.touch(EventKind::CanvasChanged, None);
    }

    pub fn open(&mut self, storage: &dyn Storage, path: &Path) -> Result<Option<Metadata>> {
        let text = storage.read_to_string(path)?;
        let scanned = svg::scan_markup(&text)?;
        let mut state = DocumentState {
            canvas: scanned.canvas,
            raw_defs: scanned.raw_defs,
            raw_elements: scanned.raw_elements,
            ..DocumentState::default()
        };

        let metadata = read_sidecar(storage, path);
        if let Some(meta) = &metadata {
            if state.canvas.background.is_none() {
                state.canvas.background = meta.canvas.background.clone();
            }
            if state.canvas.view_box.is_none() {
                state.canvas.view_box = meta.canvas.view_box.as_deref().and_then(ViewBox::parse);
            }
            for symbol in meta.symbols.values() {
                let marker = format!(r#"id="{}""#, symbol.id);
                state.raw_defs.retain(|fragment| !fragment.contains(&marker));
                state.defs.symbols.push(symbol.clone());
            }
        }

        self.ids.reset_all();
        self.ids.resync(scanned.ids);
        self.ids.resync(state.all_ids());
        self.state = state;
        self.path = Some(path.to_path_buf());
        self.dirty = false;
        info!(path:? = path, sidecar = metadata.is_some(); "Opened document");
        self.emit(EventKind::CanvasChanged, None);
        Ok(metadata)
    }

    pub fn metadata(&self) -> Metadata {
        let canvas = &self.state.canvas;
        Metadata {
            version: METADATA_VERSION.to_string(),
            canvas: CanvasSummary {
                width: canvas.width,
                height: canvas.height,
                view_box: Some(canvas.effective_view_box().to_string()),
                background: canvas.background.clone(),
            },
            layers: Vec::new(),
            symbols: self.state.defs.symbols.iter().map(|s| (s.id.clone(), s.clone())).collect(),
            history: HistorySummary::default(),
        }
    }

    pub fn save(&mut self, storage: &dyn Storage, path: Option<&Path>) -> Result<PathBuf> {
        let metadata = self.metadata();
        self.save_with_metadata(storage, path, &metadata)
    }

    /// Writes the markup and its sidecar. Both are serialized before anything
    /// touches storage.
    pub fn save_with_metadata(
        &mut self,
        storage: &dyn Storage,
        path: Option<&Path>,
        metadata: &Metadata,
    ) -> Result<PathBuf> {
        let target = path
            .map(Path::to_path_buf)
            .or_else(|| self.path.clone())
            .ok_or(CanvasError::NoPathSpecified)?;
        let markup = self.export_markup(ExportOptions::default());
        let sidecar = serde_json::to_vec_pretty(metadata)?;

        storage.write(&target, markup.as_bytes())?;
        storage.write(&sidecar_path(&target), &sidecar)?;
        info!(path:? = target, bytes = markup.len(); "Saved document");
        self.path = Some(target.clone());
        self.dirty = false;
        Ok(target)
    }

    pub fn export_markup(&self, options: ExportOptions) -> String {
        svg::render_document(&self.state, options)
    }

    /// Appends a top-level element. Empty or already-used ids (at any depth
    /// of `element`) are replaced with fresh ones; the final root id is returned.
    pub fn add_element(&mut self, mut element: Element) -> String {
        let mut taken: HashSet<String> = self.state.all_ids().into_iter().collect();
        self.claim_ids(&mut element, &mut taken);
        let id = element.id.clone();
        debug!(id = id.as_str(); "Adding element");
        self.state.elements.push(element);
        self.touch(EventKind::ElementAdded, Some(&id));
        id
    }

    fn claim_ids(&mut self, element: &mut Element, taken: &mut HashSet<String>) {
        if element.id.is_empty() || taken.contains(&element.id) {
            let fresh = loop {
                let candidate = self.ids.short_id(element.kind.prefix());
                if !taken.contains(&candidate) {
                    break candidate;
                }
            };
            debug!(requested = element.id.as_str(), assigned = fresh.as_str(); "Reassigned element id");
            element.id = fresh;
        } else {
            self.ids.resync([element.id.as_str()]);
        }
        taken.insert(element.id.clone());
        if let Some(children) = element.children_mut() {
            for child in children.iter_mut() {
                self.claim_ids(child, taken);
            }
        }
    }

    pub fn get_element(&self, id: &str) -> Option<&Element> {
        self.state.elements.iter().find_map(|e| e.find(id))
    }

    fn get_element_mut(&mut self, id: &str) -> Option<&mut Element> {
        self.state.elements.iter_mut().find_map(|e| e.find_mut(id))
    }

    pub fn update_element(&mut self, id: &str, changes: &Map<String, Value>) -> Result<bool> {
        let Some(element) = self.get_element_mut(id) else {
            return Ok(false);
        };
        let updated = element.updated(changes)?;
        *element = updated;
        self.touch(EventKind::ElementUpdated, Some(id));
        Ok(true)
    }

    pub fn modify_element(&mut self, id: &str, edit: impl FnOnce(&mut Element)) -> bool {
        let Some(element) = self.get_element_mut(id) else {
            return false;
        };
        edit(element);
        element.id = id.to_string();
        self.touch(EventKind::ElementUpdated, Some(id));
        true
    }

    pub fn remove_element(&mut self, id: &str) -> bool {
        let removed = remove_from(&mut self.state.elements, id);
        if removed.is_some() {
            debug!(id; "Removed element");
            self.touch(EventKind::ElementRemoved, Some(id));
        }
        removed.is_some()
    }

    pub fn duplicate_element(&mut self, id: &str, dx: f64, dy: f64) -> Option<String> {
        let source = self.get_element(id)?.clone();
        let mut copy = source.deep_clone(&mut self.ids, None);
        copy.translate(dx, dy);
        Some(self.add_element(copy))
    }

    pub fn reorder_element(&mut self, id: &str, direction: ReorderDirection) -> bool {
        let elements = &mut self.state.elements;
        let Some(index) = elements.iter().position(|e| e.id == id) else {
            return false;
        };
        let last = elements.len() - 1;
        match direction {
            ReorderDirection::Front => {
                let element = elements.remove(index);
                elements.push(element);
            }
            ReorderDirection::Back => {
                let element = elements.remove(index);
                elements.insert(0, element);
            }
            ReorderDirection::Forward => {
                if index < last {
                    elements.swap(index, index + 1);
                }
            }
            ReorderDirection::Backward => {
                if index > 0 {
                    elements.swap(index, index - 1);
                }
            }
        }
        self.touch(EventKind::ElementUpdated, Some(id));
        true
    }

    pub fn element_ids(&self) -> Vec<String> {
        let mut ids = Vec::new();
        for element in &self.state.elements {
            element.collect_ids(&mut ids);
        }
        ids
    }

    pub fn element_count(&self) -> usize {
        self.element_ids().len()
    }

    pub fn embed_image(&mut self, bytes: &[u8], x: f64, y: f64) -> Result<String> {
        let id = self.next_id("image");
        let element = Element::image_from_bytes(id, x, y, bytes)?;
        Ok(self.add_element(element))
    }

    fn def_id(&mut self, requested: &str, prefix: &str) -> String {
        if requested.is_empty() {
            self.ids.short_id(prefix)
        } else {
            self.ids.resync([requested]);
            requested.to_string()
        }
    }

    pub fn add_gradient(&mut self, mut gradient: Gradient) -> Result<String> {
        gradient.validate()?;
        gradient.id = self.def_id(&gradient.id, "gradient");
        let id = gradient.id.clone();
        upsert(&mut self.state.defs.gradients, gradient, |g| g.id == id);
        self.touch(EventKind::DefsChanged, Some(&id));
        Ok(id)
    }

    pub fn add_pattern(&mut self, mut pattern: Pattern) -> Result<String> {
        if !(pattern.width > 0.0 && pattern.height > 0.0) {
            return Err(CanvasError::InvalidArgument(format!(
                "pattern tile must be positive, got {}x{}",
                pattern.width, pattern.height
            )));
        }
        pattern.id = self.def_id(&pattern.id, "pattern");
        let id = pattern.id.clone();
        upsert(&mut self.state.defs.patterns, pattern, |p| p.id == id);
        self.touch(EventKind::DefsChanged, Some(&id));
        Ok(id)
    }

    pub fn add_filter(&mut self, mut filter: Filter) -> String {
        filter.id = self.def_id(&filter.id, "filter");
        let id = filter.id.clone();
        upsert(&mut self.state.defs.filters, filter, |f| f.id == id);
        self.touch(EventKind::DefsChanged, Some(&id));
        id
    }

    pub fn add_symbol(&mut self, mut symbol: Symbol) -> String {
        symbol.id = self.def_id(&symbol.id, "symbol");
        let id = symbol.id.clone();
        upsert(&mut self.state.defs.symbols, symbol, |s| s.id == id);
        self.touch(EventKind::DefsChanged, Some(&id));
        id
    }

    pub fn add_clip_path(&mut self, mut clip: ClipPath) -> String {
        clip.id = self.def_id(&clip.id, "clip");
        let id = clip.id.clone();
        upsert(&mut self.state.defs.clip_paths, clip, |c| c.id == id);
        self.touch(EventKind::DefsChanged, Some(&id));
        id
    }

    pub fn add_defs(&mut self, markup: &str) -> Option<String> {
        let id = svg::attr_value(markup, "id");
        if let Some(id) = &id {
            let marker = format!(r#"id="{}""#, id);
            self.state.raw_defs.retain(|fragment| !fragment.contains(&marker));
            self.ids.resync([id.as_str()]);
        }
        self.state.raw_defs.push(markup.to_string());
        self.touch(EventKind::DefsChanged, id.as_deref());
        id
    }

    pub fn remove_defs(&mut self, id: &str) -> bool {
        let marker = format!(r#"id="{}""#, id);
        let before = self.state.raw_defs.len();
        self.state.raw_defs.retain(|fragment| !fragment.contains(&marker));
        let removed = self.state.raw_defs.len() != before;
        if removed {
            self.touch(EventKind::DefsChanged, Some(id));
        }
        removed
    }

    pub fn add_raw_element(&mut self, markup: &str) -> Option<String> {
        let id = svg::attr_value(markup, "id");
        if let Some(id) = &id {
            let marker = format!(r#"id="{}""#, id);
            self.state.raw_elements.retain(|fragment| !fragment.contains(&marker));
            self.ids.resync([id.as_str()]);
        }
        self.state.raw_elements.push(markup.to_string());
        self.touch(EventKind::ElementAdded, id.as_deref());
        id
    }

    pub fn remove_raw_element(&mut self, id: &str) -> bool {
        let marker = format!(r#"id="{}""#, id);
        let before = self.state.raw_elements.len();
        self.state.raw_elements.retain(|fragment| !fragment.contains(&marker));
        let removed = self.state.raw_elements.len() != before;
        if removed {
            self.touch(EventKind::ElementRemoved, Some(id));
        }
        removed
    }

    pub fn to_json(&self) -> DocumentState {
        self.state.clone()
    }

    pub fn from_json(&mut self, state: DocumentState) {
        self.ids.resync(state.all_ids());
        self.state = state;
        self.dirty = true;
        self.emit(EventKind::CanvasChanged, None);
    }
}

fn read_sidecar(storage: &dyn Storage, path: &Path) -> Option<Metadata> {
    let sidecar = sidecar_path(path);
    if !storage.exists(&sidecar) {
        return None;
    }
    let parsed = storage
        .read(&sidecar)
        .map_err(CanvasError::from)
        .and_then(|bytes| serde_json::from_slice::<Metadata>(&bytes).map_err(CanvasError::from));
    match parsed {
        Ok(meta) => Some(meta),
        Err(e) => {
            warn!(path:? = sidecar, error:% = e; "Ignoring unreadable metadata sidecar");
            None
        }
    }
}

fn remove_from(elements: &mut Vec<Element>, id: &str) -> Option<Element> {
    if let Some(index) = elements.iter().position(|e| e.id == id) {
        return Some(elements.remove(index));
    }
    elements
        .iter_mut()
        .filter_map(|e| e.children_mut())
        .find_map(|children| remove_from(children, id))
}

fn upsert<T>(items: &mut Vec<T>, item: T, same: impl Fn(&T) -> bool) {
    match items.iter().position(same) {
        Some(index) => items[index] = item,
        None => items.push(item),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::FsStorage;
    use crate::types::{FilterKind, GradientStop};
    use serde_json::json;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn doc_with_shapes() -> Document {
        let mut doc = Document::new();
        let rect = doc.create(ElementKind::Rect { x: 10.0, y: 10.0, width: 100.0, height: 50.0, rx: None, ry: None });
        doc.add_element(rect.with_fill("#ff0000"));
        let circle = Element::circle(doc.next_id("circle"), 200.0, 200.0, 30.0);
        doc.add_element(circle);
        doc
    }

    #[test]
    fn create_canvas_validates_and_resets() {
        let mut doc = doc_with_shapes();
        assert!(matches!(
            doc.create_canvas(0.0, 100.0, CanvasOptions::default()),
            Err(CanvasError::InvalidDimension { .. })
        ));
        assert_eq!(doc.elements().len(), 2);

        doc.create_canvas(1024.0, 768.0, CanvasOptions { background: Some("#fff".into()), ..Default::default() })
            .unwrap();
        assert!(doc.elements().is_empty());
        assert_eq!(doc.canvas().width, 1024.0);
        assert_eq!(doc.next_id("rect"), "rect-1");
    }

    #[test]
    fn add_element_keeps_ids_unique() {
        let mut doc = doc_with_shapes();
        let id = doc.add_element(Element::rect("rect-1", 0.0, 0.0, 1.0, 1.0));
        assert_eq!(id, "rect-2");
        let id = doc.add_element(Element::rect("", 0.0, 0.0, 1.0, 1.0));
        assert_eq!(id, "rect-3");
        let id = doc.add_element(Element::group("group-1", vec![Element::circle("circle-1", 0.0, 0.0, 1.0)]));
        assert_eq!(id, "group-1");
        let ids = doc.element_ids();
        let unique: HashSet<_> = ids.iter().collect();
        assert_eq!(ids.len(), unique.len());
    }

    #[test]
    fn explicit_ids_push_counters_forward() {
        let mut doc = Document::new();
        doc.add_element(Element::rect("rect-40", 0.0, 0.0, 1.0, 1.0));
        assert_eq!(doc.next_id("rect"), "rect-41");
    }

    #[test]
    fn lookup_update_and_remove_reach_into_groups() {
        let mut doc = Document::new();
        doc.add_element(Element::group("group-1", vec![Element::rect("rect-1", 0.0, 0.0, 5.0, 5.0)]));

        assert!(doc.get_element("rect-1").is_some());
        let changes = json!({"fill": "blue"});
        assert!(doc.update_element("rect-1", changes.as_object().unwrap()).unwrap());
        assert_eq!(doc.get_element("rect-1").unwrap().style.fill.as_deref(), Some("blue"));
        assert!(!doc.update_element("nope", changes.as_object().unwrap()).unwrap());

        assert!(doc.remove_element("rect-1"));
        assert!(!doc.remove_element("rect-1"));
        assert!(doc.get_element("group-1").unwrap().children().unwrap().is_empty());
    }

    #[test]
    fn update_cannot_swap_group_children() {
        let mut doc = Document::new();
        doc.add_element(Element::rect("rect-1", 0.0, 0.0, 1.0, 1.0));
        doc.add_element(Element::group("group-1", Vec::new()));
        let changes = json!({"children": [{"id": "rect-1", "type": "rect", "x": 0, "y": 0, "width": 1, "height": 1}]});
        assert!(matches!(
            doc.update_element("group-1", changes.as_object().unwrap()),
            Err(CanvasError::InvalidArgument(_))
        ));
        assert_eq!(doc.element_ids(), ["rect-1", "group-1"]);
    }

    #[test]
    fn modify_element_cannot_change_the_id() {
        let mut doc = doc_with_shapes();
        assert!(doc.modify_element("rect-1", |e| {
            e.id = "other".into();
            e.style.opacity = Some(0.3);
        }));
        assert_eq!(doc.get_element("rect-1").unwrap().style.opacity, Some(0.3));
        assert!(!doc.modify_element("missing", |_| {}));
    }

    #[test]
    fn duplicate_offsets_and_flattens() {
        let mut doc = Document::new();
        doc.add_element(Element::group("group-1", vec![Element::circle("circle-1", 10.0, 10.0, 2.0)]));
        let copy = doc.duplicate_element("circle-1", 5.0, 5.0).unwrap();
        assert_ne!(copy, "circle-1");
        assert_eq!(doc.elements().len(), 2);
        assert_eq!(doc.elements()[1].id, copy);
        assert!(matches!(doc.elements()[1].kind, ElementKind::Circle { cx, cy, .. } if cx == 15.0 && cy == 15.0));
        assert!(doc.duplicate_element("missing", 0.0, 0.0).is_none());
    }

    #[test]
    fn reorder_moves_within_top_level() {
        let mut doc = Document::new();
        for id in ["a", "b", "c"] {
            doc.add_element(Element::rect(id, 0.0, 0.0, 1.0, 1.0));
        }
        let order = |doc: &Document| doc.elements().iter().map(|e| e.id.clone()).collect::<Vec<_>>();

        assert!(doc.reorder_element("a", ReorderDirection::Front));
        assert_eq!(order(&doc), ["b", "c", "a"]);
        assert!(doc.reorder_element("a", ReorderDirection::Back));
        assert_eq!(order(&doc), ["a", "b", "c"]);
        assert!(doc.reorder_element("a", ReorderDirection::Forward));
        assert_eq!(order(&doc), ["b", "a", "c"]);
        assert!(doc.reorder_element("c", ReorderDirection::Backward));
        assert_eq!(order(&doc), ["b", "c", "a"]);
        assert!(doc.reorder_element("a", ReorderDirection::Forward));
        assert_eq!(order(&doc), ["b", "c", "a"]);
        assert!(!doc.reorder_element("zzz", ReorderDirection::Front));
    }

    #[test]
    fn structured_defs_get_ids() {
        let mut doc = Document::new();
        let id = doc
            .add_gradient(Gradient::linear(vec![GradientStop::new(0.0, "red"), GradientStop::new(1.0, "blue")]))
            .unwrap();
        assert_eq!(id, "gradient-1");
        assert!(doc.add_gradient(Gradient::linear(vec![GradientStop::new(2.0, "red")])).is_err());
        assert_eq!(doc.add_filter(Filter::new(FilterKind::Grayscale)), "filter-1");
        let pattern = Pattern { id: String::new(), width: 0.0, height: 4.0, content: String::new(), pattern_units: None };
        assert!(doc.add_pattern(pattern).is_err());
        assert_eq!(doc.add_symbol(Symbol { id: "logo".into(), view_box: None, children: vec![] }), "logo");
        assert_eq!(doc.add_clip_path(ClipPath { id: String::new(), children: vec![] }), "clip-1");
        assert_eq!(doc.defs().gradients.len(), 1);
    }

    #[test]
    fn raw_defs_replace_by_id() {
        let mut doc = Document::new();
        assert_eq!(doc.add_defs(r#"<marker id="arrow"><path d="M0 0"/></marker>"#).as_deref(), Some("arrow"));
        doc.add_defs(r#"<marker id="arrow"><path d="M1 1"/></marker>"#);
        doc.add_defs(r#"<marker id="arrow-head"/>"#);
        assert_eq!(doc.raw_defs().len(), 2);
        assert!(doc.raw_defs()[1].contains("M1 1") || doc.raw_defs()[0].contains("M1 1"));

        assert!(doc.remove_defs("arrow"));
        assert_eq!(doc.raw_defs(), [r#"<marker id="arrow-head"/>"#.to_string()]);
        assert!(!doc.remove_defs("arrow"));
    }

    #[test]
    fn raw_elements_are_exported_last() {
        let mut doc = doc_with_shapes();
        doc.add_raw_element(r#"<circle id="raw-dot" r="2"/>"#);
        let svg = doc.export_markup(ExportOptions::default());
        assert!(svg.find("raw-dot").unwrap() > svg.find("circle-1").unwrap());
        assert!(doc.remove_raw_element("raw-dot"));
        assert!(doc.raw_elements().is_empty());
    }

    #[test]
    fn json_round_trip_resyncs_ids() {
        let doc = doc_with_shapes();
        let state = doc.to_json();
        let text = serde_json::to_string(&state).unwrap();
        let parsed: DocumentState = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, state);

        let mut fresh = Document::new();
        fresh.from_json(parsed);
        assert_eq!(fresh.state(), doc.state());
        assert_eq!(fresh.next_id("rect"), "rect-2");
        assert_eq!(fresh.next_id("circle"), "circle-2");
    }

    #[test]
    fn listeners_see_every_mutation_in_order() {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = events.clone();
        let mut doc = Document::new();
        doc.subscribe(move |event| sink.borrow_mut().push(event.clone()));

        let id = doc.add_element(Element::rect("rect-1", 0.0, 0.0, 1.0, 1.0));
        doc.modify_element(&id, |e| e.style.fill = Some("red".into()));
        doc.add_defs(r#"<marker id="m"/>"#);
        doc.set_background(Some("#000".into()));
        doc.remove_element(&id);

        let kinds: Vec<EventKind> = events.borrow().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            [
                EventKind::ElementAdded,
                EventKind::ElementUpdated,
                EventKind::DefsChanged,
                EventKind::CanvasChanged,
                EventKind::ElementRemoved
            ]
        );
        assert_eq!(events.borrow()[0].element_id.as_deref(), Some("rect-1"));
        assert!(doc.is_dirty());
    }

    #[test]
    fn save_requires_a_path() {
        let mut doc = Document::new();
        assert!(matches!(doc.save(&FsStorage, None), Err(CanvasError::NoPathSpecified)));
    }

    #[test]
    fn save_then_open_keeps_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drawing.svg");
        let mut doc = doc_with_shapes();
        doc.set_background(Some("#fafafa".into()));
        doc.add_symbol(Symbol {
            id: "star".into(),
            view_box: Some(ViewBox::new(0.0, 0.0, 10.0, 10.0)),
            children: vec![Element::polygon("polygon-1", vec![(5.0, 0.0), (10.0, 10.0), (0.0, 10.0)])],
        });
        let saved = doc.save(&FsStorage, Some(&path)).unwrap();
        assert_eq!(saved, path);
        assert!(!doc.is_dirty());
        assert!(sidecar_path(&path).exists());

        let mut reopened = Document::new();
        let meta = reopened.open(&FsStorage, &path).unwrap().unwrap();
        assert_eq!(meta.version, METADATA_VERSION);
        assert_eq!(reopened.canvas().background.as_deref(), Some("#fafafa"));
        assert_eq!(reopened.raw_elements().len(), 2);
        assert_eq!(reopened.defs().symbols.len(), 1);
        assert!(reopened.raw_defs().is_empty());
        assert_eq!(reopened.next_id("rect"), "rect-2");
        assert_eq!(reopened.next_id("polygon"), "polygon-2");

        // saving again without a path reuses the opened one
        reopened.save(&FsStorage, None).unwrap();
        let again = FsStorage.read_to_string(&path).unwrap();
        assert!(again.contains(r#"id="rect-1""#));
        assert!(again.contains(r#"<symbol id="star""#));
    }

    #[test]
    fn open_missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = Document::new();
        assert!(matches!(doc.open(&FsStorage, &dir.path().join("nope.svg")), Err(CanvasError::Io(_))));
    }

    #[test]
    fn bad_sidecar_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.svg");
        FsStorage.write(&path, br#"<svg width="20" height="10"><rect id="rect-3"/></svg>"#).unwrap();
        FsStorage.write(&sidecar_path(&path), b"{ not json").unwrap();
        let mut doc = Document::new();
        assert!(doc.open(&FsStorage, &path).unwrap().is_none());
        assert_eq!((doc.canvas().width, doc.canvas().height), (20.0, 10.0));
        assert_eq!(doc.next_id("rect"), "rect-4");
    }

    #[test]
    fn explicit_id_clashing_with_opened_markup_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested.svg");
        FsStorage.write(&path, br#"<svg width="20" height="10"><g id="group-1"><rect id="hero"/></g></svg>"#).unwrap();
        let mut doc = Document::new();
        doc.open(&FsStorage, &path).unwrap();

        let id = doc.add_element(Element::rect("hero", 0.0, 0.0, 1.0, 1.0));
        assert_ne!(id, "hero");
        let markup = doc.export_markup(ExportOptions::default());
        assert_eq!(markup.matches(r#"id="hero""#).count(), 1);
    }
}
