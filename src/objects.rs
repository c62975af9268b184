use base64::{engine::general_purpose, Engine as _};
use image::ImageFormat;
use kurbo::{BezPath, Shape};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CanvasError, Result};
use crate::ids::IdAllocator;
use crate::types::Bounds;

const AVERAGE_GLYPH_WIDTH: f64 = 0.6;
const DEFAULT_FONT_SIZE: f64 = 16.0;

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Style {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clip_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aria_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

fn default_font_size() -> f64 {
    DEFAULT_FONT_SIZE
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ElementKind {
    Rect {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rx: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ry: Option<f64>,
    },
    Circle {
        cx: f64,
        cy: f64,
        r: f64,
    },
    Ellipse {
        cx: f64,
        cy: f64,
        rx: f64,
        ry: f64,
    },
    Line {
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
    },
    Polyline {
        points: Vec<(f64, f64)>,
    },
    Polygon {
        points: Vec<(f64, f64)>,
    },
    Path {
        d: String,
    },
    Text {
        x: f64,
        y: f64,
        content: String,
        #[serde(default = "default_font_size")]
        font_size: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        font_family: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        font_weight: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text_anchor: Option<String>,
    },
    TextPath {
        href: String,
        content: String,
        #[serde(default = "default_font_size")]
        font_size: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_offset: Option<String>,
    },
    Image {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        href: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        preserve_aspect_ratio: Option<String>,
    },
    Group {
        children: Vec<Element>,
    },
    Use {
        href: String,
        x: f64,
        y: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        width: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        height: Option<f64>,
    },
}

impl ElementKind {
    pub fn prefix(&self) -> &'static str {
        match self {
            ElementKind::Rect { .. } => "rect",
            ElementKind::Circle { .. } => "circle",
            ElementKind::Ellipse { .. } => "ellipse",
            ElementKind::Line { .. } => "line",
            ElementKind::Polyline { .. } => "polyline",
            ElementKind::Polygon { .. } => "polygon",
            ElementKind::Path { .. } => "path",
            ElementKind::Text { .. } => "text",
            ElementKind::TextPath { .. } => "text-path",
            ElementKind::Image { .. } => "image",
            ElementKind::Group { .. } => "group",
            ElementKind::Use { .. } => "use",
        }
    }

    fn default_style(&self) -> Style {
        let mut style = Style::default();
        match self {
            ElementKind::Line { .. } => {
                style.stroke = Some("#000000".to_string());
                style.stroke_width = Some(1.0);
            }
            ElementKind::Polyline { .. } => {
                style.fill = Some("none".to_string());
                style.stroke = Some("#000000".to_string());
                style.stroke_width = Some(1.0);
            }
            ElementKind::Text { .. } | ElementKind::TextPath { .. } => {
                style.fill = Some("#000000".to_string());
            }
            _ => {}
        }
        style
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct Element {
    #[serde(default)]
    pub id: String,
    #[serde(flatten)]
    pub kind: ElementKind,
    #[serde(flatten)]
    pub style: Style,
}

impl Element {
    pub fn new(id: impl Into<String>, kind: ElementKind) -> Self {
        let style = kind.default_style();
        Self { id: id.into(), kind, style }
    }

    pub fn with_default_style(mut self) -> Self {
        self.fill_default_style();
        self
    }

    fn fill_default_style(&mut self) {
        let defaults = self.kind.default_style();
        if self.style.fill.is_none() {
            self.style.fill = defaults.fill;
        }
        if self.style.stroke.is_none() {
            self.style.stroke = defaults.stroke;
        }
        if self.style.stroke_width.is_none() {
            self.style.stroke_width = defaults.stroke_width;
        }
        if let Some(children) = self.children_mut() {
            for child in children.iter_mut() {
                child.fill_default_style();
            }
        }
    }

    pub fn rect(id: impl Into<String>, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(id, ElementKind::Rect { x, y, width, height, rx: None, ry: None })
    }

    pub fn rounded_rect(id: impl Into<String>, x: f64, y: f64, width: f64, height: f64, rx: f64, ry: f64) -> Self {
        Self::new(id, ElementKind::Rect { x, y, width, height, rx: Some(rx), ry: Some(ry) })
    }

    pub fn circle(id: impl Into<String>, cx: f64, cy: f64, r: f64) -> Self {
        Self::new(id, ElementKind::Circle { cx, cy, r })
    }

    pub fn ellipse(id: impl Into<String>, cx: f64, cy: f64, rx: f64, ry: f64) -> Self {
        Self::new(id, ElementKind::Ellipse { cx, cy, rx, ry })
    }

    pub fn line(id: impl Into<String>, x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self::new(id, ElementKind::Line { x1, y1, x2, y2 })
    }

    pub fn polyline(id: impl Into<String>, points: Vec<(f64, f64)>) -> Self {
        Self::new(id, ElementKind::Polyline { points })
    }

    pub fn polygon(id: impl Into<String>, points: Vec<(f64, f64)>) -> Self {
        Self::new(id, ElementKind::Polygon { points })
    }

    pub fn path(id: impl Into<String>, d: impl Into<String>) -> Self {
        Self::new(id, ElementKind::Path { d: d.into() })
    }

    pub fn text(id: impl Into<String>, x: f64, y: f64, content: impl Into<String>) -> Self {
        Self::new(
            id,
            ElementKind::Text {
                x,
                y,
                content: content.into(),
                font_size: DEFAULT_FONT_SIZE,
                font_family: None,
                font_weight: None,
                text_anchor: None,
            },
        )
    }

    pub fn text_path(id: impl Into<String>, path_id: &str, content: impl Into<String>) -> Self {
        Self::new(
            id,
            ElementKind::TextPath {
                href: format!("#{}", path_id.trim_start_matches('#')),
                content: content.into(),
                font_size: DEFAULT_FONT_SIZE,
                start_offset: None,
            },
        )
    }

    pub fn image(id: impl Into<String>, x: f64, y: f64, width: f64, height: f64, href: impl Into<String>) -> Self {
        Self::new(id, ElementKind::Image { x, y, width, height, href: href.into(), preserve_aspect_ratio: None })
    }

    pub fn image_from_bytes(id: impl Into<String>, x: f64, y: f64, bytes: &[u8]) -> Result<Self> {
        let format = image::guess_format(bytes).map_err(|e| CanvasError::Parse(e.to_string()))?;
        let mime = match format {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            other => return Err(CanvasError::InvalidArgument(format!("unsupported image format {:?}", other))),
        };
        let decoded = image::load_from_memory(bytes).map_err(|e| CanvasError::Parse(e.to_string()))?;
        let b64 = general_purpose::STANDARD.encode(bytes);
        let href = format!("data:{};base64,{}", mime, b64);
        Ok(Self::image(id, x, y, decoded.width() as f64, decoded.height() as f64, href))
    }

    pub fn group(id: impl Into<String>, children: Vec<Element>) -> Self {
        Self::new(id, ElementKind::Group { children })
    }

    pub fn reference(id: impl Into<String>, target_id: &str, x: f64, y: f64) -> Self {
        Self::new(
            id,
            ElementKind::Use { href: format!("#{}", target_id.trim_start_matches('#')), x, y, width: None, height: None },
        )
    }

    pub fn with_fill(mut self, fill: impl Into<String>) -> Self {
        self.style.fill = Some(fill.into());
        self
    }

    pub fn with_stroke(mut self, stroke: impl Into<String>, width: f64) -> Self {
        self.style.stroke = Some(stroke.into());
        self.style.stroke_width = Some(width);
        self
    }

    pub fn children(&self) -> Option<&Vec<Element>> {
        match &self.kind {
            ElementKind::Group { children } => Some(children),
            _ => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut Vec<Element>> {
        match &mut self.kind {
            ElementKind::Group { children } => Some(children),
            _ => None,
        }
    }

    pub fn find(&self, id: &str) -> Option<&Element> {
        if self.id == id {
            return Some(self);
        }
        self.children()?.iter().find_map(|child| child.find(id))
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Element> {
        if self.id == id {
            return Some(self);
        }
        self.children_mut()?.iter_mut().find_map(|child| child.find_mut(id))
    }

    pub fn collect_ids(&self, out: &mut Vec<String>) {
        out.push(self.id.clone());
        if let Some(children) = self.children() {
            for child in children {
                child.collect_ids(out);
            }
        }
    }

    /// Deep copy with fresh ids at every depth. `new_id` overrides the root's id.
    pub fn deep_clone(&self, ids: &mut IdAllocator, new_id: Option<String>) -> Element {
        let mut copy = self.clone();
        copy.id = new_id.unwrap_or_else(|| ids.short_id(self.kind.prefix()));
        if let Some(children) = copy.children_mut() {
            for child in children.iter_mut() {
                *child = child.deep_clone(ids, None);
            }
        }
        copy
    }

    pub fn translate(&mut self, dx: f64, dy: f64) -> bool {
        match &mut self.kind {
            ElementKind::Rect { x, y, .. }
            | ElementKind::Text { x, y, .. }
            | ElementKind::Image { x, y, .. }
            | ElementKind::Use { x, y, .. } => {
                *x += dx;
                *y += dy;
                true
            }
            ElementKind::Circle { cx, cy, .. } | ElementKind::Ellipse { cx, cy, .. } => {
                *cx += dx;
                *cy += dy;
                true
            }
            _ => false,
        }
    }

    pub fn estimate_bounds(&self) -> Option<Bounds> {
        match &self.kind {
            ElementKind::Rect { x, y, width, height, .. } | ElementKind::Image { x, y, width, height, .. } => {
                Some(Bounds::new(*x, *y, *width, *height))
            }
            ElementKind::Circle { cx, cy, r } => Some(Bounds::new(cx - r, cy - r, r * 2.0, r * 2.0)),
            ElementKind::Ellipse { cx, cy, rx, ry } => Some(Bounds::new(cx - rx, cy - ry, rx * 2.0, ry * 2.0)),
            ElementKind::Line { x1, y1, x2, y2 } => {
                Some(Bounds::from_extents(x1.min(*x2), y1.min(*y2), x1.max(*x2), y1.max(*y2)))
            }
            ElementKind::Polyline { points } | ElementKind::Polygon { points } => points_bounds(points),
            ElementKind::Path { d } => {
                let bez = BezPath::from_svg(d).ok()?;
                if bez.elements().is_empty() {
                    return None;
                }
                let bbox = bez.bounding_box();
                Some(Bounds::new(bbox.x0, bbox.y0, bbox.width(), bbox.height()))
            }
            ElementKind::Text { x, y, content, font_size, text_anchor, .. } => {
                let width = AVERAGE_GLYPH_WIDTH * font_size * content.chars().count() as f64;
                let left = match text_anchor.as_deref() {
                    Some("middle") => x - width / 2.0,
                    Some("end") => x - width,
                    _ => *x,
                };
                // y is the baseline
                Some(Bounds::new(left, y - font_size, width, *font_size))
            }
            ElementKind::Use { x, y, width: Some(w), height: Some(h), .. } => Some(Bounds::new(*x, *y, *w, *h)),
            ElementKind::Group { children } => children
                .iter()
                .filter_map(|c| c.estimate_bounds())
                .reduce(|acc, b| acc.union(&b)),
            ElementKind::TextPath { .. } | ElementKind::Use { .. } => None,
        }
    }

    /// Returns a copy with `changes` merged over this element's fields.
    ///
    /// Keys use the same camelCase names as the JSON form. `null` clears an
    /// optional attribute. `id` and `type` are never changed; `children` is rejected.
    pub fn updated(&self, changes: &Map<String, Value>) -> Result<Element> {
        let mut value = serde_json::to_value(self)?;
        let Value::Object(fields) = &mut value else {
            return Err(CanvasError::Parse("element did not serialize to an object".to_string()));
        };
        for (key, change) in changes {
            if key == "id" || key == "type" {
                continue;
            }
            if key == "children" {
                return Err(CanvasError::InvalidArgument(format!(
                    "children of {} cannot be replaced by an update",
                    self.id
                )));
            }
            if change.is_null() {
                fields.remove(key);
            } else {
                fields.insert(key.clone(), change.clone());
            }
        }
        let updated: Element = serde_json::from_value(value)
            .map_err(|e| CanvasError::InvalidArgument(format!("invalid changes for {}: {}", self.id, e)))?;
        Ok(updated)
    }
}

fn points_bounds(points: &[(f64, f64)]) -> Option<Bounds> {
    let (first, rest) = points.split_first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.0, first.1, first.0, first.1);
    for (x, y) in rest {
        if *x < min_x { min_x = *x; }
        if *x > max_x { max_x = *x; }
        if *y < min_y { min_y = *y; }
        if *y > max_y { max_y = *y; }
    }
    Some(Bounds::from_extents(min_x, min_y, max_x, max_y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    #[test]
    fn factories_apply_default_styling() {
        let line = Element::line("line-1", 0.0, 0.0, 10.0, 10.0);
        assert_eq!(line.style.stroke.as_deref(), Some("#000000"));
        assert_eq!(line.style.stroke_width, Some(1.0));

        let text = Element::text("text-1", 5.0, 20.0, "hi");
        assert_eq!(text.style.fill.as_deref(), Some("#000000"));

        let rect = Element::rect("rect-1", 0.0, 0.0, 1.0, 1.0);
        assert_eq!(rect.style, Style::default());
    }

    #[test]
    fn json_form_is_flat_and_tagged() {
        let rect = Element::rect("rect-1", 10.0, 10.0, 100.0, 50.0).with_fill("#ff0000");
        let value = serde_json::to_value(&rect).unwrap();
        assert_eq!(
            value,
            json!({"id": "rect-1", "type": "rect", "x": 10.0, "y": 10.0, "width": 100.0, "height": 50.0, "fill": "#ff0000"})
        );
        let back: Element = serde_json::from_value(value).unwrap();
        assert_eq!(back, rect);

        let parsed: Element =
            serde_json::from_value(json!({"id": "tp-1", "type": "text-path", "href": "#p", "content": "wave"})).unwrap();
        assert!(matches!(parsed.kind, ElementKind::TextPath { font_size, .. } if font_size == 16.0));
    }

    #[test]
    fn deep_clone_gives_fresh_ids_at_every_depth() {
        let mut ids = IdAllocator::new();
        ids.resync(["group-1", "rect-1", "circle-1", "rect-2"]);
        let group = Element::group(
            "group-1",
            vec![
                Element::rect("rect-1", 0.0, 0.0, 1.0, 1.0),
                Element::circle("circle-1", 0.0, 0.0, 1.0),
                Element::group("group-9", vec![Element::rect("rect-2", 0.0, 0.0, 1.0, 1.0)]),
            ],
        );
        let copy = group.deep_clone(&mut ids, None);

        let mut original = Vec::new();
        group.collect_ids(&mut original);
        let mut cloned = Vec::new();
        copy.collect_ids(&mut cloned);

        let original: HashSet<_> = original.into_iter().collect();
        assert_eq!(cloned.len(), 5);
        assert!(cloned.iter().all(|id| !original.contains(id)));
        assert_eq!(copy.id, "group-2");
    }

    #[test]
    fn deep_clone_honours_explicit_id() {
        let mut ids = IdAllocator::new();
        let copy = Element::circle("circle-1", 1.0, 1.0, 2.0).deep_clone(&mut ids, Some("mine".to_string()));
        assert_eq!(copy.id, "mine");
    }

    #[test]
    fn bounds_for_exact_shapes() {
        assert_eq!(
            Element::circle("c", 10.0, 10.0, 5.0).estimate_bounds(),
            Some(Bounds::new(5.0, 5.0, 10.0, 10.0))
        );
        assert_eq!(
            Element::line("l", 10.0, 0.0, 0.0, 20.0).estimate_bounds(),
            Some(Bounds::new(0.0, 0.0, 10.0, 20.0))
        );
        assert_eq!(
            Element::polygon("p", vec![(1.0, 5.0), (4.0, 2.0), (3.0, 9.0)]).estimate_bounds(),
            Some(Bounds::new(1.0, 2.0, 3.0, 7.0))
        );
        assert_eq!(Element::polyline("p", vec![]).estimate_bounds(), None);
        assert_eq!(
            Element::path("p", "M 0 0 L 10 5 L 4 20 Z").estimate_bounds(),
            Some(Bounds::new(0.0, 0.0, 10.0, 20.0))
        );
    }

    #[test]
    fn text_bounds_are_estimated() {
        let text = Element::text("t", 100.0, 50.0, "abcd");
        let bounds = text.estimate_bounds().unwrap();
        assert!((bounds.width - 0.6 * 16.0 * 4.0).abs() < 1e-9);
        assert_eq!(bounds.y, 34.0);
        assert_eq!(Element::text_path("tp", "curve", "x").estimate_bounds(), None);
        assert_eq!(Element::reference("u", "sym", 0.0, 0.0).estimate_bounds(), None);
    }

    #[test]
    fn group_bounds_union_children() {
        let group = Element::group(
            "g",
            vec![Element::rect("a", 0.0, 0.0, 10.0, 10.0), Element::circle("b", 30.0, 30.0, 5.0)],
        );
        assert_eq!(group.estimate_bounds(), Some(Bounds::new(0.0, 0.0, 35.0, 35.0)));
        assert_eq!(Element::group("e", vec![]).estimate_bounds(), None);
    }

    #[test]
    fn update_merges_fields_but_keeps_id() {
        let rect = Element::rect("rect-1", 0.0, 0.0, 10.0, 10.0).with_fill("red");
        let changes = json!({"id": "hijack", "type": "circle", "width": 42.0, "fill": null, "opacity": 0.5});
        let updated = rect.updated(changes.as_object().unwrap()).unwrap();
        assert_eq!(updated.id, "rect-1");
        assert!(matches!(updated.kind, ElementKind::Rect { width, .. } if width == 42.0));
        assert_eq!(updated.style.fill, None);
        assert_eq!(updated.style.opacity, Some(0.5));
    }

    #[test]
    fn update_rejects_ill_typed_changes() {
        let rect = Element::rect("rect-1", 0.0, 0.0, 10.0, 10.0);
        let changes = json!({"width": "wide"});
        assert!(matches!(rect.updated(changes.as_object().unwrap()), Err(CanvasError::InvalidArgument(_))));
    }

    #[test]
    fn translate_moves_anchor() {
        let mut circle = Element::circle("c", 1.0, 1.0, 1.0);
        assert!(circle.translate(10.0, 5.0));
        assert!(matches!(circle.kind, ElementKind::Circle { cx, cy, .. } if cx == 11.0 && cy == 6.0));
        let mut path = Element::path("p", "M0 0");
        assert!(!path.translate(1.0, 1.0));
    }

    #[test]
    fn embeds_png_bytes() {
        use image::{DynamicImage, ImageOutputFormat, RgbaImage};
        use std::io::Cursor;

        let img = DynamicImage::ImageRgba8(RgbaImage::new(3, 2));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png).unwrap();

        let element = Element::image_from_bytes("image-1", 5.0, 6.0, &bytes).unwrap();
        match element.kind {
            ElementKind::Image { width, height, href, .. } => {
                assert_eq!((width, height), (3.0, 2.0));
                assert!(href.starts_with("data:image/png;base64,"));
            }
            other => panic!("unexpected kind {:?}", other),
        }
        assert!(Element::image_from_bytes("image-2", 0.0, 0.0, b"not an image").is_err());
    }

    #[test]
    fn find_descends_into_groups() {
        let mut group = Element::group("g", vec![Element::group("inner", vec![Element::rect("deep", 0.0, 0.0, 1.0, 1.0)])]);
        assert!(group.find("deep").is_some());
        group.find_mut("deep").unwrap().style.fill = Some("blue".to_string());
        assert_eq!(group.find("deep").unwrap().style.fill.as_deref(), Some("blue"));
        assert!(group.find("missing").is_none());
    }
}
