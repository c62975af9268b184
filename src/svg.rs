use log::{debug, warn};
use roxmltree::ParsingOptions;

use crate::document::DocumentState;
use crate::error::{CanvasError, Result};
use crate::objects::{Element, ElementKind, Style};
use crate::types::{CanvasConfig, Defs, Filter, FilterKind, Gradient, GradientKind, ViewBox};

pub const SVG_NS: &str = "http://www.w3.org/2000/svg";
pub const BACKGROUND_ID: &str = "background";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportOptions {
    /// No indentation or line breaks between tags. Wins over `pretty`.
    pub minify: bool,
    pub pretty: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self { minify: false, pretty: true }
    }
}

struct MarkupWriter {
    out: String,
    pretty: bool,
    depth: usize,
}

impl MarkupWriter {
    fn new(pretty: bool) -> Self {
        Self { out: String::new(), pretty, depth: 0 }
    }

    fn line(&mut self, markup: &str) {
        if self.pretty {
            for _ in 0..self.depth {
                self.out.push_str("  ");
            }
            self.out.push_str(markup);
            self.out.push('\n');
        } else {
            self.out.push_str(markup);
        }
    }

    fn open(&mut self, tag: &str, attrs: &[(&str, String)]) {
        self.line(&format!("<{}{}>", tag, attr_string(attrs)));
        self.depth += 1;
    }

    fn close(&mut self, tag: &str) {
        self.depth = self.depth.saturating_sub(1);
        self.line(&format!("</{}>", tag));
    }

    fn empty(&mut self, tag: &str, attrs: &[(&str, String)]) {
        self.line(&format!("<{}{}/>", tag, attr_string(attrs)));
    }

    fn with_text(&mut self, tag: &str, attrs: &[(&str, String)], text: &str) {
        self.line(&format!("<{}{}>{}</{}>", tag, attr_string(attrs), escape_text(text), tag));
    }

    fn finish(self) -> String {
        self.out
    }
}

fn attr_string(attrs: &[(&str, String)]) -> String {
    let mut s = String::new();
    for (name, value) in attrs {
        s.push_str(&format!(r#" {}="{}""#, name, escape_attr(value)));
    }
    s
}

pub fn escape_attr(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}

pub fn escape_text(value: &str) -> String {
    value.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

pub fn render_document(state: &DocumentState, options: ExportOptions) -> String {
    let pretty = options.pretty && !options.minify;
    let mut w = MarkupWriter::new(pretty);
    let canvas = &state.canvas;

    let mut root = vec![
        ("xmlns", SVG_NS.to_string()),
        ("width", canvas.width.to_string()),
        ("height", canvas.height.to_string()),
        ("viewBox", canvas.effective_view_box().to_string()),
    ];
    if let Some(par) = &canvas.preserve_aspect_ratio {
        root.push(("preserveAspectRatio", par.clone()));
    }
    w.open("svg", &root);

    if !state.defs.is_empty() || !state.raw_defs.is_empty() {
        w.open("defs", &[]);
        write_defs(&mut w, &state.defs);
        for fragment in &state.raw_defs {
            w.line(fragment.trim());
        }
        w.close("defs");
    }

    if let Some(background) = &canvas.background {
        w.empty(
            "rect",
            &[
                ("id", BACKGROUND_ID.to_string()),
                ("width", "100%".to_string()),
                ("height", "100%".to_string()),
                ("fill", background.clone()),
            ],
        );
    }

    for element in &state.elements {
        write_element(&mut w, element);
    }
    for fragment in &state.raw_elements {
        w.line(fragment.trim());
    }
    w.close("svg");

    w.finish()
}

pub fn render_element(element: &Element) -> String {
    let mut w = MarkupWriter::new(false);
    write_element(&mut w, element);
    w.finish()
}

fn write_defs(w: &mut MarkupWriter, defs: &Defs) {
    for gradient in &defs.gradients {
        write_gradient(w, gradient);
    }
    for pattern in &defs.patterns {
        let units = pattern.pattern_units.clone().unwrap_or_else(|| "userSpaceOnUse".to_string());
        w.open(
            "pattern",
            &[
                ("id", pattern.id.clone()),
                ("width", pattern.width.to_string()),
                ("height", pattern.height.to_string()),
                ("patternUnits", units),
            ],
        );
        w.line(pattern.content.trim());
        w.close("pattern");
    }
    for filter in &defs.filters {
        write_filter(w, filter);
    }
    for symbol in &defs.symbols {
        let mut attrs = vec![("id", symbol.id.clone())];
        if let Some(vb) = &symbol.view_box {
            attrs.push(("viewBox", vb.to_string()));
        }
        w.open("symbol", &attrs);
        for child in &symbol.children {
            write_element(w, child);
        }
        w.close("symbol");
    }
    for clip in &defs.clip_paths {
        w.open("clipPath", &[("id", clip.id.clone())]);
        for child in &clip.children {
            write_element(w, child);
        }
        w.close("clipPath");
    }
}

fn write_gradient(w: &mut MarkupWriter, gradient: &Gradient) {
    let (tag, attrs) = match gradient.kind {
        GradientKind::Linear { x1, y1, x2, y2 } => (
            "linearGradient",
            vec![
                ("id", gradient.id.clone()),
                ("x1", x1.to_string()),
                ("y1", y1.to_string()),
                ("x2", x2.to_string()),
                ("y2", y2.to_string()),
            ],
        ),
        GradientKind::Radial { cx, cy, r } => (
            "radialGradient",
            vec![("id", gradient.id.clone()), ("cx", cx.to_string()), ("cy", cy.to_string()), ("r", r.to_string())],
        ),
    };
    w.open(tag, &attrs);
    for stop in &gradient.stops {
        let mut stop_attrs = vec![("offset", stop.offset.to_string()), ("stop-color", stop.color.clone())];
        if let Some(opacity) = stop.opacity {
            stop_attrs.push(("stop-opacity", opacity.to_string()));
        }
        w.empty("stop", &stop_attrs);
    }
    w.close(tag);
}

fn write_filter(w: &mut MarkupWriter, filter: &Filter) {
    w.open("filter", &[("id", filter.id.clone())]);
    match filter.kind {
        FilterKind::Blur => {
            w.empty("feGaussianBlur", &[("stdDeviation", filter.param("stdDeviation", 4.0).to_string())]);
        }
        FilterKind::DropShadow => {
            let color = filter.color.clone().unwrap_or_else(|| "#000000".to_string());
            w.empty(
                "feDropShadow",
                &[
                    ("dx", filter.param("dx", 2.0).to_string()),
                    ("dy", filter.param("dy", 2.0).to_string()),
                    ("stdDeviation", filter.param("stdDeviation", 2.0).to_string()),
                    ("flood-color", color),
                    ("flood-opacity", filter.param("opacity", 0.5).to_string()),
                ],
            );
        }
        FilterKind::Brightness => {
            let slope = filter.param("amount", 1.2).to_string();
            w.open("feComponentTransfer", &[]);
            for func in ["feFuncR", "feFuncG", "feFuncB"] {
                w.empty(func, &[("type", "linear".to_string()), ("slope", slope.clone())]);
            }
            w.close("feComponentTransfer");
        }
        FilterKind::Grayscale => {
            let amount = filter.param("amount", 1.0).clamp(0.0, 1.0);
            w.empty("feColorMatrix", &[("type", "saturate".to_string()), ("values", (1.0 - amount).to_string())]);
        }
    }
    w.close("filter");
}

fn style_attrs(style: &Style, attrs: &mut Vec<(&'static str, String)>) {
    let pairs: [(&'static str, &Option<String>); 10] = [
        ("class", &style.class),
        ("style", &style.style),
        ("fill", &style.fill),
        ("stroke", &style.stroke),
        ("transform", &style.transform),
        ("clip-path", &style.clip_path),
        ("mask", &style.mask),
        ("filter", &style.filter),
        ("aria-label", &style.aria_label),
        ("role", &style.role),
    ];
    for (name, value) in pairs {
        if let Some(value) = value {
            attrs.push((name, value.clone()));
        }
    }
    if let Some(width) = style.stroke_width {
        attrs.push(("stroke-width", width.to_string()));
    }
    if let Some(opacity) = style.opacity {
        attrs.push(("opacity", opacity.to_string()));
    }
}

fn points_attr(points: &[(f64, f64)]) -> String {
    points.iter().map(|(x, y)| format!("{},{}", x, y)).collect::<Vec<_>>().join(" ")
}

fn write_element(w: &mut MarkupWriter, element: &Element) {
    let mut attrs: Vec<(&'static str, String)> = vec![("id", element.id.clone())];
    match &element.kind {
        ElementKind::Rect { x, y, width, height, rx, ry } => {
            attrs.extend([
                ("x", x.to_string()),
                ("y", y.to_string()),
                ("width", width.to_string()),
                ("height", height.to_string()),
            ]);
            if let Some(rx) = rx {
                attrs.push(("rx", rx.to_string()));
            }
            if let Some(ry) = ry {
                attrs.push(("ry", ry.to_string()));
            }
            style_attrs(&element.style, &mut attrs);
            w.empty("rect", &attrs);
        }
        ElementKind::Circle { cx, cy, r } => {
            attrs.extend([("cx", cx.to_string()), ("cy", cy.to_string()), ("r", r.to_string())]);
            style_attrs(&element.style, &mut attrs);
            w.empty("circle", &attrs);
        }
        ElementKind::Ellipse { cx, cy, rx, ry } => {
            attrs.extend([("cx", cx.to_string()), ("cy", cy.to_string()), ("rx", rx.to_string()), ("ry", ry.to_string())]);
            style_attrs(&element.style, &mut attrs);
            w.empty("ellipse", &attrs);
        }
        ElementKind::Line { x1, y1, x2, y2 } => {
            attrs.extend([("x1", x1.to_string()), ("y1", y1.to_string()), ("x2", x2.to_string()), ("y2", y2.to_string())]);
            style_attrs(&element.style, &mut attrs);
            w.empty("line", &attrs);
        }
        ElementKind::Polyline { points } => {
            attrs.push(("points", points_attr(points)));
            style_attrs(&element.style, &mut attrs);
            w.empty("polyline", &attrs);
        }
        ElementKind::Polygon { points } => {
            attrs.push(("points", points_attr(points)));
            style_attrs(&element.style, &mut attrs);
            w.empty("polygon", &attrs);
        }
        ElementKind::Path { d } => {
            attrs.push(("d", d.clone()));
            style_attrs(&element.style, &mut attrs);
            w.empty("path", &attrs);
        }
        ElementKind::Text { x, y, content, font_size, font_family, font_weight, text_anchor } => {
            attrs.extend([("x", x.to_string()), ("y", y.to_string()), ("font-size", font_size.to_string())]);
            if let Some(family) = font_family {
                attrs.push(("font-family", family.clone()));
            }
            if let Some(weight) = font_weight {
                attrs.push(("font-weight", weight.clone()));
            }
            if let Some(anchor) = text_anchor {
                attrs.push(("text-anchor", anchor.clone()));
            }
            style_attrs(&element.style, &mut attrs);
            w.with_text("text", &attrs, content);
        }
        ElementKind::TextPath { href, content, font_size, start_offset } => {
            attrs.push(("font-size", font_size.to_string()));
            style_attrs(&element.style, &mut attrs);
            let mut inner = vec![("href", href.clone())];
            if let Some(offset) = start_offset {
                inner.push(("startOffset", offset.clone()));
            }
            w.open("text", &attrs);
            w.with_text("textPath", &inner, content);
            w.close("text");
        }
        ElementKind::Image { x, y, width, height, href, preserve_aspect_ratio } => {
            attrs.extend([
                ("x", x.to_string()),
                ("y", y.to_string()),
                ("width", width.to_string()),
                ("height", height.to_string()),
                ("href", href.clone()),
            ]);
            if let Some(par) = preserve_aspect_ratio {
                attrs.push(("preserveAspectRatio", par.clone()));
            }
            style_attrs(&element.style, &mut attrs);
            w.empty("image", &attrs);
        }
        ElementKind::Group { children } => {
            style_attrs(&element.style, &mut attrs);
            if children.is_empty() {
                w.empty("g", &attrs);
            } else {
                w.open("g", &attrs);
                for child in children {
                    write_element(w, child);
                }
                w.close("g");
            }
        }
        ElementKind::Use { href, x, y, width, height } => {
            attrs.extend([("href", href.clone()), ("x", x.to_string()), ("y", y.to_string())]);
            if let Some(width) = width {
                attrs.push(("width", width.to_string()));
            }
            if let Some(height) = height {
                attrs.push(("height", height.to_string()));
            }
            style_attrs(&element.style, &mut attrs);
            w.empty("use", &attrs);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScannedMarkup {
    pub canvas: CanvasConfig,
    pub ids: Vec<String>,
    pub raw_defs: Vec<String>,
    pub raw_elements: Vec<String>,
}

/// Recovers canvas configuration and verbatim top-level content. Falls back
/// to a plain attribute scan of the root tag when the file is not well-formed.
pub fn scan_markup(text: &str) -> Result<ScannedMarkup> {
    let options = ParsingOptions { allow_dtd: true, ..ParsingOptions::default() };
    match roxmltree::Document::parse_with_options(text, options) {
        Ok(doc) => scan_tree(text, &doc),
        Err(e) => {
            warn!(error:% = e; "Markup is not well-formed, falling back to attribute scan");
            scan_root_tag(text)
        }
    }
}

fn scan_tree(text: &str, doc: &roxmltree::Document) -> Result<ScannedMarkup> {
    let root = doc.root_element();
    if root.tag_name().name() != "svg" {
        return Err(CanvasError::Parse(format!("expected <svg> root, found <{}>", root.tag_name().name())));
    }
    let mut canvas = canvas_from_attrs(
        root.attribute("width"),
        root.attribute("height"),
        root.attribute("viewBox"),
    );
    canvas.preserve_aspect_ratio = root.attribute("preserveAspectRatio").map(str::to_string);

    let ids = doc
        .descendants()
        .filter_map(|n| n.attribute("id"))
        .map(str::to_string)
        .collect();

    let mut raw_defs = Vec::new();
    let mut raw_elements = Vec::new();
    for child in root.children().filter(|n| n.is_element()) {
        match child.tag_name().name() {
            "defs" => {
                for def in child.children().filter(|n| n.is_element()) {
                    raw_defs.push(text[def.range()].to_string());
                }
            }
            "rect" if child.attribute("id") == Some(BACKGROUND_ID) => {
                canvas.background = child.attribute("fill").map(str::to_string);
            }
            _ => raw_elements.push(text[child.range()].to_string()),
        }
    }
    debug!(defs = raw_defs.len(), elements = raw_elements.len(); "Scanned markup");
    Ok(ScannedMarkup { canvas, ids, raw_defs, raw_elements })
}

fn scan_root_tag(text: &str) -> Result<ScannedMarkup> {
    let start = text.find("<svg").ok_or_else(|| CanvasError::Parse("no <svg> root tag found".to_string()))?;
    let end = text[start..]
        .find('>')
        .map(|i| start + i)
        .ok_or_else(|| CanvasError::Parse("unterminated <svg> root tag".to_string()))?;
    let tag = &text[start..end];
    let mut canvas = canvas_from_attrs(
        attr_value(tag, "width").as_deref(),
        attr_value(tag, "height").as_deref(),
        attr_value(tag, "viewBox").as_deref(),
    );
    canvas.preserve_aspect_ratio = attr_value(tag, "preserveAspectRatio");
    Ok(ScannedMarkup { canvas, ids: all_attr_values(text, "id"), raw_defs: Vec::new(), raw_elements: Vec::new() })
}

fn canvas_from_attrs(width: Option<&str>, height: Option<&str>, view_box: Option<&str>) -> CanvasConfig {
    let defaults = CanvasConfig::default();
    let view_box = view_box.and_then(ViewBox::parse);
    let width = width
        .and_then(parse_length)
        .or(view_box.map(|vb| vb.width))
        .filter(|w| *w > 0.0)
        .unwrap_or(defaults.width);
    let height = height
        .and_then(parse_length)
        .or(view_box.map(|vb| vb.height))
        .filter(|h| *h > 0.0)
        .unwrap_or(defaults.height);
    CanvasConfig { width, height, view_box, ..defaults }
}

fn parse_length(value: &str) -> Option<f64> {
    let value = value.trim();
    let number = value.strip_suffix("px").unwrap_or(value);
    number.trim().parse::<f64>().ok()
}

pub(crate) fn attr_value(markup: &str, name: &str) -> Option<String> {
    all_attr_values(markup, name).into_iter().next()
}

pub(crate) fn all_attr_values(markup: &str, name: &str) -> Vec<String> {
    let mut values = Vec::new();
    let bytes = markup.as_bytes();
    let mut from = 0;
    while let Some(pos) = markup[from..].find(name).map(|i| from + i) {
        from = pos + name.len();
        let preceded_by_space = pos > 0 && bytes[pos - 1].is_ascii_whitespace();
        let rest = markup[from..].trim_start();
        let Some(rest) = rest.strip_prefix('=') else { continue };
        let rest = rest.trim_start();
        let Some(quote) = rest.chars().next().filter(|c| *c == '"' || *c == '\'') else { continue };
        let rest = &rest[1..];
        if !preceded_by_space {
            continue;
        }
        if let Some(close) = rest.find(quote) {
            values.push(rest[..close].to_string());
        }
    }
    values
}
