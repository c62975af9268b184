use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CanvasError, Result};
use crate::objects::Element;

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ViewBox {
    pub min_x: f64,
    pub min_y: f64,
    pub width: f64,
    pub height: f64,
}

impl ViewBox {
    pub fn new(min_x: f64, min_y: f64, width: f64, height: f64) -> Self {
        Self { min_x, min_y, width, height }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let parts: Vec<f64> = s
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|p| !p.is_empty())
            .filter_map(|p| p.parse::<f64>().ok())
            .collect();
        match parts.as_slice() {
            [min_x, min_y, width, height] => Some(Self::new(*min_x, *min_y, *width, *height)),
            _ => None,
        }
    }
}

impl fmt::Display for ViewBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {} {}", self.min_x, self.min_y, self.width, self.height)
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CanvasConfig {
    pub width: f64,
    pub height: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_box: Option<ViewBox>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preserve_aspect_ratio: Option<String>,
}

impl CanvasConfig {
    pub fn new(width: f64, height: f64) -> Result<Self> {
        if !(width > 0.0 && height > 0.0) {
            return Err(CanvasError::InvalidDimension { width, height });
        }
        Ok(Self { width, height, view_box: None, background: None, preserve_aspect_ratio: None })
    }

    pub fn effective_view_box(&self) -> ViewBox {
        self.view_box.unwrap_or(ViewBox::new(0.0, 0.0, self.width, self.height))
    }
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self { width: 800.0, height: 600.0, view_box: None, background: None, preserve_aspect_ratio: None }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Debug)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Bounds {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn from_extents(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self::new(min_x, min_y, max_x - min_x, max_y - min_y)
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds::from_extents(
            self.x.min(other.x),
            self.y.min(other.y),
            (self.x + self.width).max(other.x + other.width),
            (self.y + self.height).max(other.y + other.height),
        )
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GradientStop {
    pub offset: f64, // 0.0 to 1.0
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
}

impl GradientStop {
    pub fn new(offset: f64, color: impl Into<String>) -> Self {
        Self { offset, color: color.into(), opacity: None }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Debug)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum GradientKind {
    Linear { x1: f64, y1: f64, x2: f64, y2: f64 },
    Radial { cx: f64, cy: f64, r: f64 },
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct Gradient {
    #[serde(default)]
    pub id: String,
    pub kind: GradientKind,
    pub stops: Vec<GradientStop>,
}

impl Gradient {
    pub fn linear(stops: Vec<GradientStop>) -> Self {
        Self { id: String::new(), kind: GradientKind::Linear { x1: 0.0, y1: 0.0, x2: 1.0, y2: 0.0 }, stops }
    }

    pub fn radial(stops: Vec<GradientStop>) -> Self {
        Self { id: String::new(), kind: GradientKind::Radial { cx: 0.5, cy: 0.5, r: 0.5 }, stops }
    }

    pub fn validate(&self) -> Result<()> {
        for stop in &self.stops {
            if !(0.0..=1.0).contains(&stop.offset) {
                return Err(CanvasError::InvalidArgument(format!(
                    "gradient stop offset {} is outside [0, 1]",
                    stop.offset
                )));
            }
            if let Some(opacity) = stop.opacity {
                if !(0.0..=1.0).contains(&opacity) {
                    return Err(CanvasError::InvalidArgument(format!(
                        "gradient stop opacity {} is outside [0, 1]",
                        opacity
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Pattern {
    #[serde(default)]
    pub id: String,
    pub width: f64,
    pub height: f64,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern_units: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "kebab-case")]
pub enum FilterKind {
    Blur,
    DropShadow,
    Brightness,
    Grayscale,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct Filter {
    #[serde(default)]
    pub id: String,
    pub kind: FilterKind,
    #[serde(default)]
    pub params: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Filter {
    pub fn new(kind: FilterKind) -> Self {
        Self { id: String::new(), kind, params: BTreeMap::new(), color: None }
    }

    pub fn with_param(mut self, name: &str, value: f64) -> Self {
        self.params.insert(name.to_string(), value);
        self
    }

    pub fn param(&self, name: &str, default: f64) -> f64 {
        self.params.get(name).copied().unwrap_or(default)
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Symbol {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_box: Option<ViewBox>,
    pub children: Vec<Element>,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct ClipPath {
    #[serde(default)]
    pub id: String,
    pub children: Vec<Element>,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Defs {
    #[serde(default)]
    pub gradients: Vec<Gradient>,
    #[serde(default)]
    pub patterns: Vec<Pattern>,
    #[serde(default)]
    pub filters: Vec<Filter>,
    #[serde(default)]
    pub symbols: Vec<Symbol>,
    #[serde(default)]
    pub clip_paths: Vec<ClipPath>,
}

impl Defs {
    pub fn is_empty(&self) -> bool {
        self.gradients.is_empty()
            && self.patterns.is_empty()
            && self.filters.is_empty()
            && self.symbols.is_empty()
            && self.clip_paths.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        ids.extend(self.gradients.iter().map(|g| g.id.clone()));
        ids.extend(self.patterns.iter().map(|p| p.id.clone()));
        ids.extend(self.filters.iter().map(|f| f.id.clone()));
        for symbol in &self.symbols {
            ids.push(symbol.id.clone());
            for child in &symbol.children {
                child.collect_ids(&mut ids);
            }
        }
        for clip in &self.clip_paths {
            ids.push(clip.id.clone());
            for child in &clip.children {
                child.collect_ids(&mut ids);
            }
        }
        ids
    }

    pub fn symbol(&self, id: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.id == id)
    }

    pub fn gradient(&self, id: &str) -> Option<&Gradient> {
        self.gradients.iter().find(|g| g.id == id)
    }
}
