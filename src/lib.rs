pub mod error;
pub mod ids;
pub mod types;
pub mod objects;
pub mod svg;
pub mod storage;
pub mod document;
pub mod layers;
pub mod history;
pub mod templates;
pub mod config;
pub mod session;
pub mod commands;

pub use config::Config;
pub use document::{CanvasOptions, Document, DocumentEvent, DocumentState, EventKind, Metadata, ReorderDirection};
pub use error::{CanvasError, Result};
pub use history::{HistoryEntry, HistoryManager};
pub use ids::IdAllocator;
pub use layers::{Layer, LayerManager};
pub use objects::*;
pub use session::Session;
pub use storage::{FsStorage, Storage};
pub use svg::ExportOptions;
pub use templates::{Template, TemplateCategory, TemplateFilter, TemplateManager};
pub use types::*;
