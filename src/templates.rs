use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::error::{CanvasError, Result};
use crate::ids::IdAllocator;
use crate::storage::{FsStorage, Storage};

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[serde(rename_all = "lowercase")]
pub enum TemplateCategory {
    Icons,
    #[default]
    Shapes,
    Layouts,
}

impl TemplateCategory {
    pub const ALL: [TemplateCategory; 3] = [TemplateCategory::Icons, TemplateCategory::Shapes, TemplateCategory::Layouts];

    pub fn dir_name(self) -> &'static str {
        match self {
            TemplateCategory::Icons => "icons",
            TemplateCategory::Shapes => "shapes",
            TemplateCategory::Layouts => "layouts",
        }
    }
}

impl fmt::Display for TemplateCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
pub struct Template {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: TemplateCategory,
    pub content: String,
    pub metadata: TemplateMetadata,
}

impl Template {
    fn matches_search(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(needle)
            || self.description.to_lowercase().contains(needle)
            || self.tags.iter().any(|t| t.to_lowercase().contains(needle))
    }

    fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOptions {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub category: TemplateCategory,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplatePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub category: Option<TemplateCategory>,
    pub content: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct TemplateFilter {
    pub category: Option<TemplateCategory>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub search: Option<String>,
}

pub struct TemplateManager<S: Storage = FsStorage> {
    root: PathBuf,
    storage: S,
    cache: HashMap<String, Template>,
    loaded: bool,
}

impl TemplateManager<FsStorage> {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_storage(root, FsStorage)
    }
}

impl<S: Storage> TemplateManager<S> {
    pub fn with_storage(root: impl Into<PathBuf>, storage: S) -> Self {
        Self { root: root.into(), storage, cache: HashMap::new(), loaded: false }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn file_path(&self, category: TemplateCategory, id: &str) -> PathBuf {
        self.root.join(category.dir_name()).join(format!("{}.json", id))
    }

    pub fn load(&mut self) -> usize {
        if self.loaded {
            return self.cache.len();
        }
        for category in TemplateCategory::ALL {
            let dir = self.root.join(category.dir_name());
            let files = match self.storage.list(&dir) {
                Ok(files) => files,
                Err(e) => {
                    warn!(dir:? = dir, error:% = e; "Skipping template directory");
                    continue;
                }
            };
            for file in files.iter().filter(|f| f.extension().is_some_and(|ext| ext == "json")) {
                match self.read_template(file) {
                    Ok(mut template) => {
                        template.category = category;
                        self.cache.insert(template.id.clone(), template);
                    }
                    Err(e) => warn!(path:? = file, error:% = e; "Skipping unreadable template"),
                }
            }
        }
        self.loaded = true;
        info!(root:? = self.root, count = self.cache.len(); "Loaded templates");
        self.cache.len()
    }

    pub fn reload(&mut self) -> usize {
        self.cache.clear();
        self.loaded = false;
        self.load()
    }

    fn read_template(&self, path: &Path) -> Result<Template> {
        let bytes = self.storage.read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn write_template(&self, template: &Template) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(template)?;
        self.storage.write(&self.file_path(template.category, &template.id), &bytes)?;
        Ok(())
    }

    pub fn save(&mut self, name: &str, content: &str, options: SaveOptions) -> Result<Template> {
        if name.trim().is_empty() {
            return Err(CanvasError::InvalidArgument("template name must not be empty".to_string()));
        }
        self.load();
        let now = Utc::now();
        let template = Template {
            id: IdAllocator::unique_id(Some("tpl")),
            name: name.to_string(),
            description: options.description,
            tags: options.tags,
            category: options.category,
            content: content.to_string(),
            metadata: TemplateMetadata { width: options.width, height: options.height, created_at: now, updated_at: now },
        };
        self.write_template(&template)?;
        self.cache.insert(template.id.clone(), template.clone());
        debug!(id = template.id.as_str(), category:% = template.category; "Saved template");
        Ok(template)
    }

    pub fn get(&self, id: &str) -> Option<&Template> {
        self.cache.get(id)
    }

    pub fn find_by_name(&self, name: &str) -> Option<&Template> {
        let wanted = name.to_lowercase();
        self.cache.values().find(|t| t.name.to_lowercase() == wanted)
    }

    pub fn list(&self, filter: &TemplateFilter) -> Vec<&Template> {
        let search = filter.search.as_deref().map(str::to_lowercase);
        let mut found: Vec<&Template> = self
            .cache
            .values()
            .filter(|t| filter.category.map_or(true, |c| t.category == c))
            .filter(|t| filter.tags.iter().all(|tag| t.has_tag(tag)))
            .filter(|t| search.as_deref().map_or(true, |s| t.matches_search(s)))
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        found
    }

    pub fn delete(&mut self, id: &str) -> Result<bool> {
        self.load();
        let Some(template) = self.cache.get(id) else {
            return Ok(false);
        };
        self.storage.remove(&self.file_path(template.category, id))?;
        self.cache.remove(id);
        debug!(id; "Deleted template");
        Ok(true)
    }

    /// Applies `patch` and rewrites the file, moving it if the category
    /// changed. `Ok(None)` when no template has this id.
    pub fn update(&mut self, id: &str, patch: TemplatePatch) -> Result<Option<Template>> {
        self.load();
        let Some(current) = self.cache.get(id) else {
            return Ok(None);
        };
        let old_category = current.category;
        let mut updated = current.clone();
        if let Some(name) = patch.name {
            updated.name = name;
        }
        if let Some(description) = patch.description {
            updated.description = description;
        }
        if let Some(tags) = patch.tags {
            updated.tags = tags;
        }
        if let Some(category) = patch.category {
            updated.category = category;
        }
        if let Some(content) = patch.content {
            updated.content = content;
        }
        updated.metadata.updated_at = Utc::now();

        self.write_template(&updated)?;
        if old_category != updated.category {
            self.storage.remove(&self.file_path(old_category, id))?;
        }
        self.cache.insert(id.to_string(), updated.clone());
        Ok(Some(updated))
    }
}
