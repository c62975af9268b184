use std::collections::HashSet;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{CanvasError, Result};
use crate::ids::IdAllocator;

fn default_true() -> bool {
    true
}

fn default_opacity() -> f64 {
    1.0
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Debug)]
#[serde(rename_all = "camelCase")]
pub struct Layer {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub visible: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default = "default_opacity")]
    pub opacity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blend_mode: Option<String>,
    #[serde(default)]
    pub elements: Vec<String>,
}

impl Layer {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            visible: true,
            locked: false,
            opacity: 1.0,
            blend_mode: None,
            elements: Vec::new(),
        }
    }

    pub fn contains(&self, element_id: &str) -> bool {
        self.elements.iter().any(|e| e == element_id)
    }
}

#[derive(Clone, Debug)]
pub struct LayerManager {
    layers: Vec<Layer>,
    active: Option<String>,
    ids: IdAllocator,
}

impl Default for LayerManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LayerManager {
    pub fn new() -> Self {
        let mut manager = Self { layers: Vec::new(), active: None, ids: IdAllocator::new() };
        manager.create_layer(None, None);
        manager
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    fn index_of(&self, id: &str) -> Result<usize> {
        self.layers
            .iter()
            .position(|l| l.id == id)
            .ok_or_else(|| CanvasError::not_found("layer", id))
    }

    fn layer_mut(&mut self, id: &str) -> Result<&mut Layer> {
        let index = self.index_of(id)?;
        Ok(&mut self.layers[index])
    }

    pub fn active_layer_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active_layer(&self) -> Option<&Layer> {
        self.active.as_deref().and_then(|id| self.get(id))
    }

    pub fn set_active(&mut self, id: &str) -> Result<()> {
        self.index_of(id)?;
        self.active = Some(id.to_string());
        Ok(())
    }

    pub fn create_layer(&mut self, name: Option<&str>, insert_at: Option<usize>) -> String {
        let id = self.ids.short_id("layer");
        let name = name.map(str::to_string).unwrap_or_else(|| format!("Layer {}", self.layers.len() + 1));
        let layer = Layer::new(id.clone(), name);
        match insert_at {
            Some(index) if index < self.layers.len() => self.layers.insert(index, layer),
            _ => self.layers.push(layer),
        }
        if self.active.is_none() {
            self.active = Some(id.clone());
        }
        debug!(id = id.as_str(); "Created layer");
        id
    }

    pub fn delete_layer(&mut self, id: &str) -> Result<()> {
        let index = self.index_of(id)?;
        if self.layers.len() == 1 {
            return Err(CanvasError::LastLayer);
        }
        self.layers.remove(index);
        if self.active.as_deref() == Some(id) {
            let fallback = index.min(self.layers.len() - 1);
            self.active = Some(self.layers[fallback].id.clone());
        }
        debug!(id; "Deleted layer");
        Ok(())
    }

    pub fn reorder_layer(&mut self, id: &str, new_index: usize) -> Result<()> {
        let index = self.index_of(id)?;
        if new_index >= self.layers.len() {
            return Err(CanvasError::InvalidArgument(format!(
                "layer index {} out of range 0..{}",
                new_index,
                self.layers.len()
            )));
        }
        let layer = self.layers.remove(index);
        self.layers.insert(new_index, layer);
        Ok(())
    }

    pub fn rename_layer(&mut self, id: &str, name: &str) -> Result<()> {
        self.layer_mut(id)?.name = name.to_string();
        Ok(())
    }

    pub fn set_visibility(&mut self, id: &str, visible: bool) -> Result<()> {
        self.layer_mut(id)?.visible = visible;
        Ok(())
    }

    pub fn set_lock(&mut self, id: &str, locked: bool) -> Result<()> {
        self.layer_mut(id)?.locked = locked;
        Ok(())
    }

    pub fn set_opacity(&mut self, id: &str, opacity: f64) -> Result<()> {
        if !(0.0..=1.0).contains(&opacity) {
            return Err(CanvasError::InvalidArgument(format!("layer opacity {} is outside [0, 1]", opacity)));
        }
        self.layer_mut(id)?.opacity = opacity;
        Ok(())
    }

    pub fn set_blend_mode(&mut self, id: &str, blend_mode: Option<&str>) -> Result<()> {
        self.layer_mut(id)?.blend_mode = blend_mode.map(str::to_string);
        Ok(())
    }

    pub fn add_element_to_layer(&mut self, layer_id: &str, element_id: &str) -> Result<()> {
        let index = self.index_of(layer_id)?;
        if self.layers[index].locked {
            return Err(CanvasError::LayerLocked(layer_id.to_string()));
        }
        self.remove_element(element_id);
        self.layers[index].elements.push(element_id.to_string());
        debug!(layer = layer_id, element = element_id; "Assigned element to layer");
        Ok(())
    }

    pub fn add_element_to_active_layer(&mut self, element_id: &str) -> Result<String> {
        let active = match self.active_layer() {
            Some(layer) => layer.id.clone(),
            None => {
                let id = match self.layers.first() {
                    Some(layer) => layer.id.clone(),
                    None => self.create_layer(None, None),
                };
                self.active = Some(id.clone());
                id
            }
        };
        self.add_element_to_layer(&active, element_id)?;
        Ok(active)
    }

    pub fn layer_of(&self, element_id: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.contains(element_id))
    }

    pub fn remove_element(&mut self, element_id: &str) -> bool {
        let mut removed = false;
        for layer in self.layers.iter_mut() {
            let before = layer.elements.len();
            layer.elements.retain(|e| e != element_id);
            removed |= layer.elements.len() != before;
        }
        removed
    }

    /// Appends the source's memberships onto the target and deletes the
    /// source. Ids already in the target are appended again.
    pub fn merge_layers(&mut self, source_id: &str, target_id: &str) -> Result<()> {
        if source_id == target_id {
            return Err(CanvasError::SelfMerge);
        }
        let source = self.index_of(source_id)?;
        let target = self.index_of(target_id)?;
        let moved = std::mem::take(&mut self.layers[source].elements);
        self.layers[target].elements.extend(moved);
        self.delete_layer(source_id)?;
        debug!(source = source_id, target = target_id; "Merged layers");
        Ok(())
    }

    pub fn duplicate_layer(&mut self, id: &str) -> Result<String> {
        let index = self.index_of(id)?;
        let mut copy = self.layers[index].clone();
        copy.id = self.ids.short_id("layer");
        copy.name = format!("{} copy", copy.name);
        let new_id = copy.id.clone();
        self.layers.insert(index + 1, copy);
        Ok(new_id)
    }

    /// Drops memberships for ids not in `all_ids` and puts unassigned
    /// `top_level` ids on the active layer. Used after a document snapshot
    /// is restored.
    pub fn reconcile(&mut self, all_ids: &[String], top_level: &[String]) {
        let known: HashSet<&str> = all_ids.iter().map(String::as_str).collect();
        for layer in self.layers.iter_mut() {
            layer.elements.retain(|e| known.contains(e.as_str()));
        }
        let orphans: Vec<&String> = top_level.iter().filter(|id| self.layer_of(id).is_none()).collect();
        if orphans.is_empty() {
            return;
        }
        let Some(active) = self.active.clone().filter(|id| self.get(id).is_some()) else {
            return;
        };
        if let Ok(index) = self.index_of(&active) {
            self.layers[index].elements.extend(orphans.into_iter().cloned());
        }
    }

    pub fn to_json(&self) -> Vec<Layer> {
        self.layers.clone()
    }

    pub fn from_json(&mut self, layers: Vec<Layer>) {
        self.ids.resync(layers.iter().map(|l| l.id.as_str()));
        self.layers = layers;
        let active_survives = self.active.as_deref().is_some_and(|id| self.get(id).is_some());
        if !active_survives {
            self.active = self.layers.first().map(|l| l.id.clone());
        }
        if self.layers.is_empty() {
            self.create_layer(None, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn starts_with_one_active_layer() {
        let layers = LayerManager::new();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers.active_layer_id(), Some("layer-1"));
        assert_eq!(layers.layers()[0].name, "Layer 1");
    }

    #[test]
    fn create_names_and_inserts() {
        let mut layers = LayerManager::new();
        let second = layers.create_layer(None, None);
        let top = layers.create_layer(Some("Sketch"), Some(0));
        assert_eq!(layers.layers()[1].name, "Layer 1");
        assert_eq!(layers.get(&second).unwrap().name, "Layer 2");
        assert_eq!(layers.layers()[0].id, top);
        assert_eq!(layers.active_layer_id(), Some("layer-1"));
    }

    #[test]
    fn last_layer_cannot_be_deleted() {
        let mut layers = LayerManager::new();
        assert!(matches!(layers.delete_layer("layer-1"), Err(CanvasError::LastLayer)));
        assert_eq!(layers.len(), 1);
        assert!(matches!(layers.delete_layer("missing"), Err(CanvasError::NotFound { .. })));
    }

    #[test]
    fn deleting_active_moves_activation_down() {
        let mut layers = LayerManager::new();
        layers.create_layer(None, None);
        let third = layers.create_layer(None, None);
        layers.set_active(&third).unwrap();
        layers.delete_layer(&third).unwrap();
        assert_eq!(layers.active_layer_id(), Some("layer-2"));

        layers.set_active("layer-1").unwrap();
        layers.delete_layer("layer-1").unwrap();
        assert_eq!(layers.active_layer_id(), Some("layer-2"));
    }

    #[test]
    fn setters_validate_and_report_missing() {
        let mut layers = LayerManager::new();
        layers.rename_layer("layer-1", "Background").unwrap();
        layers.set_visibility("layer-1", false).unwrap();
        layers.set_blend_mode("layer-1", Some("multiply")).unwrap();
        layers.set_opacity("layer-1", 0.25).unwrap();
        assert!(matches!(layers.set_opacity("layer-1", 1.5), Err(CanvasError::InvalidArgument(_))));
        assert!(layers.rename_layer("nope", "x").is_err());

        let layer = layers.get("layer-1").unwrap();
        assert_eq!(layer.name, "Background");
        assert!(!layer.visible);
        assert_eq!(layer.opacity, 0.25);
        assert_eq!(layer.blend_mode.as_deref(), Some("multiply"));
    }

    #[test]
    fn reorder_checks_bounds() {
        let mut layers = LayerManager::new();
        let second = layers.create_layer(None, None);
        layers.reorder_layer(&second, 0).unwrap();
        assert_eq!(layers.layers()[0].id, second);
        assert!(layers.reorder_layer(&second, 2).is_err());
    }

    #[test]
    fn locked_layers_reject_new_members() {
        let mut layers = LayerManager::new();
        layers.set_lock("layer-1", true).unwrap();
        assert!(matches!(layers.add_element_to_layer("layer-1", "rect-1"), Err(CanvasError::LayerLocked(_))));
        assert!(layers.layer_of("rect-1").is_none());
    }

    #[test]
    fn merge_moves_members_and_removes_source() {
        let mut layers = LayerManager::new();
        let l2 = layers.create_layer(Some("L2"), None);
        layers.add_element_to_active_layer("rect-1").unwrap();
        layers.add_element_to_layer(&l2, "rect-1").unwrap();
        assert_eq!(layers.layer_of("rect-1").unwrap().id, l2);

        layers.merge_layers(&l2, "layer-1").unwrap();
        assert_eq!(layers.len(), 1);
        assert_eq!(layers.get("layer-1").unwrap().elements, ["rect-1"]);
        assert!(matches!(layers.merge_layers("layer-1", "layer-1"), Err(CanvasError::SelfMerge)));
    }

    #[test]
    fn duplicate_shares_membership() {
        let mut layers = LayerManager::new();
        layers.add_element_to_active_layer("circle-1").unwrap();
        let copy = layers.duplicate_layer("layer-1").unwrap();
        assert_eq!(layers.layers()[1].id, copy);
        assert_eq!(layers.layers()[1].name, "Layer 1 copy");
        assert_eq!(layers.layers()[1].elements, ["circle-1"]);
    }

    #[test]
    fn reconcile_prunes_and_adopts() {
        let mut layers = LayerManager::new();
        layers.add_element_to_active_layer("rect-1").unwrap();
        layers.add_element_to_active_layer("rect-2").unwrap();
        let all = vec!["rect-1".to_string(), "circle-1".to_string()];
        layers.reconcile(&all, &all);
        assert_eq!(layers.get("layer-1").unwrap().elements, ["rect-1", "circle-1"]);
    }

    #[test]
    fn from_json_never_leaves_zero_layers() {
        let mut layers = LayerManager::new();
        layers.from_json(Vec::new());
        assert_eq!(layers.len(), 1);
        assert!(layers.active_layer().is_some());

        let restored = vec![Layer::new("layer-7", "Seven")];
        layers.from_json(restored);
        assert_eq!(layers.active_layer_id(), Some("layer-7"));
        assert_eq!(layers.create_layer(None, None), "layer-8");
    }

    proptest! {
        #[test]
        fn each_element_sits_in_at_most_one_layer(moves in prop::collection::vec((0usize..4, 0usize..6), 1..40)) {
            let mut layers = LayerManager::new();
            for _ in 0..3 {
                layers.create_layer(None, None);
            }
            let ids: Vec<String> = layers.layers().iter().map(|l| l.id.clone()).collect();
            for (layer, element) in moves {
                layers.add_element_to_layer(&ids[layer], &format!("rect-{}", element)).unwrap();
                for n in 0..6 {
                    let element_id = format!("rect-{}", n);
                    let holders: usize = layers
                        .layers()
                        .iter()
                        .map(|l| l.elements.iter().filter(|e| **e == element_id).count())
                        .sum();
                    prop_assert!(holders <= 1);
                }
            }
        }
    }
}
