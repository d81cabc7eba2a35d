//! Config text boundary
//!
//! Layers are backed by a flat `section.key = value` text form. [`ConfDoc`]
//! keeps the original lines verbatim (comments, blank lines, unknown keys)
//! and patches only the pairs that changed, so writing a layer back to disk
//! never discards manual edits unless overwrite mode is requested.

use anyhow::{Context, Result};
use log::{info, warn};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::changes::ChangeTracker;
use crate::layer::{LayerKey, LayerSet};
use crate::registry::Registry;
use crate::value::Value;

#[derive(Debug, Clone)]
enum Line {
    /// A comment, blank line, or anything else we do not understand.
    Raw(String),
    Pair { key: String, value: String },
}

/// A parsed `section.key = value` document with original text preserved.
#[derive(Debug, Clone, Default)]
pub struct ConfDoc {
    lines: Vec<Line>,
    index: HashMap<String, usize>,
}

impl ConfDoc {
    /// Parse a document. Lines that are not `key = value` pairs are kept
    /// verbatim; parsing never fails.
    pub fn parse(text: &str) -> Self {
        let mut doc = ConfDoc::default();
        for raw in text.lines() {
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
                doc.lines.push(Line::Raw(raw.to_string()));
                continue;
            }
            match trimmed.split_once('=') {
                Some((key, value)) => {
                    let key = key.trim().to_string();
                    let value = value.trim().to_string();
                    // Last occurrence wins; drop the earlier line so it
                    // cannot be re-emitted stale.
                    doc.remove(&key);
                    doc.index.insert(key.clone(), doc.lines.len());
                    doc.lines.push(Line::Pair { key, value });
                }
                None => doc.lines.push(Line::Raw(raw.to_string())),
            }
        }
        doc
    }

    /// Raw text of a key's value, if the key is present at all.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.index.get(key).and_then(|&i| match &self.lines[i] {
            Line::Pair { value, .. } => Some(value.as_str()),
            Line::Raw(_) => None,
        })
    }

    /// Whether a key is present, distinguishing "absent" from "default".
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Update a pair in place, or append it if the key is new.
    pub fn set(&mut self, key: &str, value: String) {
        match self.index.get(key) {
            Some(&i) => self.lines[i] = Line::Pair { key: key.to_string(), value },
            None => {
                self.index.insert(key.to_string(), self.lines.len());
                self.lines.push(Line::Pair { key: key.to_string(), value });
            }
        }
    }

    /// Remove a pair. Raw lines are never touched.
    pub fn remove(&mut self, key: &str) -> bool {
        match self.index.remove(key) {
            Some(i) => {
                self.lines.remove(i);
                for slot in self.index.values_mut() {
                    if *slot > i {
                        *slot -= 1;
                    }
                }
                true
            }
            None => false,
        }
    }

    /// Iterate all `(key, value)` pairs in document order.
    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.lines.iter().filter_map(|line| match line {
            Line::Pair { key, value } => Some((key.as_str(), value.as_str())),
            Line::Raw(_) => None,
        })
    }

    /// Re-emit the document, raw lines verbatim and pairs as `key = value`.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            match line {
                Line::Raw(raw) => out.push_str(raw),
                Line::Pair { key, value } => {
                    out.push_str(key);
                    out.push_str(" = ");
                    out.push_str(value);
                }
            }
            out.push('\n');
        }
        out
    }
}

/// Serialization mode for [`serialize_layer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Emit every value the layer holds.
    All,
    /// Emit only values whose removal would change the resolved result.
    ChangedOnly,
}

/// Load a layer's textual config into the engine.
///
/// Every recognized `key = value` pair is parsed as the matching option's
/// declared type and inserted into this layer's store. Unknown keys and
/// unparseable values are warned about and skipped, leaving any existing
/// value untouched. The parsed document becomes the layer's backing text.
pub fn load_layer(
    registry: &Registry,
    layers: &mut LayerSet,
    layer: &LayerKey,
    text: &str,
    tracker: &ChangeTracker,
) -> Result<()> {
    if layers.get(layer).is_none() {
        warn!("load_layer: unknown layer {}, ignoring", layer);
        return Ok(());
    }
    let doc = ConfDoc::parse(text);
    let mut loaded = 0usize;
    for (key, raw) in doc.pairs() {
        let option = match registry.get(key) {
            Some(option) => option,
            None => {
                warn!("Config key '{}' does not match any registered option", key);
                continue;
            }
        };
        let value = match Value::parse_as(option.def().kind, raw) {
            Ok(value) => value,
            Err(err) => {
                warn!("Config key '{}': {:#}, keeping existing value", key, err);
                continue;
            }
        };
        registry.write_to_layer(layers, &option, layer, value, tracker)?;
        loaded += 1;
    }
    if let Some(layer) = layers.get_mut(layer) {
        layer.doc = doc;
        // Freshly loaded text is in sync with the store by definition.
        layer.dirty = false;
    }
    info!("Loaded {} values into layer {}", loaded, layer);
    Ok(())
}

/// Read a layer's config file from disk and load it.
pub fn load_layer_file(
    registry: &Registry,
    layers: &mut LayerSet,
    layer: &LayerKey,
    path: &Path,
    tracker: &ChangeTracker,
) -> Result<()> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    load_layer(registry, layers, layer, &text, tracker)
}

/// Serialize a layer back to its text form.
///
/// Changed values are merged into the previously-loaded document so manual
/// comments and unrelated keys survive; `overwrite` rebuilds the document
/// from scratch instead. NoSave options are never emitted, and in
/// [`WriteMode::ChangedOnly`] redundant values (those with no observable
/// effect on resolution) are skipped as well.
pub fn serialize_layer(
    registry: &Registry,
    layers: &mut LayerSet,
    layer: &LayerKey,
    mode: WriteMode,
    overwrite: bool,
) -> String {
    let mut doc = match layers.get(layer) {
        Some(l) if !overwrite => l.doc.clone(),
        _ => ConfDoc::default(),
    };
    for option in registry.list_all() {
        let def = option.def();
        if def.flags.no_save {
            // Scrub any pair the loaded text carried for it.
            doc.remove(&def.name);
            continue;
        }
        let value = match option.value_in_layer(layer) {
            Some(value) => value,
            None => continue,
        };
        if mode == WriteMode::ChangedOnly && option.is_redundant_in(layer) {
            doc.remove(&def.name);
            continue;
        }
        doc.set(&def.name, value.to_conf_string());
    }
    if let Some(l) = layers.get_mut(layer) {
        l.doc = doc.clone();
        l.dirty = false;
    }
    doc.to_text()
}

/// Serialize a layer and write it to disk.
pub fn save_layer_file(
    registry: &Registry,
    layers: &mut LayerSet,
    layer: &LayerKey,
    path: &Path,
    mode: WriteMode,
    overwrite: bool,
) -> Result<()> {
    let text = serialize_layer(registry, layers, layer, mode, overwrite);
    fs::write(path, text).with_context(|| format!("Failed to write config file: {:?}", path))?;
    info!("Saved layer {} to {:?}", layer, path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_preserves_raw_lines() {
        let text = "# rendering tweaks\n\nrender.scale = 0.75\nbogus line\n";
        let doc = ConfDoc::parse(text);
        assert_eq!(doc.get("render.scale"), Some("0.75"));
        assert!(doc.contains("render.scale"));
        assert!(!doc.contains("render.other"));
        assert_eq!(doc.to_text(), "# rendering tweaks\n\nrender.scale = 0.75\nbogus line\n");
    }

    #[test]
    fn test_set_updates_in_place_and_appends() {
        let mut doc = ConfDoc::parse("# keep me\na.b = 1\n");
        doc.set("a.b", "2".to_string());
        doc.set("c.d", "3".to_string());
        assert_eq!(doc.to_text(), "# keep me\na.b = 2\nc.d = 3\n");
    }

    #[test]
    fn test_duplicate_key_last_occurrence_wins() {
        let mut doc = ConfDoc::parse("a.b = 1\nc.d = 2\na.b = 3\n");
        assert_eq!(doc.get("a.b"), Some("3"));
        assert_eq!(doc.to_text(), "c.d = 2\na.b = 3\n");
        doc.set("a.b", "4".to_string());
        assert_eq!(doc.to_text(), "c.d = 2\na.b = 4\n");
    }

    #[test]
    fn test_remove_reindexes() {
        let mut doc = ConfDoc::parse("a.a = 1\na.b = 2\na.c = 3\n");
        assert!(doc.remove("a.b"));
        assert!(!doc.remove("a.b"));
        assert_eq!(doc.get("a.c"), Some("3"));
        assert_eq!(doc.to_text(), "a.a = 1\na.c = 3\n");
    }
}
