//! Parameter bindings recovered from the tree of live space instances.
//!
//! Items of a parameterized space are created by its constructor and carry
//! the arguments they were created with. After the driver finishes, the
//! harness reports the instance tree and this walk attributes every binding
//! along an instantiation path to the classes that can see it.

use super::collector::TraceLog;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Snapshot of one space instance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SpaceInstance {
    /// Qualified class name, e.g. `Pkg._mx_classes._c_Projection`.
    pub class: String,
    /// Arguments this item was created with. Empty for static spaces.
    #[serde(default)]
    pub params: Vec<(String, Value)>,
    /// Named child spaces.
    #[serde(default)]
    pub children: Vec<(String, SpaceInstance)>,
    /// Items created by calling this space.
    #[serde(default)]
    pub items: Vec<SpaceInstance>,
}

impl SpaceInstance {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            ..Self::default()
        }
    }

    pub fn with_child(mut self, name: impl Into<String>, child: SpaceInstance) -> Self {
        self.children.push((name.into(), child));
        self
    }

    pub fn with_item(mut self, params: Vec<(String, Value)>, mut item: SpaceInstance) -> Self {
        item.params = params;
        self.items.push(item);
        self
    }
}

impl TraceLog {
    /// Records parameter bindings for every item reachable from `root`.
    pub fn record_spaces(&mut self, root: &SpaceInstance) {
        walk(self, root, &[]);
    }

    /// Keeps the first class seen per child name.
    fn note_child(&mut self, parent: &str, name: &str, class: &str) {
        let children = self.children.entry(parent.to_string()).or_default();
        if !children.iter().any(|(n, _)| n == name) {
            children.push((name.to_string(), class.to_string()));
        }
    }

    fn bind(&mut self, space: &SpaceInstance, bindings: &[(String, Value)]) {
        self.params
            .entry(space.class.clone())
            .or_default()
            .extend(bindings.iter().cloned());
        for (_, child) in &space.children {
            self.bind(child, bindings);
        }
    }
}

fn walk(log: &mut TraceLog, space: &SpaceInstance, inherited: &[(String, Value)]) {
    for (name, child) in &space.children {
        log.note_child(&space.class, name, &child.class);
    }
    for item in &space.items {
        let mut bindings = inherited.to_vec();
        bindings.extend(item.params.iter().cloned());
        log.bind(item, &bindings);
        walk(log, item, &bindings);
    }
    for (_, child) in &space.children {
        walk(log, child, inherited);
    }
}
