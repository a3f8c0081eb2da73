//! Demo catalog: the known demos and their slide counts.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const LOGIC_GATES: &str = "logic-gates";
pub const SEARCHING_SORTING: &str = "searching-sorting";

/// Maps a demo identifier to its number of slides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DemoCatalog {
    demos: BTreeMap<String, u32>,
}

impl Default for DemoCatalog {
    fn default() -> Self {
        let mut demos = BTreeMap::new();
        demos.insert(LOGIC_GATES.to_string(), 8);
        demos.insert(SEARCHING_SORTING.to_string(), 33);
        Self { demos }
    }
}

impl DemoCatalog {
    pub fn new(demos: BTreeMap<String, u32>) -> Self {
        Self { demos }
    }

    pub fn slide_count(&self, demo: &str) -> Option<u32> {
        self.demos.get(demo).copied()
    }

    pub fn contains(&self, demo: &str) -> bool {
        self.demos.contains_key(demo)
    }

    /// Resolve a client-supplied identifier to a catalog id.
    ///
    /// Controllers send route paths (`/logic-gates`), so a single leading
    /// slash is stripped before lookup.
    pub fn resolve<'a>(&self, raw: &'a str) -> Option<&'a str> {
        let id = raw.strip_prefix('/').unwrap_or(raw);
        self.contains(id).then_some(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.demos.keys().map(String::as_str)
    }
}
