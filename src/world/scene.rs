//! Snapshot root: the level object plus the level-wide data saved alongside it.

use std::collections::BTreeMap;

use super::object::ObjectId;
use crate::savefile::Guid;

/// One edge of the navigation graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReachSpec {
    pub distance: i32,
    pub start: Option<ObjectId>,
    pub end: Option<ObjectId>,
    pub collision_radius: i32,
    pub collision_height: i32,
    pub reach_flags: i32,
    pub pruned: bool,
}

/// Caller-owned snapshot root. The root namespace is `root`'s outer package.
#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    /// Level object.
    pub root: ObjectId,
    /// Slot-stable roster; `None` slots are preserved.
    pub actors: Vec<Option<ObjectId>>,
    pub reach_specs: Vec<ReachSpec>,
    pub travel_info: BTreeMap<String, String>,
    /// `Map?Option=Value` style URL; the map part is the root identifier.
    pub url: String,
    pub title: String,
    pub guid: Guid,
    pub players: Vec<String>,
    pub notes: String,
}

impl Scene {
    pub fn new(root: ObjectId, url: impl Into<String>) -> Self {
        Self {
            root,
            actors: Vec::new(),
            reach_specs: Vec::new(),
            travel_info: BTreeMap::new(),
            url: url.into(),
            title: String::new(),
            guid: Guid::default(),
            players: Vec::new(),
            notes: String::new(),
        }
    }
}
