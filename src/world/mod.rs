//! world: live object graph owned by the caller.
//!
//! Arena of objects addressed by `ObjectId`; every cross reference (class, outer,
//! property values) is an id. Path lookups go through a (outer, name) index.
//!
//! Журнал (begin/commit/rollback) фиксирует каждую мутацию через API `World`,
//! чтобы фатальная ошибка загрузки вернула граф вызывающего в исходное состояние.

pub mod object;
pub mod scene;

use anyhow::{anyhow, Result};
use std::collections::HashMap;

use crate::consts::{CLASS_CLASS, CORE_PACKAGE, PACKAGE_CLASS, TRANSIENT_PACKAGE};

pub use object::{
    ClassInfo, Linker, Object, ObjectId, ObjectKind, Props, Value, OBJ_PENDING_KILL,
    OBJ_PERSISTED_MASK, OBJ_PUBLIC, OBJ_STANDALONE, OBJ_TRANSACTIONAL, OBJ_TRANSIENT,
};
pub use scene::{ReachSpec, Scene};

#[derive(Debug)]
enum JournalEntry {
    Created(ObjectId),
    Before(ObjectId, Object),
    Prop(ObjectId, String, Option<Value>),
}

pub struct World {
    objects: Vec<Option<Object>>,
    children: HashMap<(Option<ObjectId>, String), ObjectId>,
    journal: Option<Vec<JournalEntry>>,
    core: ObjectId,
    class_class: ObjectId,
    package_class: ObjectId,
    transient: ObjectId,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// Empty world with the built-ins: `Core`, `Core.Class`, `Core.Package`, `Transient`.
    pub fn new() -> Self {
        let mut w = Self {
            objects: Vec::new(),
            children: HashMap::new(),
            journal: None,
            core: ObjectId(0),
            class_class: ObjectId(1),
            package_class: ObjectId(2),
            transient: ObjectId(3),
        };
        let class_info = || {
            ObjectKind::Class(ClassInfo {
                super_class: None,
                defaults: Props::new(),
            })
        };
        w.core = w.insert(Object {
            name: CORE_PACKAGE.to_string(),
            class: None,
            outer: None,
            flags: OBJ_PUBLIC | OBJ_STANDALONE,
            kind: ObjectKind::Package,
            props: Props::new(),
            linker: None,
        });
        w.class_class = w.insert(Object {
            name: CLASS_CLASS.to_string(),
            class: None,
            outer: Some(w.core),
            flags: OBJ_PUBLIC | OBJ_STANDALONE,
            kind: class_info(),
            props: Props::new(),
            linker: None,
        });
        // Метакласс сам себе класс.
        if let Some(Some(o)) = w.objects.get_mut(w.class_class.index()) {
            o.class = Some(w.class_class);
        }
        w.package_class = w.insert(Object {
            name: PACKAGE_CLASS.to_string(),
            class: Some(w.class_class),
            outer: Some(w.core),
            flags: OBJ_PUBLIC | OBJ_STANDALONE,
            kind: class_info(),
            props: Props::new(),
            linker: None,
        });
        if let Some(Some(o)) = w.objects.get_mut(w.core.index()) {
            o.class = Some(w.package_class);
        }
        w.transient = w.insert(Object {
            name: TRANSIENT_PACKAGE.to_string(),
            class: Some(w.package_class),
            outer: None,
            flags: OBJ_TRANSIENT,
            kind: ObjectKind::Package,
            props: Props::new(),
            linker: None,
        });
        w
    }

    // ---- built-ins ----

    pub fn core_package(&self) -> ObjectId {
        self.core
    }

    pub fn class_class(&self) -> ObjectId {
        self.class_class
    }

    pub fn package_class(&self) -> ObjectId {
        self.package_class
    }

    pub fn transient_package(&self) -> ObjectId {
        self.transient
    }

    // ---- queries ----

    /// Number of live (not pending-kill) objects.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: ObjectId) -> Option<&Object> {
        self.objects.get(id.index()).and_then(|o| o.as_ref())
    }

    /// Live objects in id order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &Object)> {
        self.objects.iter().enumerate().filter_map(|(i, o)| match o {
            Some(o) if !o.is_pending_kill() => Some((ObjectId(i as u32), o)),
            _ => None,
        })
    }

    pub fn class_of(&self, id: ObjectId) -> Option<ObjectId> {
        self.get(id).and_then(|o| o.class)
    }

    pub fn is_class(&self, id: ObjectId) -> bool {
        self.get(id).map(|o| o.is_class()).unwrap_or(false)
    }

    pub fn class_defaults(&self, class: ObjectId) -> Option<&Props> {
        self.get(class).and_then(|o| o.class_info()).map(|c| &c.defaults)
    }

    /// `class` equals `base` or inherits from it.
    pub fn is_child_of(&self, class: ObjectId, base: ObjectId) -> bool {
        let mut cur = Some(class);
        let mut guard = 0usize;
        while let Some(c) = cur {
            if c == base {
                return true;
            }
            guard += 1;
            if guard > self.objects.len() {
                return false;
            }
            cur = self.get(c).and_then(|o| o.class_info()).and_then(|i| i.super_class);
        }
        false
    }

    /// Object's class is `class` or a subclass of it.
    pub fn is_a(&self, id: ObjectId, class: ObjectId) -> bool {
        match self.class_of(id) {
            Some(c) => self.is_child_of(c, class),
            None => false,
        }
    }

    /// Class (or any super class) is named one of `names`.
    pub fn is_a_named(&self, id: ObjectId, names: &[String]) -> bool {
        if names.is_empty() {
            return false;
        }
        let mut cur = self.class_of(id);
        let mut guard = 0usize;
        while let Some(c) = cur {
            let Some(o) = self.get(c) else { break };
            if names.iter().any(|n| *n == o.name) {
                return true;
            }
            guard += 1;
            if guard > self.objects.len() {
                break;
            }
            cur = o.class_info().and_then(|i| i.super_class);
        }
        false
    }

    /// `id` lives somewhere below `package` in the outer chain (not `package` itself).
    pub fn is_in(&self, id: ObjectId, package: ObjectId) -> bool {
        let mut cur = self.get(id).and_then(|o| o.outer);
        let mut guard = 0usize;
        while let Some(o) = cur {
            if o == package {
                return true;
            }
            guard += 1;
            if guard > self.objects.len() {
                return false;
            }
            cur = self.get(o).and_then(|x| x.outer);
        }
        false
    }

    /// Topmost package of the outer chain (the object itself if it has no outer).
    pub fn outermost(&self, id: ObjectId) -> ObjectId {
        let mut cur = id;
        let mut guard = 0usize;
        while let Some(o) = self.get(cur).and_then(|x| x.outer) {
            cur = o;
            guard += 1;
            if guard > self.objects.len() {
                break;
            }
        }
        cur
    }

    /// Dot-separated path, e.g. `Map.Level.Light3`.
    pub fn path_name(&self, id: ObjectId) -> String {
        let mut parts = Vec::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            match self.get(c) {
                Some(o) => {
                    parts.push(o.name.as_str());
                    cur = o.outer;
                }
                None => break,
            }
            if parts.len() > self.objects.len() {
                break;
            }
        }
        parts.reverse();
        parts.join(".")
    }

    pub fn find_child(&self, outer: Option<ObjectId>, name: &str) -> Option<ObjectId> {
        self.children.get(&(outer, name.to_string())).copied()
    }

    /// Locate a live object by path; with `class` set the object must be-a that class.
    pub fn find_object(&self, path: &str, class: Option<ObjectId>) -> Option<ObjectId> {
        let mut cur: Option<ObjectId> = None;
        for seg in path.split('.') {
            if seg.is_empty() {
                return None;
            }
            cur = Some(self.find_child(cur, seg)?);
        }
        let found = cur?;
        match class {
            Some(c) if !self.is_a(found, c) => None,
            _ => Some(found),
        }
    }

    // ---- construction ----

    /// Top-level package; returns the existing one when already present.
    pub fn create_package(&mut self, name: &str) -> Result<ObjectId> {
        if let Some(id) = self.find_child(None, name) {
            if self.get(id).map(|o| o.is_package()).unwrap_or(false) {
                return Ok(id);
            }
            return Err(anyhow!("'{}' exists and is not a package", name));
        }
        check_name(name)?;
        let pc = self.package_class;
        Ok(self.insert_journaled(Object {
            name: name.to_string(),
            class: Some(pc),
            outer: None,
            flags: OBJ_PUBLIC | OBJ_STANDALONE,
            kind: ObjectKind::Package,
            props: Props::new(),
            linker: None,
        }))
    }

    /// New class; defaults are flattened on top of the super class defaults.
    pub fn create_class(
        &mut self,
        outer: ObjectId,
        name: &str,
        super_class: Option<ObjectId>,
        defaults: Props,
    ) -> Result<ObjectId> {
        check_name(name)?;
        if self.get(outer).is_none() {
            return Err(anyhow!("create_class {}: outer {} does not exist", name, outer));
        }
        if self.find_child(Some(outer), name).is_some() {
            return Err(anyhow!(
                "create_class: '{}' already exists in {}",
                name,
                self.path_name(outer)
            ));
        }
        let mut flat = match super_class {
            Some(s) => self
                .class_defaults(s)
                .cloned()
                .ok_or_else(|| anyhow!("create_class {}: super {} is not a class", name, s))?,
            None => Props::new(),
        };
        flat.extend(defaults);
        let cc = self.class_class;
        Ok(self.insert_journaled(Object {
            name: name.to_string(),
            class: Some(cc),
            outer: Some(outer),
            flags: OBJ_PUBLIC | OBJ_STANDALONE,
            kind: ObjectKind::Class(ClassInfo {
                super_class,
                defaults: flat,
            }),
            props: Props::new(),
            linker: None,
        }))
    }

    /// Construct a fresh object of `class` named `name` under `outer`.
    pub fn construct(
        &mut self,
        class: ObjectId,
        outer: ObjectId,
        name: &str,
        flags: u32,
    ) -> Result<ObjectId> {
        check_name(name)?;
        if self.get(outer).is_none() {
            return Err(anyhow!("construct {}: outer {} does not exist", name, outer));
        }
        if self.find_child(Some(outer), name).is_some() {
            return Err(anyhow!(
                "construct: '{}' already exists in {}",
                name,
                self.path_name(outer)
            ));
        }
        let (kind, props) = self.fresh_state(class)?;
        Ok(self.insert_journaled(Object {
            name: name.to_string(),
            class: Some(class),
            outer: Some(outer),
            flags,
            kind,
            props,
            linker: None,
        }))
    }

    /// Re-construct an existing object in place: same id, name and outer, state reset
    /// to class defaults, no linker. A class keeps its `ClassInfo`; the snapshot's
    /// class section overwrites it afterwards (see `set_class_state`).
    pub fn reconstruct_in_place(&mut self, id: ObjectId, flags: u32) -> Result<()> {
        let existing = self
            .get(id)
            .ok_or_else(|| anyhow!("reconstruct: {} does not exist", id))?;
        let class = existing
            .class
            .ok_or_else(|| anyhow!("reconstruct: {} has no class", id))?;
        let keep_kind = existing.is_class();
        let (kind, props) = self.fresh_state(class)?;
        self.modify(id, |o| {
            if !keep_kind {
                o.kind = kind;
            }
            o.props = props;
            o.flags = flags;
            o.linker = None;
        })
    }

    /// Replace super class and flattened defaults of a class (journaled).
    pub fn set_class_state(&mut self, id: ObjectId, super_class: Option<ObjectId>, defaults: Props) -> Result<()> {
        if !self.is_class(id) {
            return Err(anyhow!("set_class_state: {} is not a class", self.path_name(id)));
        }
        if let Some(s) = super_class {
            if !self.is_class(s) {
                return Err(anyhow!("set_class_state: super {} is not a class", self.path_name(s)));
            }
            if self.is_child_of(s, id) {
                return Err(anyhow!("set_class_state: {} would inherit from itself", self.path_name(id)));
            }
        }
        self.modify(id, |o| {
            o.kind = ObjectKind::Class(ClassInfo {
                super_class,
                defaults,
            })
        })
    }

    /// Reset an instance's properties to a copy of its class defaults (journaled).
    pub fn reset_to_class_defaults(&mut self, id: ObjectId) -> Result<()> {
        let class = self
            .class_of(id)
            .ok_or_else(|| anyhow!("reset: {} has no class", id))?;
        let defaults = self
            .class_defaults(class)
            .cloned()
            .ok_or_else(|| anyhow!("reset: {} is not a class", self.path_name(class)))?;
        self.modify(id, |o| o.props = defaults)
    }

    fn fresh_state(&self, class: ObjectId) -> Result<(ObjectKind, Props)> {
        if class == self.package_class {
            return Ok((ObjectKind::Package, Props::new()));
        }
        if class == self.class_class {
            return Ok((
                ObjectKind::Class(ClassInfo {
                    super_class: None,
                    defaults: Props::new(),
                }),
                Props::new(),
            ));
        }
        let defaults = self
            .class_defaults(class)
            .cloned()
            .ok_or_else(|| anyhow!("{} is not a class", self.path_name(class)))?;
        Ok((ObjectKind::Instance, defaults))
    }

    // ---- mutation ----

    pub fn set_prop(&mut self, id: ObjectId, key: &str, value: Value) -> Result<()> {
        let o = self
            .objects
            .get_mut(id.index())
            .and_then(|o| o.as_mut())
            .ok_or_else(|| anyhow!("set_prop: {} does not exist", id))?;
        let old = o.props.insert(key.to_string(), value);
        if let Some(j) = self.journal.as_mut() {
            j.push(JournalEntry::Prop(id, key.to_string(), old));
        }
        Ok(())
    }

    pub fn set_flags(&mut self, id: ObjectId, flags: u32) -> Result<()> {
        self.modify(id, |o| o.flags = flags)
    }

    pub fn set_linker(&mut self, id: ObjectId, linker: Option<Linker>) -> Result<()> {
        self.modify(id, |o| o.linker = linker)
    }

    /// Destroy: the object stays in the arena but is invisible to lookups and saves.
    pub fn mark_pending_kill(&mut self, id: ObjectId) -> Result<()> {
        let key = {
            let o = self
                .get(id)
                .ok_or_else(|| anyhow!("mark_pending_kill: {} does not exist", id))?;
            (o.outer, o.name.clone())
        };
        self.modify(id, |o| o.flags |= OBJ_PENDING_KILL)?;
        if self.children.get(&key) == Some(&id) {
            self.children.remove(&key);
        }
        Ok(())
    }

    /// Swap the class-default template; returns the previous one. Not journaled:
    /// callers restore it themselves (see `saver::BaselineGuard`).
    pub(crate) fn swap_class_defaults(&mut self, class: ObjectId, defaults: Props) -> Result<Props> {
        match self.objects.get_mut(class.index()).and_then(|o| o.as_mut()) {
            Some(Object {
                kind: ObjectKind::Class(info),
                ..
            }) => Ok(std::mem::replace(&mut info.defaults, defaults)),
            _ => Err(anyhow!("swap_class_defaults: {} is not a class", class)),
        }
    }

    // ---- journal ----

    pub fn begin_journal(&mut self) {
        self.journal = Some(Vec::new());
    }

    pub fn journal_active(&self) -> bool {
        self.journal.is_some()
    }

    pub fn commit_journal(&mut self) {
        self.journal = None;
    }

    /// Undo every journaled mutation (newest first).
    pub fn rollback_journal(&mut self) {
        let Some(entries) = self.journal.take() else {
            return;
        };
        for e in entries.into_iter().rev() {
            match e {
                JournalEntry::Created(id) => {
                    if let Some(Some(o)) = self.objects.get(id.index()) {
                        let key = (o.outer, o.name.clone());
                        if self.children.get(&key) == Some(&id) {
                            self.children.remove(&key);
                        }
                    }
                    if id.index() + 1 == self.objects.len() {
                        self.objects.pop();
                    } else if let Some(slot) = self.objects.get_mut(id.index()) {
                        *slot = None;
                    }
                }
                JournalEntry::Before(id, old) => {
                    if !old.is_pending_kill() {
                        self.children.insert((old.outer, old.name.clone()), id);
                    }
                    if let Some(slot) = self.objects.get_mut(id.index()) {
                        *slot = Some(old);
                    }
                }
                JournalEntry::Prop(id, key, old) => {
                    if let Some(Some(o)) = self.objects.get_mut(id.index()) {
                        match old {
                            Some(v) => {
                                o.props.insert(key, v);
                            }
                            None => {
                                o.props.remove(&key);
                            }
                        }
                    }
                }
            }
        }
    }

    // ---- internals ----

    fn insert(&mut self, o: Object) -> ObjectId {
        let id = ObjectId(self.objects.len() as u32);
        self.children.insert((o.outer, o.name.clone()), id);
        self.objects.push(Some(o));
        id
    }

    fn insert_journaled(&mut self, o: Object) -> ObjectId {
        let id = self.insert(o);
        if let Some(j) = self.journal.as_mut() {
            j.push(JournalEntry::Created(id));
        }
        id
    }

    fn modify<F: FnOnce(&mut Object)>(&mut self, id: ObjectId, f: F) -> Result<()> {
        let o = self
            .objects
            .get_mut(id.index())
            .and_then(|o| o.as_mut())
            .ok_or_else(|| anyhow!("{} does not exist", id))?;
        if let Some(j) = self.journal.as_mut() {
            j.push(JournalEntry::Before(id, o.clone()));
        }
        f(o);
        Ok(())
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('.') {
        return Err(anyhow!("invalid object name '{}'", name));
    }
    Ok(())
}
