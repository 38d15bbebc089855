//! Reachability tagger: discovers which live objects go into one snapshot.
//!
//! Рекурсивный pre-order обход от корня сцены. Объект тегируется один раз за проход
//! (visited-set живёт в самом `Tagger`, на объектах ничего не помечается):
//! сначала его класс и outer, затем сам Element, и только для объектов внутри
//! пространства имён корня: обход их свойств. Всё снаружи попадает в таблицу как
//! лист (import) и не раскрывается.
//!
//! Поэтому class/outer индекс любого Element'а либо 0, либо меньше его собственного.

use anyhow::{anyhow, Result};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};

use crate::names::{name_fits, NameInterner};
use crate::outcome::Outcome;
use crate::refs::SnapshotRef;
use crate::savefile::{ElementRecord, Origin};
use crate::world::{Object, ObjectId, World, OBJ_PERSISTED_MASK};

/// Element plus the live object it was captured from (save side only).
#[derive(Debug, Clone)]
pub struct TaggedElement {
    pub object: ObjectId,
    pub record: ElementRecord,
}

/// Result of one tagging pass.
#[derive(Debug)]
pub struct Tagged {
    pub elements: Vec<TaggedElement>,
    pub names: NameInterner,
    pub slots: HashMap<ObjectId, usize>,
}

impl Tagged {
    pub fn slot_of(&self, id: Option<ObjectId>) -> SnapshotRef {
        id.and_then(|id| self.slots.get(&id))
            .map(|&s| SnapshotRef::from_slot(s))
            .unwrap_or(SnapshotRef::NULL)
    }
}

pub struct Tagger<'w> {
    world: &'w World,
    namespace: ObjectId,
    exclude: &'w [String],
    visited: HashSet<ObjectId>,
    slots: HashMap<ObjectId, usize>,
    names: NameInterner,
    elements: Vec<TaggedElement>,
}

impl<'w> Tagger<'w> {
    /// Fresh pass; `None` is interned before anything else so index 0 is stable.
    pub fn new(world: &'w World, namespace: ObjectId, exclude: &'w [String]) -> Self {
        Self {
            world,
            namespace,
            exclude,
            visited: HashSet::new(),
            slots: HashMap::new(),
            names: NameInterner::new(),
            elements: Vec::new(),
        }
    }

    /// Owned by the snapshot: the namespace package itself or anything inside it.
    pub fn in_namespace(&self, id: ObjectId) -> bool {
        id == self.namespace || self.world.is_in(id, self.namespace)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Tag one object. Excluded objects (and objects whose tagging is still in
    /// progress higher up the stack) yield the null reference.
    pub fn tag(&mut self, id: ObjectId) -> Outcome<SnapshotRef> {
        if let Some(&slot) = self.slots.get(&id) {
            return Outcome::Ok(SnapshotRef::from_slot(slot));
        }
        if !self.visited.insert(id) {
            return Outcome::Ok(SnapshotRef::NULL);
        }
        let world = self.world;
        let Some(obj) = world.get(id) else {
            return Outcome::recovered(format!("dangling reference {}", id));
        };
        if let Some(reason) = self.excluded(id, obj) {
            debug!("tag: skip {} ({})", world.path_name(id), reason);
            return Outcome::Ok(SnapshotRef::NULL);
        }
        if !name_fits(&obj.name) {
            return Outcome::Fatal(anyhow!(
                "object name '{}' does not fit a name entry",
                world.path_name(id)
            ));
        }
        self.tag_element(id, obj).into()
    }

    /// `tag` for an optional reference; recovered failures are logged and become null.
    pub fn tag_ref(&mut self, id: Option<ObjectId>) -> Result<SnapshotRef> {
        let Some(id) = id else {
            return Ok(SnapshotRef::NULL);
        };
        Ok(self
            .tag(id)
            .settle(|m| warn!("tag: {}", m))?
            .unwrap_or(SnapshotRef::NULL))
    }

    pub fn finish(self) -> Tagged {
        Tagged {
            elements: self.elements,
            names: self.names,
            slots: self.slots,
        }
    }

    fn excluded(&self, id: ObjectId, obj: &Object) -> Option<&'static str> {
        let transient = self.world.transient_package();
        if obj.is_pending_kill() {
            Some("pending kill")
        } else if id == transient || self.world.is_in(id, transient) {
            Some("transient package")
        } else if obj.is_transient() && !obj.is_class() {
            Some("transient")
        } else if self.world.is_a_named(id, self.exclude) {
            Some("excluded class")
        } else {
            None
        }
    }

    fn tag_element(&mut self, id: ObjectId, obj: &'w Object) -> Result<SnapshotRef> {
        // Пакет верхнего уровня пишется без класса: class 0 + outer 0 = Core.Package.
        let class = if obj.is_package() && obj.outer.is_none() {
            SnapshotRef::NULL
        } else {
            self.tag_ref(obj.class)?
        };
        let outer = self.tag_ref(obj.outer)?;
        let name = self.names.intern(&obj.name);

        let in_ns = self.in_namespace(id);
        let origin = match (in_ns, obj.linker.is_some()) {
            (false, _) => Origin::Unresolved,
            (true, true) => Origin::ImportOnly,
            (true, false) => Origin::NewInstance,
        };

        let slot = self.elements.len();
        self.elements.push(TaggedElement {
            object: id,
            record: ElementRecord {
                flags: obj.flags & OBJ_PERSISTED_MASK,
                name,
                class,
                outer,
                origin,
                payload: Vec::new(),
            },
        });
        self.slots.insert(id, slot);
        debug!(
            "tag: #{} {} class={} outer={} {:?}",
            slot + 1,
            self.world.path_name(id),
            class,
            outer,
            origin
        );

        if in_ns {
            // Класс из пространства имён несёт super и defaults: их ссылки тоже в таблицу.
            if let Some(info) = obj.class_info() {
                self.tag_ref(info.super_class)?;
                for value in info.defaults.values() {
                    let mut refs = Vec::new();
                    value.for_each_object(&mut |o| refs.push(o));
                    for r in refs {
                        self.tag_ref(Some(r))?;
                    }
                }
            }
            for value in obj.props.values() {
                let mut refs = Vec::new();
                value.for_each_object(&mut |o| refs.push(o));
                for r in refs {
                    self.tag_ref(Some(r))?;
                }
            }
        }
        Ok(SnapshotRef::from_slot(slot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::{Props, Value, OBJ_PUBLIC, OBJ_TRANSIENT};

    struct Fixture {
        w: World,
        actor: ObjectId,
        map: ObjectId,
        level: ObjectId,
    }

    fn fixture() -> Fixture {
        let mut w = World::new();
        let engine = w.create_package("Engine").unwrap();
        let actor = w.create_class(engine, "Actor", None, Props::new()).unwrap();
        w.create_class(engine, "StatLog", Some(actor), Props::new()).unwrap();
        let level_class = w.create_class(engine, "Level", None, Props::new()).unwrap();
        let map = w.create_package("Map").unwrap();
        let level = w.construct(level_class, map, "MyLevel", OBJ_PUBLIC).unwrap();
        Fixture { w, actor, map, level }
    }

    fn no_exclude() -> Vec<String> {
        Vec::new()
    }

    #[test]
    fn class_and_outer_precede_the_object() {
        let mut f = fixture();
        let a = f.w.construct(f.actor, f.level, "A", OBJ_PUBLIC).unwrap();
        let b = f.w.construct(f.actor, f.level, "B", OBJ_PUBLIC).unwrap();
        f.w.set_prop(a, "Next", Value::Object(Some(b))).unwrap();
        f.w.set_prop(b, "Prev", Value::Object(Some(a))).unwrap();

        let ex = no_exclude();
        let mut t = Tagger::new(&f.w, f.map, &ex);
        t.tag_ref(Some(a)).unwrap();
        let tagged = t.finish();

        for (i, e) in tagged.elements.iter().enumerate() {
            let own = i as u32 + 1;
            let r = &e.record;
            assert!(r.class.is_null() || r.class.raw() < own, "class of #{}", own);
            assert!(r.outer.is_null() || r.outer.raw() < own, "outer of #{}", own);
        }
        assert!(!tagged.slot_of(Some(b)).is_null(), "B reached through A");
        assert_eq!(tagged.names.table().get(0), Some("None"));
    }

    #[test]
    fn tagging_twice_yields_one_element() {
        let mut f = fixture();
        let a = f.w.construct(f.actor, f.level, "A", OBJ_PUBLIC).unwrap();
        let ex = no_exclude();
        let mut t = Tagger::new(&f.w, f.map, &ex);
        let r1 = t.tag_ref(Some(a)).unwrap();
        let n = t.len();
        let r2 = t.tag_ref(Some(a)).unwrap();
        assert_eq!(r1, r2);
        assert_eq!(t.len(), n);
    }

    #[test]
    fn origins_follow_namespace_and_linker() {
        let mut f = fixture();
        let a = f.w.construct(f.actor, f.level, "A", OBJ_PUBLIC).unwrap();
        let linked = f.w.construct(f.actor, f.level, "Linked", OBJ_PUBLIC).unwrap();
        f.w.set_linker(
            linked,
            Some(crate::world::Linker {
                package: "Map".into(),
                export_index: 0,
            }),
        )
        .unwrap();
        f.w.set_prop(a, "Other", Value::Object(Some(linked))).unwrap();

        let ex = no_exclude();
        let mut t = Tagger::new(&f.w, f.map, &ex);
        t.tag_ref(Some(a)).unwrap();
        let tagged = t.finish();
        let origin_of = |id: ObjectId| {
            let slot = tagged.slot_of(Some(id)).slot().unwrap();
            tagged.elements[slot].record.origin
        };
        assert_eq!(origin_of(a), Origin::NewInstance);
        assert_eq!(origin_of(linked), Origin::ImportOnly);
        assert_eq!(origin_of(f.map), Origin::NewInstance);
        assert_eq!(origin_of(f.actor), Origin::Unresolved);
    }

    #[test]
    fn outside_objects_are_not_descended() {
        let mut f = fixture();
        let other = f.w.create_package("Other").unwrap();
        let far = f.w.construct(f.actor, other, "Far", OBJ_PUBLIC).unwrap();
        let farther = f.w.construct(f.actor, other, "Farther", OBJ_PUBLIC).unwrap();
        f.w.set_prop(far, "Link", Value::Object(Some(farther))).unwrap();
        let a = f.w.construct(f.actor, f.level, "A", OBJ_PUBLIC).unwrap();
        f.w.set_prop(a, "Link", Value::Object(Some(far))).unwrap();

        let ex = no_exclude();
        let mut t = Tagger::new(&f.w, f.map, &ex);
        t.tag_ref(Some(a)).unwrap();
        let tagged = t.finish();
        assert!(!tagged.slot_of(Some(far)).is_null());
        assert!(tagged.slot_of(Some(farther)).is_null());
    }

    #[test]
    fn filters_skip_transient_killed_and_excluded() {
        let mut f = fixture();
        let stat_log = f.w.find_object("Engine.StatLog", None).unwrap();
        let a = f.w.construct(f.actor, f.level, "A", OBJ_PUBLIC).unwrap();
        let log = f.w.construct(stat_log, f.level, "Log", OBJ_PUBLIC).unwrap();
        let tmp = f.w.construct(f.actor, f.level, "Tmp", OBJ_TRANSIENT).unwrap();
        let dead = f.w.construct(f.actor, f.level, "Dead", OBJ_PUBLIC).unwrap();
        let scratch = f.w.transient_package();
        let in_transient = f.w.construct(f.actor, scratch, "Scratch", OBJ_PUBLIC).unwrap();
        f.w.mark_pending_kill(dead).unwrap();
        f.w.set_prop(
            a,
            "Refs",
            Value::Array(vec![
                Value::Object(Some(log)),
                Value::Object(Some(tmp)),
                Value::Object(Some(dead)),
                Value::Object(Some(in_transient)),
            ]),
        )
        .unwrap();

        let ex = vec!["StatLog".to_string()];
        let mut t = Tagger::new(&f.w, f.map, &ex);
        t.tag_ref(Some(a)).unwrap();
        let tagged = t.finish();
        for id in [log, tmp, dead, in_transient] {
            assert!(tagged.slot_of(Some(id)).is_null(), "{} must be skipped", f.w.path_name(id));
        }
    }

    #[test]
    fn long_name_is_fatal() {
        let mut f = fixture();
        let long = "L".repeat(80);
        let a = f.w.construct(f.actor, f.level, &long, OBJ_PUBLIC).unwrap();
        let ex = no_exclude();
        let mut t = Tagger::new(&f.w, f.map, &ex);
        assert!(t.tag(a).is_fatal());
    }

    #[test]
    fn separate_passes_are_independent() {
        let mut f = fixture();
        let a = f.w.construct(f.actor, f.level, "A", OBJ_PUBLIC).unwrap();
        let ex = no_exclude();
        let first = {
            let mut t = Tagger::new(&f.w, f.map, &ex);
            t.tag_ref(Some(a)).unwrap();
            t.finish().elements.len()
        };
        let mut t = Tagger::new(&f.w, f.map, &ex);
        t.tag_ref(Some(a)).unwrap();
        assert_eq!(t.len(), first);
    }
}
