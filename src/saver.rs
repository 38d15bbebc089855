//! Save: live scene -> snapshot file.
//!
//! Проход:
//! 1) Tag: от корня сцены, затем акторы по порядку и концы reach spec'ов.
//! 2) Payload: очередь: акторы в порядке списка, объекты, на которые они ссылаются,
//!    по мере обнаружения, потом все оставшиеся Element'ы пространства имён.
//!    Для объекта с `Linker` шаблон class defaults временно подменяется его исходным
//!    export'ом из хранилища (`BaselineGuard` возвращает шаблон на любом выходе).
//! 3) Запись: tmp + fsync + rename.

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use crate::config::SaverConfig;
use crate::consts::SAVE_VERSION_CURRENT;
use crate::metrics;
use crate::names::{name_fits, NameInterner};
use crate::props::{write_class_state, write_delta};
use crate::refs::RefSink;
use crate::savefile::{CompactReachSpec, Origin, SaveFile, SaveSummary};
use crate::store::{export_baseline, AssetStore, NullStore};
use crate::tagger::{TaggedElement, Tagger};
use crate::util::{panic_message, write_atomic};
use crate::world::{ObjectId, Props, Scene, World};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    pub path: PathBuf,
    pub elements: usize,
    pub names: usize,
    pub actors: usize,
    pub payload_bytes: usize,
    pub file_bytes: u64,
}

pub struct GameSaver<'s> {
    cfg: SaverConfig,
    store: &'s dyn AssetStore,
}

impl<'s> GameSaver<'s> {
    pub fn new(cfg: SaverConfig, store: &'s dyn AssetStore) -> Self {
        Self { cfg, store }
    }

    pub fn config(&self) -> &SaverConfig {
        &self.cfg
    }

    /// Save `scene` to `path`. Any failure (including an internal panic) is an `Err`;
    /// the live graph is left as it was.
    pub fn save(&self, world: &mut World, scene: &Scene, path: &Path) -> Result<SaveReport> {
        let res = catch_unwind(AssertUnwindSafe(|| self.save_inner(world, scene, path)))
            .unwrap_or_else(|p| Err(anyhow!("save panicked: {}", panic_message(p.as_ref()))));
        match &res {
            Ok(r) => {
                metrics::record_save(r.elements, r.payload_bytes);
                info!(
                    "saved {}: {} elements, {} names, {} B payload, {} B file",
                    r.path.display(),
                    r.elements,
                    r.names,
                    r.payload_bytes,
                    r.file_bytes
                );
            }
            Err(e) => {
                metrics::record_save_failure();
                warn!("save {} failed: {:#}", path.display(), e);
            }
        }
        res
    }

    /// Save into `<save_dir>/Save<slot>.usx`.
    pub fn save_slot(&self, world: &mut World, scene: &Scene, slot: u32) -> Result<SaveReport> {
        let path = self.cfg.slot_path(slot);
        self.save(world, scene, &path)
    }

    fn save_inner(&self, world: &mut World, scene: &Scene, path: &Path) -> Result<SaveReport> {
        let file = self.build(world, scene)?;
        let payload_bytes = file.elements.iter().map(|e| e.payload.len()).sum();
        let file_bytes = write_atomic(path, self.cfg.fsync, |w| {
            file.write_to(w)?;
            Ok(())
        })
        .with_context(|| format!("write snapshot {}", path.display()))?;
        Ok(SaveReport {
            path: path.to_path_buf(),
            elements: file.elements.len(),
            names: file.names.len(),
            actors: file.actors.len(),
            payload_bytes,
            file_bytes,
        })
    }

    /// Build the in-memory snapshot without touching the filesystem.
    pub fn build(&self, world: &mut World, scene: &Scene) -> Result<SaveFile> {
        let summary = SaveSummary {
            version: SAVE_VERSION_CURRENT,
            players: scene.players.clone(),
            title: scene.title.clone(),
            notes: scene.notes.clone(),
            url: scene.url.clone(),
            guid: scene.guid,
        };
        if !summary.is_valid() {
            return Err(anyhow!("URL '{}' names no map; refusing to save", scene.url));
        }
        let namespace = world
            .get(scene.root)
            .ok_or_else(|| anyhow!("scene root {} does not exist", scene.root))?
            .outer
            .ok_or_else(|| anyhow!("scene root {} has no outer package", world.path_name(scene.root)))?;

        // ---- tag ----
        let (tagged, actors, reach_specs) = {
            let mut tagger = Tagger::new(world, namespace, &self.cfg.exclude_classes);
            tagger.tag_ref(Some(scene.root))?;
            let actors = scene
                .actors
                .iter()
                .map(|a| tagger.tag_ref(*a))
                .collect::<Result<Vec<_>>>()?;
            let mut reach_specs = Vec::with_capacity(scene.reach_specs.len());
            for rs in &scene.reach_specs {
                reach_specs.push(CompactReachSpec {
                    distance: rs.distance,
                    start: tagger.tag_ref(rs.start)?,
                    end: tagger.tag_ref(rs.end)?,
                    collision_radius: rs.collision_radius,
                    collision_height: rs.collision_height,
                    reach_flags: rs.reach_flags,
                    pruned: rs.pruned,
                });
            }
            (tagger.finish(), actors, reach_specs)
        };
        debug!(
            "save: tagged {} elements ({} names so far)",
            tagged.elements.len(),
            tagged.names.len()
        );

        // ---- payloads ----
        let mut names = tagged.names;
        let elements = tagged.elements;
        let slots = tagged.slots;
        let mut queue = PayloadQueue::new(elements.len());
        let mut payloads: Vec<Option<Vec<u8>>> = vec![None; elements.len()];

        for a in &actors {
            if let Some(slot) = a.slot() {
                queue.add(slot, &elements);
            }
        }
        self.drain(world, &mut queue, &elements, &slots, &mut names, &mut payloads)?;
        for slot in 0..elements.len() {
            queue.add(slot, &elements);
        }
        self.drain(world, &mut queue, &elements, &slots, &mut names, &mut payloads)?;

        let records = elements
            .into_iter()
            .zip(payloads)
            .map(|(e, p)| {
                let mut r = e.record;
                r.payload = p.unwrap_or_default();
                r
            })
            .collect();

        Ok(SaveFile {
            summary,
            travel_info: scene.travel_info.clone(),
            names: names.into_table(),
            elements: records,
            actors,
            reach_specs,
        })
    }

    fn drain(
        &self,
        world: &mut World,
        queue: &mut PayloadQueue,
        elements: &[TaggedElement],
        slots: &HashMap<ObjectId, usize>,
        names: &mut NameInterner,
        payloads: &mut [Option<Vec<u8>>],
    ) -> Result<()> {
        while let Some(slot) = queue.pop() {
            let mut sink = SnapshotEncoder {
                names: &mut *names,
                slots,
                elements,
                queue: &mut *queue,
            };
            let buf = self
                .serialize(world, &elements[slot], &mut sink)
                .with_context(|| format!("serialize {}", world.path_name(elements[slot].object)))?;
            if buf.len() > self.cfg.max_payload_bytes {
                return Err(anyhow!(
                    "payload of {} is {} B (limit {} B)",
                    world.path_name(elements[slot].object),
                    buf.len(),
                    self.cfg.max_payload_bytes
                ));
            }
            payloads[slot] = Some(buf);
        }
        Ok(())
    }

    fn serialize(&self, world: &mut World, element: &TaggedElement, sink: &mut SnapshotEncoder<'_>) -> Result<Vec<u8>> {
        let id = element.object;
        let class = world.class_of(id);

        let baseline = match (&element.record.origin, class) {
            (Origin::ImportOnly, Some(class)) => {
                let linker = world.get(id).and_then(|o| o.linker.clone());
                match linker {
                    Some(l) => export_baseline(self.store, world, &l)?.map(|decoded| (class, decoded)),
                    None => None,
                }
            }
            _ => None,
        };

        let mut buf = Vec::new();
        match baseline {
            Some((class, decoded)) => {
                let mut template = world.class_defaults(class).cloned().unwrap_or_default();
                for (key, value) in decoded {
                    match value {
                        Some(v) => {
                            template.insert(key, v);
                        }
                        // Ссылка из хранилища не разрешается: свойство обязано попасть в delta.
                        None => {
                            template.remove(&key);
                        }
                    }
                }
                let guard = BaselineGuard::substitute(world, class, template)?;
                metrics::record_baseline_substitution();
                let w = guard.world();
                let obj = w.get(id).ok_or_else(|| anyhow!("{} vanished", id))?;
                write_delta(&mut buf, &obj.props, w.class_defaults(class), sink)?;
            }
            None => {
                let obj = world.get(id).ok_or_else(|| anyhow!("{} vanished", id))?;
                let defaults = class.and_then(|c| world.class_defaults(c));
                write_delta(&mut buf, &obj.props, defaults, sink)?;
                if element.record.origin == Origin::NewInstance && is_namespace_class(world, id) {
                    if let Some(info) = obj.class_info() {
                        write_class_state(&mut buf, info.super_class, &info.defaults, sink)?;
                    }
                }
            }
        }
        Ok(buf)
    }
}

/// Class constructed from the metaclass (the metaclass itself is never rebuilt).
fn is_namespace_class(world: &World, id: ObjectId) -> bool {
    id != world.class_class() && world.class_of(id) == Some(world.class_class())
}

/// Convenience: default config from ENV, no asset store.
pub fn save_scene(world: &mut World, scene: &Scene, path: &Path) -> Result<SaveReport> {
    GameSaver::new(SaverConfig::from_env(), &NullStore).save(world, scene, path)
}

/// Temporarily replaces a class-default template; the original is put back in `Drop`.
pub(crate) struct BaselineGuard<'w> {
    world: &'w mut World,
    class: ObjectId,
    saved: Option<Props>,
}

impl<'w> BaselineGuard<'w> {
    pub(crate) fn substitute(world: &'w mut World, class: ObjectId, template: Props) -> Result<Self> {
        let saved = world.swap_class_defaults(class, template)?;
        Ok(Self {
            world,
            class,
            saved: Some(saved),
        })
    }

    pub(crate) fn world(&self) -> &World {
        self.world
    }
}

impl Drop for BaselineGuard<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            if let Err(e) = self.world.swap_class_defaults(self.class, saved) {
                warn!("baseline restore for {} failed: {}", self.class, e);
            }
        }
    }
}

struct PayloadQueue {
    order: Vec<usize>,
    next: usize,
    queued: Vec<bool>,
}

impl PayloadQueue {
    fn new(n: usize) -> Self {
        Self {
            order: Vec::with_capacity(n),
            next: 0,
            queued: vec![false; n],
        }
    }

    /// Queue a namespace Element once; imports from outside are never serialized.
    fn add(&mut self, slot: usize, elements: &[TaggedElement]) -> bool {
        let Some(e) = elements.get(slot) else {
            return false;
        };
        if self.queued[slot] || e.record.origin == Origin::Unresolved {
            return false;
        }
        self.queued[slot] = true;
        self.order.push(slot);
        true
    }

    fn pop(&mut self) -> Option<usize> {
        let s = self.order.get(self.next).copied();
        if s.is_some() {
            self.next += 1;
        }
        s
    }
}

/// Live identity -> snapshot coordinates; queues referenced namespace objects.
struct SnapshotEncoder<'a> {
    names: &'a mut NameInterner,
    slots: &'a HashMap<ObjectId, usize>,
    elements: &'a [TaggedElement],
    queue: &'a mut PayloadQueue,
}

impl RefSink for SnapshotEncoder<'_> {
    fn name_index(&mut self, name: &str) -> Result<i32> {
        if !name_fits(name) {
            return Err(anyhow!("name '{}' does not fit a name entry", name));
        }
        Ok(self.names.intern(name) as i32)
    }

    fn object_index(&mut self, object: Option<ObjectId>) -> Result<i32> {
        let Some(slot) = object.and_then(|id| self.slots.get(&id).copied()) else {
            return Ok(0);
        };
        self.queue.add(slot, self.elements);
        Ok(slot as i32 + 1)
    }
}
