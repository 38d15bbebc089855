//! Load: snapshot file -> live scene.
//!
//! Этапы на каждый Element: Parsed -> PathResolved -> ObjectResolved -> ClassState
//! (только классы из снапшота) -> PropertiesApplied.
//!
//! - Структурные проверки (индексы имён/классов/outer'ов, циклы outer, индексы
//!   акторов и reach spec'ов) выполняются для ВСЕХ Element'ов до любых изменений графа.
//! - Разрешение объекта: по политике origin; ошибка одного Element'а не фатальна
//!   (warn, слот остаётся пустым).
//! - Все изменения графа идут через журнал `World`: фатальная ошибка или panic
//!   откатывают граф вызывающего целиком.
//! - `Scene` переписывается только после успешного завершения.

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

use crate::compress::open_snapshot;
use crate::config::SaverConfig;
use crate::consts::{CLASS_CLASS, CORE_PACKAGE};
use crate::metrics;
use crate::names::NameTable;
use crate::outcome::Outcome;
use crate::props::{read_class_payload, read_props};
use crate::refs::{RefSource, SnapshotRef, Slot};
use crate::savefile::{ElementRecord, Origin, SaveFile};
use crate::store::{AssetStore, NullStore};
use crate::util::panic_message;
use crate::world::{ObjectId, Props, ReachSpec, Scene, Value, World, OBJ_PERSISTED_MASK};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub elements: usize,
    /// Located in the live graph as-is.
    pub found: usize,
    /// Brought in by the asset store.
    pub loaded: usize,
    pub constructed: usize,
    /// Existing same-path same-class objects reset in place.
    pub replaced: usize,
    pub failed: usize,
    pub payloads_applied: usize,
    pub payloads_failed: usize,
    pub actors: usize,
    pub reach_specs: usize,
}

impl LoadReport {
    pub fn resolved(&self) -> usize {
        self.found + self.loaded + self.constructed + self.replaced
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Found,
    Loaded,
    Constructed,
    Replaced,
}

pub struct GameLoader<'s> {
    cfg: SaverConfig,
    store: &'s dyn AssetStore,
}

impl<'s> GameLoader<'s> {
    pub fn new(cfg: SaverConfig, store: &'s dyn AssetStore) -> Self {
        Self { cfg, store }
    }

    /// Read `path` (plain or `.zst`) and reconstruct it into `world` / `scene`.
    pub fn load(&self, world: &mut World, scene: &mut Scene, path: &Path) -> Result<LoadReport> {
        let res = self.load_inner(world, scene, path);
        match &res {
            Ok(r) => {
                metrics::record_load(r.resolved(), r.failed);
                info!(
                    "loaded {}: {} elements ({} resolved, {} failed), {} actors",
                    path.display(),
                    r.elements,
                    r.resolved(),
                    r.failed,
                    r.actors
                );
            }
            Err(e) => {
                metrics::record_load_failure();
                warn!("load {} failed: {:#}", path.display(), e);
            }
        }
        res
    }

    fn load_inner(&self, world: &mut World, scene: &mut Scene, path: &Path) -> Result<LoadReport> {
        let r = open_snapshot(path)?;
        let file = SaveFile::read_from(r, self.cfg.max_payload_bytes)
            .with_context(|| format!("read snapshot {}", path.display()))?;
        self.apply(world, scene, &file)
    }

    /// Reconstruct an already decoded snapshot.
    pub fn apply(&self, world: &mut World, scene: &mut Scene, file: &SaveFile) -> Result<LoadReport> {
        validate(file)?;
        if world.journal_active() {
            return Err(anyhow!("world already has an open journal"));
        }

        world.begin_journal();
        let res = catch_unwind(AssertUnwindSafe(|| self.reconstruct(world, file)))
            .unwrap_or_else(|p| Err(anyhow!("load panicked: {}", panic_message(p.as_ref()))));
        let (resolved, mut report) = match res {
            Ok(v) => {
                world.commit_journal();
                v
            }
            Err(e) => {
                world.rollback_journal();
                return Err(e);
            }
        };

        write_back(world, scene, file, &resolved, &mut report);
        Ok(report)
    }

    fn reconstruct(&self, world: &mut World, file: &SaveFile) -> Result<(Vec<Option<ObjectId>>, LoadReport)> {
        let n = file.elements.len();
        let mut report = LoadReport {
            elements: n,
            ..Default::default()
        };
        let mut resolved: Vec<Option<ObjectId>> = vec![None; n];
        let mut how: Vec<Option<Resolution>> = vec![None; n];

        // ---- ObjectResolved ----
        for i in 0..n {
            let path = element_path(file, i);
            let outcome = self.resolve_element(world, file, &resolved, i, &path);
            match outcome.settle(|m| warn!("load: #{} {}: {}", i + 1, path, m))? {
                Some((id, r)) => {
                    debug!("load: #{} {} -> {} ({:?})", i + 1, path, id, r);
                    resolved[i] = Some(id);
                    how[i] = Some(r);
                    match r {
                        Resolution::Found => report.found += 1,
                        Resolution::Loaded => report.loaded += 1,
                        Resolution::Constructed => report.constructed += 1,
                        Resolution::Replaced => report.replaced += 1,
                    }
                }
                None => report.failed += 1,
            }
        }

        // ---- ClassState ----
        // Классы из снапшота получают super и defaults до свойств экземпляров.
        let dec = SnapshotDecoder {
            names: &file.names,
            resolved: &resolved,
        };
        let mut decoded: Vec<Option<Vec<(String, Option<Value>)>>> = vec![None; n];
        let mut rebuilt: HashSet<ObjectId> = HashSet::new();
        for (i, e) in file.elements.iter().enumerate() {
            let Some(id) = resolved[i] else { continue };
            if e.payload.is_empty() {
                continue;
            }
            let parsed = if e.origin == Origin::NewInstance && carries_class_state(file, i) {
                read_class_payload(&e.payload, &dec).map(|(p, c)| (p, Some(c)))
            } else {
                read_props(&e.payload, &dec).map(|p| (p, None))
            };
            let (props, class_state) = match parsed {
                Ok(v) => v,
                Err(err) => {
                    warn!("load: payload of #{} {}: {}", i + 1, world.path_name(id), err);
                    report.payloads_failed += 1;
                    continue;
                }
            };
            if let Some(cs) = class_state {
                let super_class = match cs.super_class {
                    Slot::Object(s) => Some(s),
                    Slot::Null => None,
                    Slot::Unresolved => {
                        warn!("load: super class of {} is unresolved", world.path_name(id));
                        None
                    }
                };
                let defaults: Props = cs.defaults.into_iter().filter_map(|(k, v)| v.map(|v| (k, v))).collect();
                if let Err(err) = world.set_class_state(id, super_class, defaults) {
                    warn!("load: class state of #{} {}: {:#}", i + 1, world.path_name(id), err);
                    report.payloads_failed += 1;
                    continue;
                }
                rebuilt.insert(id);
            }
            decoded[i] = Some(props);
        }

        // Экземпляры, созданные до восстановления своего класса, берут его defaults заново.
        if !rebuilt.is_empty() {
            for i in 0..n {
                let (Some(id), Some(Resolution::Constructed | Resolution::Replaced)) = (resolved[i], how[i]) else {
                    continue;
                };
                let stale = world.get(id).map(|o| o.is_instance()).unwrap_or(false)
                    && world.class_of(id).map(|c| rebuilt.contains(&c)).unwrap_or(false);
                if stale {
                    world.reset_to_class_defaults(id)?;
                }
            }
        }

        // ---- PropertiesApplied ----
        for (i, props) in decoded.into_iter().enumerate() {
            let (Some(id), Some(props)) = (resolved[i], props) else { continue };
            for (key, value) in props {
                match value {
                    Some(v) => world.set_prop(id, &key, v)?,
                    None => debug!("load: {}.{} refers to an unresolved element", world.path_name(id), key),
                }
            }
            report.payloads_applied += 1;
        }

        Ok((resolved, report))
    }

    fn resolve_element(
        &self,
        world: &mut World,
        file: &SaveFile,
        resolved: &[Option<ObjectId>],
        i: usize,
        path: &str,
    ) -> Outcome<(ObjectId, Resolution)> {
        let e = &file.elements[i];

        let class = match e.class.slot() {
            Some(c) => match resolved[c] {
                Some(cid) if !world.is_class(cid) => {
                    return Outcome::Fatal(anyhow!(
                        "element #{} {}: referred class {} is not a class",
                        i + 1,
                        path,
                        world.path_name(cid)
                    ));
                }
                other => other,
            },
            // class 0 + outer 0 = пакет верхнего уровня
            None if e.outer.is_null() => Some(world.package_class()),
            None => None,
        };

        match e.origin {
            Origin::Unresolved => {
                if let Some(id) = world.find_object(path, class) {
                    return Outcome::Ok((id, Resolution::Found));
                }
                let Some(c) = class else {
                    return Outcome::recovered("not found and class unknown");
                };
                match self.store.load_object(world, path, Some(c)) {
                    Ok(Some(id)) => Outcome::Ok((id, Resolution::Loaded)),
                    Ok(None) => Outcome::recovered(format!("failed to load (class {})", world.path_name(c))),
                    Err(err) => Outcome::recovered(format!("asset store: {:#}", err)),
                }
            }
            Origin::ImportOnly => match world.find_object(path, class) {
                Some(id) => Outcome::Ok((id, Resolution::Found)),
                None => Outcome::recovered("failed import"),
            },
            Origin::NewInstance => self.resolve_new_instance(world, file, resolved, e, class, path),
        }
    }

    fn resolve_new_instance(
        &self,
        world: &mut World,
        file: &SaveFile,
        resolved: &[Option<ObjectId>],
        e: &ElementRecord,
        class: Option<ObjectId>,
        path: &str,
    ) -> Outcome<(ObjectId, Resolution)> {
        let stored = e.flags & OBJ_PERSISTED_MASK;

        if let Some(existing) = world.find_object(path, None) {
            // Совпадение пути и класса: объект пересоздаётся на месте (состояние сбрасывается).
            if class.is_some() && world.class_of(existing) == class {
                let live = world.get(existing).map(|o| o.flags).unwrap_or(0);
                return match world.reconstruct_in_place(existing, (live & !OBJ_PERSISTED_MASK) | stored) {
                    Ok(()) => Outcome::Ok((existing, Resolution::Replaced)),
                    Err(err) => Outcome::recovered(format!("replace failed: {:#}", err)),
                };
            }
            return Outcome::recovered("unable to overwrite mismatching object");
        }

        let Some(class) = class else {
            return Outcome::recovered("failed to create object: class unresolved");
        };
        let Some(name) = file.names.get(e.name as usize) else {
            return Outcome::Fatal(anyhow!("name index {} out of range", e.name));
        };

        if e.outer.is_null() {
            if class != world.package_class() {
                return Outcome::recovered("top-level object is not a package");
            }
            let created = world.create_package(name).and_then(|id| {
                let live = world.get(id).map(|o| o.flags).unwrap_or(0);
                world.set_flags(id, (live & !OBJ_PERSISTED_MASK) | stored)?;
                Ok(id)
            });
            return match created {
                Ok(id) => Outcome::Ok((id, Resolution::Constructed)),
                Err(err) => Outcome::recovered(format!("failed to create package: {:#}", err)),
            };
        }

        let Some(outer) = e.outer.slot().and_then(|o| resolved.get(o).copied().flatten()) else {
            return Outcome::recovered("failed to create object: outer unresolved");
        };
        match world.construct(class, outer, name, stored) {
            Ok(id) => Outcome::Ok((id, Resolution::Constructed)),
            Err(err) => Outcome::recovered(format!("failed to create object: {:#}", err)),
        }
    }
}

/// Convenience: default config from ENV, no asset store.
pub fn load_scene(world: &mut World, scene: &mut Scene, path: &Path) -> Result<LoadReport> {
    GameLoader::new(SaverConfig::from_env(), &NullStore).load(world, scene, path)
}

/// Structural checks; nothing in the live graph is touched.
pub fn validate(file: &SaveFile) -> Result<()> {
    if !file.summary.is_valid() {
        return Err(anyhow!("snapshot has bad data: URL '{}' names no map", file.summary.url));
    }
    if file.actors.is_empty() {
        return Err(anyhow!("snapshot has bad data: empty actor list"));
    }

    let n = file.elements.len();
    let in_bounds = |r: SnapshotRef| r.raw() as usize <= n;

    for (i, e) in file.elements.iter().enumerate() {
        if e.name as usize >= file.names.len() {
            return Err(anyhow!(
                "element #{} has invalid name index {}/{}",
                i + 1,
                e.name,
                file.names.len()
            ));
        }
        if !in_bounds(e.outer) {
            return Err(anyhow!("element #{} has invalid outer index {}/{}", i + 1, e.outer, n));
        }
        if !in_bounds(e.class) {
            return Err(anyhow!("element #{} has invalid class index {}/{}", i + 1, e.class, n));
        }
    }

    for (i, e) in file.elements.iter().enumerate() {
        if let Some(c) = e.class.slot() {
            if !denotes_class(file, c) {
                return Err(anyhow!(
                    "element #{}: referred class #{} ({}) is not a class",
                    i + 1,
                    c + 1,
                    element_name(file, c)
                ));
            }
        }
        // Цепочка outer обязана заканчиваться.
        let mut cur = e.outer.slot();
        let mut steps = 0usize;
        while let Some(o) = cur {
            steps += 1;
            if steps > n {
                return Err(anyhow!("element #{}: outer chain has a cycle", i + 1));
            }
            cur = file.elements[o].outer.slot();
        }
    }

    for (i, a) in file.actors.iter().enumerate() {
        if !in_bounds(*a) {
            return Err(anyhow!("invalid object index in actor list slot {}: {}/{}", i, a, n));
        }
    }
    for (i, rs) in file.reach_specs.iter().enumerate() {
        if !in_bounds(rs.start) || !in_bounds(rs.end) {
            return Err(anyhow!("reach spec {} has an endpoint out of range", i));
        }
    }
    Ok(())
}

fn element_name(file: &SaveFile, slot: usize) -> &str {
    file.elements
        .get(slot)
        .and_then(|e| file.names.get(e.name as usize))
        .unwrap_or("")
}

fn is_metaclass(file: &SaveFile, slot: usize) -> bool {
    let Some(e) = file.elements.get(slot) else {
        return false;
    };
    element_name(file, slot) == CLASS_CLASS
        && e.outer
            .slot()
            .map(|o| element_name(file, o) == CORE_PACKAGE)
            .unwrap_or(false)
}

/// Element is the metaclass or an object whose class is the metaclass.
fn denotes_class(file: &SaveFile, slot: usize) -> bool {
    if is_metaclass(file, slot) {
        return true;
    }
    file.elements
        .get(slot)
        .and_then(|e| e.class.slot())
        .map(|c| is_metaclass(file, c))
        .unwrap_or(false)
}

/// NewInstance class Element: its payload ends with the class section.
fn carries_class_state(file: &SaveFile, slot: usize) -> bool {
    !is_metaclass(file, slot)
        && file
            .elements
            .get(slot)
            .and_then(|e| e.class.slot())
            .map(|c| is_metaclass(file, c))
            .unwrap_or(false)
}

/// Dot path built from the Element's own outer chain (validated acyclic).
fn element_path(file: &SaveFile, slot: usize) -> String {
    let mut parts = Vec::new();
    let mut cur = Some(slot);
    while let Some(s) = cur {
        parts.push(element_name(file, s));
        if parts.len() > file.elements.len() {
            break;
        }
        cur = file.elements.get(s).and_then(|e| e.outer.slot());
    }
    parts.reverse();
    parts.join(".")
}

fn write_back(
    world: &World,
    scene: &mut Scene,
    file: &SaveFile,
    resolved: &[Option<ObjectId>],
    report: &mut LoadReport,
) {
    let lookup = |r: SnapshotRef| r.slot().and_then(|s| resolved.get(s).copied().flatten());

    scene.url = file.summary.url.clone();
    scene.title = file.summary.title.clone();
    scene.notes = file.summary.notes.clone();
    scene.players = file.summary.players.clone();
    scene.guid = file.summary.guid;
    scene.travel_info = file.travel_info.clone();

    scene.actors = file.actors.iter().map(|a| lookup(*a)).collect();
    report.actors = scene.actors.len();
    if let Some(root) = scene
        .actors
        .iter()
        .flatten()
        .find_map(|a| world.get(*a).and_then(|o| o.outer))
    {
        scene.root = root;
    }

    let node = |r: SnapshotRef, i: usize| match lookup(r) {
        Some(id) if world.get(id).map(|o| o.is_instance()).unwrap_or(false) => Some(id),
        Some(id) => {
            warn!("load: reach spec {} endpoint {} is not a graph node", i, world.path_name(id));
            None
        }
        None => None,
    };
    scene.reach_specs = file
        .reach_specs
        .iter()
        .enumerate()
        .map(|(i, rs)| ReachSpec {
            distance: rs.distance,
            start: node(rs.start, i),
            end: node(rs.end, i),
            collision_radius: rs.collision_radius,
            collision_height: rs.collision_height,
            reach_flags: rs.reach_flags,
            pruned: rs.pruned,
        })
        .collect();
    report.reach_specs = scene.reach_specs.len();
}

/// Snapshot coordinates -> objects resolved by this load.
struct SnapshotDecoder<'a> {
    names: &'a NameTable,
    resolved: &'a [Option<ObjectId>],
}

impl RefSource for SnapshotDecoder<'_> {
    fn name_at(&self, index: i32) -> Result<String> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.names.get(i))
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("name index {} out of range {}", index, self.names.len()))
    }

    fn object_at(&self, index: i32) -> Result<Slot> {
        if index < 0 {
            return Err(anyhow!("negative object index {} in snapshot payload", index));
        }
        let r = SnapshotRef::from_raw(index as u32);
        match r.slot() {
            None => Ok(Slot::Null),
            Some(s) => match self.resolved.get(s) {
                Some(Some(id)) => Ok(Slot::Object(*id)),
                Some(None) => Ok(Slot::Unresolved),
                None => Err(anyhow!("object index {} out of range {}", index, self.resolved.len())),
            },
        }
    }
}
