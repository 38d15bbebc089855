//! In-memory asset store.
//!
//! Пакет грузится целиком: сначала все export'ы конструируются (outer раньше
//! вложенных), потом на них накатываются payload'ы: так ссылки между export'ами
//! одного пакета разрешаются независимо от порядка. Классы из других пакетов
//! хранилища догружаются по требованию.

use anyhow::Result;
use log::{debug, warn};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet};

use super::package::{StoreDecoder, StorePackage};
use super::AssetStore;
use crate::props::read_props;
use crate::refs::StoreTarget;
use crate::world::{Linker, ObjectId, World};

#[derive(Debug, Default)]
pub struct MemoryStore {
    packages: BTreeMap<String, StorePackage>,
    loading: RefCell<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, package: StorePackage) {
        self.packages.insert(package.name.clone(), package);
    }

    pub fn with_package(mut self, package: StorePackage) -> Self {
        self.insert(package);
        self
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Load every export of `name` into `world`. Already present objects are kept
    /// as they are. Returns the package object, `None` if the store lacks it.
    pub fn load_package(&self, world: &mut World, name: &str) -> Result<Option<ObjectId>> {
        let Some(pkg) = self.packages.get(name) else {
            return Ok(None);
        };
        if !self.loading.borrow_mut().insert(name.to_string()) {
            // Уже грузится выше по стеку (цикл зависимостей классов).
            return Ok(world.find_child(None, name));
        }
        let res = self.load_package_inner(world, pkg);
        self.loading.borrow_mut().remove(name);
        res.map(Some)
    }

    fn load_package_inner(&self, world: &mut World, pkg: &StorePackage) -> Result<ObjectId> {
        let root = world.create_package(&pkg.name)?;
        let mut live: Vec<Option<ObjectId>> = vec![None; pkg.exports.len()];
        let mut fresh = Vec::new();

        for (i, exp) in pkg.exports.iter().enumerate() {
            let outer = match exp.outer.target() {
                StoreTarget::Null => Some(root),
                StoreTarget::Export(k) if k < i => live[k],
                _ => None,
            };
            let Some(outer) = outer else {
                warn!("store {}: export {} '{}' has no loadable outer", pkg.name, i, exp.name);
                continue;
            };
            if let Some(existing) = world.find_child(Some(outer), &exp.name) {
                live[i] = Some(existing);
                continue;
            }
            let Some(class) = self.resolve_class(world, pkg, i)? else {
                warn!("store {}: class of export {} '{}' not found", pkg.name, i, exp.name);
                continue;
            };
            let id = world.construct(class, outer, &exp.name, exp.flags)?;
            world.set_linker(
                id,
                Some(Linker {
                    package: pkg.name.clone(),
                    export_index: i as u32,
                }),
            )?;
            live[i] = Some(id);
            fresh.push(i);
        }

        for i in fresh {
            let Some(id) = live[i] else { continue };
            let props = {
                let dec = StoreDecoder::new(pkg, world);
                match read_props(&pkg.exports[i].payload, &dec) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!("store {}: export {} payload: {}", pkg.name, i, e);
                        continue;
                    }
                }
            };
            for (key, value) in props {
                match value {
                    Some(v) => world.set_prop(id, &key, v)?,
                    None => debug!("store {}: export {} '{}' unresolved", pkg.name, i, key),
                }
            }
        }

        debug!("store: loaded package {} ({} exports)", pkg.name, pkg.exports.len());
        Ok(root)
    }

    fn resolve_class(&self, world: &mut World, pkg: &StorePackage, export: usize) -> Result<Option<ObjectId>> {
        let Some(path) = pkg.ref_path(pkg.exports[export].class)? else {
            return Ok(None);
        };
        let class_class = world.class_class();
        if let Some(c) = world.find_object(&path, Some(class_class)) {
            return Ok(Some(c));
        }
        let top = path.split('.').next().unwrap_or_default();
        if top != pkg.name {
            self.load_package(world, top)?;
        }
        Ok(world.find_object(&path, Some(class_class)))
    }
}

impl AssetStore for MemoryStore {
    fn load_object(
        &self,
        world: &mut World,
        path: &str,
        class: Option<ObjectId>,
    ) -> Result<Option<ObjectId>> {
        let top = path.split('.').next().unwrap_or_default();
        if self.load_package(world, top)?.is_none() {
            return Ok(None);
        }
        Ok(world.find_object(path, class))
    }

    fn package(&self, name: &str) -> Option<&StorePackage> {
        self.packages.get(name)
    }
}
