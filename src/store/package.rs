//! Cooked package: name/import/export tables in the store's own coordinate space.
//!
//! Ссылки внутри пакета: `StoreRef`: >0 export этого пакета, <0 import (ищется по
//! пути в живом графе), 0 = null. Payload export'а закодирован в тех же координатах,
//! поэтому декодировать его можно только через `StoreDecoder`.

use anyhow::{anyhow, Result};
use std::collections::HashMap;

use crate::consts::NAME_NONE;
use crate::props::write_delta;
use crate::refs::{RefSink, RefSource, Slot, StoreRef, StoreTarget};
use crate::world::{ObjectId, World, OBJ_PERSISTED_MASK};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreImport {
    pub class_package: String,
    pub class_name: String,
    pub object_name: String,
    /// Outer of the import (another import) or 0 for a top-level package.
    pub package: StoreRef,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreExport {
    pub name: String,
    pub class: StoreRef,
    /// 0 = the package itself.
    pub outer: StoreRef,
    pub flags: u32,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorePackage {
    pub name: String,
    pub names: Vec<String>,
    pub imports: Vec<StoreImport>,
    pub exports: Vec<StoreExport>,
}

impl StorePackage {
    /// Cook a live top-level package: every non-class object inside it becomes an
    /// export (id order keeps outers first), everything it references from outside
    /// becomes an import.
    pub fn capture(world: &World, package: ObjectId) -> Result<Self> {
        let pkg = world
            .get(package)
            .ok_or_else(|| anyhow!("capture: {} does not exist", package))?;
        if !pkg.is_package() || pkg.outer.is_some() {
            return Err(anyhow!("capture: '{}' is not a top-level package", pkg.name));
        }

        let members: Vec<ObjectId> = world
            .iter()
            .filter(|(id, o)| world.is_in(*id, package) && !o.is_transient() && !o.is_class())
            .map(|(id, _)| id)
            .collect();

        let mut enc = StoreEncoder {
            world,
            names: vec![NAME_NONE.to_string()],
            name_seen: HashMap::new(),
            imports: Vec::new(),
            import_of: HashMap::new(),
            export_of: members.iter().enumerate().map(|(i, id)| (*id, i)).collect(),
        };
        enc.name_seen.insert(NAME_NONE.to_string(), 0);

        let mut exports = Vec::with_capacity(members.len());
        for id in members {
            let Some(o) = world.get(id) else { continue };
            let class = enc.object_index(o.class)?;
            let outer = if o.outer == Some(package) {
                0
            } else {
                enc.object_index(o.outer)?
            };
            let baseline = o.class.and_then(|c| world.class_defaults(c));
            let mut payload = Vec::new();
            write_delta(&mut payload, &o.props, baseline, &mut enc)?;
            exports.push(StoreExport {
                name: o.name.clone(),
                class: StoreRef(class),
                outer: StoreRef(outer),
                flags: o.flags & OBJ_PERSISTED_MASK,
                payload,
            });
        }

        Ok(Self {
            name: pkg.name.clone(),
            names: enc.names,
            imports: enc.imports,
            exports,
        })
    }

    /// Dot path of a store reference; `None` for null.
    pub fn ref_path(&self, r: StoreRef) -> Result<Option<String>> {
        match r.target() {
            StoreTarget::Null => Ok(None),
            StoreTarget::Export(i) => self.export_path(i).map(Some),
            StoreTarget::Import(i) => self.import_path(i).map(Some),
        }
    }

    pub fn export_path(&self, index: usize) -> Result<String> {
        let mut parts = Vec::new();
        let mut cur = index;
        loop {
            let e = self
                .exports
                .get(cur)
                .ok_or_else(|| anyhow!("{}: export {} out of range", self.name, cur))?;
            parts.push(e.name.as_str());
            if parts.len() > self.exports.len() {
                return Err(anyhow!("{}: export outer cycle at {}", self.name, index));
            }
            match e.outer.target() {
                StoreTarget::Null => break,
                StoreTarget::Export(o) => cur = o,
                StoreTarget::Import(_) => {
                    return Err(anyhow!("{}: export {} has an import outer", self.name, cur))
                }
            }
        }
        parts.push(self.name.as_str());
        parts.reverse();
        Ok(parts.join("."))
    }

    pub fn import_path(&self, index: usize) -> Result<String> {
        let mut parts = Vec::new();
        let mut cur = index;
        loop {
            let imp = self
                .imports
                .get(cur)
                .ok_or_else(|| anyhow!("{}: import {} out of range", self.name, cur))?;
            parts.push(imp.object_name.as_str());
            if parts.len() > self.imports.len() {
                return Err(anyhow!("{}: import outer cycle at {}", self.name, index));
            }
            match imp.package.target() {
                StoreTarget::Null => break,
                StoreTarget::Import(o) => cur = o,
                StoreTarget::Export(_) => {
                    return Err(anyhow!("{}: import {} has an export outer", self.name, cur))
                }
            }
        }
        parts.reverse();
        Ok(parts.join("."))
    }
}

/// Live graph -> store coordinates (used by `capture`).
struct StoreEncoder<'w> {
    world: &'w World,
    names: Vec<String>,
    name_seen: HashMap<String, i32>,
    imports: Vec<StoreImport>,
    import_of: HashMap<ObjectId, usize>,
    export_of: HashMap<ObjectId, usize>,
}

impl StoreEncoder<'_> {
    fn import_index(&mut self, id: ObjectId, depth: usize) -> Result<usize> {
        if let Some(&i) = self.import_of.get(&id) {
            return Ok(i);
        }
        if depth > 64 {
            return Err(anyhow!("import chain of {} is too deep", id));
        }
        let world = self.world;
        let o = world
            .get(id)
            .ok_or_else(|| anyhow!("reference to missing object {}", id))?;
        let (class_package, class_name) = match o.class.and_then(|c| world.get(c).map(|co| (c, co))) {
            Some((c, co)) => {
                let top = world.outermost(c);
                let pkg = world.get(top).map(|p| p.name.clone()).unwrap_or_default();
                (pkg, co.name.clone())
            }
            None => (String::new(), String::new()),
        };
        let package = match o.outer {
            Some(outer) => StoreRef::import(self.import_index(outer, depth + 1)?),
            None => StoreRef(0),
        };
        let imp = StoreImport {
            class_package,
            class_name,
            object_name: o.name.clone(),
            package,
        };
        let i = self.imports.len();
        self.imports.push(imp);
        self.import_of.insert(id, i);
        Ok(i)
    }
}

impl RefSink for StoreEncoder<'_> {
    fn name_index(&mut self, name: &str) -> Result<i32> {
        if let Some(&i) = self.name_seen.get(name) {
            return Ok(i);
        }
        let i = self.names.len() as i32;
        self.names.push(name.to_string());
        self.name_seen.insert(name.to_string(), i);
        Ok(i)
    }

    fn object_index(&mut self, object: Option<ObjectId>) -> Result<i32> {
        let Some(id) = object else { return Ok(0) };
        if let Some(&e) = self.export_of.get(&id) {
            return Ok(StoreRef::export(e).0);
        }
        let i = self.import_index(id, 0)?;
        Ok(StoreRef::import(i).0)
    }
}

/// Store coordinates -> live graph. Anything not present in the live graph decodes
/// to `Slot::Unresolved`.
pub struct StoreDecoder<'a> {
    package: &'a StorePackage,
    world: &'a World,
}

impl<'a> StoreDecoder<'a> {
    pub fn new(package: &'a StorePackage, world: &'a World) -> Self {
        Self { package, world }
    }
}

impl RefSource for StoreDecoder<'_> {
    fn name_at(&self, index: i32) -> Result<String> {
        usize::try_from(index)
            .ok()
            .and_then(|i| self.package.names.get(i))
            .cloned()
            .ok_or_else(|| anyhow!("{}: name index {} out of range", self.package.name, index))
    }

    fn object_at(&self, index: i32) -> Result<Slot> {
        match self.package.ref_path(StoreRef(index))? {
            None => Ok(Slot::Null),
            Some(path) => Ok(match self.world.find_object(&path, None) {
                Some(id) => Slot::Object(id),
                None => Slot::Unresolved,
            }),
        }
    }
}
