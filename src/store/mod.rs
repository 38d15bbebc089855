//! store: external asset store seen by the snapshot engine.
//!
//! Engine обращается к хранилищу только в двух местах:
//! - load: объект `Unresolved`, которого нет в живом графе, догружается по (path, class);
//! - save: для объекта с `Linker` берётся его исходный export как delta-baseline.
//!
//! Реализации:
//! - `MemoryStore`: пакеты в памяти (тесты, инструменты);
//! - `NullStore`  : ничего не находит (сцены без хранилища).

pub mod memory;
pub mod package;

use anyhow::Result;

use crate::props::read_props;
use crate::world::{Linker, ObjectId, Value, World};

pub use memory::MemoryStore;
pub use package::{StoreDecoder, StoreExport, StoreImport, StorePackage};

pub trait AssetStore {
    /// Load (if needed) and locate `path`. `Ok(None)` = the store does not have it.
    fn load_object(
        &self,
        world: &mut World,
        path: &str,
        class: Option<ObjectId>,
    ) -> Result<Option<ObjectId>>;

    /// Cooked package by name.
    fn package(&self, name: &str) -> Option<&StorePackage>;
}

/// Resolves nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullStore;

impl AssetStore for NullStore {
    fn load_object(
        &self,
        _world: &mut World,
        _path: &str,
        _class: Option<ObjectId>,
    ) -> Result<Option<ObjectId>> {
        Ok(None)
    }

    fn package(&self, _name: &str) -> Option<&StorePackage> {
        None
    }
}

/// On-disk state of a linked object, decoded against the live graph.
/// `None` values are references the live graph cannot resolve.
pub fn export_baseline<S: AssetStore + ?Sized>(
    store: &S,
    world: &World,
    linker: &Linker,
) -> Result<Option<Vec<(String, Option<Value>)>>> {
    let Some(pkg) = store.package(&linker.package) else {
        return Ok(None);
    };
    let Some(export) = pkg.exports.get(linker.export_index as usize) else {
        return Ok(None);
    };
    let dec = StoreDecoder::new(pkg, world);
    read_props(&export.payload, &dec).map(Some)
}
