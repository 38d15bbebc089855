// tests/baseline.rs
//
// Объекты, загруженные из хранилища ассетов (есть Linker), пишутся как delta
// от своего export'а, а не от defaults класса. Подмена defaults на время записи
// обязана откатываться на любом пути выхода.

mod common;

use anyhow::Result;
use std::fs;

use SceneSnap::world::{Props, OBJ_PUBLIC};
use SceneSnap::{
    metrics, AssetStore, GameLoader, GameSaver, MemoryStore, NullStore, SaverConfig, Scene,
    StorePackage, Value, World,
};

use common::{engine_classes, fresh_world, unique_root};

/// Cooked-карта в хранилище: Map.Level.{Crate(Health=50), Door(Opens->Crate)}.
fn cooked_store() -> MemoryStore {
    let mut src = World::new();
    let actor = engine_classes(&mut src);
    let map = src.create_package("Map").unwrap();
    let level = src.construct(actor, map, "Level", OBJ_PUBLIC).unwrap();
    let krate = src.construct(actor, level, "Crate", OBJ_PUBLIC).unwrap();
    let door = src.construct(actor, level, "Door", OBJ_PUBLIC).unwrap();
    src.set_prop(krate, "Health", Value::Int(50)).unwrap();
    src.set_prop(door, "Opens", Value::Object(Some(krate))).unwrap();
    MemoryStore::new().with_package(StorePackage::capture(&src, map).unwrap())
}

/// Мир "после загрузки карты": классы + содержимое Map из хранилища.
fn play_world(store: &MemoryStore) -> (World, Scene) {
    let mut w = fresh_world();
    let level = store.load_object(&mut w, "Map.Level", None).unwrap().unwrap();
    let krate = w.find_object("Map.Level.Crate", None).unwrap();
    let door = w.find_object("Map.Level.Door", None).unwrap();
    let mut scene = Scene::new(level, "Map");
    scene.actors = vec![Some(krate), Some(door)];
    (w, scene)
}

fn payload_of(file: &SceneSnap::SaveFile, name: &str) -> Vec<u8> {
    file.elements
        .iter()
        .find(|e| file.names.get(e.name as usize) == Some(name))
        .map(|e| e.payload.clone())
        .unwrap()
}

#[test]
fn linked_objects_write_delta_against_store_export() -> Result<()> {
    let store = cooked_store();
    let (mut w, scene) = play_world(&store);
    let actor = w.find_object("Engine.Actor", None).unwrap();
    let subs_before = metrics::snapshot().baseline_substitutions;

    let with_store = GameSaver::new(SaverConfig::default(), &store).build(&mut w, &scene)?;
    let without = GameSaver::new(SaverConfig::default(), &NullStore).build(&mut w, &scene)?;

    // Crate не менялся после загрузки: delta пуста (только терминатор).
    assert_eq!(payload_of(&with_store, "Crate"), vec![0]);
    assert!(payload_of(&without, "Crate").len() > 1);
    // Door.Opens совпадает с export'ом, ссылка разрешилась в живой Crate.
    assert_eq!(payload_of(&with_store, "Door"), vec![0]);
    assert!(metrics::snapshot().baseline_substitutions >= subs_before + 2);

    // Defaults класса возвращены.
    assert_eq!(
        w.class_defaults(actor).unwrap().get("Health"),
        Some(&Value::Int(100))
    );
    Ok(())
}

#[test]
fn changed_linked_object_round_trips_through_store_world() -> Result<()> {
    let dir = unique_root("baseline-rt");
    let store = cooked_store();
    let (mut w, mut scene) = play_world(&store);
    let krate = w.find_object("Map.Level.Crate", None).unwrap();
    let level = scene.root;
    let actor = w.find_object("Engine.Actor", None).unwrap();
    w.set_prop(krate, "Health", Value::Int(7))?;
    let spawned = w.construct(actor, level, "Spawned", OBJ_PUBLIC)?;
    w.set_prop(spawned, "Label", Value::Str("new".into()))?;
    scene.actors.push(Some(spawned));

    let path = dir.join("Save2.usx");
    let cfg = SaverConfig::default().with_fsync(false);
    GameSaver::new(cfg.clone(), &store).save(&mut w, &scene, &path)?;

    // Новый мир: карта снова загружена из хранилища, затем накатывается сейв.
    let (mut w2, mut scene2) = play_world(&store);
    let lr = GameLoader::new(cfg, &store).load(&mut w2, &mut scene2, &path)?;
    assert_eq!(lr.failed, 0);
    let krate2 = w2.find_object("Map.Level.Crate", None).unwrap();
    let spawned2 = w2.find_object("Map.Level.Spawned", None).unwrap();
    assert_eq!(w2.get(krate2).unwrap().prop("Health"), Some(&Value::Int(7)));
    assert_eq!(w2.get(spawned2).unwrap().prop("Label"), Some(&Value::Str("new".into())));
    assert_eq!(scene2.actors.len(), 3);
    assert_eq!(scene2.actors[2], Some(spawned2));

    let _ = fs::remove_dir_all(&dir);
    Ok(())
}

#[test]
fn failing_save_restores_class_defaults() -> Result<()> {
    let store = cooked_store();
    let (mut w, scene) = play_world(&store);
    let actor = w.find_object("Engine.Actor", None).unwrap();
    let krate = w.find_object("Map.Level.Crate", None).unwrap();
    let defaults_before: Props = w.class_defaults(actor).unwrap().clone();

    // Имя свойства совпадает с терминатором payload'а: запись падает под подменой.
    w.set_prop(krate, "None", Value::Int(1))?;
    let dir = unique_root("baseline-fail");
    let path = dir.join("bad.usx");
    let res = GameSaver::new(SaverConfig::default().with_fsync(false), &store).save(&mut w, &scene, &path);
    assert!(res.is_err());
    assert!(!path.exists());
    assert_eq!(w.class_defaults(actor).unwrap(), &defaults_before);
    let _ = fs::remove_dir_all(&dir);
    Ok(())
}
