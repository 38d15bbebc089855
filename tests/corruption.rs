// tests/corruption.rs
//
// Повреждённые/чужие файлы: load обязан вернуть ошибку и не тронуть живой граф.

mod common;

use anyhow::Result;
use std::fs;

use SceneSnap::names::NameInterner;
use SceneSnap::refs::SnapshotRef;
use SceneSnap::savefile::{ElementRecord, Origin};
use SceneSnap::world::OBJ_PUBLIC;
use SceneSnap::{
    metrics, read_summary, GameLoader, GameSaver, NullStore, SaveFile, SaveSummary, SaverConfig,
    Scene, Value, World,
};

use common::{demo, fresh_world, unique_root};

fn saved_demo(prefix: &str) -> Result<(std::path::PathBuf, Vec<u8>)> {
    let dir = unique_root(prefix);
    let mut d = demo();
    let path = dir.join("Save0.usx");
    GameSaver::new(SaverConfig::default().with_fsync(false), &NullStore).save(&mut d.world, &d.scene, &path)?;
    let bytes = fs::read(&path)?;
    Ok((path, bytes))
}

fn assert_load_fails_cleanly(path: &std::path::Path) {
    let mut w = fresh_world();
    let before = w.len();
    let mut scene = Scene::new(w.core_package(), "Untouched");
    let res = GameLoader::new(SaverConfig::default(), &NullStore).load(&mut w, &mut scene, path);
    assert!(res.is_err(), "load of {} must fail", path.display());
    assert_eq!(w.len(), before);
    assert!(w.find_object("Map", None).is_none());
    assert_eq!(scene.url, "Untouched");
    assert!(scene.actors.is_empty());
}

#[test]
fn flipped_byte_anywhere_in_body_is_rejected() -> Result<()> {
    let (path, bytes) = saved_demo("corrupt-flip")?;
    let failures_before = metrics::snapshot().load_failures;
    // Каждый байт после header'а: CRC (или сама структура) должна поймать порчу.
    for i in (4..bytes.len()).step_by(7) {
        let mut b = bytes.clone();
        b[i] ^= 0x5A;
        fs::write(&path, &b)?;
        assert_load_fails_cleanly(&path);
    }
    assert!(metrics::snapshot().load_failures > failures_before);
    let _ = fs::remove_dir_all(path.parent().unwrap());
    Ok(())
}

#[test]
fn truncated_file_is_rejected() -> Result<()> {
    let (path, bytes) = saved_demo("corrupt-trunc")?;
    for cut in [0, 3, 4, 10, bytes.len() / 2, bytes.len() - 1] {
        fs::write(&path, &bytes[..cut])?;
        assert_load_fails_cleanly(&path);
    }
    let _ = fs::remove_dir_all(path.parent().unwrap());
    Ok(())
}

#[test]
fn truncation_inside_name_table_leaves_graph_untouched() -> Result<()> {
    let (path, bytes) = saved_demo("corrupt-names")?;
    let file = SaveFile::read_from(&bytes[..], SaverConfig::default().max_payload_bytes)?;

    // Таблица имён идёт сразу после summary и travel info.
    let mut head = Vec::new();
    file.summary.write_to(&mut head)?;
    let mut table = Vec::new();
    file.names.write_to(&mut table)?;
    let start = bytes
        .windows(table.len())
        .position(|w| w == table.as_slice())
        .expect("name table bytes");
    assert!(start >= head.len());
    assert!(table.len() > 8);

    for cut in [start + 1, start + table.len() / 2, start + table.len() - 1] {
        fs::write(&path, &bytes[..cut])?;
        assert_load_fails_cleanly(&path);

        // Обрыв поверх исходного мира: ни одно свойство не меняется.
        let mut d = demo();
        d.world.set_prop(d.b, "Health", Value::Int(42))?;
        let before = d.world.len();
        let mut scene = d.scene.clone();
        let res = GameLoader::new(SaverConfig::default(), &NullStore).load(&mut d.world, &mut scene, &path);
        assert!(res.is_err(), "cut at {}", cut);
        assert_eq!(d.world.len(), before);
        assert_eq!(d.world.get(d.b).unwrap().prop("Health"), Some(&Value::Int(42)));
        assert_eq!(scene.actors, d.scene.actors);
    }
    let _ = fs::remove_dir_all(path.parent().unwrap());
    Ok(())
}

#[test]
fn newer_version_is_rejected_before_anything_else() -> Result<()> {
    let (path, mut bytes) = saved_demo("corrupt-version")?;
    bytes[3] = 2;
    fs::write(&path, &bytes)?;
    assert!(read_summary(&path).is_err());
    assert_load_fails_cleanly(&path);

    bytes[0] = b'X';
    bytes[3] = 1;
    fs::write(&path, &bytes)?;
    assert!(read_summary(&path).is_err());
    assert_load_fails_cleanly(&path);
    let _ = fs::remove_dir_all(path.parent().unwrap());
    Ok(())
}

fn record(name: u32, class: u32, outer: u32, origin: Origin) -> ElementRecord {
    ElementRecord {
        flags: OBJ_PUBLIC,
        name,
        class: SnapshotRef::from_raw(class),
        outer: SnapshotRef::from_raw(outer),
        origin,
        payload: Vec::new(),
    }
}

/// Элемент "класса", который в живом графе оказывается обычным объектом:
/// фатально, и всё, что load успел создать, откатывается.
#[test]
fn fatal_resolution_rolls_back_created_objects() -> Result<()> {
    let mut w = fresh_world();
    let actor = w.find_object("Engine.Actor", None).unwrap();
    let lib = w.create_package("Lib")?;
    let core = w.construct(actor, lib, "Core", OBJ_PUBLIC)?;
    w.construct(actor, core, "Class", OBJ_PUBLIC)?;
    w.set_prop(lib, "Keep", Value::Int(1))?;
    let before = w.len();

    let mut n = NameInterner::new();
    let map = n.intern("Map");
    let lib_n = n.intern("Lib");
    let core_n = n.intern("Core");
    let class_n = n.intern("Class");
    let thing = n.intern("Thing");
    let file = SaveFile {
        summary: SaveSummary {
            url: "Map".into(),
            ..Default::default()
        },
        names: n.into_table(),
        elements: vec![
            record(map, 0, 0, Origin::NewInstance),
            record(lib_n, 0, 0, Origin::NewInstance),
            record(core_n, 0, 2, Origin::Unresolved),
            record(class_n, 0, 3, Origin::Unresolved),
            record(thing, 4, 1, Origin::NewInstance),
        ],
        actors: vec![SnapshotRef::from_raw(5)],
        ..Default::default()
    };

    let mut scene = Scene::new(w.core_package(), "Untouched");
    let res = GameLoader::new(SaverConfig::default(), &NullStore).apply(&mut w, &mut scene, &file);
    let err = res.unwrap_err();
    assert!(format!("{:#}", err).contains("not a class"), "{:#}", err);

    // Map создан и удалён, Lib пересоздан на месте и восстановлен.
    assert_eq!(w.len(), before);
    assert!(w.find_object("Map", None).is_none());
    assert_eq!(w.get(lib).unwrap().prop("Keep"), Some(&Value::Int(1)));
    assert!(!w.journal_active());
    assert_eq!(scene.url, "Untouched");
    Ok(())
}

#[test]
fn out_of_range_actor_is_fatal_before_any_mutation() -> Result<()> {
    let mut d = demo();
    let mut file = GameSaver::new(SaverConfig::default(), &NullStore).build(&mut d.world, &d.scene)?;
    file.actors.push(SnapshotRef::from_raw(file.elements.len() as u32 + 1));

    let mut w: World = fresh_world();
    let before = w.len();
    let mut scene = Scene::new(w.core_package(), "");
    assert!(GameLoader::new(SaverConfig::default(), &NullStore)
        .apply(&mut w, &mut scene, &file)
        .is_err());
    assert_eq!(w.len(), before);
    Ok(())
}
