// tests/roundtrip.rs
//
// Save -> Load в свежий мир и обратно в тот же мир.

mod common;

use anyhow::Result;
use std::fs;

use SceneSnap::savefile::Origin;
use SceneSnap::world::{OBJ_PUBLIC, OBJ_TRANSACTIONAL};
use SceneSnap::{GameLoader, GameSaver, NullStore, ReachSpec, SaverConfig, Scene, Value};

use common::{demo, fresh_world, unique_root};

fn cfg(dir: &std::path::Path) -> SaverConfig {
    SaverConfig::default().with_save_dir(dir).with_fsync(false)
}

#[test]
fn save_then_load_into_fresh_world() -> Result<()> {
    let dir = unique_root("rt-fresh");
    let mut d = demo();
    let saver = GameSaver::new(cfg(&dir), &NullStore);
    let rep = saver.save_slot(&mut d.world, &d.scene, 1)?;
    assert!(rep.path.ends_with("Save1.usx"));
    assert_eq!(rep.actors, 2);
    assert!(rep.file_bytes > 0);

    let mut w2 = fresh_world();
    let mut scene2 = Scene::new(w2.core_package(), "");
    let loader = GameLoader::new(cfg(&dir), &NullStore);
    let lr = loader.load(&mut w2, &mut scene2, &rep.path)?;
    assert_eq!(lr.failed, 0);
    assert_eq!(lr.elements, rep.elements);
    // Map, Level, A, B
    assert_eq!(lr.constructed, 4);

    let a2 = w2.find_object("Map.Level.A", None).unwrap();
    let b2 = w2.find_object("Map.Level.B", None).unwrap();
    let level2 = w2.find_object("Map.Level", None).unwrap();
    assert_eq!(w2.get(a2).unwrap().prop("Target"), Some(&Value::Object(Some(b2))));
    assert_eq!(w2.get(b2).unwrap().prop("Health"), Some(&Value::Int(5)));
    // Не записанные свойства берутся из defaults класса.
    assert_eq!(w2.get(a2).unwrap().prop("Health"), Some(&Value::Int(100)));

    assert_eq!(scene2.actors, vec![Some(a2), Some(b2)]);
    assert_eq!(scene2.root, level2);
    assert_eq!(scene2.url, "Map?Game=Deathmatch");
    assert_eq!(scene2.title, "Demo");
    assert_eq!(scene2.players, vec!["Alice".to_string()]);
    assert_eq!(scene2.travel_info, d.scene.travel_info);

    let _ = fs::remove_dir_all(&dir);
    Ok(())
}

#[test]
fn null_actor_slots_survive() -> Result<()> {
    let dir = unique_root("rt-null");
    let mut d = demo();
    d.scene.actors = vec![None, Some(d.a), None, Some(d.b)];
    let path = dir.join("slots.usx");
    GameSaver::new(cfg(&dir), &NullStore).save(&mut d.world, &d.scene, &path)?;

    let mut w2 = fresh_world();
    let mut scene2 = Scene::new(w2.core_package(), "");
    GameLoader::new(cfg(&dir), &NullStore).load(&mut w2, &mut scene2, &path)?;
    assert_eq!(scene2.actors.len(), 4);
    assert!(scene2.actors[0].is_none() && scene2.actors[2].is_none());
    assert_eq!(scene2.actors[1], w2.find_object("Map.Level.A", None));
    assert_eq!(scene2.actors[3], w2.find_object("Map.Level.B", None));

    let _ = fs::remove_dir_all(&dir);
    Ok(())
}

#[test]
fn persisted_flags_and_reach_specs() -> Result<()> {
    let dir = unique_root("rt-flags");
    let mut d = demo();
    d.world.set_flags(d.b, OBJ_PUBLIC | OBJ_TRANSACTIONAL)?;
    d.scene.reach_specs = vec![
        ReachSpec {
            distance: 640,
            start: Some(d.a),
            end: Some(d.b),
            collision_radius: 32,
            collision_height: 48,
            reach_flags: 3,
            pruned: false,
        },
        // Конец указывает на уровень-пакет: после load обнулится.
        ReachSpec {
            distance: 1,
            start: Some(d.a),
            end: d.world.find_object("Map", None),
            pruned: true,
            ..Default::default()
        },
    ];
    let path = dir.join("reach.usx");
    GameSaver::new(cfg(&dir), &NullStore).save(&mut d.world, &d.scene, &path)?;

    let mut w2 = fresh_world();
    let mut scene2 = Scene::new(w2.core_package(), "");
    let lr = GameLoader::new(cfg(&dir), &NullStore).load(&mut w2, &mut scene2, &path)?;
    assert_eq!(lr.reach_specs, 2);

    let a2 = w2.find_object("Map.Level.A", None);
    let b2 = w2.find_object("Map.Level.B", None).unwrap();
    assert_eq!(w2.get(b2).unwrap().flags & OBJ_TRANSACTIONAL, OBJ_TRANSACTIONAL);
    assert_eq!(scene2.reach_specs[0].start, a2);
    assert_eq!(scene2.reach_specs[0].end, Some(b2));
    assert_eq!(scene2.reach_specs[0].distance, 640);
    assert_eq!(scene2.reach_specs[0].collision_height, 48);
    assert_eq!(scene2.reach_specs[1].end, None);
    assert!(scene2.reach_specs[1].pruned);

    let _ = fs::remove_dir_all(&dir);
    Ok(())
}

#[test]
fn excluded_and_destroyed_objects_are_not_written() -> Result<()> {
    let mut d = demo();
    let statlog = d.world.find_object("Engine.StatLog", None).unwrap();
    let log = d.world.construct(statlog, d.level, "Stats", OBJ_PUBLIC)?;
    let gone = d.world.construct(d.actor, d.level, "Gone", OBJ_PUBLIC)?;
    d.world.set_prop(d.a, "Log", Value::Object(Some(log)))?;
    d.world.set_prop(d.a, "Victim", Value::Object(Some(gone)))?;
    d.world.mark_pending_kill(gone)?;

    let file = GameSaver::new(SaverConfig::default(), &NullStore).build(&mut d.world, &d.scene)?;
    let names: Vec<&str> = file
        .elements
        .iter()
        .filter_map(|e| file.names.get(e.name as usize))
        .collect();
    assert!(!names.contains(&"Stats"));
    assert!(!names.contains(&"Gone"));
    // Классы из Engine: только ссылки.
    for e in &file.elements {
        if file.names.get(e.name as usize) == Some("Actor") {
            assert_eq!(e.origin, Origin::Unresolved);
        }
    }

    let mut w2 = fresh_world();
    let mut scene2 = Scene::new(w2.core_package(), "");
    GameLoader::new(SaverConfig::default(), &NullStore).apply(&mut w2, &mut scene2, &file)?;
    let a2 = w2.find_object("Map.Level.A", None).unwrap();
    assert_eq!(w2.get(a2).unwrap().prop("Log"), Some(&Value::Object(None)));
    assert_eq!(w2.get(a2).unwrap().prop("Victim"), Some(&Value::Object(None)));
    Ok(())
}

#[test]
fn loading_into_the_source_world_replaces_in_place() -> Result<()> {
    let dir = unique_root("rt-same");
    let mut d = demo();
    let path = dir.join("same.usx");
    GameSaver::new(cfg(&dir), &NullStore).save(&mut d.world, &d.scene, &path)?;

    // Состояние после save меняется; load должен вернуть сохранённое.
    d.world.set_prop(d.b, "Health", Value::Int(77))?;
    d.world.set_prop(d.a, "Label", Value::Str("changed".into()))?;
    let before = d.world.len();

    let mut scene2 = d.scene.clone();
    scene2.actors.clear();
    let lr = GameLoader::new(cfg(&dir), &NullStore).load(&mut d.world, &mut scene2, &path)?;
    // Map, Level, A, B пересозданы на месте: те же id.
    assert_eq!(lr.replaced, 4);
    assert_eq!(lr.constructed, 0);
    assert_eq!(d.world.len(), before);
    assert_eq!(scene2.actors, vec![Some(d.a), Some(d.b)]);
    assert_eq!(d.world.get(d.b).unwrap().prop("Health"), Some(&Value::Int(5)));
    assert_eq!(d.world.get(d.a).unwrap().prop("Label"), Some(&Value::Str(String::new())));
    assert_eq!(d.world.get(d.a).unwrap().prop("Target"), Some(&Value::Object(Some(d.b))));

    let _ = fs::remove_dir_all(&dir);
    Ok(())
}

#[test]
fn class_mismatch_leaves_slot_empty() -> Result<()> {
    let dir = unique_root("rt-mismatch");
    let mut d = demo();
    let path = dir.join("mismatch.usx");
    GameSaver::new(cfg(&dir), &NullStore).save(&mut d.world, &d.scene, &path)?;

    // В целевом мире Map.Level.B существует, но другого класса.
    let mut w2 = fresh_world();
    let actor = w2.find_object("Engine.Actor", None).unwrap();
    let engine = w2.find_object("Engine", None).unwrap();
    let pawn = w2.create_class(engine, "Pawn", Some(actor), Default::default())?;
    let map = w2.create_package("Map")?;
    let level = w2.construct(actor, map, "Level", OBJ_PUBLIC)?;
    let b_other = w2.construct(pawn, level, "B", OBJ_PUBLIC)?;

    let mut scene2 = Scene::new(w2.core_package(), "");
    let lr = GameLoader::new(cfg(&dir), &NullStore).load(&mut w2, &mut scene2, &path)?;
    assert_eq!(lr.failed, 1);
    assert_eq!(scene2.actors[1], None);
    // Чужой объект не тронут, ссылка на B из A не разрешилась и пропущена.
    assert_eq!(w2.class_of(b_other), Some(pawn));
    let a2 = w2.find_object("Map.Level.A", None).unwrap();
    assert_eq!(w2.get(a2).unwrap().prop("Target"), None);

    let _ = fs::remove_dir_all(&dir);
    Ok(())
}

#[test]
fn convenience_functions_use_env_config() -> Result<()> {
    let dir = unique_root("rt-conv");
    let mut d = demo();
    let path = dir.join("conv.usx");
    let rep = SceneSnap::save_scene(&mut d.world, &d.scene, &path)?;
    assert_eq!(rep.elements, 8);

    let mut w2 = fresh_world();
    let mut scene2 = Scene::new(w2.core_package(), "");
    let lr = SceneSnap::load_scene(&mut w2, &mut scene2, &path)?;
    assert_eq!(lr.resolved(), 8);
    assert_eq!(scene2.actors.len(), 2);

    let _ = fs::remove_dir_all(&dir);
    Ok(())
}

#[test]
fn elements_are_topologically_ordered_and_two_actors_are_instances() -> Result<()> {
    let mut d = demo();
    let file = GameSaver::new(SaverConfig::default(), &NullStore).build(&mut d.world, &d.scene)?;
    for (i, e) in file.elements.iter().enumerate() {
        let own = i as u32 + 1;
        assert!(e.outer.raw() < own, "outer of #{} must precede it", own);
        // Метакласс Core.Class пишется без класса (сам себе класс).
        assert!(e.class.raw() < own, "class of #{} must precede it", own);
    }

    // A и B: единственные Element'ы класса Actor внутри уровня.
    let level_slot = file
        .elements
        .iter()
        .position(|e| file.names.get(e.name as usize) == Some("Level"))
        .unwrap();
    let in_level: Vec<&str> = file
        .elements
        .iter()
        .filter(|e| e.outer.slot() == Some(level_slot))
        .filter_map(|e| file.names.get(e.name as usize))
        .collect();
    assert_eq!(in_level, vec!["A", "B"]);
    let actors: Vec<&str> = file
        .actors
        .iter()
        .filter_map(|a| a.slot())
        .filter_map(|s| file.names.get(file.elements[s].name as usize))
        .collect();
    assert_eq!(actors, vec!["A", "B"]);
    Ok(())
}

#[test]
fn namespace_class_keeps_super_and_defaults() -> Result<()> {
    let mut d = demo();
    let map = d.world.find_object("Map", None).unwrap();
    let mut defaults = SceneSnap::world::Props::new();
    defaults.insert("Charge".into(), Value::Int(9));
    defaults.insert("Spawn".into(), Value::Object(Some(d.a)));
    let custom = d.world.create_class(map, "Custom", Some(d.actor), defaults)?;
    let gizmo = d.world.construct(custom, d.level, "Gizmo", OBJ_PUBLIC)?;
    d.world.set_prop(gizmo, "Label", Value::Str("g".into()))?;
    let other = d.world.construct(custom, map, "Other", OBJ_PUBLIC)?;
    d.scene.actors.push(Some(gizmo));

    let file = GameSaver::new(SaverConfig::default(), &NullStore).build(&mut d.world, &d.scene)?;

    // Свежий мир: класс строится из снапшота вместе с super и defaults.
    let mut w2 = fresh_world();
    let mut scene2 = Scene::new(w2.core_package(), "");
    let lr = GameLoader::new(SaverConfig::default(), &NullStore).apply(&mut w2, &mut scene2, &file)?;
    assert_eq!(lr.failed, 0);
    assert_eq!(lr.payloads_failed, 0);
    let actor2 = w2.find_object("Engine.Actor", None).unwrap();
    let a2 = w2.find_object("Map.Level.A", None).unwrap();
    let custom2 = w2.find_object("Map.Custom", None).unwrap();
    let gizmo2 = w2.find_object("Map.Level.Gizmo", None).unwrap();
    assert!(w2.is_child_of(custom2, actor2));
    assert_eq!(w2.class_defaults(custom2).unwrap().get("Spawn"), Some(&Value::Object(Some(a2))));
    let g = w2.get(gizmo2).unwrap();
    assert_eq!(g.prop("Charge"), Some(&Value::Int(9)));
    assert_eq!(g.prop("Health"), Some(&Value::Int(100)));
    assert_eq!(g.prop("Label"), Some(&Value::Str("g".into())));
    assert_eq!(g.prop("Spawn"), Some(&Value::Object(Some(a2))));
    assert_eq!(scene2.actors[2], Some(gizmo2));

    // Тот же мир: класс не теряет состояние, прочие экземпляры остаются Actor'ами.
    d.world.set_prop(gizmo, "Charge", Value::Int(1))?;
    let mut scene3 = d.scene.clone();
    let lr = GameLoader::new(SaverConfig::default(), &NullStore).apply(&mut d.world, &mut scene3, &file)?;
    assert_eq!(lr.failed, 0);
    assert!(d.world.is_child_of(custom, d.actor));
    assert!(d.world.is_a(other, d.actor));
    assert_eq!(d.world.class_defaults(custom).unwrap().get("Charge"), Some(&Value::Int(9)));
    assert_eq!(d.world.get(gizmo).unwrap().prop("Charge"), Some(&Value::Int(9)));
    assert_eq!(d.world.get(gizmo).unwrap().prop("Health"), Some(&Value::Int(100)));
    Ok(())
}
