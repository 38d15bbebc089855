#![allow(dead_code)]

use std::path::PathBuf;

use SceneSnap::world::{Props, OBJ_PUBLIC};
use SceneSnap::{ObjectId, Scene, Value, World};

pub fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("scenesnap-{}-{}-{}", prefix, pid, t))
}

/// Engine.Actor (Health=100, Label="") и Engine.StatLog (исключается по умолчанию).
pub fn engine_classes(w: &mut World) -> ObjectId {
    let engine = w.create_package("Engine").unwrap();
    let mut d = Props::new();
    d.insert("Health".into(), Value::Int(100));
    d.insert("Label".into(), Value::Str(String::new()));
    let actor = w.create_class(engine, "Actor", None, d).unwrap();
    w.create_class(engine, "StatLog", Some(actor), Props::new()).unwrap();
    actor
}

pub struct Demo {
    pub world: World,
    pub scene: Scene,
    pub actor: ObjectId,
    pub level: ObjectId,
    pub a: ObjectId,
    pub b: ObjectId,
}

/// Map.Level.{A, B}; A.Target -> B, B.Health = 5; actors [A, B].
pub fn demo() -> Demo {
    let mut world = World::new();
    let actor = engine_classes(&mut world);
    let map = world.create_package("Map").unwrap();
    let level = world.construct(actor, map, "Level", OBJ_PUBLIC).unwrap();
    let a = world.construct(actor, level, "A", OBJ_PUBLIC).unwrap();
    let b = world.construct(actor, level, "B", OBJ_PUBLIC).unwrap();
    world.set_prop(a, "Target", Value::Object(Some(b))).unwrap();
    world.set_prop(b, "Health", Value::Int(5)).unwrap();

    let mut scene = Scene::new(level, "Map?Game=Deathmatch");
    scene.title = "Demo".into();
    scene.players = vec!["Alice".into()];
    scene.actors = vec![Some(a), Some(b)];
    scene.travel_info.insert("Map".into(), "Map?Game=Deathmatch".into());
    Demo {
        world,
        scene,
        actor,
        level,
        a,
        b,
    }
}

/// Fresh world that already knows the engine classes (but nothing of the map).
pub fn fresh_world() -> World {
    let mut w = World::new();
    engine_classes(&mut w);
    w
}
