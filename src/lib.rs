#![allow(non_snake_case)]

// Формат снапшота: константы, компактные индексы, имена, ссылки, payload
pub mod consts;
pub mod compact;
pub mod names;
pub mod refs;
pub mod props;
pub mod savefile; // src/savefile/{mod,summary,element}.rs

// Живой граф и внешнее хранилище ассетов
pub mod world; // src/world/{mod,object,scene}.rs
pub mod store; // src/store/{mod,package,memory}.rs

// Save / Load
pub mod outcome;
pub mod tagger;
pub mod saver;
pub mod loader;

// Каталог слотов, zstd, конфиг, метрики
pub mod catalog;
pub mod compress;
pub mod config;
pub mod metrics;
pub mod util;

pub mod cli;

// Удобные реэкспорты
pub use catalog::{list_summaries, read_summary, SummaryEntry};
pub use compress::{compress_file, decompress_file};
pub use config::{SaverBuilder, SaverConfig};
pub use loader::{load_scene, GameLoader, LoadReport};
pub use outcome::Outcome;
pub use saver::{save_scene, GameSaver, SaveReport};
pub use savefile::{Guid, SaveFile, SaveSummary};
pub use store::{AssetStore, MemoryStore, NullStore, StorePackage};
pub use world::{ObjectId, ReachSpec, Scene, Value, World};
