use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as B64, Engine as _};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::catalog::{list_summaries, read_summary};
use crate::compress::{compress_file, decompress_file, is_compressed, open_snapshot, DEFAULT_LEVEL};
use crate::config::SaverConfig;
use crate::consts::COMPRESSED_EXT;
use crate::savefile::{Origin, SaveFile, SaveSummary};

#[derive(Parser, Debug)]
#[command(
    name = "scenesnap",
    version,
    about = "Snapshot files for live scene graphs: summaries, catalog, inspection, compression",
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Header + summary only (fast path).
    Summary {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Summaries of every `*.usx` in a directory (default: SNAP_SAVE_DIR).
    List {
        #[arg(long)]
        dir: Option<PathBuf>,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Full decode: names, elements, actor list, reach specs.
    Inspect {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    Compress {
        #[arg(long)]
        path: PathBuf,
        /// Default: `<path>.zst`
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_LEVEL)]
        level: i32,
    },
    Decompress {
        #[arg(long)]
        path: PathBuf,
        /// Default: `<path>` without `.zst`
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let cfg = SaverConfig::from_env();

    match cli.cmd {
        Cmd::Summary { path, json } => cmd_summary(&path, json),
        Cmd::List { dir, json } => {
            let dir = dir.unwrap_or_else(|| cfg.save_dir.clone());
            cmd_list(&dir, json)
        }
        Cmd::Inspect { path, json } => cmd_inspect(&path, &cfg, json),
        Cmd::Compress { path, out, level } => {
            let out = out.unwrap_or_else(|| {
                let mut s = path.as_os_str().to_os_string();
                s.push(".");
                s.push(COMPRESSED_EXT);
                PathBuf::from(s)
            });
            let n = compress_file(&path, &out, level, cfg.fsync)?;
            println!("{} -> {} ({} B)", path.display(), out.display(), n);
            Ok(())
        }
        Cmd::Decompress { path, out } => {
            let out = match out {
                Some(o) => o,
                None if is_compressed(&path) => path.with_extension(""),
                None => {
                    return Err(anyhow!(
                        "{} has no .{} extension; pass --out",
                        path.display(),
                        COMPRESSED_EXT
                    ))
                }
            };
            let n = decompress_file(&path, &out, cfg.fsync)?;
            println!("{} -> {} ({} B)", path.display(), out.display(), n);
            Ok(())
        }
    }
}

fn print_summary_text(s: &SaveSummary) {
    println!("  map     = {}", s.map());
    println!("  url     = {}", s.url);
    println!("  title   = {}", s.title);
    println!("  version = {}", s.version);
    println!("  guid    = {}", s.guid);
    println!("  players = [{}]", s.players.join(", "));
    if !s.notes.is_empty() {
        println!("  notes   = {}", s.notes);
    }
}

fn cmd_summary(path: &Path, json: bool) -> Result<()> {
    let s = read_summary(path)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&s)?);
        return Ok(());
    }
    println!("{}:", path.display());
    print_summary_text(&s);
    Ok(())
}

fn cmd_list(dir: &Path, json: bool) -> Result<()> {
    let entries = list_summaries(dir)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("(no saves in {})", dir.display());
        return Ok(());
    }
    for e in entries {
        let name = e.path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
        println!(
            "{:<16} map={} title='{}' players={}",
            name,
            e.summary.map(),
            e.summary.title,
            e.summary.players.len()
        );
    }
    Ok(())
}

#[derive(Serialize)]
struct ElementView<'a> {
    index: usize,
    name: &'a str,
    class: u32,
    outer: u32,
    origin: Origin,
    flags: u32,
    payload_len: usize,
    /// base64
    payload: String,
}

#[derive(Serialize)]
struct ReachSpecView {
    distance: i32,
    start: u32,
    end: u32,
    collision_radius: i32,
    collision_height: i32,
    reach_flags: i32,
    pruned: bool,
}

#[derive(Serialize)]
struct InspectView<'a> {
    summary: &'a SaveSummary,
    travel_info: &'a BTreeMap<String, String>,
    names: Vec<&'a str>,
    elements: Vec<ElementView<'a>>,
    actors: Vec<u32>,
    reach_specs: Vec<ReachSpecView>,
}

fn cmd_inspect(path: &Path, cfg: &SaverConfig, json: bool) -> Result<()> {
    let r = open_snapshot(path)?;
    let file = SaveFile::read_from(r, cfg.max_payload_bytes)
        .with_context(|| format!("read snapshot {}", path.display()))?;

    let view = InspectView {
        summary: &file.summary,
        travel_info: &file.travel_info,
        names: file.names.iter().collect(),
        elements: file
            .elements
            .iter()
            .enumerate()
            .map(|(i, e)| ElementView {
                index: i + 1,
                name: file.names.get(e.name as usize).unwrap_or("?"),
                class: e.class.raw(),
                outer: e.outer.raw(),
                origin: e.origin,
                flags: e.flags,
                payload_len: e.payload.len(),
                payload: B64.encode(&e.payload),
            })
            .collect(),
        actors: file.actors.iter().map(|a| a.raw()).collect(),
        reach_specs: file
            .reach_specs
            .iter()
            .map(|rs| ReachSpecView {
                distance: rs.distance,
                start: rs.start.raw(),
                end: rs.end.raw(),
                collision_radius: rs.collision_radius,
                collision_height: rs.collision_height,
                reach_flags: rs.reach_flags,
                pruned: rs.pruned,
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    println!("{}:", path.display());
    print_summary_text(&file.summary);
    for (k, v) in &file.travel_info {
        println!("  travel  {} = {}", k, v);
    }
    println!("  names    = {}", view.names.len());
    println!("  elements = {}", view.elements.len());
    for e in &view.elements {
        println!(
            "    #{:<4} {:<24} class={:<4} outer={:<4} {:?} flags=0x{:08X} payload={} B",
            e.index, e.name, e.class, e.outer, e.origin, e.flags, e.payload_len
        );
    }
    let actors: Vec<String> = view.actors.iter().map(|a| a.to_string()).collect();
    println!("  actors   = [{}]", actors.join(", "));
    println!("  reach_specs = {}", view.reach_specs.len());
    Ok(())
}
