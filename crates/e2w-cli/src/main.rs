#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use e2w::{InodeNumber, InodeStat, MissReason, OpenImage, OpenOptions, Resolution, ScanPolicy};
use serde::Serialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize)]
struct InspectOutput {
    block_size: u32,
    inodes_count: u32,
    blocks_count: u32,
    free_blocks_count: u32,
    free_inodes_count: u32,
    rev_level: u32,
    inode_size: u16,
    first_ino: u32,
    volume_name: String,
    uuid: String,
    inode_table: u32,
    used_dirs_count: u16,
}

#[derive(Debug, Serialize)]
struct ResolveOutput<'a> {
    path: &'a str,
    #[serde(flatten)]
    resolution: Resolution,
}

#[derive(Debug, Serialize)]
struct ListEntry {
    ino: u32,
    file_type: char,
    rec_len: u32,
    name: String,
}

/// Flags shared by every command.
#[derive(Debug, Default)]
struct Flags {
    json: bool,
    options: OpenOptions,
}

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let mut args = env::args().skip(1);
    let Some(command) = args.next() else {
        print_usage();
        return Ok(());
    };

    let (positional, flags) = split_flags(args)?;

    match command.as_str() {
        "inspect" => {
            let [image] = positional.as_slice() else {
                bail!("inspect requires <image-path>");
            };
            inspect(Path::new(image), &flags)
        }
        "resolve" => {
            let [image, path] = positional.as_slice() else {
                bail!("resolve requires <image-path> <path>");
            };
            resolve_cmd(Path::new(image), path, &flags)
        }
        "stat" => {
            let [image, path] = positional.as_slice() else {
                bail!("stat requires <image-path> <path>");
            };
            stat_cmd(Path::new(image), path, &flags)
        }
        "ls" => {
            let [image, path] = positional.as_slice() else {
                bail!("ls requires <image-path> <path>");
            };
            ls_cmd(Path::new(image), path, &flags)
        }
        "--help" | "-h" | "help" => {
            print_usage();
            Ok(())
        }
        _ => {
            print_usage();
            bail!("unknown command: {command}")
        }
    }
}

fn split_flags(args: impl Iterator<Item = String>) -> Result<(Vec<String>, Flags)> {
    let mut positional = Vec::new();
    let mut flags = Flags::default();
    for arg in args {
        match arg.as_str() {
            "--json" => flags.json = true,
            "--skip-validation" => flags.options.skip_validation = true,
            "--last-match" => flags.options.scan_policy = ScanPolicy::LastMatch,
            other if other.starts_with("--") => bail!("unknown flag: {other}"),
            _ => positional.push(arg),
        }
    }
    Ok((positional, flags))
}

fn print_usage() {
    println!("e2w\n");
    println!("USAGE:");
    println!("  e2w inspect <image-path> [--json] [--skip-validation]");
    println!("  e2w resolve <image-path> <path> [--json] [--skip-validation] [--last-match]");
    println!("  e2w stat <image-path> <path> [--json] [--skip-validation] [--last-match]");
    println!("  e2w ls <image-path> <path> [--json] [--skip-validation] [--last-match]");
}

fn load_image(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed to read image {}", path.display()))
}

fn open<'img>(bytes: &'img [u8], path: &Path, flags: &Flags) -> Result<OpenImage<'img>> {
    OpenImage::open_with_options(bytes, &flags.options)
        .with_context(|| format!("failed to open ext2 image {}", path.display()))
}

fn print_json(value: &impl Serialize) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serialize output")?
    );
    Ok(())
}

fn inspect(image_path: &Path, flags: &Flags) -> Result<()> {
    let bytes = load_image(image_path)?;
    let fs = open(&bytes, image_path, flags)?;
    let sb = fs.superblock();
    let gd = fs
        .first_group_descriptor()
        .context("failed to read group descriptor 0")?;

    let output = InspectOutput {
        block_size: sb.block_size,
        inodes_count: sb.inodes_count,
        blocks_count: sb.blocks_count,
        free_blocks_count: sb.free_blocks_count,
        free_inodes_count: sb.free_inodes_count,
        rev_level: sb.rev_level,
        inode_size: sb.inode_record_size(),
        first_ino: sb.first_non_reserved_ino(),
        volume_name: sb.volume_name.clone(),
        uuid: format_uuid(&sb.uuid),
        inode_table: gd.inode_table,
        used_dirs_count: gd.used_dirs_count,
    };

    if flags.json {
        return print_json(&output);
    }

    println!("E2Walk Inspector");
    println!("filesystem: ext2");
    println!("block_size: {}", output.block_size);
    println!("inodes_count: {}", output.inodes_count);
    println!("blocks_count: {}", output.blocks_count);
    println!("free_blocks_count: {}", output.free_blocks_count);
    println!("free_inodes_count: {}", output.free_inodes_count);
    println!("rev_level: {}", output.rev_level);
    println!("inode_size: {}", output.inode_size);
    println!("first_ino: {}", output.first_ino);
    println!("volume_name: {}", output.volume_name);
    println!("uuid: {}", output.uuid);
    println!("inode_table: {}", output.inode_table);
    println!("used_dirs_count: {}", output.used_dirs_count);
    Ok(())
}

fn format_uuid(uuid: &[u8; 16]) -> String {
    let mut out = String::with_capacity(36);
    for (i, byte) in uuid.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            out.push('-');
        }
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

fn resolve_cmd(image_path: &Path, path: &str, flags: &Flags) -> Result<()> {
    let bytes = load_image(image_path)?;
    let fs = open(&bytes, image_path, flags)?;
    let resolution = fs
        .resolver()
        .resolve_detailed(path)
        .with_context(|| format!("failed to resolve {path}"))?;

    if flags.json {
        return print_json(&ResolveOutput { path, resolution });
    }

    match resolution {
        Resolution::Found { ino } => println!("{path}: inode {ino}"),
        Resolution::NotFound { miss } => println!("{path}: not found ({miss:?})"),
    }
    Ok(())
}

fn stat_cmd(image_path: &Path, path: &str, flags: &Flags) -> Result<()> {
    let bytes = load_image(image_path)?;
    let fs = open(&bytes, image_path, flags)?;
    let Some(stat) = fs
        .stat(path)
        .with_context(|| format!("failed to stat {path}"))?
    else {
        bail!("{path}: not found");
    };

    if flags.json {
        return print_json(&stat);
    }
    print_stat(path, &stat);
    Ok(())
}

fn print_stat(path: &str, stat: &InodeStat) {
    println!("path: {path}");
    println!("inode: {}", stat.ino);
    println!("kind: {:?}", stat.kind);
    println!("perm: {:o}", stat.perm);
    println!("size: {}", stat.size);
    println!("links: {}", stat.links);
    println!("uid: {}", stat.uid);
    println!("gid: {}", stat.gid);
    println!("blocks_512: {}", stat.blocks_512);
    println!("atime: {}", stat.atime);
    println!("ctime: {}", stat.ctime);
    println!("mtime: {}", stat.mtime);
    println!("first_block: {}", stat.first_block);
}

/// Directory inode that `ls` should list.
///
/// Walks that end on the root report `RootPath`, so the root is listed for
/// "/", "/." or "/etc/..".
fn listing_target(fs: &OpenImage<'_>, path: &str) -> Result<InodeNumber> {
    let resolution = fs
        .resolver()
        .resolve_detailed(path)
        .with_context(|| format!("failed to resolve {path}"))?;
    match resolution {
        Resolution::Found { ino } => Ok(ino),
        Resolution::NotFound {
            miss: MissReason::RootPath,
        } => Ok(InodeNumber::ROOT),
        Resolution::NotFound { .. } => bail!("{path}: not found"),
    }
}

fn ls_cmd(image_path: &Path, path: &str, flags: &Flags) -> Result<()> {
    let bytes = load_image(image_path)?;
    let fs = open(&bytes, image_path, flags)?;

    let ino = listing_target(&fs, path)?;

    let entries: Vec<ListEntry> = fs
        .list_dir(ino)
        .with_context(|| format!("failed to list {path}"))?
        .into_iter()
        .map(|entry| ListEntry {
            ino: entry.inode,
            file_type: entry.file_type.tag(),
            rec_len: entry.rec_len,
            name: entry.name_str(),
        })
        .collect();

    if flags.json {
        return print_json(&entries);
    }
    for entry in &entries {
        println!(
            "{:>8} {} {:>5} {}",
            entry.ino, entry.file_type, entry.rec_len, entry.name
        );
    }
    Ok(())
}
