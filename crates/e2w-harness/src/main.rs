#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use e2w_harness::{
    SparseFixture, demo_image, extract_region, extract_superblock, fixtures_dir,
    validate_dir_block_fixture, validate_superblock_fixture,
};
use std::env;
use std::fs;
use std::path::Path;

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().skip(1).collect();
    let cmd = args.first().map(String::as_str);

    match cmd {
        Some("check-fixtures") => {
            let dir = fixtures_dir();
            let sb = validate_superblock_fixture(&dir.join("ext2_superblock_sparse.json"))?;
            let entries = validate_dir_block_fixture(&dir.join("ext2_dir_block.json"), 0)?;

            println!(
                "superblock: block_size={} volume={}",
                sb.block_size, sb.volume_name
            );
            println!("dir block: {} live entries", entries.len());
            Ok(())
        }
        Some("build-demo-image") => build_demo_image(&args[1..]),
        Some("generate-fixture") => generate_fixture(&args[1..]),
        Some("--help" | "-h" | "help") | None => {
            print_usage();
            Ok(())
        }
        Some(other) => {
            print_usage();
            bail!("unknown command: {other}")
        }
    }
}

fn build_demo_image(args: &[String]) -> Result<()> {
    let Some(out) = args.first() else {
        bail!("usage: e2w-harness build-demo-image <out> [--block-size N] [--sparse]");
    };

    let mut block_size = 1024_u32;
    let mut sparse = false;
    let mut index = 1_usize;
    while index < args.len() {
        match args[index].as_str() {
            "--block-size" => {
                let raw = args.get(index + 1).context("--block-size requires a value")?;
                block_size = raw.parse().context("invalid --block-size value")?;
                index += 2;
            }
            "--sparse" => {
                sparse = true;
                index += 1;
            }
            other => bail!("unknown option: {other}"),
        }
    }

    let (image, _) = demo_image(block_size)?;
    let out = Path::new(out);
    let bytes = if sparse {
        let json = serde_json::to_string_pretty(&SparseFixture::from_bytes(&image))?;
        (json + "\n").into_bytes()
    } else {
        image.clone()
    };
    fs::write(out, &bytes).with_context(|| format!("failed to write {}", out.display()))?;

    eprintln!(
        "wrote {} ({} bytes, block_size={block_size})",
        out.display(),
        image.len()
    );
    Ok(())
}

fn generate_fixture(args: &[String]) -> Result<()> {
    if args.is_empty() {
        bail!("usage: e2w-harness generate-fixture <image> [superblock|region <offset> <len>]");
    }

    let image_path = Path::new(&args[0]);
    let image_data =
        fs::read(image_path).with_context(|| format!("failed to read {}", image_path.display()))?;

    let kind = args.get(1).map_or("superblock", String::as_str);

    let fixture = match kind {
        "superblock" => extract_superblock(&image_data)?,
        "region" => {
            let offset: usize = args
                .get(2)
                .context("region requires <offset>")?
                .parse()
                .context("invalid offset")?;
            let len: usize = args
                .get(3)
                .context("region requires <len>")?
                .parse()
                .context("invalid len")?;
            extract_region(&image_data, offset, len)?
        }
        _ => bail!("unknown fixture kind: {kind}"),
    };

    println!("{}", serde_json::to_string_pretty(&fixture)?);
    Ok(())
}

fn print_usage() {
    println!("e2w-harness\n");
    println!("USAGE:");
    println!("  e2w-harness check-fixtures");
    println!("  e2w-harness build-demo-image <out> [--block-size N] [--sparse]");
    println!("  e2w-harness generate-fixture <image> [superblock|region <offset> <len>]");
}
