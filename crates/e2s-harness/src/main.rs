#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use e2s_harness::{
    DEFAULT_FIXTURE_GAP, extract_region, extract_superblock, fixture_dir, sample_image,
    sparse_fixture_from_image, validate_ext2_fixture,
};
use std::env;
use std::fs;
use std::path::Path;

/// Fixtures `check-fixtures` validates, relative to the fixture directory.
const FIXTURES: [&str; 2] = ["ext2_sample_1k.json", "ext2_multigroup_1k.json"];

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
        Some("check-fixtures") => check_fixtures(),
        Some("generate-fixture") => generate_fixture(&args[1..]),
        Some("build-sample") => build_sample(&args[1..]),
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

fn print_usage() {
    println!("e2s-harness\n");
    println!("USAGE:");
    println!("  e2s-harness check-fixtures");
    println!("  e2s-harness generate-fixture <image> [full|superblock|region <offset> <len>]");
    println!("  e2s-harness build-sample <out.img>");
}

fn check_fixtures() -> Result<()> {
    let dir = fixture_dir();
    for name in FIXTURES {
        let sb = validate_ext2_fixture(&dir.join(name))?;
        println!(
            "{name}: block_size={} blocks={} inodes={} volume={}",
            sb.block_size, sb.blocks_count, sb.inodes_count, sb.volume_name
        );
    }
    Ok(())
}

fn generate_fixture(args: &[String]) -> Result<()> {
    if args.is_empty() {
        bail!("usage: e2s-harness generate-fixture <image> [full|superblock|region <offset> <len>]");
    }

    let image_path = Path::new(&args[0]);
    let image_data =
        fs::read(image_path).with_context(|| format!("failed to read {}", image_path.display()))?;

    let kind = args.get(1).map_or("full", String::as_str);
    let fixture = match kind {
        "full" => {
            extract_superblock(&image_data)?;
            sparse_fixture_from_image(&image_data, DEFAULT_FIXTURE_GAP)?
        }
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
            extract_region(&image_data, offset, len, DEFAULT_FIXTURE_GAP)?
        }
        _ => bail!("unknown fixture kind: {kind}"),
    };

    println!("{}", serde_json::to_string_pretty(&fixture)?);
    Ok(())
}

fn build_sample(args: &[String]) -> Result<()> {
    let Some(out) = args.first() else {
        bail!("usage: e2s-harness build-sample <out.img>");
    };
    let image = sample_image()?;
    fs::write(out, image.bytes()).with_context(|| format!("failed to write {out}"))?;
    eprintln!("wrote {} bytes to {out}", image.bytes().len());
    Ok(())
}
