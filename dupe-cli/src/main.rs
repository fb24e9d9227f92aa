//! Demonstrates the `dupe-core` pipeline end to end: walk a directory,
//! fingerprint every image, bucket, score, and print the resulting groups
//! with a suggested keeper. Grounded on the teacher's `src/bin/imgdup.rs`
//! clap/logging/worker-thread shape; this binary is a harness for
//! exercising the library, not a product surface.

mod catalog;
mod init;

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser;
use color_eyre::eyre::{self, Context};

use dupe_core::config::EngineConfig;
use dupe_core::fingerprint::{FfmpegDecoder, ImageFingerprinter};
use dupe_core::model::{Asset, HashAlgo, MediaType};
use dupe_core::scheduler::CancellationToken;
use dupe_core::traits::Decoder;
use dupe_core::{bktree::AlgoIndex, build_candidates, build_groups_with_metrics};

use catalog::InMemoryCatalog;

#[derive(Parser, Debug)]
#[command(about = "Finds duplicate photos and videos under one or more directories")]
struct Cli {
    /// Directories to scan for photos and videos
    #[arg(required = true)]
    roots: Vec<PathBuf>,

    /// A file to additionally write the logs to
    #[arg(long)]
    logfile: Option<PathBuf>,

    /// Also compute pHash alongside dHash
    #[arg(long)]
    phash: bool,
}

fn main() -> eyre::Result<()> {
    init::init_eyre()?;
    let cli = Cli::parse();
    init::init_logger(cli.logfile.as_deref())?;

    let mut config = EngineConfig::default();
    if cli.phash {
        config.detection.hash_algorithms.push(HashAlgo::PHash);
    }

    let decoder = FfmpegDecoder;
    let cancel = CancellationToken::new();

    let assets = scan_and_fingerprint(&cli.roots, &decoder, &config)?;
    log::info!("fingerprinted {} assets", assets.len());

    let mut hash_index = AlgoIndex::new();
    for asset in &assets {
        for (algo, hash) in &asset.image_hashes {
            hash_index.insert(*algo, asset.id, hash);
        }
    }

    let buckets = build_candidates(&assets, &hash_index, &config, &cancel);
    log::info!("built {} candidate buckets", buckets.len());

    let assets_by_id = assets.iter().map(|a| (a.id, a.clone())).collect();
    let (groups, metrics) = build_groups_with_metrics(&buckets, &assets_by_id, &config, &cancel);
    log::info!(
        "scored {} comparisons of {} naive ({:.1}% reduction) across {} buckets",
        metrics.total_comparisons,
        metrics.naive_comparisons,
        metrics.reduction_percentage(),
        metrics.buckets_created
    );

    let catalog = InMemoryCatalog::new(assets.clone());
    for group in &groups {
        let members: Vec<Asset> = group
            .member_ids()
            .filter_map(|id| catalog.get(id))
            .collect();
        let keeper = dupe_core::suggest_keeper(&members);
        println!(
            "group {} (confidence {:.2}, {} members){}",
            group.group_id,
            group.confidence,
            group.members.len(),
            if group.incomplete { " [incomplete]" } else { "" }
        );
        for line in dupe_core::explain(group) {
            println!("  {line}");
        }
        if let Some(keeper_id) = keeper {
            println!("  suggested keeper: {keeper_id}");
        }
    }

    Ok(())
}

/// Minimal in-process scanner: walks each root recursively, classifying
/// files by extension, and fingerprints images as it goes. A production
/// `Scanner`/`Catalog` pair lives outside this crate; this exists only to
/// make the library runnable against real files for this demo.
fn scan_and_fingerprint(
    roots: &[PathBuf],
    decoder: &dyn Decoder,
    config: &EngineConfig,
) -> eyre::Result<Vec<Asset>> {
    let fingerprinter = ImageFingerprinter::new(&config.detection);
    let video_fingerprinter =
        dupe_core::fingerprint::video::VideoFingerprinter::new(&config.video);

    let assets = Arc::new(Mutex::new(Vec::new()));
    for root in roots {
        walk_and_fingerprint(root, decoder, &fingerprinter, &video_fingerprinter, &assets)
            .wrap_err_with(|| format!("failed to walk {root:?}"))?;
    }

    Ok(Arc::try_unwrap(assets)
        .expect("no other references remain after the walk completes")
        .into_inner()
        .expect("asset list mutex poisoned"))
}

fn walk_and_fingerprint(
    dir: &std::path::Path,
    decoder: &dyn Decoder,
    fingerprinter: &ImageFingerprinter,
    video_fingerprinter: &dupe_core::fingerprint::video::VideoFingerprinter,
    out: &Arc<Mutex<Vec<Asset>>>,
) -> eyre::Result<()> {
    for entry in std::fs::read_dir(dir).wrap_err_with(|| format!("failed to read {dir:?}"))? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk_and_fingerprint(&path, decoder, fingerprinter, video_fingerprinter, out)?;
            continue;
        }

        let Some(media_type) = classify(&path) else {
            continue;
        };

        let file_size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        let mut asset = Asset::new(path.clone(), media_type, file_size);

        match media_type {
            MediaType::Photo => {
                if let Ok(bytes) = std::fs::read(&path) {
                    if let Ok(hashes) = fingerprinter.hash_bytes(&bytes, decoder, 0) {
                        if let Some(first) = hashes.first() {
                            asset.dimensions = Some((first.width, first.height));
                        }
                        for hash in hashes {
                            asset.image_hashes.insert(hash.algorithm, hash);
                        }
                    }
                }
            }
            MediaType::Video => {
                if let Ok(signature) = video_fingerprinter.fingerprint(&path, decoder) {
                    asset.dimensions = Some((signature.width, signature.height));
                    asset.video_signature = Some(signature);
                }
            }
        }

        out.lock().expect("asset list mutex poisoned").push(asset);
    }
    Ok(())
}

fn classify(path: &std::path::Path) -> Option<MediaType> {
    const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "heic", "heif", "cr2", "nef", "arw", "dng"];
    const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "mkv", "avi"];

    let ext = path.extension()?.to_str()?.to_lowercase();
    if PHOTO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaType::Photo)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(MediaType::Video)
    } else {
        None
    }
}
