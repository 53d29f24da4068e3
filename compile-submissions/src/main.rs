use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use tex2pdf_core::{init_from_dir, ConverterDriver, DriverConfig, NoOpResolver, SubprocessInvoker, ZeroZeroReadMe};

#[cfg(feature = "scorecard")]
use compile_submissions::scorecard::{ScoreRow, Scorecard};

#[derive(Parser)]
#[command(name = "compile-submissions")]
#[command(about = "Compile arXiv-style TeX submissions to PDF")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit every tarball in a directory to a running tex2pdf service.
    Compile {
        /// Directory containing submission tarballs to submit.
        dir: PathBuf,
        /// Base URL of a running `compile-submissions serve` instance.
        #[arg(long)]
        service: String,
        /// Size of the bounded worker pool used to submit tarballs in parallel.
        #[arg(long, default_value_t = 16)]
        threads: usize,
        /// Ask the service to auto-detect the compiler pipeline rather than trusting the manifest.
        #[arg(long)]
        auto_detect: bool,
    },
    /// Harvest outcome archives in a directory into a scorecard database.
    Harvest {
        /// Directory containing `outcome-*.tar.gz` archives to scan.
        dir: PathBuf,
        /// Path to the scorecard SQLite database.
        #[arg(long, default_value = "scorecard.db")]
        score: String,
        /// Remove scorecard rows for submissions that did not compile successfully.
        #[arg(long)]
        purge_failed: bool,
    },
    /// Compile a single unpacked submission directory in-process, without any HTTP service.
    Local {
        /// Directory containing the unpacked submission (and optionally a 00README manifest).
        dir: PathBuf,
        /// Where to write compiled artifacts. Defaults to `<dir>/out`.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Run the thin HTTP service exposing `/convert/` and `/stamp/`.
    #[cfg(feature = "http")]
    Serve {
        /// Address to bind, e.g. `0.0.0.0:8080`.
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    match args.command {
        Command::Compile { dir, service, threads, auto_detect } => run_compile(&dir, &service, threads, auto_detect),
        Command::Harvest { dir, score, purge_failed } => run_harvest(&dir, &score, purge_failed),
        Command::Local { dir, out } => run_local(&dir, out.as_deref()),
        #[cfg(feature = "http")]
        Command::Serve { addr } => run_serve(&addr),
    }
}

/// `compile-submissions compile`: bounded worker pool, one reqwest blocking
/// client per thread, submitting every tarball under `dir` to `service`.
fn run_compile(dir: &Path, service: &str, threads: usize, auto_detect: bool) -> Result<()> {
    let tarballs: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("gz"))
        .collect();

    println!("📦 submitting {} tarballs to {service} with {threads} workers", tarballs.len());

    let pool = rayon::ThreadPoolBuilder::new().num_threads(threads).build().context("building worker pool")?;

    let results: Vec<Result<PathBuf>> = pool.install(|| {
        use rayon::prelude::*;
        tarballs
            .par_iter()
            .map(|tarball| submit_one(tarball, service, auto_detect))
            .collect()
    });

    let mut failures = 0;
    for (tarball, result) in tarballs.iter().zip(results) {
        match result {
            Ok(out) => println!("✅ {} -> {}", tarball.display(), out.display()),
            Err(e) => {
                failures += 1;
                eprintln!("❌ {}: {e}", tarball.display());
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{failures} submission(s) failed");
    }
    Ok(())
}

fn submit_one(tarball: &Path, service: &str, auto_detect: bool) -> Result<PathBuf> {
    let client = reqwest::blocking::Client::new();
    let bytes = std::fs::read(tarball)?;
    let part = reqwest::blocking::multipart::Part::bytes(bytes).file_name("incoming.tar.gz");
    let form = reqwest::blocking::multipart::Form::new().part("incoming", part);

    let mut url = format!("{}/convert/", service.trim_end_matches('/'));
    if auto_detect {
        url.push_str("?auto_detect=true");
    }

    let response = client.post(&url).multipart(form).send()?;
    if !response.status().is_success() {
        anyhow::bail!("service returned {}", response.status());
    }
    let body = response.bytes()?;

    let out_path = tarball.with_extension("outcome.tar.gz");
    std::fs::write(&out_path, &body)?;
    Ok(out_path)
}

#[cfg(feature = "scorecard")]
fn run_harvest(dir: &Path, score_path: &str, purge_failed: bool) -> Result<()> {
    let card = Scorecard::open(score_path)?;
    let mut harvested = 0;

    for entry in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
        if !name.starts_with("outcome-") || !name.ends_with(".tar.gz") {
            continue;
        }
        if card.is_touched(name)? {
            continue;
        }

        let meta = tex2pdf_core::read_outcome_meta(&path)?;
        let row = ScoreRow {
            source: meta.tag.clone(),
            outcome: meta.status.clone(),
            arxivfiles: meta.in_files.join(","),
            clsfiles: String::new(),
            styfiles: String::new(),
            pdf: meta.out_files.first().cloned().unwrap_or_default(),
            pdfchecksum: String::new(),
            nrpages: 0,
            removed_unused_files: meta.unused_figures.join(","),
            status: if meta.status == "success" { 0 } else { 1 },
            success: meta.status == "success",
        };
        card.record(&row)?;
        card.mark_touched(name)?;
        harvested += 1;
    }

    println!("📊 harvested {harvested} outcome archives into {score_path}");

    if purge_failed {
        let removed = card.purge_failed()?;
        println!("🧹 purged {removed} failed rows");
    }
    Ok(())
}

#[cfg(not(feature = "scorecard"))]
fn run_harvest(_dir: &Path, _score_path: &str, _purge_failed: bool) -> Result<()> {
    anyhow::bail!("compile-submissions was built without the `scorecard` feature")
}

/// `compile-submissions local`: drives the `ConverterDriver` directly, no
/// HTTP involved at all — the common case for a developer who just wants to
/// compile a submission on their own machine.
fn run_local(dir: &Path, out: Option<&Path>) -> Result<()> {
    let out_dir = out.map(PathBuf::from).unwrap_or_else(|| dir.join("out"));
    std::fs::create_dir_all(&out_dir)?;

    println!("📄 compiling {}", dir.display());
    let zzrm = init_from_dir(dir).unwrap_or_else(|e| {
        println!("📋 no 00README manifest found ({e}), using preflight defaults");
        ZeroZeroReadMe::new()
    });

    let config = DriverConfig::default();
    let invoker = SubprocessInvoker;
    let resolver = NoOpResolver;
    let driver = ConverterDriver::new(&config, &invoker, &resolver);

    let tag = dir.file_name().and_then(|n| n.to_str()).unwrap_or("submission").to_string();
    let outcome = driver.generate_pdf(dir, &out_dir, &zzrm, &tag);

    if outcome.status == "success" {
        println!("✅ compiled successfully: {:?}", outcome.out_files);
        Ok(())
    } else {
        eprintln!("❌ compilation failed: {:?}", outcome.note);
        std::process::exit(1);
    }
}

#[cfg(feature = "http")]
fn run_serve(addr: &str) -> Result<()> {
    let socket_addr: std::net::SocketAddr = addr.parse().with_context(|| format!("invalid address: {addr}"))?;
    let runtime = tokio::runtime::Runtime::new()?;
    let state = compile_submissions::http::AppState { configs: std::sync::Arc::new(tex2pdf_core::ConfigManager::new()) };
    runtime.block_on(compile_submissions::http::serve(socket_addr, state))
}
