use std::env;
use std::path::PathBuf;
use std::process;

use anyhow::{bail, Context, Result};
use islands_ssr::manifest::generate::build_islands_manifest;
use islands_ssr::manifest::DEFAULT_MANIFEST_PATH;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: islands-manifest --in dist/client/.vite/manifest.json \
                     [--out dist/client/islands-manifest.json]";

#[derive(Debug, PartialEq, Eq)]
struct Args {
    vite_manifest: PathBuf,
    out: PathBuf,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("[islands-manifest] {err:#}");
        process::exit(1);
    }
}

fn run() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .without_time()
        .init();

    let args = parse_args(env::args().skip(1))?;
    let manifest = build_islands_manifest(&args.vite_manifest, &args.out).with_context(|| {
        format!(
            "failed to build islands manifest from '{}'",
            args.vite_manifest.display()
        )
    })?;

    tracing::info!(modules = manifest.modules.len(), "Islands manifest generated");
    println!("Wrote {}", args.out.display());
    Ok(())
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut vite_manifest: Option<PathBuf> = None;
    let mut out: Option<PathBuf> = None;
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--in" => {
                let value = args.next().context("missing value for --in")?;
                vite_manifest = Some(PathBuf::from(value));
            }
            "--out" => {
                let value = args.next().context("missing value for --out")?;
                out = Some(PathBuf::from(value));
            }
            _ => bail!("unknown argument '{arg}'. {USAGE}"),
        }
    }

    let Some(vite_manifest) = vite_manifest else {
        bail!("required flag missing: --in <path>. {USAGE}");
    };
    Ok(Args {
        vite_manifest,
        out: out.unwrap_or_else(|| PathBuf::from(DEFAULT_MANIFEST_PATH)),
    })
}
