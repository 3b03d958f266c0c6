//! Headless pre-render worker.
//!
//! Polls a post store for published posts whose render signature is
//! missing or stale, renders each to a stereo WAV and writes the
//! result back. Storage is file-based: a JSON post file and an asset
//! directory.

use std::env;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::info;
use tracing_subscriber::EnvFilter;

use bytebeat::io::{DirAssetStore, JsonPostStore};
use bytebeat::render::{BatchRenderer, RenderWorkerConfig};

struct Args {
    posts_path: PathBuf,
    assets_dir: PathBuf,
    config: RenderWorkerConfig,
    once: bool,
}

fn usage() -> ! {
    eprintln!(
        "Usage:\n  prerender-worker [flags] <posts.json> <assets-dir>\n\nFlags:\n  --interval <secs>   Poll interval (default 5)\n  --batch <n>         Posts per cycle (default 8)\n  --duration <secs>   Render length (default 30)\n  --timeout <secs>    Per-post budget (default 10)\n  --once              Run one cycle and exit\n  -h, --help          Show this help"
    );
    std::process::exit(2);
}

/// Parse a duration flag. `Duration::from_secs_f64` panics on negative
/// or non-finite input, so validate before converting.
fn parse_seconds(value: &str, flag: &str) -> anyhow::Result<Duration> {
    let secs: f64 = value
        .parse()
        .with_context(|| format!("{flag} must be a number"))?;
    if !secs.is_finite() || secs < 0.0 {
        bail!("{flag} must be a non-negative number of seconds");
    }
    Ok(Duration::from_secs_f64(secs))
}

fn parse_args() -> anyhow::Result<Args> {
    let mut config = RenderWorkerConfig::default();
    let mut once = false;
    let mut positional: Vec<String> = Vec::new();

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => usage(),
            "--once" => once = true,
            "--interval" => {
                let value = args.next().context("--interval requires an argument")?;
                config.poll_interval = parse_seconds(&value, "--interval")?;
            }
            "--batch" => {
                let value = args.next().context("--batch requires an argument")?;
                config.batch_size = value.parse().context("--batch must be an integer")?;
            }
            "--duration" => {
                let value = args.next().context("--duration requires an argument")?;
                let secs: f64 = value.parse().context("--duration must be a number")?;
                if !secs.is_finite() || secs <= 0.0 {
                    bail!("--duration must be a positive number of seconds");
                }
                config.duration_seconds = secs;
            }
            "--timeout" => {
                let value = args.next().context("--timeout requires an argument")?;
                config.timeout = parse_seconds(&value, "--timeout")?;
            }
            _ if arg.starts_with('-') => {
                eprintln!("Unknown flag: {arg}");
                usage();
            }
            _ => positional.push(arg),
        }
    }

    if positional.len() != 2 {
        usage();
    }
    if config.batch_size == 0 {
        bail!("--batch must be greater than 0");
    }
    let mut positional = positional.into_iter();
    Ok(Args {
        posts_path: PathBuf::from(positional.next().unwrap_or_default()),
        assets_dir: PathBuf::from(positional.next().unwrap_or_default()),
        config,
        once,
    })
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = parse_args()?;
    let store = Arc::new(JsonPostStore::new(
        &args.posts_path,
        args.config.duration_seconds,
    ));
    let assets = Arc::new(DirAssetStore::new(&args.assets_dir));
    let renderer = BatchRenderer::new(args.config, store, assets);

    if args.once {
        let outcomes = renderer.run_once();
        info!(processed = outcomes.len(), "single cycle complete");
        return Ok(());
    }

    let shutdown = AtomicBool::new(false);
    renderer.run(&shutdown);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_and_non_finite_seconds_are_rejected() {
        assert!(parse_seconds("-1", "--interval").is_err());
        assert!(parse_seconds("NaN", "--timeout").is_err());
        assert!(parse_seconds("inf", "--timeout").is_err());
        assert_eq!(
            parse_seconds("2.5", "--interval").unwrap(),
            Duration::from_millis(2500)
        );
    }
}
