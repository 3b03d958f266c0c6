//! Batch pre-renderer.
//!
//! Polls the post store for posts needing (re-)render, runs each one
//! through the sample generator under a wall-clock timeout, applies the
//! fade envelope, encodes to WAV, uploads, and writes the signature
//! back. One item's failure never aborts the batch.

mod envelope;

pub use envelope::apply_fade;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::generator::SampleGenerator;
use crate::io::{AssetStore, PostRow, PostStore};
use crate::signature::{needs_rerender, signature, RenderConfig, RenderedAsset};
use crate::{wav, BytebeatError};

/// Tuning for the polling worker.
#[derive(Debug, Clone)]
pub struct RenderWorkerConfig {
    /// Maximum posts processed per poll cycle
    pub batch_size: usize,
    /// Idle sleep between poll cycles
    pub poll_interval: Duration,
    /// Wall-clock budget per item
    pub timeout: Duration,
    /// Linear fade-in length in seconds
    pub fade_in: f64,
    /// Linear fade-out length in seconds
    pub fade_out: f64,
    /// Render length in seconds
    pub duration_seconds: f64,
}

impl Default for RenderWorkerConfig {
    fn default() -> Self {
        RenderWorkerConfig {
            batch_size: 8,
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
            fade_in: 0.05,
            fade_out: 0.1,
            duration_seconds: 30.0,
        }
    }
}

/// Terminal state of one work item for this pass.
///
/// There is no persisted "permanently failed" state: a failed or
/// timed-out post stays eligible and is retried on the next poll cycle.
#[derive(Debug)]
pub enum RenderOutcome {
    /// Rendered, uploaded and persisted
    Succeeded(RenderedAsset),
    /// Compile, encode, upload or persist failure
    Failed(BytebeatError),
    /// Wall-clock budget exceeded
    TimedOut,
    /// Signature already matches; nothing to do
    UpToDate,
}

/// The polling render worker.
pub struct BatchRenderer {
    config: RenderWorkerConfig,
    store: Arc<dyn PostStore>,
    assets: Arc<dyn AssetStore>,
}

impl BatchRenderer {
    /// Build a worker over the given stores.
    pub fn new(
        config: RenderWorkerConfig,
        store: Arc<dyn PostStore>,
        assets: Arc<dyn AssetStore>,
    ) -> Self {
        BatchRenderer {
            config,
            store,
            assets,
        }
    }

    /// Poll-and-render loop. Runs until `shutdown` is raised; sleeps
    /// `poll_interval` between cycles.
    pub fn run(&self, shutdown: &AtomicBool) {
        info!(
            batch_size = self.config.batch_size,
            poll_secs = self.config.poll_interval.as_secs_f64(),
            "pre-render worker started"
        );
        while !shutdown.load(Ordering::Relaxed) {
            self.run_once();

            // Sleep in short slices so shutdown stays responsive.
            let mut remaining = self.config.poll_interval;
            while !remaining.is_zero() && !shutdown.load(Ordering::Relaxed) {
                let slice = remaining.min(Duration::from_millis(200));
                thread::sleep(slice);
                remaining = remaining.saturating_sub(slice);
            }
        }
        info!("pre-render worker stopped");
    }

    /// One poll cycle: fetch candidates and render them sequentially.
    /// Each item is isolated; a failure is logged and the batch
    /// continues.
    pub fn run_once(&self) -> Vec<(u64, RenderOutcome)> {
        let candidates = match self.store.fetch_render_candidates(self.config.batch_size) {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(error = %err, "failed to fetch render candidates");
                return Vec::new();
            }
        };
        if candidates.is_empty() {
            debug!("no posts need rendering");
            return Vec::new();
        }

        let mut outcomes = Vec::with_capacity(candidates.len());
        for row in candidates {
            let post_id = row.id;
            let outcome = self.render_post(&row);
            match &outcome {
                RenderOutcome::Succeeded(asset) => {
                    info!(post_id, url = %asset.audio_url, "pre-render complete");
                }
                RenderOutcome::Failed(err) => {
                    warn!(post_id, error = %err, "pre-render failed, will retry next cycle");
                }
                RenderOutcome::TimedOut => {
                    warn!(
                        post_id,
                        budget_secs = self.config.timeout.as_secs_f64(),
                        "pre-render timed out, will retry next cycle"
                    );
                }
                RenderOutcome::UpToDate => {
                    debug!(post_id, "asset already current");
                }
            }
            outcomes.push((post_id, outcome));
        }
        outcomes
    }

    /// Render a single post end to end.
    pub fn render_post(&self, row: &PostRow) -> RenderOutcome {
        let config = match RenderConfig::new(
            row.expression.clone(),
            row.mode,
            row.sample_rate,
            self.config.duration_seconds,
        ) {
            Ok(config) => config,
            Err(err) => return RenderOutcome::Failed(err),
        };

        match needs_rerender(row.asset().as_ref(), &config) {
            Ok(true) => {}
            Ok(false) => return RenderOutcome::UpToDate,
            Err(err) => return RenderOutcome::Failed(err),
        }

        let mut samples = match synthesize_with_timeout(&config, self.config.timeout) {
            Ok(samples) => samples,
            Err(RenderJobError::Timeout) => return RenderOutcome::TimedOut,
            Err(RenderJobError::Other(err)) => return RenderOutcome::Failed(err),
        };

        apply_fade(
            &mut samples,
            self.config.fade_in,
            self.config.fade_out,
            config.sample_rate,
        );
        for sample in &mut samples {
            *sample = sample.clamp(-1.0, 1.0);
        }

        // Mono signal duplicated to stereo.
        let bytes = match wav::encode(&samples, &samples, config.sample_rate) {
            Ok(bytes) => bytes,
            Err(err) => return RenderOutcome::Failed(err),
        };

        let key = format!("{}.wav", row.id);
        let url = match self.assets.put(&key, "audio/wav", &bytes) {
            Ok(url) => url,
            Err(err) => return RenderOutcome::Failed(err),
        };

        let sig = match signature(&config) {
            Ok(sig) => sig,
            Err(err) => return RenderOutcome::Failed(err),
        };
        let asset = RenderedAsset {
            signature: sig,
            duration_seconds: config.duration_seconds,
            audio_url: url,
        };
        if let Err(err) = self.store.mark_rendered(row.id, &asset) {
            return RenderOutcome::Failed(err);
        }
        RenderOutcome::Succeeded(asset)
    }
}

enum RenderJobError {
    Timeout,
    Other(BytebeatError),
}

/// Run the full synthesis on a worker thread and race the result
/// against the wall-clock budget.
///
/// Known limitation: a timeout abandons the caller's wait but cannot
/// preempt the worker thread, which runs to completion in the
/// background. The evaluator's fuel budget bounds each sample, so the
/// thread always terminates; it just may finish after we stopped
/// caring.
fn synthesize_with_timeout(
    config: &RenderConfig,
    timeout: Duration,
) -> Result<Vec<f32>, RenderJobError> {
    let mut generator = SampleGenerator::compile(&config.expression, config.mode)
        .map_err(|e| RenderJobError::Other(BytebeatError::Compile(e)))?;
    let total = config.total_samples();

    let (tx, rx) = mpsc::channel();
    let spawned = thread::Builder::new()
        .name("bytebeat-render".into())
        .spawn(move || {
            let mut samples = vec![0.0f32; total];
            generator.fill(0, &mut samples);
            // Receiver may be gone if we timed out; that's fine.
            let _ = tx.send(samples);
        });
    if let Err(err) = spawned {
        return Err(RenderJobError::Other(BytebeatError::Io(err)));
    }

    match rx.recv_timeout(timeout) {
        Ok(samples) => Ok(samples),
        Err(mpsc::RecvTimeoutError::Timeout) => Err(RenderJobError::Timeout),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(RenderJobError::Other(
            BytebeatError::Persist("render thread exited without a result".into()),
        )),
    }
}
