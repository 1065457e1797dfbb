/// Keyword detection service binary
///
/// Replays a 16kHz mono WAV recording through a shared audio stream and logs
/// every keyword the detector reports, with its stream indices.

use anyhow::{bail, Context, Result};
use keyword_detector::{
    AudioFormat, DetectionEvent, DetectorState, DetectorStateObserver, KeywordDetector,
    KeywordObserver, ServiceConfig, Stream, VadKeywordEngine, WriterPolicy,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Everything the detector reports, funnelled into the event loop
#[derive(Debug)]
enum ServiceEvent {
    Keyword(DetectionEvent),
    State(DetectorState),
}

/// Observer forwarding detector callbacks onto a channel
struct ChannelObserver {
    tx: mpsc::UnboundedSender<ServiceEvent>,
}

impl KeywordObserver for ChannelObserver {
    fn on_keyword_detected(&self, _stream: &Stream, event: &DetectionEvent) {
        let _ = self.tx.send(ServiceEvent::Keyword(event.clone()));
    }
}

impl DetectorStateObserver for ChannelObserver {
    fn on_state_changed(&self, state: DetectorState) {
        let _ = self.tx.send(ServiceEvent::State(state));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("keyword_detector=debug".parse()?),
        )
        .init();

    info!("Starting AetherOS Keyword Detection Service");

    let input = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: keyword-service <recording.wav>")?;

    let config = ServiceConfig::from_env().context("Failed to load configuration")?;
    let samples = load_recording(&input)?;
    info!("Loaded {} samples from {}", samples.len(), input.display());

    let stream = Stream::create(config.buffer_capacity(), config.max_readers, 2)?;
    let engine = VadKeywordEngine::open(&config.engine).context("Failed to open engine")?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let observer = Arc::new(ChannelObserver { tx });
    let keyword_observer: Arc<dyn KeywordObserver> = observer.clone();
    let state_observer: Arc<dyn DetectorStateObserver> = observer.clone();

    let mut detector = KeywordDetector::create_with_observers(
        stream.clone(),
        &AudioFormat::reference(),
        &[keyword_observer],
        &[state_observer],
        Box::new(engine),
        config.detector.clone(),
    )
    .context("Failed to create detector")?;

    info!(
        "Keyword detector running. Listening for {:?}...",
        config.engine.keyword
    );

    let mut writer = stream.create_writer(WriterPolicy::Blocking)?;
    let chunk_size = config.detector.chunk_size;
    let feed = tokio::task::spawn_blocking(move || {
        for chunk in samples.chunks(chunk_size) {
            writer.write_samples(chunk)?;
        }
        writer.close();
        Ok::<_, keyword_detector::StreamError>(writer.tell())
    });

    // An empty recording never activates the detector, so no state change
    // arrives; the poll catches the thread exiting on its own.
    let mut poll = tokio::time::interval(Duration::from_millis(500));
    let mut detections = 0u64;

    loop {
        tokio::select! {
            event = rx.recv() => match event {
                Some(ServiceEvent::Keyword(event)) => {
                    detections += 1;
                    info!(
                        "Keyword {:?} detected: begin={}, end={}",
                        event.keyword, event.begin_index, event.end_index
                    );
                }
                Some(ServiceEvent::State(state)) => {
                    info!("Detector state: {}", state);
                    match state {
                        DetectorState::Active => {}
                        DetectorState::StreamClosed => break,
                        DetectorState::Error => {
                            error!("Detector stopped with an error");
                            break;
                        }
                    }
                }
                None => {
                    info!("Event channel closed, shutting down");
                    break;
                }
            },
            _ = poll.tick() => {
                if detector.is_finished() {
                    warn!("Detector thread exited without a final state");
                    break;
                }
            }
        }
    }

    match feed.await? {
        Ok(written) => info!("Replayed {} samples", written),
        Err(e) => error!("Writing audio failed: {}", e),
    }

    // Cleanup
    detector.shutdown();
    let stats = detector.stats();
    info!(
        "Keyword detection service stopped: {} chunks, {} samples, {} keywords ({} delivered)",
        stats.chunks_processed, stats.samples_processed, stats.keywords_detected, detections
    );

    if stats.state == DetectorState::Error {
        bail!("keyword detection failed");
    }

    Ok(())
}

/// Read a recording in the reference format
fn load_recording(path: &Path) -> Result<Vec<i16>> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let format = AudioFormat::from_wav_spec(&reader.spec());
    if format != AudioFormat::reference() {
        bail!(
            "{} is {}, expected {}",
            path.display(),
            format,
            AudioFormat::reference()
        );
    }

    reader
        .samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to decode {}", path.display()))
}
