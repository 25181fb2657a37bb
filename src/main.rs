use std::f64::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uwb_rtls::{
    AnchorPosition, FilterConfig, FilterKind, MockRangingHandle, MockRangingSource,
    RangingSession, RtlsConfig,
};

const DEMO_STEPS: usize = 60;
const DEMO_STEP_MS: u64 = 50;

/// Four anchors on the corners of a 6 m square, mounted 2 m up
fn demo_config() -> RtlsConfig {
    RtlsConfig {
        anchors: vec![
            AnchorPosition::new("anchor-1", 0.0, 0.0, 2.0),
            AnchorPosition::new("anchor-2", 6.0, 0.0, 2.0),
            AnchorPosition::new("anchor-3", 6.0, 6.0, 2.0),
            AnchorPosition::new("anchor-4", 0.0, 6.0, 2.0),
        ],
        filter: FilterConfig::of_kind(FilterKind::LowPass),
        settle_delay_ms: 100,
        ..RtlsConfig::default()
    }
}

/// Tag walks a circle of radius 1.5 m around the middle of the room
fn tag_position(step: usize) -> (f64, f64) {
    let angle = 2.0 * PI * step as f64 / DEMO_STEPS as f64;
    (3.0 + 1.5 * angle.cos(), 3.0 + 1.5 * angle.sin())
}

fn report_ranges(handle: &MockRangingHandle, config: &RtlsConfig, step: usize) {
    let (x, y) = tag_position(step);
    for anchor in &config.anchors {
        let distance = ((anchor.x - x).powi(2)
            + (anchor.y - y).powi(2)
            + (anchor.z - config.z_correction).powi(2))
        .sqrt();
        if !handle.push_distance(&anchor.id, distance) {
            warn!(anchor = %anchor.id, distance, "range report dropped by source");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = match args.len() {
        1 => demo_config(),
        2 => RtlsConfig::from_file(&args[1])?,
        _ => {
            eprintln!(
                "Usage: {} [config.json]",
                args.first().map_or("uwb-rtls", |s| s.as_str())
            );
            return Err("Invalid arguments".into());
        }
    };
    config.validate()?;

    let source = MockRangingSource::new();
    let handle = source.handle();
    let session = RangingSession::with_config(source, config.session_config())
        .with_event_sink(|event| info!(?event, "session event"));

    let fixes = Arc::new(AtomicUsize::new(0));
    let fix_counter = Arc::clone(&fixes);
    session
        .start_rtls(
            config.rtls_request(),
            move |location| {
                fix_counter.fetch_add(1, Ordering::Relaxed);
                match serde_json::to_string(&location) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!(error = %e, "failed to encode location"),
                }
            },
            |error| warn!(%error, "no position fix"),
            None,
        )
        .await?;

    for step in 0..DEMO_STEPS {
        report_ranges(&handle, &config, step);
        tokio::time::sleep(Duration::from_millis(DEMO_STEP_MS)).await;
    }

    session.stop_ranging(Some(Box::new(|result| match result {
        Ok(()) => info!("ranging stopped"),
        Err(e) => warn!(error = %e, "ranging stop failed"),
    })));

    info!(fixes = fixes.load(Ordering::Relaxed), "demo finished");
    Ok(())
}
