//! Live microphone segmenter demo.
//!
//! Captures from an input device, cuts chunks on trailing silence, and
//! writes each chunk as a WAV file into an output directory. Run with
//! `RUST_LOG=revoice=debug` for per-frame level logging.

#[cfg(not(feature = "audio-cpal"))]
fn main() {
    eprintln!("mic-relay requires the 'audio-cpal' feature");
    std::process::exit(1);
}

#[cfg(feature = "audio-cpal")]
#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("mic-relay failed: {e}");
        std::process::exit(1);
    }
}

#[cfg(feature = "audio-cpal")]
async fn run() -> Result<(), String> {
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use tracing::{error, info};
    use tracing_subscriber::EnvFilter;

    use revoice::{
        audio::input_device_names, Chunk, ChunkDispatcher, EngineConfig, RelayEngine, VoiceProfile,
    };

    #[derive(Debug)]
    struct Args {
        device: Option<String>,
        out_dir: PathBuf,
        silence_ms: u64,
        threshold: f32,
        list_devices: bool,
    }

    fn parse_args() -> Result<Args, String> {
        let mut device = None;
        let mut out_dir = PathBuf::from("chunks");
        let mut silence_ms = 800u64;
        let mut threshold = 0.01f32;
        let mut list_devices = false;

        let mut it = std::env::args().skip(1);
        while let Some(arg) = it.next() {
            match arg.as_str() {
                "--device" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --device".into());
                    };
                    device = Some(v);
                }
                "--out" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --out".into());
                    };
                    out_dir = PathBuf::from(v);
                }
                "--silence-ms" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --silence-ms".into());
                    };
                    silence_ms = v
                        .parse::<u64>()
                        .map_err(|_| "invalid value for --silence-ms".to_string())?
                        .clamp(100, 10_000);
                }
                "--threshold" => {
                    let Some(v) = it.next() else {
                        return Err("missing value for --threshold".into());
                    };
                    threshold = v
                        .parse::<f32>()
                        .map_err(|_| "invalid value for --threshold".to_string())?
                        .clamp(0.0, 1.0);
                }
                "--list-devices" => list_devices = true,
                "--help" | "-h" => {
                    println!(
                        "Usage: cargo run --bin mic-relay -- \\
  [--device <name>] [--out <dir>] [--silence-ms <n>] [--threshold <f>] [--list-devices]"
                    );
                    std::process::exit(0);
                }
                other => return Err(format!("unknown argument: {other}")),
            }
        }

        Ok(Args {
            device,
            out_dir,
            silence_ms,
            threshold,
            list_devices,
        })
    }

    /// Writes each cut chunk to `<out_dir>/<chunk file name>`.
    struct FileSink {
        out_dir: PathBuf,
    }

    impl ChunkDispatcher for FileSink {
        fn dispatch(&self, chunk: Chunk, _voice: VoiceProfile) {
            let path = self.out_dir.join(chunk.file_name());
            match chunk.to_wav() {
                Ok(bytes) => match std::fs::write(&path, &bytes) {
                    Ok(()) => info!(
                        chunk_seq = chunk.seq,
                        path = %path.display(),
                        duration_secs = format_args!("{:.2}", chunk.duration_secs()),
                        "chunk written"
                    ),
                    Err(e) => error!(path = %path.display(), error = %e, "write failed"),
                },
                Err(e) => error!(chunk_seq = chunk.seq, error = %e, "encode failed"),
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("revoice=info")),
        )
        .init();

    let args = parse_args()?;

    if args.list_devices {
        for name in input_device_names().map_err(|e| e.to_string())? {
            println!("{name}");
        }
        return Ok(());
    }

    std::fs::create_dir_all(&args.out_dir).map_err(|e| e.to_string())?;

    let config = EngineConfig {
        silence_threshold: args.threshold,
        silence_duration: Duration::from_millis(args.silence_ms),
        ..EngineConfig::default()
    };
    let engine = Arc::new(RelayEngine::new(
        config,
        Arc::new(FileSink {
            out_dir: args.out_dir.clone(),
        }),
    ));

    engine
        .start_with_device(args.device.clone())
        .map_err(|e| e.to_string())?;
    println!(
        "Listening (silence={} ms, threshold={}). Chunks land in {}. Ctrl-C to stop.",
        args.silence_ms,
        args.threshold,
        args.out_dir.display()
    );

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| e.to_string())?;

    engine.stop().map_err(|e| e.to_string())?;
    // Give the session a moment to cut the final chunk.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stats = engine.stats_snapshot();
    println!(
        "Stopped. frames={} silent={} chunks={}",
        stats.frames_assessed, stats.frames_silent, stats.chunks_cut
    );
    Ok(())
}
