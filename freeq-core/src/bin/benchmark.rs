fn main() {
    if let Err(e) = run() {
        eprintln!("benchmark failed: {e}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    use freeq_core::{
        DuplexSession, PassthroughProcessor, ProcessorHandle, SampleSource, SessionConfig,
        SineSource,
    };
    use serde::Serialize;
    use std::path::PathBuf;
    use std::time::{Duration, Instant};

    #[derive(Debug)]
    struct Args {
        seconds: u64,
        capacity: usize,
        channels: usize,
        quantum: usize,
        batch_quanta: usize,
        output: Option<PathBuf>,
        dump_wav: Option<PathBuf>,
    }

    #[derive(Debug, Clone, Serialize)]
    struct Summary {
        seconds: u64,
        capacity_frames: usize,
        channel_count: usize,
        quantum_frames: usize,
        batch_quanta: usize,
        batch_frames: usize,
        sample_rate: u32,
        quanta_pushed: usize,
        quanta_dropped: usize,
        underruns: usize,
        batches_processed: usize,
        missed_signals: usize,
        wakeups: usize,
        p50_batch_latency_ms: f64,
        p95_batch_latency_ms: f64,
        avg_batch_latency_ms: f64,
        frames_pushed: usize,
        frames_pulled: usize,
        frames_in_flight: usize,
        frames_conserved: bool,
    }

    fn parse_args() -> Result<Args, String> {
        let mut seconds = 2u64;
        let mut capacity = 8192usize;
        let mut channels = 2usize;
        let mut quantum = 128usize;
        let mut batch_quanta = 20usize;
        let mut output: Option<PathBuf> = None;
        let mut dump_wav: Option<PathBuf> = None;

        let mut it = std::env::args().skip(1).peekable();
        while let Some(arg) = it.next() {
            let mut take = |name: &str| -> Result<String, String> {
                it.next().ok_or_else(|| format!("missing value for {name}"))
            };
            match arg.as_str() {
                "--seconds" => {
                    seconds = take("--seconds")?
                        .parse::<u64>()
                        .map_err(|_| "invalid value for --seconds".to_string())?
                        .clamp(1, 30);
                }
                "--capacity" => {
                    capacity = take("--capacity")?
                        .parse::<usize>()
                        .map_err(|_| "invalid value for --capacity".to_string())?;
                }
                "--channels" => {
                    channels = take("--channels")?
                        .parse::<usize>()
                        .map_err(|_| "invalid value for --channels".to_string())?
                        .clamp(1, 32);
                }
                "--quantum" => {
                    quantum = take("--quantum")?
                        .parse::<usize>()
                        .map_err(|_| "invalid value for --quantum".to_string())?;
                }
                "--batch-quanta" => {
                    batch_quanta = take("--batch-quanta")?
                        .parse::<usize>()
                        .map_err(|_| "invalid value for --batch-quanta".to_string())?;
                }
                "--output" => {
                    output = Some(PathBuf::from(take("--output")?));
                }
                "--dump-wav" => {
                    dump_wav = Some(PathBuf::from(take("--dump-wav")?));
                }
                "--help" | "-h" => {
                    println!(
                        "Usage: cargo run -p freeq-core --bin benchmark -- \\
  [--seconds <n>] [--capacity <frames>] [--channels <n>] [--quantum <frames>] \\
  [--batch-quanta <n>] [--output <file.json>] [--dump-wav <file.wav>]"
                    );
                    std::process::exit(0);
                }
                other => {
                    return Err(format!("unknown argument: {other}"));
                }
            }
        }

        Ok(Args {
            seconds,
            capacity,
            channels,
            quantum,
            batch_quanta,
            output,
            dump_wav,
        })
    }

    fn percentile(values: &[f64], p: f64) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        if sorted.len() == 1 {
            return sorted[0];
        }
        let idx = ((sorted.len() - 1) as f64 * p.clamp(0.0, 1.0)).round() as usize;
        sorted[idx.min(sorted.len() - 1)]
    }

    const SAMPLE_RATE: u32 = 48_000;

    let args = parse_args()?;
    let config = SessionConfig {
        capacity_frames: args.capacity,
        channel_count: args.channels,
        quantum_frames: args.quantum,
        batch_quanta: args.batch_quanta,
        wait_timeout: Duration::from_millis(50),
        prime_output: false,
        sample_rate: SAMPLE_RATE,
    };
    let batch_frames = config.batch_frames();
    if batch_frames > args.capacity {
        return Err(format!(
            "batch of {batch_frames} frames cannot fit a {}-frame ring — raise --capacity",
            args.capacity
        ));
    }

    let session = DuplexSession::new(config, ProcessorHandle::new(PassthroughProcessor::new()));
    session.warm_up().map_err(|e| e.to_string())?;
    let mut rt = session.start().map_err(|e| e.to_string())?;
    let mut occupancy_rx = session.subscribe_occupancy();

    let total_quanta = (args.seconds * u64::from(SAMPLE_RATE)) as usize / args.quantum;
    let quantum_period = Duration::from_secs_f64(args.quantum as f64 / f64::from(SAMPLE_RATE));

    println!(
        "Running freeq benchmark: {} quanta of {} frames, batch {} frames, {} channels",
        total_quanta, args.quantum, batch_frames, args.channels
    );

    let mut source = SineSource::new(440.0, SAMPLE_RATE, 0.4);
    let mut scratch = vec![0.0f32; args.quantum * args.channels];
    let mut pulled = vec![0.0f32; args.quantum * args.channels];
    let mut wav_samples: Vec<f32> = Vec::new();

    let mut quanta_pushed = 0usize;
    let mut quanta_dropped = 0usize;
    let mut underruns = 0usize;
    let mut frames_pushed = 0usize;
    let mut frames_pulled = 0usize;
    // Instant at which each batch became complete on the input ring,
    // indexed by batch number.
    let mut batch_boundaries: Vec<Instant> = Vec::new();
    let mut latencies_ms: Vec<f64> = Vec::new();

    let started = Instant::now();
    let mut deadline = started;

    for _ in 0..total_quanta {
        deadline += quantum_period;
        let now = Instant::now();
        if deadline > now {
            std::thread::sleep(deadline - now);
        }

        source.fill(&mut scratch, args.channels);
        let report = rt.process_quantum_interleaved(&scratch, &mut pulled, args.quantum);

        if report.pushed {
            quanta_pushed += 1;
            frames_pushed += args.quantum;
            while batch_boundaries.len() < frames_pushed / batch_frames {
                batch_boundaries.push(Instant::now());
            }
        } else {
            quanta_dropped += 1;
        }

        if report.pulled {
            frames_pulled += args.quantum;
            if args.dump_wav.is_some() {
                wav_samples.extend_from_slice(&pulled);
            }
        } else {
            underruns += 1;
        }

        while let Ok(event) = occupancy_rx.try_recv() {
            let batch_index = (event.batches - 1) as usize;
            if let Some(&boundary) = batch_boundaries.get(batch_index) {
                latencies_ms.push(boundary.elapsed().as_secs_f64() * 1000.0);
            }
        }
    }

    // Give the worker a moment to finish the tail batch, then drain what is
    // left of the output ring.
    std::thread::sleep(Duration::from_millis(100));
    while rt.pull_output_interleaved(&mut pulled, args.quantum) {
        frames_pulled += args.quantum;
        if args.dump_wav.is_some() {
            wav_samples.extend_from_slice(&pulled);
        }
    }

    let frames_in_flight = rt.input_backlog() + rt.output_ready();
    let snapshot = session.diagnostics_snapshot();
    session.stop().map_err(|e| e.to_string())?;

    let avg_batch_latency_ms = if latencies_ms.is_empty() {
        0.0
    } else {
        latencies_ms.iter().sum::<f64>() / latencies_ms.len() as f64
    };

    let summary = Summary {
        seconds: args.seconds,
        capacity_frames: args.capacity,
        channel_count: args.channels,
        quantum_frames: args.quantum,
        batch_quanta: args.batch_quanta,
        batch_frames,
        sample_rate: SAMPLE_RATE,
        quanta_pushed,
        quanta_dropped,
        underruns,
        batches_processed: snapshot.batches_processed,
        missed_signals: snapshot.missed_signals,
        wakeups: snapshot.wakeups,
        p50_batch_latency_ms: percentile(&latencies_ms, 0.50),
        p95_batch_latency_ms: percentile(&latencies_ms, 0.95),
        avg_batch_latency_ms,
        frames_pushed,
        frames_pulled,
        frames_in_flight,
        frames_conserved: frames_pushed == frames_pulled + frames_in_flight,
    };

    println!(
        "Done. batches={} p50={:.2}ms p95={:.2}ms underruns={} dropped={} conserved={}",
        summary.batches_processed,
        summary.p50_batch_latency_ms,
        summary.p95_batch_latency_ms,
        summary.underruns,
        summary.quanta_dropped,
        summary.frames_conserved
    );

    if let Some(path) = &args.dump_wav {
        let spec = hound::WavSpec {
            channels: args.channels as u16,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec).map_err(|e| e.to_string())?;
        for &sample in &wav_samples {
            writer.write_sample(sample).map_err(|e| e.to_string())?;
        }
        writer.finalize().map_err(|e| e.to_string())?;
        println!("Wrote output dump: {}", path.display());
    }

    let json = serde_json::to_string_pretty(&summary).map_err(|e| e.to_string())?;
    if let Some(out) = args.output {
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        std::fs::write(&out, json).map_err(|e| e.to_string())?;
        println!("Wrote benchmark report: {}", out.display());
    } else {
        println!("{json}");
    }

    Ok(())
}
