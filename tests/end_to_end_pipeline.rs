//! Integration tests for the reader -> queue -> drainer pipeline, without child
//! processes.

use bore_daq::config::PipelineConfig;
use bore_daq::events::{EventBus, PipelineEvent};
use bore_daq::measurement::{LineParser, ParsedSample};
use bore_daq::pipeline::{
    IngestionQueue, RateLimitedDrainer, ReaderExit, SampleSink, StreamReader, StreamReaderConfig,
};
use parking_lot::Mutex;
use std::io::Cursor;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn reader_config(max_reported_failures: usize) -> StreamReaderConfig {
    StreamReaderConfig {
        parser: LineParser::new(0.1),
        encoding: encoding_rs::UTF_8,
        poll_timeout: Duration::from_millis(10),
        max_reported_failures,
        progress_every: 1000,
    }
}

fn collecting_sink() -> (SampleSink, Arc<Mutex<Vec<ParsedSample>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink_received = received.clone();
    let sink: SampleSink = Arc::new(move |sample| sink_received.lock().push(sample));
    (sink, received)
}

#[test]
fn test_five_line_stream() {
    let stream = "序号0,直径17.70\n序号1,直径17.72\n序号2,直径\n序号3,直径17.68\n";
    let bus = EventBus::new(256);
    let mut rx = bus.subscribe();
    let queue = IngestionQueue::new();
    let (sink, received) = collecting_sink();

    let mut drainer = RateLimitedDrainer::spawn(queue.clone(), sink, Duration::from_millis(5))
        .expect("Failed to spawn drainer");
    let mut reader = StreamReader::spawn(
        "test-reader",
        Cursor::new(stream.as_bytes().to_vec()),
        queue.clone(),
        bus,
        reader_config(10),
    )
    .expect("Failed to spawn reader");

    // The reader ends on its own at EOF.
    assert_eq!(reader.join(Duration::from_secs(5)), Some(ReaderExit::EndOfStream));
    assert!(reader.is_finished());

    let delivered = drainer.finish(Duration::from_secs(5));
    assert_eq!(delivered, 3);

    let pairs: Vec<(u64, f64)> = received
        .lock()
        .iter()
        .map(|s| (s.sequence, s.diameter))
        .collect();
    assert_eq!(pairs, vec![(0, 17.70), (1, 17.72), (3, 17.68)]);

    let stats = reader.stats();
    assert_eq!(stats.lines, 4);
    assert_eq!(stats.samples, 3);
    assert_eq!(stats.parse_failures, 1);

    let mut failures = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let PipelineEvent::ParseFailure { line_number, line, .. } = event {
            failures.push((line_number, line));
        }
    }
    assert_eq!(failures, vec![(3, "序号2,直径".to_string())]);
}

#[test]
fn test_no_sample_loss_under_backpressure() {
    const COUNT: u64 = 10_000;
    let mut stream = String::new();
    for i in 0..COUNT {
        stream.push_str(&format!("序号{},直径{}.{:02}\n", i, 17 + i % 3, i % 100));
    }

    let queue = IngestionQueue::new();
    let (sink, received) = collecting_sink();
    // Far slower than the reader: the queue has to absorb the burst.
    let drainer = RateLimitedDrainer::spawn(queue.clone(), sink, Duration::from_millis(2))
        .expect("Failed to spawn drainer");
    let mut reader = StreamReader::spawn(
        "burst-reader",
        Cursor::new(stream.into_bytes()),
        queue.clone(),
        EventBus::new(16),
        reader_config(10),
    )
    .expect("Failed to spawn reader");

    assert_eq!(reader.join(Duration::from_secs(30)), Some(ReaderExit::EndOfStream));
    assert_eq!(reader.stats().samples, COUNT);
    assert!(drainer.delivered() < COUNT, "drainer should still be behind");

    // Let the drainer catch up at full speed.
    drainer.set_interval(Duration::ZERO);
    let start = Instant::now();
    while drainer.delivered() < COUNT {
        assert!(start.elapsed() < Duration::from_secs(30), "drainer stalled");
        thread::sleep(Duration::from_millis(10));
    }

    let sequences: Vec<u64> = received.lock().iter().map(|s| s.sequence).collect();
    assert_eq!(sequences, (0..COUNT).collect::<Vec<_>>());
    assert!(queue.is_empty());
    assert_eq!(queue.total_pushed(), COUNT);
    assert_eq!(queue.total_popped(), COUNT);
}

#[test]
fn test_parse_failure_reports_are_capped() {
    let mut stream = String::new();
    for i in 0..25 {
        stream.push_str(&format!("garbage line {i}\n"));
    }
    stream.push_str("No: 7, Diameter: 18.25\n");

    let bus = EventBus::new(256);
    let mut rx = bus.subscribe();
    let queue = IngestionQueue::new();
    let mut reader = StreamReader::spawn(
        "noisy-reader",
        Cursor::new(stream.into_bytes()),
        queue.clone(),
        bus,
        reader_config(3),
    )
    .expect("Failed to spawn reader");
    assert_eq!(reader.join(Duration::from_secs(5)), Some(ReaderExit::EndOfStream));

    let mut reported = 0;
    let mut suppressed = 0;
    while let Ok(event) = rx.try_recv() {
        match event {
            PipelineEvent::ParseFailure { .. } => reported += 1,
            PipelineEvent::ParseFailuresSuppressed { reported } => {
                assert_eq!(reported, 3);
                suppressed += 1;
            }
            _ => {}
        }
    }
    assert_eq!(reported, 3);
    assert_eq!(suppressed, 1);
    assert_eq!(reader.stats().parse_failures, 25);

    let sample = queue.pop_if_available().expect("sample after the noise");
    assert_eq!(sample.sequence, 7);
    assert_eq!(sample.diameter, 18.25);
}

#[test]
fn test_invalid_utf8_does_not_stop_the_reader() {
    let mut bytes = b"\xff\xfe broken\n".to_vec();
    bytes.extend_from_slice("序号4,直径17.10\n".as_bytes());

    let queue = IngestionQueue::new();
    let mut reader = StreamReader::spawn(
        "lossy-reader",
        Cursor::new(bytes),
        queue.clone(),
        EventBus::new(16),
        reader_config(10),
    )
    .expect("Failed to spawn reader");
    assert_eq!(reader.join(Duration::from_secs(5)), Some(ReaderExit::EndOfStream));
    assert_eq!(reader.stats().parse_failures, 1);
    assert_eq!(queue.len(), 1);
}

#[test]
fn test_default_configuration_reads_gbk_output() {
    let mut bytes = Vec::new();
    for line in ["序号0,直径17.70\n", "序号1,直径17.72\n", "No: 2, Diameter: 17.74\n"] {
        let (encoded, _, unmappable) = encoding_rs::GBK.encode(line);
        assert!(!unmappable);
        bytes.extend_from_slice(&encoded);
    }

    let config = StreamReaderConfig::from_config(&PipelineConfig::default())
        .expect("default configuration is valid");
    let queue = IngestionQueue::new();
    let (sink, received) = collecting_sink();
    let mut drainer = RateLimitedDrainer::spawn(queue.clone(), sink, Duration::from_millis(1))
        .expect("Failed to spawn drainer");
    let mut reader = StreamReader::spawn(
        "gbk-reader",
        Cursor::new(bytes),
        queue.clone(),
        EventBus::new(16),
        config,
    )
    .expect("Failed to spawn reader");

    assert_eq!(reader.join(Duration::from_secs(5)), Some(ReaderExit::EndOfStream));
    assert_eq!(reader.stats().parse_failures, 0);
    assert_eq!(drainer.finish(Duration::from_secs(5)), 3);

    let pairs: Vec<(u64, f64)> = received
        .lock()
        .iter()
        .map(|s| (s.sequence, s.diameter))
        .collect();
    assert_eq!(pairs, vec![(0, 17.70), (1, 17.72), (2, 17.74)]);
}
