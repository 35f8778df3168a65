//! Integration tests for extio-stream.
//!
//! All tests run against `MockDriver`; no radio is required.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use extio_stream::driver::{EntryPoint, HwStatus, MockDriver};
use extio_stream::{
    CallbackDispatcher, CaptureConfig, CaptureError, ChannelSink, Dispatch, DriverError, FileSink,
    FormatSet, IqBlock, IqCapture, SampleFormat, Sink, SinkError, StreamEvent, StreamState,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn fast_config() -> CaptureConfig {
    CaptureConfig {
        poll_interval: Duration::from_millis(1),
        ..Default::default()
    }
}

/// A test sink that counts writes.
struct CountingSink {
    count: AtomicUsize,
}

#[async_trait]
impl Sink for CountingSink {
    fn name(&self) -> &str {
        "counting"
    }

    async fn write(&self, _block: &IqBlock) -> Result<(), SinkError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Producer on a real thread, consumer on this one; every read must be a
/// complete burst in storage order.
#[test]
fn test_threaded_ring_never_reads_torn_slots() {
    const PAIRS: i32 = 64;
    const BURSTS: u32 = 20_000;

    let stream = Arc::new(StreamState::new(SampleFormat::I16));
    let mut dispatcher = CallbackDispatcher::new(&stream).unwrap();
    stream
        .configure(FormatSet::single(SampleFormat::I16), PAIRS, 8)
        .unwrap();
    stream.set_enabled(true).unwrap();
    let mut consumer = stream.take_consumer().unwrap();
    let burst_len = stream.bytes_per_burst();

    let producer = std::thread::spawn(move || {
        let mut stored = 0u64;
        for n in 0..BURSTS {
            let mut burst = vec![n as u8; burst_len];
            burst[..4].copy_from_slice(&n.to_le_bytes());
            if matches!(dispatcher.dispatch(PAIRS, 0, 0.0, &burst), Dispatch::Stored { .. }) {
                stored += 1;
            }
            if n % 64 == 0 {
                std::thread::yield_now();
            }
        }
        stored
    });

    let mut read = 0u64;
    let mut last_counter: Option<u32> = None;
    let mut reader = |consumer: &mut extio_stream::SlotConsumer| {
        consumer.try_read(|slot| {
            assert_eq!(slot.data.len(), burst_len);
            assert_eq!(slot.sequence, read);
            let counter = u32::from_le_bytes(slot.data[..4].try_into().unwrap());
            assert!(slot.data[4..].iter().all(|b| *b == counter as u8));
            if let Some(last) = last_counter {
                assert!(counter > last, "burst {counter} read after {last}");
            }
            last_counter = Some(counter);
            read += 1;
        })
    };

    while !producer.is_finished() {
        if reader(&mut consumer).is_none() {
            std::thread::yield_now();
        }
    }
    let stored = producer.join().unwrap();
    while reader(&mut consumer).is_some() {}

    let metrics = stream.snapshot_metrics();
    assert_eq!(read, stored);
    assert_eq!(metrics.data_events, u64::from(BURSTS));
    assert_eq!(stored + metrics.overruns, u64::from(BURSTS));
}

#[test]
fn test_four_slot_round_trip() {
    let stream = Arc::new(StreamState::new(SampleFormat::I16));
    let mut dispatcher = CallbackDispatcher::new(&stream).unwrap();
    stream
        .configure(FormatSet::single(SampleFormat::I16), 4, 4)
        .unwrap();
    stream.set_enabled(true).unwrap();
    let mut consumer = stream.take_consumer().unwrap();

    for fill in 1..=4u8 {
        assert!(matches!(
            dispatcher.dispatch(4, 0, 0.0, &[fill; 16]),
            Dispatch::Stored { .. }
        ));
    }
    assert!(stream.is_full());

    let blocks = consumer.drain();
    assert_eq!(blocks.len(), 4);
    for (i, block) in blocks.iter().enumerate() {
        assert_eq!(block.sequence, i as u64);
        assert_eq!(*block.data, vec![i as u8 + 1; 16]);
    }
    assert_eq!(stream.snapshot_metrics().overruns, 0);
    assert!(stream.is_empty());
}

/// 512 pairs of I16 into 8 slots, reading one burst for every two stored.
#[test]
fn test_slow_consumer_overruns() {
    let stream = Arc::new(StreamState::new(SampleFormat::I16));
    let mut dispatcher = CallbackDispatcher::new(&stream).unwrap();
    stream
        .configure(FormatSet::single(SampleFormat::I16), 512, 8)
        .unwrap();
    stream.set_enabled(true).unwrap();
    let mut consumer = stream.take_consumer().unwrap();
    assert_eq!(stream.bytes_per_burst(), 2048);

    let mut blocks = Vec::new();
    for n in 0..20u8 {
        dispatcher.dispatch(512, 0, 0.0, &[n; 2048]);
        if n % 2 == 1 {
            blocks.extend(consumer.try_pop());
        }
    }
    blocks.extend(consumer.drain());

    let metrics = stream.snapshot_metrics();
    assert_eq!(metrics.overruns, 3);
    assert_eq!(metrics.data_events, 20);
    assert_eq!(blocks.len(), 17);
    assert!(blocks.iter().all(|b| b.data.len() == 2048));
    let total: usize = blocks.iter().map(|b| b.data.len()).sum();
    assert_eq!(total, 17 * 2048);
}

#[tokio::test]
async fn test_session_records_file_and_channel() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.wav");
    let mock = Arc::new(MockDriver::new(3));
    let (tx, mut rx) = mpsc::channel::<IqBlock>(64);

    let session = IqCapture::builder(mock.clone())
        .lo_frequency(7_100_000)
        .add_sink(FileSink::wav(&path))
        .add_sink(ChannelSink::new(tx))
        .with_config(fast_config())
        .start()
        .await
        .unwrap();

    assert!(mock.is_running());
    assert_eq!(mock.lo_frequency(), 7_100_000);
    assert_eq!(session.stream().sample_rate(), Some(96_000.0));
    assert_eq!(session.stream().pair_count(), 512);

    for fill in 0..10u8 {
        assert!(mock.emit_data(&mock.burst(fill)));
    }
    session.stop().await.unwrap();
    assert!(!mock.is_running());
    assert!(!mock.is_open());

    let mut received = Vec::new();
    while let Ok(block) = rx.try_recv() {
        received.push(block);
    }
    assert_eq!(received.len(), 10);
    for (i, block) in received.iter().enumerate() {
        assert_eq!(block.sequence, i as u64);
        assert_eq!(block.format, SampleFormat::I16);
        assert_eq!(block.pair_count(), 512);
        assert!(block.data.iter().all(|b| *b == i as u8));
    }

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes.len(), 44 + 10 * 2048);
    assert_eq!(&bytes[0..4], b"RIFF");
    assert_eq!(u16::from_le_bytes([bytes[22], bytes[23]]), 2);
    assert_eq!(
        u32::from_le_bytes([bytes[24], bytes[25], bytes[26], bytes[27]]),
        96_000
    );
    assert_eq!(
        u32::from_le_bytes([bytes[40], bytes[41], bytes[42], bytes[43]]),
        10 * 2048
    );
}

#[tokio::test]
async fn test_session_stats_and_shared_sink() {
    init_tracing();
    let mock = Arc::new(MockDriver::new(3).with_pairs(128));
    let counting = Arc::new(CountingSink {
        count: AtomicUsize::new(0),
    });

    let session = IqCapture::builder(mock.clone())
        .lo_frequency(1_000_000)
        .add_shared_sink(counting.clone())
        .with_config(fast_config())
        .start()
        .await
        .unwrap();

    for fill in 0..5u8 {
        mock.emit_data(&mock.burst(fill));
    }
    mock.emit_raw(0, 0, 0.0, &[]);
    mock.emit_control(HwStatus::Overload);

    let stats = session.stats();
    assert_eq!(stats.metrics.data_events, 5);
    assert_eq!(stats.metrics.info_events, 1);
    assert_eq!(stats.metrics.unrecognized_events, 1);
    assert_eq!(stats.metrics.callback_hits, 7);

    let report = session.perf_report();
    assert_eq!(report.bursts, 5);

    session.stop().await.unwrap();
    assert_eq!(counting.count.load(Ordering::SeqCst), 5);
}

#[tokio::test]
async fn test_sample_rate_change_while_streaming() {
    init_tracing();
    let mock = Arc::new(MockDriver::new(3));
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink_events = Arc::clone(&events);
    let (tx, mut rx) = mpsc::channel::<IqBlock>(16);

    let session = IqCapture::builder(mock.clone())
        .lo_frequency(7_100_000)
        .add_sink(ChannelSink::new(tx))
        .on_event(move |e| sink_events.lock().push(e))
        .with_config(fast_config())
        .start()
        .await
        .unwrap();

    mock.emit_data(&mock.burst(1));
    mock.set_active_rate_index(2);
    mock.emit_control(HwStatus::ChangedSampleRate);
    mock.emit_data(&mock.burst(2));

    assert_eq!(session.stream().sample_rate(), Some(192_000.0));
    assert!(events.lock().contains(&StreamEvent::SampleRateChanged {
        previous: Some(96_000.0),
        current: 192_000.0,
    }));

    session.stop().await.unwrap();
    let first = rx.try_recv().unwrap();
    let second = rx.try_recv().unwrap();
    assert_eq!(first.sample_rate, Some(96_000.0));
    assert_eq!(second.sample_rate, Some(192_000.0));
}

#[tokio::test]
async fn test_supported_format_switch_keeps_streaming() {
    init_tracing();
    let mock = Arc::new(MockDriver::new(3).with_pairs(16));
    let (tx, mut rx) = mpsc::channel::<IqBlock>(16);

    let session = IqCapture::builder(mock.clone())
        .lo_frequency(7_100_000)
        .supported_formats([SampleFormat::I16, SampleFormat::F32])
        .add_sink(ChannelSink::new(tx))
        .with_config(fast_config())
        .start()
        .await
        .unwrap();

    mock.emit_control(HwStatus::SampleFormat(SampleFormat::F32));
    mock.emit_data(&mock.burst(0));
    session.stop().await.unwrap();

    let block = rx.try_recv().unwrap();
    assert_eq!(block.format, SampleFormat::F32);
    assert_eq!(block.data.len(), 16 * 8);
}

/// A format switch mid-recording must neither stall the router on retries
/// nor back the slot ring up into overruns.
#[tokio::test]
async fn test_format_switch_rolls_wav_without_stalling() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.wav");
    let mock = Arc::new(MockDriver::new(3).with_pairs(64));
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink_events = Arc::clone(&events);
    let (tx, mut rx) = mpsc::channel::<IqBlock>(128);

    let session = IqCapture::builder(mock.clone())
        .lo_frequency(7_100_000)
        .supported_formats([SampleFormat::I16, SampleFormat::F32])
        .add_sink(FileSink::wav(&path))
        .add_sink(ChannelSink::new(tx))
        .on_event(move |e| sink_events.lock().push(e))
        .with_config(CaptureConfig {
            slot_count: 16,
            block_channel_capacity: 2,
            ..fast_config()
        })
        .start()
        .await
        .unwrap();

    for fill in 0..4u8 {
        mock.emit_data(&mock.burst(fill));
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(mock.emit_control(HwStatus::SampleFormat(SampleFormat::F32)));
    for fill in 0..40u8 {
        mock.emit_data(&mock.burst(fill));
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    let stats = session.stats();
    session.stop().await.unwrap();

    assert_eq!(stats.metrics.overruns, 0);
    assert!(!events.lock().iter().any(|e| matches!(
        e,
        StreamEvent::SinkError { .. } | StreamEvent::SinkDetached { .. }
    )));

    let mut received = Vec::new();
    while let Ok(block) = rx.try_recv() {
        received.push(block);
    }
    assert_eq!(received.len(), 44);
    assert!(received[..4].iter().all(|b| b.format == SampleFormat::I16));
    assert!(received[4..].iter().all(|b| b.format == SampleFormat::F32));

    let header = |bytes: &[u8]| {
        (
            u16::from_le_bytes([bytes[20], bytes[21]]),
            u32::from_le_bytes([bytes[40], bytes[41], bytes[42], bytes[43]]),
        )
    };
    let first = std::fs::read(&path).unwrap();
    assert_eq!(header(&first), (1, 4 * 64 * 4));
    let second = std::fs::read(dir.path().join("capture_1.wav")).unwrap();
    assert_eq!(header(&second), (3, 40 * 64 * 8));
    assert!(!dir.path().join("capture_2.wav").exists());
}

#[tokio::test]
async fn test_unsupported_format_halts_stream() {
    init_tracing();
    let mock = Arc::new(MockDriver::new(3));
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink_events = Arc::clone(&events);
    let (tx, _rx) = mpsc::channel::<IqBlock>(16);

    let session = IqCapture::builder(mock.clone())
        .lo_frequency(7_100_000)
        .add_sink(ChannelSink::new(tx))
        .on_event(move |e| sink_events.lock().push(e))
        .with_config(fast_config())
        .start()
        .await
        .unwrap();

    mock.emit_data(&mock.burst(1));
    mock.emit_control(HwStatus::SampleFormat(SampleFormat::F32));
    mock.emit_data(&mock.burst(2));
    mock.emit_control(HwStatus::SampleFormat(SampleFormat::I24));

    assert!(session.stream().is_halted());
    assert_eq!(session.stats().metrics.data_events, 1);
    assert!(matches!(
        session.check(),
        Err(CaptureError::UnsupportedFormat {
            format: SampleFormat::F32
        })
    ));
    let mismatches = events
        .lock()
        .iter()
        .filter(|e| matches!(e, StreamEvent::FormatMismatch { .. }))
        .count();
    assert_eq!(mismatches, 1);

    let result = session.stop().await;
    assert!(matches!(
        result,
        Err(CaptureError::UnsupportedFormat {
            format: SampleFormat::F32
        })
    ));
    assert!(!mock.is_open());
}

#[tokio::test]
async fn test_open_failure_is_reported() {
    init_tracing();
    let mock = Arc::new(MockDriver::new(3).failing_open());
    let (tx, _rx) = mpsc::channel::<IqBlock>(1);

    let result = IqCapture::builder(mock.clone())
        .lo_frequency(7_100_000)
        .add_sink(ChannelSink::new(tx))
        .start()
        .await;

    assert!(matches!(result, Err(CaptureError::OpenFailed)));
    assert!(!mock.is_running());
}

#[tokio::test]
async fn test_no_sinks_is_rejected() {
    let result = IqCapture::builder(Arc::new(MockDriver::new(3)))
        .lo_frequency(7_100_000)
        .start()
        .await;
    assert!(matches!(result, Err(CaptureError::NoSinksConfigured)));
}

#[tokio::test]
async fn test_audio_hardware_type_is_rejected() {
    let (tx, _rx) = mpsc::channel::<IqBlock>(1);
    let result = IqCapture::builder(Arc::new(MockDriver::new(4)))
        .lo_frequency(7_100_000)
        .add_sink(ChannelSink::new(tx))
        .start()
        .await;
    assert!(matches!(
        result,
        Err(CaptureError::UnsupportedHardwareType { hw_type: 4 })
    ));
}

#[tokio::test]
async fn test_driver_without_rate_entry_points() {
    init_tracing();
    let mock = Arc::new(
        MockDriver::new(3)
            .without(EntryPoint::GetSrates)
            .without(EntryPoint::GetActualSrateIdx)
            .without(EntryPoint::SetSrate),
    );
    let (tx, _rx) = mpsc::channel::<IqBlock>(16);

    let session = IqCapture::builder(mock.clone())
        .lo_frequency(7_100_000)
        .add_sink(ChannelSink::new(tx))
        .with_config(fast_config())
        .start()
        .await
        .unwrap();

    assert_eq!(session.stream().sample_rate(), None);
    assert_eq!(session.stream().expected_interval(), None);
    assert_eq!(
        session.driver().sample_rates().unwrap_err(),
        DriverError::NotSupported {
            entry_point: EntryPoint::GetSrates
        }
    );
    assert_eq!(mock.call_count(EntryPoint::GetSrates), 0);

    // A rate notification cannot be honored, the stream keeps running
    mock.emit_control(HwStatus::ChangedSampleRate);
    assert_eq!(session.stream().sample_rate(), None);
    assert!(session.is_running());

    session.stop().await.unwrap();
}

#[tokio::test]
async fn test_retune_while_streaming() {
    init_tracing();
    let mock = Arc::new(MockDriver::new(3).with_lo_range(100_000, 30_000_000));
    let (tx, _rx) = mpsc::channel::<IqBlock>(16);

    let session = IqCapture::builder(mock.clone())
        .lo_frequency(7_100_000)
        .add_sink(ChannelSink::new(tx))
        .start()
        .await
        .unwrap();

    session.set_lo_frequency(14_200_000).unwrap();
    assert_eq!(mock.lo_frequency(), 14_200_000);
    assert_ne!(
        session.set_lo_frequency(50_000_000).unwrap(),
        extio_stream::driver::LoStatus::Ok
    );

    session.stop().await.unwrap();
}
