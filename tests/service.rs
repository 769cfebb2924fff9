use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use filament_quantizer::{
    CancelToken, ChannelError, ExecutionChannel, ImageData, Job, JobResult, QuantizationService,
    QuantizeError, QuantizeOptions, QuantizeRequest, ServiceConfig, ServiceError, ThreadChannel,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn striped_image(colors: &[[u8; 3]], stripe: u32) -> ImageData {
    let width = stripe * colors.len() as u32;
    let height = 4;
    let mut data = Vec::new();
    for _ in 0..height {
        for c in colors {
            for _ in 0..stripe {
                data.extend_from_slice(&[c[0], c[1], c[2], 255]);
            }
        }
    }
    ImageData::new(data, width, height).unwrap()
}

fn request(max_colors: usize) -> QuantizeRequest {
    let image = striped_image(&[[255, 0, 0], [0, 255, 0], [0, 0, 255], [20, 20, 20]], 5);
    QuantizeRequest::new(
        image,
        QuantizeOptions {
            max_colors,
            seed: Some(3),
            ..Default::default()
        },
    )
}

fn noise_image(size: u32) -> ImageData {
    let mut rng = StdRng::seed_from_u64(7);
    let mut data = Vec::with_capacity((size * size * 4) as usize);
    for _ in 0..size * size {
        data.extend_from_slice(&[rng.random(), rng.random(), rng.random(), 255]);
    }
    ImageData::new(data, size, size).unwrap()
}

fn config(timeout_ms: u64) -> ServiceConfig {
    ServiceConfig {
        timeout: Duration::from_millis(timeout_ms),
        cancel_grace: Duration::from_millis(50),
    }
}

/// Runs jobs on threads and records when each one starts and ends.
struct RecordingChannel {
    events: Arc<Mutex<Vec<String>>>,
    dispatched: usize,
}

impl ExecutionChannel for RecordingChannel {
    fn dispatch(&mut self, job: Job, cancel: CancelToken) -> Result<Receiver<JobResult>, ChannelError> {
        let n = self.dispatched;
        self.dispatched += 1;
        let events = Arc::clone(&self.events);
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            events.lock().unwrap().push(format!("start {n}"));
            // The first job is the slowest, so any overlap would show up.
            thread::sleep(Duration::from_millis(if n == 0 { 150 } else { 10 }));
            let result = job.run_until(&cancel);
            events.lock().unwrap().push(format!("end {n}"));
            let _ = tx.send(result);
        });
        Ok(rx)
    }
}

/// Never answers the first job, then behaves like a normal thread channel.
struct StallFirstChannel {
    stalled: Vec<Sender<JobResult>>,
    inner: ThreadChannel,
}

impl ExecutionChannel for StallFirstChannel {
    fn dispatch(&mut self, job: Job, cancel: CancelToken) -> Result<Receiver<JobResult>, ChannelError> {
        if self.stalled.is_empty() {
            let (tx, rx) = mpsc::channel();
            self.stalled.push(tx);
            return Ok(rx);
        }
        self.inner.dispatch(job, cancel)
    }
}

/// Fails to start, counting how often it is asked to.
struct BrokenChannel {
    attempts: Arc<AtomicUsize>,
}

impl ExecutionChannel for BrokenChannel {
    fn dispatch(&mut self, _job: Job, _cancel: CancelToken) -> Result<Receiver<JobResult>, ChannelError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(ChannelError::Spawn("no threads available".into()))
    }
}

/// Starts, then drops the reply channel without answering.
struct DyingChannel;

impl ExecutionChannel for DyingChannel {
    fn dispatch(&mut self, _job: Job, _cancel: CancelToken) -> Result<Receiver<JobResult>, ChannelError> {
        let (tx, rx) = mpsc::channel::<JobResult>();
        thread::spawn(move || drop(tx));
        Ok(rx)
    }
}

#[test]
fn concurrent_submissions_run_in_fifo_order() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let service = QuantizationService::with_channel(
        RecordingChannel {
            events: Arc::clone(&events),
            dispatched: 0,
        },
        config(5_000),
    );

    let first = service.submit_quantize(request(4)).unwrap();
    let second = service.submit_quantize(request(2)).unwrap();
    assert!(first.id() < second.id());

    // Wait on the second one first: it still only starts after the first ends.
    let second = second.wait().unwrap();
    let first = first.wait().unwrap();

    assert_eq!(first.final_color_count, 4);
    assert!(second.final_color_count <= 2);
    assert_eq!(
        *events.lock().unwrap(),
        vec!["start 0", "end 0", "start 1", "end 1"]
    );
}

#[test]
fn timeout_fails_request_and_promotes_next() {
    let service = QuantizationService::with_channel(
        StallFirstChannel {
            stalled: Vec::new(),
            inner: ThreadChannel::default(),
        },
        config(100),
    );

    let stuck = service.submit_quantize(request(4)).unwrap();
    let next = service.submit_quantize(request(4)).unwrap();

    assert_eq!(
        stuck.wait().unwrap_err(),
        ServiceError::TimedOut(Duration::from_millis(100))
    );
    let result = next.wait().unwrap();
    assert_eq!(result.final_color_count, 4);
    assert!(!service.is_degraded());
}

#[test]
fn timed_out_workers_stop_before_next_job() {
    let channel = ThreadChannel::default();
    let live = channel.live_workers();
    let service = QuantizationService::with_channel(
        channel,
        ServiceConfig {
            timeout: Duration::from_millis(20),
            cancel_grace: Duration::from_secs(10),
        },
    );
    let heavy = QuantizeRequest::new(
        noise_image(400),
        QuantizeOptions {
            max_colors: 256,
            seed: Some(1),
            ..Default::default()
        },
    );

    let started = Instant::now();
    let jobs: Vec<_> = (0..4)
        .map(|_| service.submit_quantize(heavy.clone()).unwrap())
        .collect();
    for job in jobs {
        assert!(matches!(job.wait(), Err(ServiceError::TimedOut(_))));
        // At most the next job's worker may be running by now.
        assert!(live.load(Ordering::SeqCst) <= 1);
    }
    assert_eq!(live.load(Ordering::SeqCst), 0);
    assert!(started.elapsed() < Duration::from_secs(30));
    assert!(!service.is_degraded());
}

#[test]
fn spawn_failure_downgrades_permanently() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let service = QuantizationService::with_channel(
        BrokenChannel {
            attempts: Arc::clone(&attempts),
        },
        config(1_000),
    );

    // The failing request itself is answered by the fallback.
    let result = service.quantize_image(request(2)).unwrap();
    assert!(service.is_degraded());
    let counts: Vec<usize> = result.regions.iter().map(|r| r.pixel_count).collect();
    assert_eq!(counts, vec![40, 40]);

    let again = service.quantize_image(request(4)).unwrap();
    assert_eq!(again.regions.len(), 4);
    assert_eq!(attempts.load(Ordering::SeqCst), 1, "channel must not be retried");
}

#[test]
fn worker_death_downgrades() {
    let service = QuantizationService::with_channel(DyingChannel, config(1_000));
    let result = service.quantize_image(request(4)).unwrap();
    assert!(service.is_degraded());
    let total: usize = result.regions.iter().map(|r| r.pixel_count).sum();
    assert_eq!(total, 80);

    let analysis = service.analyze_image(request(4).image_data).unwrap();
    assert_eq!(analysis.unique_colors, 4);
}

#[test]
fn invalid_input_never_reaches_channel() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let service = QuantizationService::with_channel(
        BrokenChannel {
            attempts: Arc::clone(&attempts),
        },
        config(1_000),
    );

    let empty = QuantizeRequest::new(
        ImageData {
            data: Vec::new(),
            width: 0,
            height: 0,
        },
        QuantizeOptions::default(),
    );
    assert!(matches!(
        service.submit_quantize(empty),
        Err(ServiceError::Input(QuantizeError::EmptyImage))
    ));
    assert!(matches!(
        service.quantize_image(request(0)),
        Err(ServiceError::Input(QuantizeError::InvalidMaxColors(0)))
    ));
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
    assert!(!service.is_degraded());
}

#[test]
fn unknown_algorithm_is_rejected_before_submission() {
    let err = "octree".parse::<filament_quantizer::Algorithm>().unwrap_err();
    assert_eq!(err, QuantizeError::UnknownAlgorithm("octree".into()));
}

#[test]
fn analyze_through_thread_channel() {
    let service = QuantizationService::default();
    let analysis = service.analyze_image(request(4).image_data).unwrap();
    assert_eq!(analysis.total_pixels, 80);
    assert_eq!(analysis.opaque_pixels, 80);
    assert_eq!(analysis.dominant_colors.len(), 4);
    assert!(analysis.dominant_colors.iter().all(|c| c.percentage == 25.0));
}
