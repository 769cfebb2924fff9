//! Off-thread execution of the quantization pipeline.
//!
//! A dispatcher thread owns a FIFO queue of jobs and hands them, one at a
//! time, to an [`ExecutionChannel`]. Results come back in submission order.
//! A job that does not answer within the configured timeout is failed, its
//! [`CancelToken`] is set so the worker stops at its next check, and the next
//! job is started once the worker has wound down. If the channel itself
//! breaks, the service switches to the in-process fallback for good.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::error::{ChannelError, QuantizeError, ServiceError};
use crate::pipeline::{
    ImageAnalysis, QuantizeRequest, QuantizeResult, analyze_image, analyze_image_cancellable,
    fallback_quantize, quantize_image_cancellable,
};
use crate::sampler::ImageData;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Wall-clock budget for one job, measured from dispatch.
    pub timeout: Duration,
    /// How long a timed-out job's worker gets to acknowledge cancellation
    /// before the next job is started regardless.
    pub cancel_grace: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }
}

impl ServiceConfig {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }
}

/// One unit of work. Owns its copy of the pixel buffer.
#[derive(Debug, Clone)]
pub enum Job {
    Quantize(QuantizeRequest),
    Analyze(ImageData),
}

#[derive(Debug, Clone)]
pub enum JobOutput {
    Quantized(QuantizeResult),
    Analysis(ImageAnalysis),
}

pub type JobResult = Result<JobOutput, QuantizeError>;

impl Job {
    fn kind(&self) -> &'static str {
        match self {
            Job::Quantize(_) => "quantize",
            Job::Analyze(_) => "analyze",
        }
    }

    /// Run the real pipeline on the current thread.
    pub fn run(&self) -> JobResult {
        self.run_until(&CancelToken::new())
    }

    /// Like [`Job::run`], returning [`QuantizeError::Cancelled`] once `cancel` is set.
    pub fn run_until(&self, cancel: &CancelToken) -> JobResult {
        match self {
            Job::Quantize(request) => {
                quantize_image_cancellable(request, cancel).map(JobOutput::Quantized)
            }
            Job::Analyze(image) => analyze_image_cancellable(image, cancel).map(JobOutput::Analysis),
        }
    }

    /// Run the degraded in-process variant.
    pub fn run_fallback(&self) -> JobResult {
        match self {
            Job::Quantize(request) => fallback_quantize(request).map(JobOutput::Quantized),
            Job::Analyze(image) => analyze_image(image).map(JobOutput::Analysis),
        }
    }
}

impl TryFrom<JobOutput> for QuantizeResult {
    type Error = ServiceError;

    fn try_from(output: JobOutput) -> Result<Self, Self::Error> {
        match output {
            JobOutput::Quantized(result) => Ok(result),
            JobOutput::Analysis(_) => Err(ServiceError::UnexpectedOutput),
        }
    }
}

impl TryFrom<JobOutput> for ImageAnalysis {
    type Error = ServiceError;

    fn try_from(output: JobOutput) -> Result<Self, Self::Error> {
        match output {
            JobOutput::Analysis(analysis) => Ok(analysis),
            JobOutput::Quantized(_) => Err(ServiceError::UnexpectedOutput),
        }
    }
}

/// The isolation boundary jobs are executed behind.
///
/// `dispatch` starts a job and returns the receiving end of its reply. An
/// `Err` from `dispatch`, or a reply channel that disconnects without a
/// value, counts as a channel failure. The service sets `cancel` when the
/// job times out; a channel should stop the job as soon as it can and may
/// reply with [`QuantizeError::Cancelled`].
pub trait ExecutionChannel: Send + 'static {
    fn dispatch(
        &mut self,
        job: Job,
        cancel: CancelToken,
    ) -> Result<Receiver<JobResult>, ChannelError>;
}

/// Runs every job on a fresh OS thread.
#[derive(Debug, Default)]
pub struct ThreadChannel {
    spawned: u64,
    live: Arc<AtomicUsize>,
}

impl ThreadChannel {
    /// Counter of worker threads that are still running a job.
    pub fn live_workers(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.live)
    }
}

/// Decrements the live-worker count when the worker leaves, panics included.
struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ExecutionChannel for ThreadChannel {
    fn dispatch(
        &mut self,
        job: Job,
        cancel: CancelToken,
    ) -> Result<Receiver<JobResult>, ChannelError> {
        let (tx, rx) = mpsc::channel();
        self.spawned += 1;
        self.live.fetch_add(1, Ordering::SeqCst);
        let guard = LiveGuard(Arc::clone(&self.live));
        thread::Builder::new()
            .name(format!("quantize-worker-{}", self.spawned))
            .spawn(move || {
                let result = job.run_until(&cancel);
                // Count the worker as gone before anyone can observe its reply.
                drop(guard);
                let _ = tx.send(result);
            })
            .map_err(|e| ChannelError::Spawn(e.to_string()))?;
        Ok(rx)
    }
}

struct Ticket {
    id: u64,
    job: Job,
    reply: Sender<Result<JobOutput, ServiceError>>,
}

#[derive(Default)]
struct Shared {
    degraded: AtomicBool,
    pending: AtomicUsize,
}

/// Handle to a submitted job.
pub struct Pending<T> {
    id: u64,
    rx: Receiver<Result<JobOutput, ServiceError>>,
    _output: PhantomData<fn() -> T>,
}

impl<T> Pending<T>
where
    T: TryFrom<JobOutput, Error = ServiceError>,
{
    fn new(id: u64, rx: Receiver<Result<JobOutput, ServiceError>>) -> Self {
        Self {
            id,
            rx,
            _output: PhantomData,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Block until the job has completed, failed or timed out.
    pub fn wait(self) -> Result<T, ServiceError> {
        let output = self.rx.recv().map_err(|_| ServiceError::ServiceStopped)??;
        T::try_from(output)
    }
}

pub struct QuantizationService {
    /// `None` when no dispatcher thread could be started; jobs then run inline.
    queue: Option<Sender<Ticket>>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
}

impl Default for QuantizationService {
    fn default() -> Self {
        Self::new(ServiceConfig::default())
    }
}

impl QuantizationService {
    /// Service backed by [`ThreadChannel`].
    pub fn new(config: ServiceConfig) -> Self {
        Self::with_channel(ThreadChannel::default(), config)
    }

    pub fn with_channel<C: ExecutionChannel>(channel: C, config: ServiceConfig) -> Self {
        let shared = Arc::new(Shared::default());
        let (tx, rx) = mpsc::channel::<Ticket>();

        let dispatcher_shared = Arc::clone(&shared);
        let spawned = thread::Builder::new()
            .name("quantize-dispatcher".to_string())
            .spawn(move || dispatch_loop(channel, config, rx, dispatcher_shared));

        let queue = match spawned {
            Ok(_) => Some(tx),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to start dispatcher, running in-process");
                shared.degraded.store(true, Ordering::SeqCst);
                None
            }
        };

        Self {
            queue,
            shared,
            next_id: AtomicU64::new(0),
        }
    }

    /// Queue a quantization run. Invalid input is rejected here and never queued.
    pub fn submit_quantize(
        &self,
        request: QuantizeRequest,
    ) -> Result<Pending<QuantizeResult>, ServiceError> {
        request.validate()?;
        Ok(self.submit(Job::Quantize(request)))
    }

    pub fn submit_analyze(&self, image: ImageData) -> Result<Pending<ImageAnalysis>, ServiceError> {
        image.validate()?;
        Ok(self.submit(Job::Analyze(image)))
    }

    pub fn quantize_image(&self, request: QuantizeRequest) -> Result<QuantizeResult, ServiceError> {
        self.submit_quantize(request)?.wait()
    }

    pub fn analyze_image(&self, image: ImageData) -> Result<ImageAnalysis, ServiceError> {
        self.submit_analyze(image)?.wait()
    }

    /// Whether the execution channel has failed and the fallback is in use.
    pub fn is_degraded(&self) -> bool {
        self.shared.degraded.load(Ordering::SeqCst)
    }

    /// Jobs submitted but not yet answered, including the one running.
    pub fn pending_jobs(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    fn submit<T>(&self, job: Job) -> Pending<T>
    where
        T: TryFrom<JobOutput, Error = ServiceError>,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (reply, rx) = mpsc::channel();

        let Some(queue) = &self.queue else {
            let _ = reply.send(job.run_fallback().map_err(ServiceError::from));
            return Pending::new(id, rx);
        };

        tracing::debug!(job = id, kind = job.kind(), "Job queued");
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if let Err(mpsc::SendError(ticket)) = queue.send(Ticket { id, job, reply }) {
            // Dispatcher is gone; answer inline so the caller is never left hanging.
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            self.shared.degraded.store(true, Ordering::SeqCst);
            let _ = ticket
                .reply
                .send(ticket.job.run_fallback().map_err(ServiceError::from));
        }
        Pending::new(id, rx)
    }
}

fn dispatch_loop<C: ExecutionChannel>(
    mut channel: C,
    config: ServiceConfig,
    queue: Receiver<Ticket>,
    shared: Arc<Shared>,
) {
    for Ticket { id, job, reply } in queue {
        let outcome = if shared.degraded.load(Ordering::SeqCst) {
            job.run_fallback().map_err(ServiceError::from)
        } else {
            run_isolated(&mut channel, id, job, &config, &shared)
        };
        shared.pending.fetch_sub(1, Ordering::SeqCst);
        // The caller may have dropped its handle.
        let _ = reply.send(outcome);
    }
    tracing::debug!("Quantization queue closed");
}

fn run_isolated<C: ExecutionChannel>(
    channel: &mut C,
    id: u64,
    job: Job,
    config: &ServiceConfig,
    shared: &Shared,
) -> Result<JobOutput, ServiceError> {
    let started = Instant::now();
    let timeout = config.timeout;
    tracing::debug!(job = id, kind = job.kind(), "Job running");

    let cancel = CancelToken::new();
    let rx = match channel.dispatch(job.clone(), cancel.clone()) {
        Ok(rx) => rx,
        Err(e) => return degrade(shared, id, &job, e),
    };

    match rx.recv_timeout(timeout) {
        Ok(Ok(output)) => {
            tracing::debug!(job = id, elapsed_ms = started.elapsed().as_millis() as u64, "Job completed");
            Ok(output)
        }
        Ok(Err(e)) => {
            tracing::debug!(job = id, error = %e, "Job failed");
            Err(e.into())
        }
        Err(RecvTimeoutError::Timeout) => {
            tracing::warn!(job = id, timeout_ms = timeout.as_millis() as u64, "Job timed out");
            cancel.cancel();
            // Whatever the worker still sends is discarded; this only keeps
            // the next job from overlapping with it.
            if let Err(RecvTimeoutError::Timeout) = rx.recv_timeout(config.cancel_grace) {
                tracing::warn!(
                    job = id,
                    grace_ms = config.cancel_grace.as_millis() as u64,
                    "Timed-out worker did not stop, starting next job anyway"
                );
            }
            Err(ServiceError::TimedOut(timeout))
        }
        Err(RecvTimeoutError::Disconnected) => degrade(shared, id, &job, ChannelError::Disconnected),
    }
}

/// Switch permanently to the fallback and retry `job` with it.
fn degrade(shared: &Shared, id: u64, job: &Job, error: ChannelError) -> Result<JobOutput, ServiceError> {
    shared.degraded.store(true, Ordering::SeqCst);
    tracing::warn!(job = id, error = %error, "Execution channel failed, using in-process fallback");
    job.run_fallback().map_err(ServiceError::from)
}
