use crate::cancel::CancelToken;
use crate::metrics::MetricsSink;

use crossbeam_channel::{bounded, select, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Accumulates the bytes sent by a job and reports them to the sink on a fixed cadence,
/// from its own thread.
///
/// The thread stops when the job is cancelled or when the monitor is stopped or
/// dropped. It flushes one last time before exiting, and it is joined on stop, so it
/// never outlives the job.
pub struct TrafficMonitor {
    bytes_counter: Arc<AtomicU64>,
    sink: Arc<dyn MetricsSink>,
    job_id: String,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

fn flush(bytes_counter: &AtomicU64, sink: &dyn MetricsSink, job_id: &str) {
    let bytes = bytes_counter.swap(0, Ordering::Relaxed);
    log::trace!("Job {job_id}: {bytes} bytes sent since last flush");
    sink.add_traffic(job_id, bytes);
}

impl TrafficMonitor {
    pub fn start(
        sink: Arc<dyn MetricsSink>,
        job_id: String,
        interval: Duration,
        cancel: CancelToken,
    ) -> std::io::Result<Self> {
        let bytes_counter = Arc::new(AtomicU64::new(0));
        let (stop, stopped) = bounded::<()>(0);
        let counter = Arc::clone(&bytes_counter);
        let thread_sink = Arc::clone(&sink);
        let thread_job_id = job_id.clone();
        let builder = thread::Builder::new().name("Traffic-monitor".into());
        let handle = builder.spawn(move || {
            loop {
                select! {
                    recv(cancel.receiver()) -> _ => break,
                    recv(stopped) -> _ => break,
                    default(interval) => flush(&counter, thread_sink.as_ref(), &thread_job_id),
                }
            }
            flush(&counter, thread_sink.as_ref(), &thread_job_id);
        })?;
        Ok(TrafficMonitor {
            bytes_counter,
            sink,
            job_id,
            stop: Some(stop),
            handle: Some(handle),
        })
    }

    pub fn add(&self, bytes: u64) {
        self.bytes_counter.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Stop the flush thread and wait for its final flush
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // disconnecting the channel wakes the thread up
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Traffic monitor thread panicked");
            }
            // bytes added after a cancellation ended the thread
            if self.bytes_counter.load(Ordering::Relaxed) > 0 {
                flush(&self.bytes_counter, self.sink.as_ref(), &self.job_id);
            }
        }
    }
}

impl Drop for TrafficMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
