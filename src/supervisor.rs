use crate::error::JobError;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Run a job, turning a panic into a `JobError::Panicked` instead of tearing down the
/// whole process
pub fn guarded<T>(name: &str, job: impl FnOnce() -> Result<T, JobError>) -> Result<T, JobError> {
    match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(result) => result,
        Err(payload) => {
            let msg = panic_message(payload.as_ref());
            log::error!("Job {name} panicked: {msg}");
            Err(JobError::Panicked(msg))
        }
    }
}

/// Run a guarded job on its own named thread
pub fn spawn<T, F>(name: &str, job: F) -> std::io::Result<JoinHandle<Result<T, JobError>>>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, JobError> + Send + 'static,
{
    let thread_name = name.to_string();
    let builder = thread::Builder::new().name(name.into());
    builder.spawn(move || guarded(&thread_name, job))
}
