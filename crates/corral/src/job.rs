use core::fmt;

/// A unit of work executed by the pool.
///
/// A `Job` owns everything it needs: context is moved into the closure when
/// the job is built, so nothing is shared with the submitting loop.
///
/// ```
/// use corral::Job;
///
/// let jobs: Vec<Job> = (0..4)
///     .map(|i| Job::new(move || println!("job {i}")))
///     .collect();
/// assert_eq!(jobs.len(), 4);
/// ```
pub struct Job(Box<dyn FnOnce() + Send + 'static>);

impl Job {
    /// Wraps a closure as a job.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self(Box::new(f))
    }

    /// Runs the job to completion on the current thread.
    pub fn run(self) {
        (self.0)();
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Job")
    }
}
