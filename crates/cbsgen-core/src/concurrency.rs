use crate::CoreError;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Exclusive lock on a build output directory.
pub struct OutputLock {
    lock_file: File,
}

impl OutputLock {
    fn open(lock_path: &Path) -> Result<File, CoreError> {
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(lock_path)?)
    }

    pub fn acquire(lock_path: &Path) -> Result<Self, CoreError> {
        let file = Self::open(lock_path)?;
        file.lock_exclusive()
            .map_err(|e| CoreError::Io(io::Error::new(io::ErrorKind::WouldBlock, e)))?;
        Ok(Self { lock_file: file })
    }

    pub fn try_acquire(lock_path: &Path) -> Result<Option<Self>, CoreError> {
        let file = Self::open(lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self { lock_file: file })),
            Err(_) => Ok(None),
        }
    }
}

impl Drop for OutputLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
    }
}

/// Shared cancellation flag, checked by workers before each unit.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// First ctrl-c cancels `token`; a second one exits immediately.
pub fn install_signal_handler(token: CancelToken) {
    let _ = ctrlc::set_handler(move || {
        if token.is_cancelled() {
            std::process::exit(1);
        }
        token.cancel();
        eprintln!("\ncancellation requested, finishing current units...");
    });
}

pub type ProgressFn = dyn Fn(usize, usize) + Send + Sync;

/// Completed-unit counter. Workers only ever increment it; the callback is
/// the single consumer.
pub struct Progress {
    completed: AtomicUsize,
    total: usize,
    callback: Option<Arc<ProgressFn>>,
}

impl Progress {
    pub fn new(total: usize, callback: Option<Arc<ProgressFn>>) -> Self {
        Self {
            completed: AtomicUsize::new(0),
            total,
            callback,
        }
    }

    pub fn silent(total: usize) -> Self {
        Self::new(total, None)
    }

    pub fn tick(&self) {
        let done = self.completed.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(cb) = &self.callback {
            cb(done, self.total);
        }
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

/// Run `f` over `items` on up to `jobs` scoped worker threads.
///
/// Results come back tagged with their item index, in completion order.
/// Once `cancel` is set no new unit starts; units already running finish.
pub fn run_units<T, R, F>(
    items: &[T],
    jobs: usize,
    cancel: &CancelToken,
    progress: &Progress,
    f: F,
) -> Vec<(usize, R)>
where
    T: Sync,
    R: Send,
    F: Fn(usize, &T) -> R + Sync,
{
    let next = AtomicUsize::new(0);
    let results = Mutex::new(Vec::with_capacity(items.len()));
    let workers = jobs.max(1).min(items.len());

    std::thread::scope(|scope| {
        for _ in 0..workers {
            scope.spawn(|| loop {
                if cancel.is_cancelled() {
                    break;
                }
                let index = next.fetch_add(1, Ordering::SeqCst);
                let Some(item) = items.get(index) else {
                    break;
                };
                let result = f(index, item);
                results
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push((index, result));
                progress.tick();
            });
        }
    });

    results.into_inner().unwrap_or_else(PoisonError::into_inner)
}

/// Point in time after which a unit counts as failed.
#[derive(Debug, Clone, Copy)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn after(timeout: Option<Duration>) -> Self {
        Self(timeout.map(|t| Instant::now() + t))
    }

    pub fn none() -> Self {
        Self(None)
    }

    pub fn expired(&self) -> bool {
        self.0.is_some_and(|d| Instant::now() >= d)
    }

    /// `TimedOut` once expired. Cancellation is reported as a plain error,
    /// never `Interrupted`, which `read_to_end` would retry.
    pub fn check(&self, cancel: &CancelToken) -> io::Result<()> {
        if cancel.is_cancelled() {
            return Err(io::Error::other("cancelled"));
        }
        if self.expired() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "unit timed out"));
        }
        Ok(())
    }
}

/// Reader that fails once its deadline passes or the token is cancelled.
pub struct DeadlineReader<R> {
    inner: R,
    deadline: Deadline,
    cancel: CancelToken,
}

impl<R: Read> DeadlineReader<R> {
    pub fn new(inner: R, deadline: Deadline, cancel: CancelToken) -> Self {
        Self {
            inner,
            deadline,
            cancel,
        }
    }
}

impl<R: Read> Read for DeadlineReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.deadline.check(&self.cancel)?;
        self.inner.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join("out/.cbsgen.lock");
        {
            let _lock = OutputLock::acquire(&lock_path).unwrap();
            assert!(lock_path.exists());
        }
        assert!(OutputLock::try_acquire(&lock_path).unwrap().is_some());
    }

    #[test]
    fn try_acquire_returns_none_when_held() {
        let dir = tempfile::tempdir().unwrap();
        let lock_path = dir.path().join(".cbsgen.lock");
        let _lock = OutputLock::acquire(&lock_path).unwrap();
        assert!(OutputLock::try_acquire(&lock_path).unwrap().is_none());
    }

    #[test]
    fn run_units_processes_every_item_once() {
        let items: Vec<u32> = (0..100).collect();
        let progress = Progress::silent(items.len());
        let mut results = run_units(&items, 8, &CancelToken::new(), &progress, |_, v| v * 2);
        results.sort_by_key(|(i, _)| *i);
        assert_eq!(results.len(), 100);
        assert!(results.iter().all(|(i, r)| *r == items[*i] * 2));
        assert_eq!(progress.completed(), 100);
    }

    #[test]
    fn run_units_handles_empty_input() {
        let items: Vec<u32> = Vec::new();
        let progress = Progress::silent(0);
        assert!(run_units(&items, 4, &CancelToken::new(), &progress, |_, v| *v).is_empty());
    }

    #[test]
    fn cancelled_token_stops_new_units() {
        let items: Vec<u32> = (0..10).collect();
        let cancel = CancelToken::new();
        cancel.cancel();
        let progress = Progress::silent(items.len());
        assert!(run_units(&items, 2, &cancel, &progress, |_, v| *v).is_empty());
    }

    #[test]
    fn progress_callback_sees_every_tick() {
        let seen = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&seen);
        let callback: Arc<ProgressFn> = Arc::new(move |done, total| {
            assert!(done <= total);
            sink.fetch_max(done, Ordering::SeqCst);
        });
        let progress = Progress::new(5, Some(callback));
        let items = [1, 2, 3, 4, 5];
        run_units(&items, 3, &CancelToken::new(), &progress, |_, v| *v);
        assert_eq!(seen.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn deadline_reader_times_out() {
        let deadline = Deadline::after(Some(Duration::ZERO));
        let mut reader = DeadlineReader::new(&b"data"[..], deadline, CancelToken::new());
        let err = reader.read(&mut [0u8; 4]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn deadline_reader_reports_cancellation() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let mut reader = DeadlineReader::new(&b"data"[..], Deadline::none(), cancel);
        let mut out = Vec::new();
        let err = reader.read_to_end(&mut out).unwrap_err();
        assert_eq!(err.to_string(), "cancelled");
    }

    #[test]
    fn no_deadline_reads_through() {
        let mut reader = DeadlineReader::new(&b"data"[..], Deadline::none(), CancelToken::new());
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "data");
    }
}
