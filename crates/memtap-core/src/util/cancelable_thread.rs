use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
};

/// A thread handle that can be signaled to stop.
///
/// Wraps a join handle with a cancellation flag that the thread
/// polls to determine when to exit.
pub struct CancelableJoinHandle<T> {
    handle: thread::JoinHandle<T>,
    running: Arc<AtomicBool>,
}

/// Spawns a named, cancelable thread that can be joined later.
///
/// The thread is passed an `Arc<AtomicBool>` that it polls to check whether it should
/// keep running. The thread is requested to stop when the flag is set to `false`.
///
/// # Errors
///
/// Returns the OS error if the thread could not be created.
pub fn spawn_cancelable<T: Send + 'static>(
    name: &str,
    func: impl FnOnce(Arc<AtomicBool>) -> T + Send + 'static,
) -> io::Result<CancelableJoinHandle<T>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    let handle = thread::Builder::new()
        .name(name.to_owned())
        .spawn(move || func(flag))?;
    Ok(CancelableJoinHandle { handle, running })
}

impl<T> CancelableJoinHandle<T> {
    /// Checks if the thread has not been signaled to stop.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Checks if the thread function has returned.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signals the thread to stop without waiting for it.
    pub fn cancel(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Signals the thread to stop and waits for it to finish.
    ///
    /// # Errors
    ///
    /// Returns error if thread panicked
    pub fn join(self) -> thread::Result<T> {
        self.cancel();
        self.handle.join()
    }
}
