use crossbeam::channel::{self, RecvTimeoutError, Sender};

use crate::{Error, Result};

/// A background thread running a cycle every `interval`.
///
/// The worker owns its state `S` and hands it back on [`PeriodicTask::stop`], so a
/// counter source can be reused across start/stop rounds. The interval is
/// measured from the end of a cycle: a slow cycle delays the next one, it is
/// never cut short.
pub struct PeriodicTask<S> {
    name: String,
    stop_tx: Option<Sender<()>>,
    handle: Option<std::thread::JoinHandle<S>>,
}

impl<S: Send + 'static> PeriodicTask<S> {
    pub fn spawn<F>(name: &str, interval: std::time::Duration, mut state: S, mut cycle: F) -> Result<Self>
    where
        F: FnMut(&mut S) + Send + 'static,
    {
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);

        let handle = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                loop {
                    cycle(&mut state);
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                state
            })?;

        log::debug!("{} started, interval: {:?}", name, interval);
        Ok(PeriodicTask {
            name: name.to_owned(),
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Ask the worker to exit and wait for it. Returns the worker state the
    /// first time, `Ok(None)` afterwards.
    pub fn stop(&mut self) -> Result<Option<S>> {
        if let Some(tx) = self.stop_tx.take() {
            // the worker may be gone already; dropping `tx` disconnects it anyway
            let _ = tx.try_send(());
        }

        match self.handle.take() {
            Some(handle) => match handle.join() {
                Ok(state) => {
                    log::debug!("{} stopped", self.name);
                    Ok(Some(state))
                }
                Err(_) => {
                    log::error!("{} panicked", self.name);
                    Err(Error::Join(format!("{} panicked", self.name)))
                }
            },
            None => Ok(None),
        }
    }
}

impl<S> Drop for PeriodicTask<S> {
    fn drop(&mut self) {
        // dropping the sender disconnects the channel, which ends the loop
        self.stop_tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("{} panicked", self.name);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering::SeqCst};
    use std::sync::Arc;

    #[test]
    fn runs_until_stopped_and_returns_state() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&ticks);
        let mut task = PeriodicTask::spawn(
            "test-ticker",
            std::time::Duration::from_millis(5),
            0usize,
            move |n| {
                *n += 1;
                observed.fetch_add(1, SeqCst);
            },
        )
        .unwrap();

        while ticks.load(SeqCst) < 3 {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert!(task.is_running());

        let state = task.stop().unwrap().unwrap();
        let after_stop = ticks.load(SeqCst);
        assert_eq!(state, after_stop);
        assert!(!task.is_running());

        // idempotent, and no more cycles once stop returned
        assert!(task.stop().unwrap().is_none());
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert_eq!(ticks.load(SeqCst), after_stop);
    }

    #[test]
    fn panicking_worker_is_reported() {
        let mut task = PeriodicTask::spawn(
            "test-panic",
            std::time::Duration::from_millis(1),
            (),
            |_| panic!("boom"),
        )
        .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(10));
        assert!(matches!(task.stop(), Err(Error::Join(_))));
        assert!(task.stop().unwrap().is_none());
    }
}
