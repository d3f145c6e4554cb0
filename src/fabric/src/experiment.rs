//! One experiment run: the background components it owns and the report it
//! produces.

use std::sync::atomic::{AtomicBool, Ordering::SeqCst};
use std::sync::Arc;

use crate::fct::FlowCompletionTracker;
use crate::monitor::{LinkMonitor, MonitorStatistics};
use crate::report::{ExperimentMeta, ExperimentReport};
use crate::selector::AdaptiveSelector;
use crate::Result;

/// Shared cancellation flag. Cloned into whatever reacts to an interrupt.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, SeqCst);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(SeqCst)
    }
}

/// Owns the monitor, the adaptive selector and the flow tracker of a run, and
/// stops them exactly once: on [`shutdown`](Self::shutdown), on
/// [`finish`](Self::finish), or when dropped.
pub struct ExperimentContext {
    meta: ExperimentMeta,
    cancel: CancelToken,
    monitor: Option<LinkMonitor>,
    selector: Option<AdaptiveSelector>,
    tracker: Arc<FlowCompletionTracker>,
    stopped: bool,
}

impl ExperimentContext {
    pub fn new(meta: ExperimentMeta) -> Self {
        ExperimentContext {
            meta,
            cancel: CancelToken::default(),
            monitor: None,
            selector: None,
            tracker: Arc::new(FlowCompletionTracker::new()),
            stopped: false,
        }
    }

    pub fn with_monitor(mut self, monitor: LinkMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn with_selector(mut self, selector: AdaptiveSelector) -> Self {
        self.selector = Some(selector);
        self
    }

    #[inline]
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    #[inline]
    pub fn tracker(&self) -> &Arc<FlowCompletionTracker> {
        &self.tracker
    }

    #[inline]
    pub fn monitor(&self) -> Option<&LinkMonitor> {
        self.monitor.as_ref()
    }

    #[inline]
    pub fn selector(&self) -> Option<&AdaptiveSelector> {
        self.selector.as_ref()
    }

    pub fn start(&mut self) -> Result<()> {
        log::info!(
            "starting {} run with {} traffic",
            self.meta.routing_scheme,
            self.meta.traffic_type
        );
        if let Some(monitor) = self.monitor.as_mut() {
            monitor.start()?;
        }
        if let Some(selector) = self.selector.as_mut() {
            selector.start()?;
        }
        self.stopped = false;
        Ok(())
    }

    /// Sleep for `duration` unless cancelled earlier. Returns whether the whole
    /// duration elapsed. A duration past what `Instant` can represent waits
    /// for cancellation only.
    pub fn wait(&self, duration: std::time::Duration) -> bool {
        let step = std::time::Duration::from_millis(10);
        let deadline = std::time::Instant::now().checked_add(duration);
        loop {
            if self.cancel.is_cancelled() {
                log::warn!("run cancelled");
                return false;
            }
            let now = std::time::Instant::now();
            match deadline {
                Some(deadline) if now >= deadline => return true,
                Some(deadline) => std::thread::sleep(step.min(deadline - now)),
                None => std::thread::sleep(step),
            }
        }
    }

    /// Cancel and stop every component. Later calls do nothing. Every component
    /// is stopped even when an earlier one fails; the first error is returned.
    pub fn shutdown(&mut self) -> Result<()> {
        self.cancel.cancel();
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        let selector = self.selector.as_mut().map(|s| s.stop());
        let monitor = self.monitor.as_mut().map(|m| m.stop());
        for res in selector.into_iter().chain(monitor) {
            if let Err(e) = res {
                log::error!("shutdown: {}", e);
                return Err(e);
            }
        }
        log::info!("{} run shut down", self.meta.routing_scheme);
        Ok(())
    }

    /// Shut down and collect the report.
    pub fn finish(mut self) -> Result<ExperimentReport> {
        self.shutdown()?;
        let monitoring = self
            .monitor
            .as_ref()
            .map(|m| m.get_statistics())
            .unwrap_or_else(MonitorStatistics::default);
        Ok(ExperimentReport {
            experiment: self.meta.clone(),
            flows: self.tracker.completed(),
            monitoring,
        })
    }
}

impl Drop for ExperimentContext {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::error!("dropping experiment context: {}", e);
        }
    }
}
