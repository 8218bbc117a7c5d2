//! Background maintenance
//!
//! Runs [`StorageManager::maintenance`] periodically on a dedicated thread.
//! When a pass reports remaining work the next pass starts right away instead
//! of waiting for the next tick.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};

use crate::error::{Result, StoreError};
use crate::storage::StorageManager;

/// Periodic maintenance driver
pub struct MaintenanceTask;

impl MaintenanceTask {
    /// Spawn the maintenance thread
    ///
    /// `period` is the pause between idle passes, `budget` the time budget of
    /// each pass.
    pub fn start(
        manager: Arc<StorageManager>,
        period: Duration,
        budget: Duration,
    ) -> Result<MaintenanceHandle> {
        let (stop_tx, stop_rx) = channel::bounded::<()>(1);

        let thread = thread::Builder::new()
            .name("layerstore-maintenance".to_string())
            .spawn(move || run(&manager, &stop_rx, period, budget))
            .map_err(StoreError::Io)?;

        Ok(MaintenanceHandle {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Spawn using the manager's configured period and budget
    pub fn start_with_config(manager: Arc<StorageManager>) -> Result<MaintenanceHandle> {
        let period = manager.config().maintenance_period();
        let budget = manager.config().maintenance_budget();
        Self::start(manager, period, budget)
    }
}

fn run(manager: &StorageManager, stop: &Receiver<()>, period: Duration, budget: Duration) {
    let ticker = channel::tick(period);
    tracing::debug!(period_ms = period.as_millis() as u64, "maintenance task started");

    loop {
        crossbeam::select! {
            recv(stop) -> _ => break,
            recv(ticker) -> _ => {
                if manager.is_shut_down() {
                    break;
                }
                let mut passes = 1u32;
                while manager.maintenance(budget) {
                    match stop.try_recv() {
                        Err(TryRecvError::Empty) => passes += 1,
                        _ => {
                            tracing::debug!("maintenance task stopped mid-cycle");
                            return;
                        }
                    }
                }
                tracing::trace!(passes, "maintenance cycle done");
            }
        }
    }

    tracing::debug!("maintenance task stopped");
}

/// Owner of the maintenance thread; stops it on drop
pub struct MaintenanceHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Stop the thread and wait for it to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn shutdown(&mut self) {
        // dropping the sender disconnects the channel, which also ends `select!`
        if let Some(stop) = self.stop.take() {
            let _ = stop.try_send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("maintenance thread panicked");
            }
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
