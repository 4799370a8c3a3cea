//! Request dispatch from the UI thread to per-operation workers.
//!
//! Every request runs on its own named worker thread. The single-flight
//! slot is claimed on the calling thread before the worker is spawned, so
//! a request arriving while another is outstanding is rejected right away.
//! Workers report through one channel that only the owning thread drains,
//! which keeps all UI mutation serial.

use crate::manager::{SessionError, SessionManager};
use crate::message::{Outcome, Request};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

/// Front-end connection to the session manager
pub struct Dispatcher {
    /// Shared session manager
    manager: Arc<SessionManager>,
    /// Channel for workers to report outcomes
    outcome_tx: Sender<Outcome>,
    /// Channel the owning thread drains
    outcome_rx: Receiver<Outcome>,
    /// Worker thread handles
    workers: Vec<JoinHandle<()>>,
    /// Sequence number for worker names
    next_worker: u64,
}

impl Dispatcher {
    /// Connect a front-end to the manager
    ///
    /// Reconciles the manager with the engine first, so
    /// [`Dispatcher::is_running`] reflects a session that outlived a
    /// previous front-end.
    pub fn connect(manager: Arc<SessionManager>) -> Self {
        let running = manager.reconcile();
        info!("Front-end connected (session running: {})", running);

        let (outcome_tx, outcome_rx) = unbounded();
        Self {
            manager,
            outcome_tx,
            outcome_rx,
            workers: Vec::new(),
            next_worker: 0,
        }
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    pub fn is_running(&self) -> bool {
        self.manager.is_running()
    }

    /// Dispatch a request onto a worker thread
    ///
    /// Fails synchronously with [`SessionError::Busy`] while another
    /// request is outstanding; otherwise exactly one [`Outcome`] follows.
    pub fn dispatch(&mut self, request: Request) -> Result<(), SessionError> {
        let flight = self.manager.begin()?;

        self.workers.retain(|worker| !worker.is_finished());
        self.next_worker += 1;

        let name = format!("session-{}-{}", request.name(), self.next_worker);
        let manager = self.manager.clone();
        let outcome_tx = self.outcome_tx.clone();

        debug!("Dispatching {} on {}", request.name(), name);
        let worker = thread::Builder::new()
            .name(name)
            .spawn(move || {
                let outcome = match &request {
                    Request::Start => Outcome::from_start(manager.run_start(flight)),
                    Request::Stop => Outcome::from_stop(manager.run_stop(flight)),
                    Request::SwitchGateway(candidate) => {
                        Outcome::from_switch(manager.run_switch_gateway(flight, candidate))
                    }
                };
                // Receiver gone means the front-end disconnected
                let _ = outcome_tx.send(outcome);
            })
            .map_err(|e| SessionError::Dispatch(e.to_string()))?;

        self.workers.push(worker);
        Ok(())
    }

    /// Drain outcomes without blocking
    pub fn poll_outcomes(&self) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        while let Ok(outcome) = self.outcome_rx.try_recv() {
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Outcome channel, for use in `crossbeam_channel::select!`
    pub fn outcomes(&self) -> &Receiver<Outcome> {
        &self.outcome_rx
    }

    /// Disconnect, waiting for outstanding workers to finish
    ///
    /// The session itself keeps running.
    pub fn disconnect(self) {
        drop(self);
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        info!("Front-end disconnected");
    }
}
