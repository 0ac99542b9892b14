//! Concurrent deployer - serializes requests, fans each out to the fleet
//!
//! One processing thread takes requests from a bounded queue, one at a time.
//! Each request is applied to every eligible device concurrently on a
//! dedicated worker pool; the thread waits for all devices before taking
//! the next request. A failing device only ends its own branch, the result
//! of every device is reported back through the request's [`DeployTicket`].

use crate::client::DeviceClient;
use crate::error::{Error, Result};
use crate::executor::execute;
use crate::order::ResourceOrder;
use crate::partition::{ensure_partition, remove_partition};
use crate::persist::StateRecord;
use crate::planner::gen_rest_requests;
use crate::types::{ConfigTree, ExecuteSummary};
use rayon::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default number of queued requests before `submit` blocks
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// How often the processing thread checks for shutdown while idle
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Per-request options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeployOptions {
    /// Create the partition before reconciling
    pub create_partition: bool,
    /// Remove the partition after reconciling
    pub delete_partition: bool,
    /// Only deploy to the device with this URL
    pub target: Option<String>,
    /// Record the applied config and batch on each device that converged
    pub record: Option<StateRecord>,
}

/// One desired transition of one partition
#[derive(Debug, Clone)]
pub struct DeployRequest {
    /// Label used in logs and reports
    pub id: String,
    pub partition: String,
    /// Configuration applied last, if any
    pub from: Option<ConfigTree>,
    /// Desired configuration, `None` to tear everything down
    pub to: Option<ConfigTree>,
    pub options: DeployOptions,
}

impl DeployRequest {
    pub fn new(
        id: impl Into<String>,
        partition: impl Into<String>,
        from: Option<ConfigTree>,
        to: Option<ConfigTree>,
    ) -> Self {
        Self {
            id: id.into(),
            partition: partition.into(),
            from,
            to,
            options: DeployOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: DeployOptions) -> Self {
        self.options = options;
        self
    }
}

/// Result of one device branch
#[derive(Debug, Clone)]
pub struct DeviceOutcome {
    /// URL of the device
    pub device: String,
    pub result: Result<ExecuteSummary>,
}

/// Results of one request across the fleet
#[derive(Debug, Clone)]
pub struct DeployReport {
    pub id: String,
    pub outcomes: Vec<DeviceOutcome>,
}

impl DeployReport {
    /// Whether every eligible device succeeded
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    /// Devices whose branch failed
    pub fn failures(&self) -> impl Iterator<Item = (&str, &Error)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.device.as_str(), e)))
    }

    /// Combined summary of the successful devices
    pub fn summary(&self) -> ExecuteSummary {
        let mut total = ExecuteSummary::default();
        for summary in self.outcomes.iter().filter_map(|o| o.result.as_ref().ok()) {
            total.merge(summary);
        }
        total
    }
}

/// Handle to the eventual report of a submitted request
#[derive(Debug)]
pub struct DeployTicket {
    id: String,
    reply: Receiver<Result<DeployReport>>,
}

impl DeployTicket {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Block until the request has been processed
    ///
    /// Returns [`Error::DeployerStopped`] when the deployer shut down before
    /// reaching the request.
    pub fn wait(self) -> Result<DeployReport> {
        self.reply.recv().unwrap_or(Err(Error::DeployerStopped))
    }
}

struct Job {
    request: DeployRequest,
    reply: mpsc::Sender<Result<DeployReport>>,
}

/// Background deployer for a fixed fleet of devices
pub struct Deployer {
    sender: Option<SyncSender<Job>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Deployer {
    /// Start the processing thread and the device worker pool
    pub fn spawn(
        devices: Vec<Arc<dyn DeviceClient>>,
        order: ResourceOrder,
        capacity: usize,
    ) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(devices.len().max(1))
            .thread_name(|i| format!("deploy-worker-{i}"))
            .build()
            .map_err(|e| Error::Worker(e.to_string()))?;

        let (sender, receiver) = mpsc::sync_channel(capacity);
        let stop = Arc::new(AtomicBool::new(false));
        let worker = Worker {
            devices,
            order,
            pool,
            stop: Arc::clone(&stop),
        };
        let handle = thread::Builder::new()
            .name("deployer".to_string())
            .spawn(move || worker.run(&receiver))
            .map_err(|e| Error::Worker(e.to_string()))?;

        Ok(Self {
            sender: Some(sender),
            stop,
            handle: Some(handle),
        })
    }

    /// Queue a request, blocking while the queue is full
    pub fn submit(&self, request: DeployRequest) -> Result<DeployTicket> {
        if self.stop.load(Ordering::SeqCst) {
            return Err(Error::DeployerStopped);
        }
        let sender = self.sender.as_ref().ok_or(Error::DeployerStopped)?;

        let (reply, receiver) = mpsc::channel();
        let id = request.id.clone();
        sender
            .send(Job { request, reply })
            .map_err(|_| Error::DeployerStopped)?;
        log::debug!("queued deploy request {id}");
        Ok(DeployTicket {
            id,
            reply: receiver,
        })
    }

    /// Stop accepting requests
    ///
    /// The request in flight runs to completion; queued requests are dropped
    /// and their tickets resolve to [`Error::DeployerStopped`].
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Stop and wait for the processing thread to exit
    pub fn shutdown(mut self) {
        self.close();
    }

    fn close(&mut self) {
        self.stop();
        self.sender.take();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            log::error!("deployer thread panicked");
        }
    }
}

impl Drop for Deployer {
    fn drop(&mut self) {
        self.close();
    }
}

struct Worker {
    devices: Vec<Arc<dyn DeviceClient>>,
    order: ResourceOrder,
    pool: rayon::ThreadPool,
    stop: Arc<AtomicBool>,
}

impl Worker {
    fn run(&self, receiver: &Receiver<Job>) {
        while !self.stop.load(Ordering::SeqCst) {
            match receiver.recv_timeout(POLL_INTERVAL) {
                Ok(job) => {
                    if self.stop.load(Ordering::SeqCst) {
                        let _ = job.reply.send(Err(Error::DeployerStopped));
                        break;
                    }
                    let report = self.process(&job.request);
                    // The submitter may have dropped its ticket.
                    let _ = job.reply.send(Ok(report));
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let mut dropped = 0;
        while let Ok(job) = receiver.try_recv() {
            let _ = job.reply.send(Err(Error::DeployerStopped));
            dropped += 1;
        }
        if dropped > 0 {
            log::warn!("deployer stopped with {dropped} queued requests");
        }
        log::debug!("deployer stopped");
    }

    fn process(&self, request: &DeployRequest) -> DeployReport {
        log::debug!("processing request {}", request.id);
        let target = request.options.target.as_deref();
        let eligible: Vec<&dyn DeviceClient> = self
            .devices
            .iter()
            .map(|d| &**d)
            .filter(|d| target.is_none_or(|t| t == d.url()))
            .collect();
        if eligible.is_empty() {
            log::warn!("request {}: no device matches {target:?}", request.id);
        }

        let outcomes = self.pool.install(|| {
            eligible
                .par_iter()
                .map(|device| {
                    let result = deploy_device(*device, request, &self.order);
                    if let Err(e) = &result {
                        log::error!("failed to do deployment to {}: {e}", device.url());
                    }
                    DeviceOutcome {
                        device: device.url().to_string(),
                        result,
                    }
                })
                .collect()
        });

        DeployReport {
            id: request.id.clone(),
            outcomes,
        }
    }
}

/// Apply one request to one device
pub fn deploy_device(
    client: &dyn DeviceClient,
    request: &DeployRequest,
    order: &ResourceOrder,
) -> Result<ExecuteSummary> {
    if request.options.create_partition {
        ensure_partition(client, &request.partition)?;
    }

    let batch = gen_rest_requests(
        client,
        &request.partition,
        request.from.as_ref(),
        request.to.as_ref(),
        order,
    )?;
    let summary = execute(client, &batch)?;

    if request.options.delete_partition {
        remove_partition(client, &request.partition)?;
    }
    if let Some(record) = &request.options.record {
        record.save(client, request.to.as_ref(), &batch)?;
    }
    Ok(summary)
}
