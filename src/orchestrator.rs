// orchestrator.rs: boot order, worker threads, core pinning

use std::{future::Future, path::PathBuf, thread};

use crate::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Core {
    Core0,
    Core1,
}

#[derive(Clone, Copy, Debug)]
pub struct WorkerSpec {
    pub name: &'static str,
    pub core: Core,
    pub priority: u8,
    pub stack_size: usize,
}

pub const PRESENTATION: WorkerSpec = WorkerSpec {
    name: "WEB Server",
    core: Core::Core1,
    priority: 5,
    stack_size: 32768,
};

pub const FILE_TRANSFER: WorkerSpec = WorkerSpec {
    name: "FTP Server",
    core: Core::Core1,
    priority: 5,
    stack_size: 8192,
};

pub const METER_POLL: WorkerSpec = WorkerSpec {
    name: "PZEM polling",
    core: Core::Core0,
    priority: 6,
    stack_size: 8192,
};

const SETTLE_DELAY: Duration = Duration::from_millis(10);
const SUPERVISE_PERIOD: Duration = Duration::from_millis(200);

/// Start one worker on its own thread with its own single-threaded runtime.
pub fn spawn_worker<F, Fut>(spec: &WorkerSpec, body: F) -> AppResult<thread::JoinHandle<()>>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = AppResult<()>> + 'static,
{
    platform::configure_worker_thread(spec)?;
    let spec = *spec;
    let handle = thread::Builder::new()
        .name(spec.name.into())
        .stack_size(platform::thread_stack_size(&spec))
        .spawn(move || {
            info!(
                "Task {} is running on {:?} (prio {})",
                spec.name, spec.core, spec.priority
            );
            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!("{}: cannot build runtime: {e}", spec.name);
                    return;
                }
            };
            match rt.block_on(Box::pin(body())) {
                Ok(()) => error!("{} ended.", spec.name),
                Err(e) => error!("{} failed: {e}", spec.name),
            }
        })?;
    platform::reset_worker_thread_config()?;
    Ok(handle)
}

/// Platform pieces handed to the orchestrator at boot.
pub struct Boot<N, L, F> {
    pub identity: DeviceIdentity,
    pub storage: Box<dyn ConfigStorage>,
    pub firmware: Box<dyn FirmwareUpdate>,
    pub net: N,
    pub link: L,
    pub ftp: F,
    pub assets: PathBuf,
    pub http_addr: net::SocketAddr,
    pub join: JoinPolicy,
    pub poller: PollerConfig,
}

#[derive(Debug, PartialEq, Eq)]
pub enum Shutdown {
    Restart,
    WorkerEnded(&'static str),
}

pub struct TaskOrchestrator<N> {
    // dropping the network driver would take the interface down
    _net: N,
    state: Arc<MyState>,
    workers: Vec<(&'static str, thread::JoinHandle<()>)>,
}

impl<N: NetworkControl> TaskOrchestrator<N> {
    /// Provision the network, then start the web, file-transfer and meter
    /// workers in that order.
    pub fn start<L, F>(boot: Boot<N, L, F>) -> AppResult<Self>
    where
        L: MeterLink + 'static,
        F: FileTransfer + 'static,
    {
        let Boot {
            identity,
            storage,
            firmware,
            mut net,
            link,
            ftp,
            assets,
            http_addr,
            join,
            poller,
        } = boot;

        let (store, validity) = ConfigStore::open(storage, identity)?;
        let net_mode = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?
            .block_on(ProvisioningManager::new(join).run(&mut net, validity, store.record()))?;
        info!("Network mode: {net_mode:?}");

        let state = Arc::new(MyState::new(identity, net_mode, store, firmware, assets));
        let mut workers = Vec::with_capacity(3);

        let s = state.clone();
        workers.push((
            PRESENTATION.name,
            spawn_worker(&PRESENTATION, move || run_api_server(s, http_addr))?,
        ));
        thread::sleep(SETTLE_DELAY);

        let gate = state.ftp_gate.clone();
        workers.push((
            FILE_TRANSFER.name,
            spawn_worker(&FILE_TRANSFER, move || run_file_transfer(ftp, gate))?,
        ));
        thread::sleep(SETTLE_DELAY);

        let exchange = state.exchange.clone();
        let gate = state.poll_gate.clone();
        workers.push((
            METER_POLL.name,
            spawn_worker(&METER_POLL, move || {
                MeterPoller::new(link, exchange, poller).run(gate)
            })?,
        ));
        thread::sleep(SETTLE_DELAY);

        Ok(Self {
            _net: net,
            state,
            workers,
        })
    }

    pub fn state(&self) -> &Arc<MyState> {
        &self.state
    }

    /// Block until a restart is requested or a worker dies.
    pub fn supervise(&self) -> Shutdown {
        loop {
            if self.state.restart.requested() {
                return Shutdown::Restart;
            }
            if let Some((name, _)) = self.workers.iter().find(|(_, h)| h.is_finished()) {
                return Shutdown::WorkerEnded(*name);
            }
            thread::sleep(SUPERVISE_PERIOD);
        }
    }
}
// EOF
