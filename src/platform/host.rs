// platform/host.rs: desktop build: emulated meter, stub network, file-backed config

use std::{env, fs, io, path::PathBuf, thread};

use tokio::io::{duplex, DuplexStream};

use crate::*;

const HOST_MIN_STACK: usize = 2 << 20;
const DEFAULT_CONFIG_PATH: &str = "pmeter.cfg";
const DEFAULT_ASSETS: &str = "data";
const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8080";
const HOST_IDENTITY: DeviceIdentity = DeviceIdentity(0x0000_DEAD_BEEF_0001);

pub type Link = StreamLink<DuplexStream>;

pub fn init_logging() {
    if tracing_subscriber::fmt().try_init().is_err() {
        eprintln!("Logger already installed");
    }
}

/// Threads float freely on a desktop, only the stack is honoured.
pub fn configure_worker_thread(spec: &WorkerSpec) -> AppResult<()> {
    debug!(
        "{}: no core pinning on host ({:?}, prio {})",
        spec.name, spec.core, spec.priority
    );
    Ok(())
}

pub fn reset_worker_thread_config() -> AppResult<()> {
    Ok(())
}

pub fn thread_stack_size(spec: &WorkerSpec) -> usize {
    spec.stack_size.max(HOST_MIN_STACK)
}

pub fn restart() -> ! {
    info!("Restart requested, exiting.");
    std::process::exit(0)
}

/// Config blob in a plain file.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ConfigStorage for FileStorage {
    fn load(&mut self) -> AppResult<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(b) => Ok(Some(b)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&mut self, data: &[u8]) -> AppResult<()> {
        fs::write(&self.path, data)?;
        Ok(())
    }
}

/// Pretends every non-empty ssid is in range.
#[derive(Debug, Default)]
pub struct SimulatedNet {
    station: Option<String>,
    access_point: Option<String>,
}

impl NetworkControl for SimulatedNet {
    fn start_station(&mut self, ssid: &str, _password: &str) -> AppResult<()> {
        self.station = Some(ssid.into());
        Ok(())
    }

    fn is_connected(&self) -> AppResult<bool> {
        Ok(self.station.as_ref().is_some_and(|s| !s.is_empty()))
    }

    fn start_access_point(&mut self, ssid: &str, _password: &str) -> AppResult<()> {
        info!("Simulated AP {ssid:?} up");
        self.station = None;
        self.access_point = Some(ssid.into());
        Ok(())
    }

    fn disable_access_point(&mut self) -> AppResult<()> {
        self.access_point = None;
        Ok(())
    }
}

/// Run a `MeterEmulator` on its own thread and hand back the poller's end.
pub fn spawn_emulated_meter() -> AppResult<Link> {
    let (near, far) = duplex(256);
    thread::Builder::new().name("PZEM emulator".into()).spawn(move || {
        let rt = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(rt) => rt,
            Err(e) => {
                error!("Emulator runtime: {e}");
                return;
            }
        };
        let (meter, _stats) = MeterEmulator::new(far, HOUSEHOLD_LOAD);
        if let Err(e) = rt.block_on(meter.run()) {
            error!("Emulator ended: {e}");
        }
    })?;
    Ok(StreamLink::new(near))
}

pub fn boot() -> AppResult<Boot<SimulatedNet, Link, IdleFileTransfer>> {
    let config_path = env::var("PMETER_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
    let assets = env::var("PMETER_ASSETS").unwrap_or_else(|_| DEFAULT_ASSETS.into());
    let http_addr = env::var("PMETER_HTTP_ADDR")
        .unwrap_or_else(|_| DEFAULT_HTTP_ADDR.into())
        .parse()
        .map_err(|e| AppError::Message(format!("Bad PMETER_HTTP_ADDR: {e}")))?;
    info!("Config file {config_path}, assets in {assets}");

    Ok(Boot {
        identity: HOST_IDENTITY,
        storage: Box::new(FileStorage::new(config_path)),
        firmware: Box::new(MemoryFirmware::default()),
        net: SimulatedNet::default(),
        link: spawn_emulated_meter()?,
        ftp: IdleFileTransfer::new(FTP_USER, FTP_PASS),
        assets: assets.into(),
        http_addr,
        join: JoinPolicy::default(),
        poller: PollerConfig::default(),
    })
}

// EOF
