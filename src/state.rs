// state.rs

use std::path::PathBuf;

use tokio::sync::{watch, Mutex};

use crate::*;

/// Raised by the credential and firmware update handlers; the orchestrator reboots on it.
#[derive(Clone)]
pub struct RestartSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for RestartSignal {
    fn default() -> Self {
        Self {
            tx: Arc::new(watch::Sender::new(false)),
        }
    }
}

impl RestartSignal {
    pub fn request(&self) {
        self.tx.send_replace(true);
    }

    pub fn requested(&self) -> bool {
        *self.tx.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives in self, wait_for cannot fail here
        let _ = rx.wait_for(|r| *r).await;
    }
}

/// Everything the workers share, created once at boot.
pub struct MyState {
    pub identity: DeviceIdentity,
    pub net_mode: NetMode,
    pub exchange: Arc<ReadingExchange>,
    pub poll_gate: Arc<WorkerGate>,
    pub ftp_gate: Arc<WorkerGate>,
    pub arbiter: ResourceArbiter,
    pub config: Mutex<ConfigStore>,
    pub firmware: Mutex<Box<dyn FirmwareUpdate>>,
    pub assets: PathBuf,
    pub web_user: String,
    pub web_pass: String,
    pub restart: RestartSignal,
}

impl MyState {
    pub fn new(
        identity: DeviceIdentity,
        net_mode: NetMode,
        config: ConfigStore,
        firmware: Box<dyn FirmwareUpdate>,
        assets: impl Into<PathBuf>,
    ) -> Self {
        let poll_gate = WorkerGate::new("PZEM polling");
        let ftp_gate = WorkerGate::new("FTP Server");
        MyState {
            identity,
            net_mode,
            exchange: Arc::new(ReadingExchange::new()),
            arbiter: ResourceArbiter::new(vec![poll_gate.clone(), ftp_gate.clone()]),
            poll_gate,
            ftp_gate,
            config: Mutex::new(config),
            firmware: Mutex::new(firmware),
            assets: assets.into(),
            web_user: WEB_USER.into(),
            web_pass: WEB_PASS.into(),
            restart: RestartSignal::default(),
        }
    }
}

// EOF
