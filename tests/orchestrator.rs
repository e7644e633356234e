// tests/orchestrator.rs: boot sequence on the host platform

use std::thread;

use pmeter::{
    platform::{spawn_emulated_meter, Link, SimulatedNet},
    *,
};

const ID: DeviceIdentity = DeviceIdentity(0x0000_A4CF_0000_0042);

fn boot(storage: MemoryStorage) -> Boot<SimulatedNet, Link, IdleFileTransfer> {
    Boot {
        identity: ID,
        storage: Box::new(storage),
        firmware: Box::new(MemoryFirmware::default()),
        net: SimulatedNet::default(),
        link: spawn_emulated_meter().unwrap(),
        ftp: IdleFileTransfer::new(FTP_USER, FTP_PASS),
        assets: std::env::temp_dir(),
        http_addr: "127.0.0.1:0".parse().unwrap(),
        join: JoinPolicy {
            attempts: 3,
            delay: Duration::from_millis(1),
        },
        poller: PollerConfig {
            interval: Duration::from_millis(10),
            receive_timeout: Duration::from_millis(80),
        },
    }
}

fn wait_for_reading(state: &MyState) -> Option<Reading> {
    for _ in 0..200 {
        if let Some(r) = state.exchange.readings.latest() {
            return Some(r);
        }
        thread::sleep(Duration::from_millis(10));
    }
    None
}

#[test]
fn fresh_device_boots_into_access_point_and_polls() {
    let orchestrator = TaskOrchestrator::start(boot(MemoryStorage::default())).unwrap();
    let state = orchestrator.state();

    assert_eq!(
        state.net_mode,
        NetMode::AccessPoint {
            reason: ApReason::Unprovisioned
        }
    );
    let reading = wait_for_reading(state).expect("poller never published");
    assert_eq!(reading.voltage_deci, HOUSEHOLD_LOAD.voltage_deci);

    state.restart.request();
    assert_eq!(orchestrator.supervise(), Shutdown::Restart);
}

#[test]
fn provisioned_device_joins_its_network() {
    let record = ConfigRecord {
        stamped_identity: ID,
        ssid: "home".into(),
        password: "secret".into(),
    };
    let storage = MemoryStorage {
        data: Some(record.encode().unwrap()),
    };

    let orchestrator = TaskOrchestrator::start(boot(storage)).unwrap();
    assert_eq!(
        orchestrator.state().net_mode,
        NetMode::Station {
            ssid: "home".into()
        }
    );
    orchestrator.state().restart.request();
    assert_eq!(orchestrator.supervise(), Shutdown::Restart);
}

#[test]
fn worker_runs_its_body_to_completion() {
    let handle = spawn_worker(&FILE_TRANSFER, || async { Ok(()) }).unwrap();
    handle.join().unwrap();
}
// EOF
