// bin/pmeter.rs

#![warn(clippy::large_futures)]

use pmeter::*;

const RESTART_DELAY: Duration = Duration::from_millis(500);

fn main() -> anyhow::Result<()> {
    platform::init_logging();

    info!("Hello.");
    info!("pmeter {FW_VERSION} ({SOURCE_TIMESTAMP}) starting up.");

    let boot = platform::boot()?;
    let orchestrator = TaskOrchestrator::start(boot)?;

    match orchestrator.supervise() {
        Shutdown::Restart => info!("Restart requested."),
        Shutdown::WorkerEnded(name) => error!("{name} ended."),
    }

    info!("main() finished, reboot.");
    std::thread::sleep(RESTART_DELAY);
    platform::restart();
}
// EOF
