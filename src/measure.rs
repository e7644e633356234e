// measure.rs: meter polling worker

use rand::Rng;

use crate::*;

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,
    pub receive_timeout: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            receive_timeout: Duration::from_millis(80),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Sending,
    Receiving,
    Decoded,
    TimedOut,
    ChecksumFailed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    Published(Reading),
    Emulated(Reading),
    Failed(ProtocolError),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PollStats {
    pub cycles: u32,
    pub published: u32,
    pub timeouts: u32,
    pub checksum_failures: u32,
    pub energy_resets: u32,
}

const STALE_WARN_EVERY: u32 = 10;

pub struct MeterPoller<L> {
    link: L,
    exchange: Arc<ReadingExchange>,
    config: PollerConfig,
    state: PollState,
    emulation: bool,
    range: VoltageRange,
    failed_in_row: u32,
    stats: PollStats,
}

impl<L: MeterLink> MeterPoller<L> {
    pub fn new(link: L, exchange: Arc<ReadingExchange>, config: PollerConfig) -> Self {
        Self {
            link,
            exchange,
            config,
            state: PollState::Idle,
            emulation: false,
            range: VoltageRange::default(),
            failed_in_row: 0,
            stats: PollStats::default(),
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    pub fn emulation(&self) -> bool {
        self.emulation
    }

    pub fn stats(&self) -> PollStats {
        self.stats
    }

    /// Worker body: one gated cycle per interval, forever.
    pub async fn run(mut self, gate: Arc<WorkerGate>) -> AppResult<()> {
        info!("Polling meter every {:?}", self.config.interval);
        loop {
            {
                let _cycle = gate.enter_cycle().await;
                self.cycle().await;
            }
            sleep(self.config.interval).await;
        }
    }

    /// One pass of the poll state machine, ending in `Idle`.
    pub async fn cycle(&mut self) -> CycleOutcome {
        self.stats.cycles += 1;

        let outcome = if self.emulation {
            let mut reading = emulated_reading();
            self.range.track(&mut reading);
            self.exchange.readings.publish(reading);
            self.stats.published += 1;
            CycleOutcome::Emulated(reading)
        } else {
            match self.query().await {
                Ok(mut reading) => {
                    self.state = PollState::Decoded;
                    self.range.track(&mut reading);
                    self.exchange.readings.publish(reading);
                    self.stats.published += 1;
                    self.failed_in_row = 0;
                    CycleOutcome::Published(reading)
                }
                Err(e) => {
                    self.record_failure(e);
                    CycleOutcome::Failed(e)
                }
            }
        };

        if let Some(cmd) = self.exchange.commands.try_take() {
            self.execute(cmd).await;
        }

        self.state = PollState::Idle;
        outcome
    }

    async fn query(&mut self) -> Result<Reading, ProtocolError> {
        self.link.discard_input();

        self.state = PollState::Sending;
        self.link.send(&poll_request()).await?;

        self.state = PollState::Receiving;
        let mut rx = [0u8; RESPONSE_LEN];
        receive_exact(&mut self.link, &mut rx, self.config.receive_timeout).await?;

        decode_reading(&rx).inspect_err(|_| {
            warn!("PZEM: data[{}]: {:02X?}", rx.len(), rx);
        })
    }

    fn record_failure(&mut self, e: ProtocolError) {
        match e {
            ProtocolError::Checksum { .. } => {
                self.state = PollState::ChecksumFailed;
                self.stats.checksum_failures += 1;
            }
            _ => {
                self.state = PollState::TimedOut;
                self.stats.timeouts += 1;
            }
        }
        warn!("PZEM: poll failed: {e}");

        self.failed_in_row += 1;
        if self.failed_in_row % STALE_WARN_EVERY == 0 {
            warn!(
                "PZEM: {} failed cycles in a row, published reading is stale",
                self.failed_in_row
            );
        }
    }

    async fn execute(&mut self, cmd: Command) {
        info!("Executing command {cmd:?}");
        match cmd {
            Command::ResetEnergy => {
                self.stats.energy_resets += 1;
                if let Err(e) = self.reset_energy().await {
                    warn!("PZEM: energy reset failed: {e}");
                }
            }
            Command::ToggleEmulation => {
                self.emulation = !self.emulation;
                self.range.clear();
                info!("Emulation {}", if self.emulation { "on" } else { "off" });
            }
        }
    }

    /// Fire-and-forget: the answer is checked and logged, never surfaced.
    async fn reset_energy(&mut self) -> Result<(), ProtocolError> {
        info!("Try reset energy");
        self.link.discard_input();
        self.state = PollState::Sending;
        self.link.send(&reset_energy_request(PZEM_ADDR)).await?;

        self.state = PollState::Receiving;
        let mut rx = [0u8; RESET_LEN];
        receive_exact(&mut self.link, &mut rx, self.config.receive_timeout).await?;
        verify(&rx)
    }
}

/// Plausible synthetic values around a 220 V / 3 A / 500 W load.
pub fn emulated_reading() -> Reading {
    let mut rng = rand::thread_rng();
    Reading {
        voltage_deci: (2200 + rng.gen_range(-50..50)) as u32,
        current_milli: (3000 + rng.gen_range(-500..500)) as u32,
        power_deci: (5000 + rng.gen_range(-500..500)) as u32,
        energy_wh: 22437,
        frequency_deci: (500 + rng.gen_range(-5..5)) as u32,
        power_factor_centi: (100 + rng.gen_range(-50..0)) as u32,
        voltage_min: 0,
        voltage_max: 0,
    }
}

// EOF
