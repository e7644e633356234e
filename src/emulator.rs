// emulator.rs: software PZEM answering on a byte stream

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::*;

/// Shared view of a running emulator.
#[derive(Default)]
pub struct EmulatorStats {
    pub polls: AtomicU32,
    pub resets: AtomicU32,
    pub bad_frames: AtomicU32,
    /// While set the device swallows requests without answering.
    pub muted: AtomicBool,
    /// While set every answer carries a broken checksum.
    pub corrupt: AtomicBool,
}

/// A household load: 230.1 V, 1.5 A, 345 W, pf 0.98, 50 Hz.
pub const HOUSEHOLD_LOAD: Reading = Reading {
    voltage_deci: 2301,
    current_milli: 1500,
    power_deci: 3450,
    energy_wh: 1000,
    frequency_deci: 500,
    power_factor_centi: 98,
    voltage_min: 0,
    voltage_max: 0,
};

pub struct MeterEmulator<S> {
    stream: S,
    model: Reading,
    joules: u32,
    stats: Arc<EmulatorStats>,
}

impl<S> MeterEmulator<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, model: Reading) -> (Self, Arc<EmulatorStats>) {
        let stats = Arc::new(EmulatorStats::default());
        (
            Self {
                stream,
                model,
                joules: 0,
                stats: stats.clone(),
            },
            stats,
        )
    }

    /// Serve requests until the peer goes away.
    pub async fn run(mut self) -> AppResult<()> {
        let mut head = [0u8; 2];
        loop {
            if self.stream.read_exact(&mut head).await.is_err() {
                info!("Emulator: link closed");
                return Ok(());
            }
            match head {
                [PZEM_ADDR, FN_READ_INPUT] => {
                    let mut frame = [0u8; REQUEST_LEN];
                    frame[..2].copy_from_slice(&head);
                    self.stream.read_exact(&mut frame[2..]).await?;
                    self.answer_poll(&frame).await?;
                }
                [PZEM_ADDR, FN_RESET_ENERGY] => {
                    let mut frame = [0u8; RESET_LEN];
                    frame[..2].copy_from_slice(&head);
                    self.stream.read_exact(&mut frame[2..]).await?;
                    self.answer_reset(&frame).await?;
                }
                _ => {
                    warn!("Emulator: unexpected bytes {head:02X?}");
                    self.stats.bad_frames.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
    }

    async fn answer_poll(&mut self, frame: &[u8]) -> AppResult<()> {
        if verify(frame).is_err() {
            self.stats.bad_frames.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }
        self.stats.polls.fetch_add(1, Ordering::SeqCst);
        // every poll draws one second of the configured load
        self.joules += self.model.power_deci / 10;
        self.model.energy_wh += self.joules / 3600;
        self.joules %= 3600;
        let mut answer = encode_response(&self.model, 0);
        self.reply(&mut answer).await
    }

    async fn answer_reset(&mut self, frame: &[u8]) -> AppResult<()> {
        if verify(frame).is_err() {
            self.stats.bad_frames.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }
        self.stats.resets.fetch_add(1, Ordering::SeqCst);
        self.model.energy_wh = 0;
        self.joules = 0;
        let mut answer = [0u8; RESET_LEN];
        answer.copy_from_slice(frame);
        self.reply(&mut answer).await
    }

    async fn reply(&mut self, answer: &mut [u8]) -> AppResult<()> {
        if self.stats.muted.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.stats.corrupt.load(Ordering::SeqCst) {
            answer[answer.len() - 1] ^= 0x5A;
        }
        self.stream.write_all(answer).await?;
        Ok(())
    }
}

// EOF
