// arbiter.rs: keep the serial and file-transfer workers off their resources
// while a large file is streamed

use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

use crate::*;

/// Cycle-boundary gate of one arbitrated worker.
///
/// The worker holds the gate exclusively for the duration of one cycle.
/// Streams hold it shared, so a suspension can only start between cycles and
/// any number of streams may overlap.
pub struct WorkerGate {
    name: &'static str,
    lock: Arc<RwLock<()>>,
    suspended: AtomicU32,
    resumed: AtomicU32,
}

pub struct CycleGuard {
    _guard: OwnedRwLockWriteGuard<()>,
}

impl WorkerGate {
    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            name,
            lock: Arc::new(RwLock::new(())),
            suspended: AtomicU32::new(0),
            resumed: AtomicU32::new(0),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wait until no stream holds the gate, then keep it until the guard drops.
    pub async fn enter_cycle(&self) -> CycleGuard {
        CycleGuard {
            _guard: self.lock.clone().write_owned().await,
        }
    }

    /// True while at least one suspension is active.
    pub fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::Acquire) != self.resumed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ArbiterStats {
        ArbiterStats {
            suspended: self.suspended.load(Ordering::Acquire),
            resumed: self.resumed.load(Ordering::Acquire),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArbiterStats {
    pub suspended: u32,
    pub resumed: u32,
}

struct Held {
    gate: Arc<WorkerGate>,
    _guard: OwnedRwLockReadGuard<()>,
}

impl Drop for Held {
    fn drop(&mut self) {
        self.gate.resumed.fetch_add(1, Ordering::AcqRel);
        debug!("Resumed {}", self.gate.name);
    }
}

/// Active suspension of every arbitrated worker. Dropping it resumes each
/// worker exactly once, whichever way the owner exits.
pub struct Suspension {
    _held: Vec<Held>,
}

pub struct ResourceArbiter {
    gates: Vec<Arc<WorkerGate>>,
}

impl ResourceArbiter {
    pub fn new(gates: Vec<Arc<WorkerGate>>) -> Self {
        Self { gates }
    }

    /// Suspend all workers at their next cycle boundary. Gates are always
    /// taken in registration order.
    pub async fn suspend(&self) -> Suspension {
        let mut held = Vec::with_capacity(self.gates.len());
        for gate in &self.gates {
            let guard = gate.lock.clone().read_owned().await;
            gate.suspended.fetch_add(1, Ordering::AcqRel);
            debug!("Suspended {}", gate.name);
            held.push(Held {
                gate: gate.clone(),
                _guard: guard,
            });
        }
        Suspension { _held: held }
    }
}

/// The XML reading only touches the exchange, everything else is arbitrated.
pub fn needs_arbitration(content_type: &str) -> bool {
    content_type != "text/xml"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xml_is_exempt() {
        assert!(!needs_arbitration("text/xml"));
        assert!(needs_arbitration("text/html"));
        assert!(needs_arbitration("application/octet-stream"));
    }

    #[tokio::test]
    async fn suspension_waits_for_cycle_boundary() {
        let gate = WorkerGate::new("poll");
        let arbiter = ResourceArbiter::new(vec![gate.clone()]);

        let cycle = gate.enter_cycle().await;
        let pending = timeout(Duration::from_millis(20), arbiter.suspend()).await;
        assert!(pending.is_err(), "suspended a worker in the middle of a cycle");
        assert!(!gate.is_suspended());

        drop(cycle);
        let suspension = arbiter.suspend().await;
        assert!(gate.is_suspended());
        assert!(timeout(Duration::from_millis(20), gate.enter_cycle())
            .await
            .is_err());

        drop(suspension);
        assert!(!gate.is_suspended());
        let _cycle = gate.enter_cycle().await;
    }

    #[tokio::test]
    async fn overlapping_streams_share_the_suspension() {
        let gate = WorkerGate::new("ftp");
        let arbiter = ResourceArbiter::new(vec![gate.clone()]);
        let a = arbiter.suspend().await;
        let b = arbiter.suspend().await;
        drop(a);
        assert!(gate.is_suspended());
        drop(b);
        assert_eq!(
            gate.stats(),
            ArbiterStats {
                suspended: 2,
                resumed: 2
            }
        );
    }
}
// EOF
