// provision.rs: choose between joining the stored network and access-point mode

use crate::*;

/// The few Wi-Fi operations provisioning needs.
pub trait NetworkControl: Send {
    fn start_station(&mut self, ssid: &str, password: &str) -> AppResult<()>;
    fn is_connected(&self) -> AppResult<bool>;
    fn start_access_point(&mut self, ssid: &str, password: &str) -> AppResult<()>;
    fn disable_access_point(&mut self) -> AppResult<()>;
}

#[derive(Debug, Clone)]
pub struct JoinPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for JoinPolicy {
    fn default() -> Self {
        Self {
            attempts: 50,
            delay: Duration::from_millis(190),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApReason {
    /// Config was empty or stamped for another device.
    Unprovisioned,
    /// The stored network did not accept us in time.
    JoinTimeout,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetMode {
    Station { ssid: String },
    AccessPoint { reason: ApReason },
}

pub struct ProvisioningManager {
    policy: JoinPolicy,
}

impl ProvisioningManager {
    pub fn new(policy: JoinPolicy) -> Self {
        Self { policy }
    }

    /// Runs once at boot, before any worker starts.
    pub async fn run<N: NetworkControl>(
        &self,
        net: &mut N,
        validity: Validity,
        record: &ConfigRecord,
    ) -> AppResult<NetMode> {
        if validity == Validity::Reinitialized {
            return Self::access_point(net, ApReason::Unprovisioned);
        }

        info!("Wi-Fi STA mode, joining {:?}", record.ssid);
        net.start_station(&record.ssid, &record.password)?;

        for attempt in 1..=self.policy.attempts {
            sleep(self.policy.delay).await;
            if net.is_connected()? {
                info!("STA connected to {:?} after {attempt} polls", record.ssid);
                net.disable_access_point()?;
                return Ok(NetMode::Station {
                    ssid: record.ssid.clone(),
                });
            }
            debug!("Waiting for Wi-Fi ({attempt}/{})", self.policy.attempts);
        }

        warn!("Wi-Fi connect timeout");
        Self::access_point(net, ApReason::JoinTimeout)
    }

    fn access_point<N: NetworkControl>(net: &mut N, reason: ApReason) -> AppResult<NetMode> {
        info!("Wi-Fi AP mode ({reason:?}), ssid {AP_SSID:?}");
        net.start_access_point(AP_SSID, AP_PASS)?;
        Ok(NetMode::AccessPoint { reason })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[derive(Default)]
    struct FakeNet {
        joins_after: Option<u32>,
        polls: AtomicU32,
        station: Option<String>,
        ap: Option<String>,
        ap_disabled: bool,
    }

    impl NetworkControl for FakeNet {
        fn start_station(&mut self, ssid: &str, _password: &str) -> AppResult<()> {
            self.station = Some(ssid.into());
            Ok(())
        }

        fn is_connected(&self) -> AppResult<bool> {
            let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(self.joins_after.is_some_and(|n| polls >= n))
        }

        fn start_access_point(&mut self, ssid: &str, _password: &str) -> AppResult<()> {
            self.ap = Some(ssid.into());
            Ok(())
        }

        fn disable_access_point(&mut self) -> AppResult<()> {
            self.ap_disabled = true;
            Ok(())
        }
    }

    fn quick() -> ProvisioningManager {
        ProvisioningManager::new(JoinPolicy {
            attempts: 5,
            delay: Duration::from_millis(1),
        })
    }

    fn record() -> ConfigRecord {
        ConfigRecord {
            stamped_identity: DeviceIdentity(7),
            ssid: "home".into(),
            password: "secret".into(),
        }
    }

    #[tokio::test]
    async fn unprovisioned_goes_straight_to_ap() {
        let mut net = FakeNet::default();
        let mode = quick()
            .run(&mut net, Validity::Reinitialized, &record())
            .await
            .unwrap();
        assert_eq!(mode, NetMode::AccessPoint { reason: ApReason::Unprovisioned });
        assert_eq!(net.station, None);
        assert_eq!(net.ap.as_deref(), Some(AP_SSID));
    }

    #[tokio::test]
    async fn joins_stored_network() {
        let mut net = FakeNet {
            joins_after: Some(3),
            ..Default::default()
        };
        let mode = quick().run(&mut net, Validity::Valid, &record()).await.unwrap();
        assert_eq!(mode, NetMode::Station { ssid: "home".into() });
        assert!(net.ap_disabled);
        assert_eq!(net.ap, None);
    }

    #[tokio::test]
    async fn falls_back_to_ap_after_bounded_attempts() {
        let mut net = FakeNet::default();
        let mode = quick().run(&mut net, Validity::Valid, &record()).await.unwrap();
        assert_eq!(mode, NetMode::AccessPoint { reason: ApReason::JoinTimeout });
        assert_eq!(net.polls.load(Ordering::SeqCst), 5);
        assert_eq!(net.station.as_deref(), Some("home"));
    }
}
// EOF
