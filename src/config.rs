// config.rs

use crc::{Crc, CRC_32_ISCSI};

use crate::*;

pub const NVS_BUF_SIZE: usize = 128;

pub const DEFAULT_API_PORT: u16 = 80;

pub const AP_SSID: &str = "PMeter";
pub const AP_PASS: &str = "0123456789";

pub const WEB_USER: &str = "admin";
pub const WEB_PASS: &str = "admin";

pub const FTP_USER: &str = "esp32";
pub const FTP_PASS: &str = "esp32";

/// Longest ssid or password that fits the stored record.
pub const MAX_CREDENTIAL_LEN: usize = 19;

/// Hardware-unique id (factory MAC), read once at boot.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity(pub u64);

impl DeviceIdentity {
    pub fn from_mac(mac: [u8; 6]) -> Self {
        let mut b = [0u8; 8];
        b[..6].copy_from_slice(&mac);
        DeviceIdentity(u64::from_le_bytes(b))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigRecord {
    pub stamped_identity: DeviceIdentity,
    pub ssid: String,
    pub password: String,
}

impl ConfigRecord {
    /// A record with default credentials, stamped for `identity`.
    pub fn fresh(identity: DeviceIdentity) -> Self {
        Self {
            stamped_identity: identity,
            ..Default::default()
        }
    }

    pub fn is_valid_for(&self, identity: DeviceIdentity) -> bool {
        self.stamped_identity == identity
    }

    pub fn encode(&self) -> AppResult<Vec<u8>> {
        let mut buf = [0u8; NVS_BUF_SIZE];
        let crc = Crc::<u32>::new(&CRC_32_ISCSI);
        let digest = crc.digest();
        let data = postcard::to_slice_crc32(self, &mut buf, digest)
            .map_err(|e| AppError::Message(format!("Cannot encode config to buffer {e:?}")))?;
        Ok(data.to_vec())
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let crc = Crc::<u32>::new(&CRC_32_ISCSI);
        let digest = crc.digest();
        match postcard::from_bytes_crc32::<ConfigRecord>(bytes, digest) {
            Ok(c) => Some(c),
            Err(e) => {
                error!("Cannot parse config: {e:?}");
                None
            }
        }
    }
}

fn check_credential(field: &'static str, value: &str) -> AppResult<()> {
    if value.len() > MAX_CREDENTIAL_LEN {
        return Err(AppError::CredentialTooLong {
            field,
            len: value.len(),
            max: MAX_CREDENTIAL_LEN,
        });
    }
    Ok(())
}

/// Raw non-volatile storage for one config blob.
pub trait ConfigStorage: Send {
    fn load(&mut self) -> AppResult<Option<Vec<u8>>>;
    fn store(&mut self, data: &[u8]) -> AppResult<()>;
}

#[derive(Clone, Debug, Default)]
pub struct MemoryStorage {
    pub data: Option<Vec<u8>>,
}

impl ConfigStorage for MemoryStorage {
    fn load(&mut self) -> AppResult<Option<Vec<u8>>> {
        Ok(self.data.clone())
    }

    fn store(&mut self, data: &[u8]) -> AppResult<()> {
        self.data = Some(data.to_vec());
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Validity {
    Valid,
    /// Store was empty, unreadable or stamped by another device.
    Reinitialized,
}

pub struct ConfigStore {
    storage: Box<dyn ConfigStorage>,
    record: ConfigRecord,
}

impl ConfigStore {
    /// Load the record and check it against `identity`. An invalid record is
    /// replaced by a fresh one and persisted before returning.
    pub fn open(
        mut storage: Box<dyn ConfigStorage>,
        identity: DeviceIdentity,
    ) -> AppResult<(Self, Validity)> {
        let loaded = match storage.load() {
            Ok(Some(b)) => {
                info!("Got {sz} bytes of config. Parsing...", sz = b.len());
                ConfigRecord::decode(&b)
            }
            Ok(None) => {
                warn!("No stored config");
                None
            }
            Err(e) => {
                error!("Config read error {e}");
                None
            }
        };

        match loaded {
            Some(record) if record.is_valid_for(identity) => {
                info!("Config identity matches {:016X}", identity.0);
                Ok((Self { storage, record }, Validity::Valid))
            }
            other => {
                if let Some(r) = other {
                    warn!(
                        "Config stamped for {:016X}, this device is {:016X}",
                        r.stamped_identity.0, identity.0
                    );
                }
                info!("Config initialization");
                let mut store = Self {
                    storage,
                    record: ConfigRecord::fresh(identity),
                };
                store.save()?;
                Ok((store, Validity::Reinitialized))
            }
        }
    }

    pub fn record(&self) -> &ConfigRecord {
        &self.record
    }

    pub fn save(&mut self) -> AppResult<()> {
        let data = self.record.encode()?;
        info!("Encoded config to {sz} bytes. Saving...", sz = data.len());
        self.storage.store(&data)?;
        info!("Config saved.");
        Ok(())
    }

    /// Replace the stored network credentials. Nothing changes if either
    /// value is too long.
    pub fn update_credentials(&mut self, ssid: &str, password: &str) -> AppResult<()> {
        check_credential("wifi_ssid", ssid)?;
        check_credential("wifi_pass", password)?;
        self.record.ssid = ssid.into();
        self.record.password = password.into();
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const D1: DeviceIdentity = DeviceIdentity(0x0000_A4CF_1234_5678);
    const D2: DeviceIdentity = DeviceIdentity(0x0000_A4CF_8765_4321);

    fn stamped(identity: DeviceIdentity) -> MemoryStorage {
        let record = ConfigRecord {
            stamped_identity: identity,
            ssid: "home".into(),
            password: "secret".into(),
        };
        MemoryStorage {
            data: Some(record.encode().unwrap()),
        }
    }

    #[test]
    fn matching_identity_keeps_credentials() {
        let (store, validity) = ConfigStore::open(Box::new(stamped(D1)), D1).unwrap();
        assert_eq!(validity, Validity::Valid);
        assert_eq!(store.record().ssid, "home");
        assert_eq!(store.record().password, "secret");
    }

    #[test]
    fn foreign_identity_reinitializes() {
        let (store, validity) = ConfigStore::open(Box::new(stamped(D1)), D2).unwrap();
        assert_eq!(validity, Validity::Reinitialized);
        assert_eq!(store.record(), &ConfigRecord::fresh(D2));
    }

    #[test]
    fn empty_or_corrupt_store_reinitializes() {
        let (_, validity) = ConfigStore::open(Box::new(MemoryStorage::default()), D1).unwrap();
        assert_eq!(validity, Validity::Reinitialized);

        let mut garbage = stamped(D1);
        if let Some(d) = garbage.data.as_mut() {
            d[2] ^= 0xFF;
        }
        let (_, validity) = ConfigStore::open(Box::new(garbage), D1).unwrap();
        assert_eq!(validity, Validity::Reinitialized);
    }

    #[test]
    fn reinitialized_store_is_persisted() {
        let (mut store, _) = ConfigStore::open(Box::new(MemoryStorage::default()), D1).unwrap();
        let data = store.storage.load().unwrap().unwrap();
        assert_eq!(ConfigRecord::decode(&data), Some(ConfigRecord::fresh(D1)));
    }

    #[test]
    fn credential_update_is_length_checked() {
        let (mut store, _) = ConfigStore::open(Box::new(stamped(D1)), D1).unwrap();
        assert!(matches!(
            store.update_credentials("a-network-name-too-long", "x"),
            Err(AppError::CredentialTooLong { field: "wifi_ssid", .. })
        ));
        assert_eq!(store.record().ssid, "home");

        store.update_credentials("office", "hunter2").unwrap();
        let data = store.storage.load().unwrap().unwrap();
        let saved = ConfigRecord::decode(&data).unwrap();
        assert_eq!(saved.ssid, "office");
        assert_eq!(saved.password, "hunter2");
        assert!(saved.is_valid_for(D1));
    }
}
// EOF
