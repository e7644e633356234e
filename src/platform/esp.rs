// platform/esp.rs: ESP32 board support: NVS, UART, Wi-Fi, SPIFFS, task pinning

use esp_idf_hal::{
    cpu::Core as EspCore,
    gpio::{AnyIOPin, Pins},
    peripherals::Peripherals,
    task::thread::ThreadSpawnConfiguration,
    uart::{self, AsyncUartDriver, UartDriver},
    units::Hertz,
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    nvs,
    io::Write as _,
    ota::{EspOta, EspOtaUpdate},
    wifi::{AccessPointConfiguration, AuthMethod, ClientConfiguration, Configuration, EspWifi},
};
use esp_idf_sys::{esp, EspError};

use crate::*;

const SPIFFS_BASE: &[u8] = b"/spiffs\0";
const SPIFFS_MAX_FILES: usize = 5;
const CONFIG_NAME: &str = "cfg";
const NVS_NAMESPACE: &str = "pmeter";

pub type Link = UartLink;

impl From<EspError> for AppError {
    fn from(e: EspError) -> Self {
        AppError::Message(format!("ESP-IDF error: {e:?}"))
    }
}

pub fn init_logging() {
    esp_idf_sys::link_patches();
    esp_idf_svc::log::EspLogger::initialize_default();
}

pub fn configure_worker_thread(spec: &WorkerSpec) -> AppResult<()> {
    ThreadSpawnConfiguration {
        name: None,
        stack_size: spec.stack_size,
        priority: spec.priority,
        inherit: false,
        pin_to_core: Some(match spec.core {
            Core::Core0 => EspCore::Core0,
            Core::Core1 => EspCore::Core1,
        }),
    }
    .set()?;
    Ok(())
}

pub fn reset_worker_thread_config() -> AppResult<()> {
    ThreadSpawnConfiguration::default().set()?;
    Ok(())
}

pub fn thread_stack_size(spec: &WorkerSpec) -> usize {
    spec.stack_size
}

pub fn restart() -> ! {
    esp_idf_hal::reset::restart();
}

fn device_identity() -> AppResult<DeviceIdentity> {
    let mut mac = [0u8; 6];
    esp!(unsafe { esp_idf_sys::esp_efuse_mac_get_default(mac.as_mut_ptr()) })?;
    Ok(DeviceIdentity::from_mac(mac))
}

pub struct NvsStorage {
    nvs: nvs::EspNvs<nvs::NvsDefault>,
}

impl ConfigStorage for NvsStorage {
    fn load(&mut self) -> AppResult<Option<Vec<u8>>> {
        let mut nvsbuf = [0u8; NVS_BUF_SIZE];
        info!("Reading up to {sz} bytes from nvs...", sz = NVS_BUF_SIZE);
        Ok(self.nvs.get_raw(CONFIG_NAME, &mut nvsbuf)?.map(|b| b.to_vec()))
    }

    fn store(&mut self, data: &[u8]) -> AppResult<()> {
        self.nvs.set_raw(CONFIG_NAME, data)?;
        Ok(())
    }
}

/// The meter's UART, read through the async driver so a pending receive
/// parks the task instead of spinning.
pub struct UartLink {
    uart: AsyncUartDriver<'static, UartDriver<'static>>,
}

fn link_error(e: EspError) -> ProtocolError {
    warn!("UART error: {e:?}");
    ProtocolError::Io(std::io::ErrorKind::Other)
}

impl MeterLink for UartLink {
    async fn send(&mut self, frame: &[u8]) -> Result<(), ProtocolError> {
        let mut sent = 0;
        while sent < frame.len() {
            sent += self.uart.write(&frame[sent..]).await.map_err(link_error)?;
        }
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, ProtocolError> {
        self.uart.read(buf).await.map_err(link_error)
    }

    fn discard_input(&mut self) {
        if let Err(e) = self.uart.driver().clear_rx() {
            warn!("UART clear_rx: {e:?}");
        }
    }
}

/// Uploaded images go to the next OTA slot; `complete` makes it the boot slot.
pub struct EspFirmware {
    ota: EspOta,
}

struct OtaSink<'a> {
    update: EspOtaUpdate<'a>,
}

impl FirmwareUpdate for EspFirmware {
    fn begin(&mut self) -> AppResult<Box<dyn FirmwareSink + '_>> {
        Ok(Box::new(OtaSink {
            update: self.ota.initiate_update()?,
        }))
    }
}

impl FirmwareSink for OtaSink<'_> {
    fn write(&mut self, mut chunk: &[u8]) -> AppResult<()> {
        while !chunk.is_empty() {
            match self.update.write(chunk)? {
                0 => return Err(AppError::Message("OTA partition full".into())),
                n => chunk = &chunk[n..],
            }
        }
        Ok(())
    }

    fn complete(self: Box<Self>) -> AppResult<()> {
        self.update.complete()?;
        Ok(())
    }

    fn abort(self: Box<Self>) {
        if let Err(e) = self.update.abort() {
            warn!("OTA abort: {e:?}");
        }
    }
}

pub struct EspNet {
    wifi: EspWifi<'static>,
}

fn too_long(what: &str) -> AppError {
    AppError::Message(format!("{what} too long for Wi-Fi driver"))
}

impl NetworkControl for EspNet {
    fn start_station(&mut self, ssid: &str, password: &str) -> AppResult<()> {
        let auth_method = if password.is_empty() {
            AuthMethod::None
        } else {
            AuthMethod::WPA2Personal
        };
        self.wifi
            .set_configuration(&Configuration::Client(ClientConfiguration {
                ssid: ssid.try_into().map_err(|_| too_long("ssid"))?,
                password: password.try_into().map_err(|_| too_long("password"))?,
                auth_method,
                ..Default::default()
            }))?;
        self.wifi.start()?;
        info!("MAC address: {:02X?}", self.wifi.sta_netif().get_mac()?);
        self.wifi.connect()?;
        Ok(())
    }

    fn is_connected(&self) -> AppResult<bool> {
        Ok(self.wifi.is_up()?)
    }

    fn start_access_point(&mut self, ssid: &str, password: &str) -> AppResult<()> {
        if self.wifi.is_started()? {
            self.wifi.stop()?;
        }
        self.wifi
            .set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
                ssid: ssid.try_into().map_err(|_| too_long("ssid"))?,
                password: password.try_into().map_err(|_| too_long("password"))?,
                auth_method: AuthMethod::WPA2Personal,
                ..Default::default()
            }))?;
        self.wifi.start()?;
        info!("AP IP address: {}", self.wifi.ap_netif().get_ip_info()?.ip);
        Ok(())
    }

    fn disable_access_point(&mut self) -> AppResult<()> {
        if let Configuration::Mixed(client, _) = self.wifi.get_configuration()? {
            self.wifi.set_configuration(&Configuration::Client(client))?;
        }
        info!("Local IP address: {}", self.wifi.sta_netif().get_ip_info()?.ip);
        Ok(())
    }
}

fn mount_spiffs() -> AppResult<()> {
    let conf = esp_idf_sys::esp_vfs_spiffs_conf_t {
        base_path: SPIFFS_BASE.as_ptr() as *const _,
        partition_label: std::ptr::null(),
        max_files: SPIFFS_MAX_FILES as _,
        format_if_mount_failed: true,
    };
    esp!(unsafe { esp_idf_sys::esp_vfs_spiffs_register(&conf) })?;

    let (mut total, mut used) = (0usize, 0usize);
    esp!(unsafe { esp_idf_sys::esp_spiffs_info(std::ptr::null(), &mut total, &mut used) })?;
    info!("SPIFFS opened, {used} of {total} bytes used");
    Ok(())
}

fn open_uart(uart2: uart::UART2, pins: Pins) -> AppResult<UartLink> {
    let cfg = uart::config::Config::new().baudrate(Hertz(PZEM_BAUD));

    // PZEM on UART2: TX GPIO18, RX GPIO23 (S3: TX GPIO17, RX GPIO18)
    #[cfg(not(feature = "esp32s3"))]
    let driver = UartDriver::new(
        uart2,
        pins.gpio18,
        pins.gpio23,
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &cfg,
    )?;
    #[cfg(feature = "esp32s3")]
    let driver = UartDriver::new(
        uart2,
        pins.gpio17,
        pins.gpio18,
        Option::<AnyIOPin>::None,
        Option::<AnyIOPin>::None,
        &cfg,
    )?;

    Ok(UartLink {
        uart: AsyncUartDriver::wrap(driver)?,
    })
}

pub fn boot() -> anyhow::Result<Boot<EspNet, Link, IdleFileTransfer>> {
    // one eventfd per tokio runtime with an I/O driver
    #[allow(clippy::needless_update)]
    let config = esp_idf_sys::esp_vfs_eventfd_config_t {
        max_fds: 4,
        ..Default::default()
    };
    esp! { unsafe { esp_idf_sys::esp_vfs_eventfd_register(&config) } }?;

    let sysloop = EspSystemEventLoop::take()?;
    let nvs_default_partition = nvs::EspDefaultNvsPartition::take()?;

    let nvs = match nvs::EspNvs::new(nvs_default_partition.clone(), NVS_NAMESPACE, true) {
        Ok(nvs) => {
            info!("Got namespace {NVS_NAMESPACE:?} from default partition");
            nvs
        }
        Err(e) => panic!("Could not get namespace {NVS_NAMESPACE}: {e:?}"),
    };

    let mut ota = EspOta::new()?;
    let running_slot = ota.get_running_slot()?;
    ota.mark_running_slot_valid()?;
    info!("OTA slot: {} ({:?})", &running_slot.label, running_slot.state);

    let identity = device_identity()?;
    info!("Device identity {:016X}", identity.0);

    let Peripherals {
        modem, pins, uart2, ..
    } = Peripherals::take()?;
    let wifi = EspWifi::new(modem, sysloop, Some(nvs_default_partition))?;

    mount_spiffs()?;

    Ok(Boot {
        identity,
        storage: Box::new(NvsStorage { nvs }),
        firmware: Box::new(EspFirmware { ota }),
        net: EspNet { wifi },
        link: open_uart(uart2, pins)?,
        ftp: IdleFileTransfer::new(FTP_USER, FTP_PASS),
        assets: "/spiffs".into(),
        http_addr: net::SocketAddr::from(([0, 0, 0, 0], DEFAULT_API_PORT)),
        join: JoinPolicy::default(),
        poller: PollerConfig::default(),
    })
}

// EOF
