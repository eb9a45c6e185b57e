// Wi-Fi station link
// The supervisor drives association through the WifiLink trait; the ESP-IDF
// implementation below wraps the blocking Wi-Fi driver and polls for the
// association with embassy timers so the executor is never stalled

use std::net::Ipv4Addr;

use embassy_time::Duration;

use crate::config::WifiCredentials;

/// Station-mode Wi-Fi link
#[allow(async_fn_in_trait)]
pub trait WifiLink {
    /// Make one association attempt, giving up after `timeout`
    async fn associate(
        &mut self,
        credentials: &WifiCredentials,
        timeout: Duration,
    ) -> anyhow::Result<Ipv4Addr>;

    /// Whether the station is currently associated
    fn is_connected(&self) -> bool;
}

#[cfg(target_os = "espidf")]
pub use esp::EspWifiLink;

#[cfg(target_os = "espidf")]
mod esp {
    use std::net::Ipv4Addr;

    use anyhow::{anyhow, Context};
    use embassy_time::{Duration, Instant, Timer};
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::hal::modem::Modem;
    use esp_idf_svc::hal::peripheral::Peripheral;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use esp_idf_svc::wifi::{AuthMethod, BlockingWifi, ClientConfiguration, Configuration, EspWifi};
    use log::{debug, info, warn};

    use super::WifiLink;
    use crate::config::WifiCredentials;

    const ASSOCIATION_POLL_MS: u64 = 250;

    /// ESP-IDF station driver
    pub struct EspWifiLink {
        wifi: BlockingWifi<EspWifi<'static>>,
    }

    impl EspWifiLink {
        pub fn new(
            modem: impl Peripheral<P = Modem> + 'static,
            sys_loop: EspSystemEventLoop,
            nvs: Option<EspDefaultNvsPartition>,
        ) -> anyhow::Result<Self> {
            info!("📶 Initializing Wi-Fi station driver");

            let wifi = EspWifi::new(modem, sys_loop.clone(), nvs)?;
            let wifi = BlockingWifi::wrap(wifi, sys_loop)?;

            Ok(Self { wifi })
        }

        fn configure(&mut self, credentials: &WifiCredentials) -> anyhow::Result<()> {
            let wifi_config = Configuration::Client(ClientConfiguration {
                ssid: credentials
                    .ssid
                    .as_str()
                    .try_into()
                    .map_err(|_| anyhow!("SSID too long: {}", credentials.ssid))?,
                password: credentials
                    .passphrase
                    .as_str()
                    .try_into()
                    .map_err(|_| anyhow!("Wi-Fi passphrase too long"))?,
                auth_method: AuthMethod::WPA2Personal,
                ..Default::default()
            });

            self.wifi.set_configuration(&wifi_config)?;
            if !self.wifi.is_started()? {
                self.wifi.start()?;
                debug!("Wi-Fi driver started");
            }
            Ok(())
        }
    }

    impl WifiLink for EspWifiLink {
        async fn associate(
            &mut self,
            credentials: &WifiCredentials,
            timeout: Duration,
        ) -> anyhow::Result<Ipv4Addr> {
            info!("📶 Associating with Wi-Fi network: {}", credentials.ssid);
            self.configure(credentials)?;

            if self.wifi.is_connected()? {
                self.wifi.wifi_mut().disconnect().ok();
            }

            // Initiate only; completion is observed by polling below
            self.wifi
                .wifi_mut()
                .connect()
                .context("Wi-Fi connect request failed")?;

            let deadline = Instant::now() + timeout;
            while Instant::now() < deadline {
                if self.wifi.is_connected()? && self.wifi.wifi().sta_netif().is_up()? {
                    let ip_info = self.wifi.wifi().sta_netif().get_ip_info()?;
                    info!("✅ Wi-Fi associated, IP: {}", ip_info.ip);
                    return Ok(ip_info.ip);
                }
                Timer::after(Duration::from_millis(ASSOCIATION_POLL_MS)).await;
            }

            warn!("⏱️ Wi-Fi association timed out after {}s", timeout.as_secs());
            self.wifi.wifi_mut().disconnect().ok();
            Err(anyhow!("Wi-Fi association timed out"))
        }

        fn is_connected(&self) -> bool {
            self.wifi.is_connected().unwrap_or(false)
        }
    }
}
