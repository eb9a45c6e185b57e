#[cfg(target_os = "espidf")]
fn main() {
    firmware::run()
}

#[cfg(not(target_os = "espidf"))]
fn main() {
    eprintln!("sensor-node is ESP32 firmware; build it for an ESP-IDF target (e.g. xtensa-esp32-espidf)");
    std::process::exit(1);
}

#[cfg(target_os = "espidf")]
mod firmware {
    use std::sync::Arc;

    use embassy_executor::{Executor, Spawner};
    use esp_idf_svc::eventloop::EspSystemEventLoop;
    use esp_idf_svc::hal::gpio::IOPin;
    use esp_idf_svc::hal::peripherals::Peripherals;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;
    use log::{error, info, warn};

    use sensor_node::api::EspCoordinatorApi;
    use sensor_node::config::DeviceConfig;
    use sensor_node::connectivity::ConnectivitySupervisor;
    use sensor_node::event_signal::EventSignal;
    use sensor_node::mqtt_client::{EspBrokerSession, SharedSession};
    use sensor_node::node::{bring_up, halt, FatalError};
    use sensor_node::publisher::{EventPublisher, SystemClock};
    use sensor_node::registration::RegistrationClient;
    use sensor_node::sensor_input::GpioTrigger;
    use sensor_node::storage::{mount_config_partition, CONFIG_PATH};
    use sensor_node::system_state::ConnectionStatus;
    use sensor_node::time_sync::start_sntp;
    use sensor_node::wifi_client::EspWifiLink;

    type Supervisor = ConnectivitySupervisor<'static, EspWifiLink, EspBrokerSession>;
    type Publisher = EventPublisher<'static, EspBrokerSession, GpioTrigger, SystemClock>;

    /// Everything the boot task needs, built before the executor starts
    struct NodeContext {
        config: &'static DeviceConfig,
        session: &'static SharedSession<EspBrokerSession>,
        status: &'static ConnectionStatus,
        supervisor: Supervisor,
        registration: RegistrationClient<EspCoordinatorApi>,
        trigger: GpioTrigger,
        signal: Arc<EventSignal>,
    }

    pub fn run() -> ! {
        // It is necessary to call this function once. Otherwise some patches to the runtime
        // implemented by esp-idf-sys might not link properly. See https://github.com/esp-rs/esp-idf-template/issues/71
        esp_idf_svc::sys::link_patches();

        // Bind the log crate to the ESP Logging facilities
        esp_idf_svc::log::EspLogger::initialize_default();

        info!("🚀 Sensor node starting");

        let context = match build_context() {
            Ok(context) => context,
            Err(e) => halt(&e),
        };

        let executor: &'static mut Executor = Box::leak(Box::new(Executor::new()));
        executor.run(move |spawner| {
            spawner.must_spawn(boot_task(spawner, context));
        })
    }

    fn build_context() -> Result<NodeContext, FatalError> {
        mount_config_partition().map_err(|e| FatalError::Storage(format!("{:?}", e)))?;
        let config: &'static DeviceConfig = Box::leak(Box::new(DeviceConfig::load(CONFIG_PATH)?));

        let peripherals =
            Peripherals::take().map_err(|e| FatalError::Peripheral(format!("{:?}", e)))?;
        let sys_loop =
            EspSystemEventLoop::take().map_err(|e| FatalError::Peripheral(format!("{:?}", e)))?;
        let nvs = match EspDefaultNvsPartition::take() {
            Ok(nvs) => Some(nvs),
            Err(e) => {
                warn!("⚠️ NVS partition unavailable, Wi-Fi calibration data will not persist: {:?}", e);
                None
            }
        };

        let wifi = EspWifiLink::new(peripherals.modem, sys_loop, nvs)
            .map_err(|e| FatalError::Peripheral(format!("Wi-Fi: {:#}", e)))?;

        // Sensor line on GPIO4
        let trigger = GpioTrigger::new(peripherals.pins.gpio4.downgrade())
            .map_err(|e| FatalError::Peripheral(format!("sensor pin: {:#}", e)))?;

        let session: &'static SharedSession<EspBrokerSession> = Box::leak(Box::new(
            SharedSession::new(EspBrokerSession::new(config.timing.connect_timeout)),
        ));
        let status: &'static ConnectionStatus = Box::leak(Box::new(ConnectionStatus::new()));

        let registration = RegistrationClient::new(
            EspCoordinatorApi::new(config.coordinator_base_url(), config.timing.http_timeout),
            config.timing.registration_retry_delay,
            config.timing.http_timeout,
        );

        Ok(NodeContext {
            config,
            session,
            status,
            supervisor: ConnectivitySupervisor::new(config, wifi, session, status),
            registration,
            trigger,
            signal: Arc::new(EventSignal::new()),
        })
    }

    #[embassy_executor::task]
    async fn boot_task(spawner: Spawner, context: NodeContext) {
        let NodeContext {
            config,
            session,
            status,
            mut supervisor,
            mut registration,
            mut trigger,
            signal,
        } = context;

        if let Err(e) = bring_up(&mut supervisor, &mut registration, &mut trigger, signal.clone()).await {
            halt(&e);
        }

        // Held for the process lifetime so the clock stays disciplined
        let _sntp = match start_sntp(config.timing.connect_timeout).await {
            Ok(sntp) => Some(sntp),
            Err(e) => {
                error!("❌ {:#}", e);
                None
            }
        };

        let publisher = EventPublisher::new(
            &config.device_name,
            session,
            status,
            signal,
            trigger,
            SystemClock,
        );
        spawner.must_spawn(publisher_task(publisher));

        supervisor.run().await;
    }

    #[embassy_executor::task]
    async fn publisher_task(mut publisher: Publisher) {
        publisher.run().await;
    }
}
