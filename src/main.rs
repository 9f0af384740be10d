// ECG Telemetry — Firmware Entry Point
//
// Boot sequence:
//   1. Bring up NVS and the BLE stack (GATT server registered, not advertising).
//   2. Initialise the lead-off inputs and the ECG ADC; a failure halts boot
//      before the device ever becomes connectable.
//   3. Optionally attach the MPU6050 (non-fatal if absent).
//   4. Start advertising.
//   5. Start the sampler: a periodic timer + worker thread (deferred variant)
//      or a polling thread (cooperative variant).
//
// On a host build the same pipeline runs against the simulator.

#[cfg(target_os = "espidf")]
fn main() -> anyhow::Result<()> {
    device::run()
}

#[cfg(not(target_os = "espidf"))]
fn main() -> anyhow::Result<()> {
    host::run()
}

#[cfg(target_os = "espidf")]
mod device {
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use esp_idf_hal::gpio::InputPin;
    use esp_idf_hal::i2c::{I2cConfig, I2cDriver};
    use esp_idf_hal::prelude::*;
    use esp_idf_svc::nvs::EspDefaultNvsPartition;

    use ecg_telemetry::acquisition::InertialChannel;
    use ecg_telemetry::config::*;
    use ecg_telemetry::drivers::ble::{BleNotifier, BleStack, EcgGattServer};
    use ecg_telemetry::drivers::ecg::EcgAdc;
    use ecg_telemetry::drivers::imu::Mpu6050;
    use ecg_telemetry::drivers::leads::LeadPins;
    use ecg_telemetry::drivers::timer;
    use ecg_telemetry::link::{ConnectionCallbacks, ConnectionStateMachine};
    use ecg_telemetry::pipeline::Pipeline;
    use ecg_telemetry::scheduler::{tick_channel, ScheduleMode, SystemClock};
    use ecg_telemetry::tasks::sampler;

    pub fn run() -> anyhow::Result<()> {
        // Link esp-idf-sys runtime patches and initialise logging.
        esp_idf_svc::sys::link_patches();
        esp_idf_svc::log::EspLogger::initialize_default();

        let config = PipelineConfig::selected();
        log::info!(
            "ECG telemetry starting… ({:?}, {:?}, {} per notify, {:.0} Hz)",
            config.schedule,
            config.wire_format,
            config.capacity,
            config.rate_hz()
        );

        // ---- Peripherals --------------------------------------------------
        let peripherals = Peripherals::take()?;
        let nvs = EspDefaultNvsPartition::take()?;

        // ---- BLE ----------------------------------------------------------
        let stack = BleStack::new(peripherals.modem, nvs)?;
        let advertiser = stack.advertiser();
        let machine = Arc::new(ConnectionStateMachine::new(advertiser.clone()));
        let callbacks: Arc<dyn ConnectionCallbacks> = machine.clone();
        let server = EcgGattServer::start(&stack, advertiser, callbacks)?;

        // ---- Acquisition --------------------------------------------------
        let leads = LeadPins::new(
            peripherals.pins.gpio8.downgrade_input(),  // LO+
            peripherals.pins.gpio20.downgrade_input(), // LO-
        )?;

        let imu: Option<Box<dyn InertialChannel>> = if config.motion_threshold.is_some() {
            let i2c_config = I2cConfig::new().baudrate(I2C_BAUDRATE_KHZ.kHz().into());
            let i2c = I2cDriver::new(
                peripherals.i2c0,
                peripherals.pins.gpio6, // SDA
                peripherals.pins.gpio7, // SCL
                &i2c_config,
            )?;
            Some(Box::new(Mpu6050::new(i2c)))
        } else {
            None
        };

        thread::sleep(Duration::from_millis(BOOT_SETTLE_MS));

        // Advertising starts only once the front end is up.
        let mut pipeline = Pipeline::bring_up(
            &config,
            EcgAdc::new(),
            leads,
            BleNotifier::new(server),
            imu,
            &machine,
        )?;

        // ---- Sampler ------------------------------------------------------
        // The timer handle must outlive main's loop below.
        let _timer = match config.schedule {
            ScheduleMode::Deferred => {
                let (producer, consumer) = tick_channel();
                thread::Builder::new()
                    .name("sampler".into())
                    .stack_size(STACK_SAMPLER)
                    .spawn(move || {
                        sampler::deferred_task(pipeline, consumer);
                    })?;
                Some(timer::start(config.period_us, producer)?)
            }
            ScheduleMode::Cooperative => {
                let period_us = config.period_us;
                thread::Builder::new()
                    .name("sampler".into())
                    .stack_size(STACK_SAMPLER)
                    .spawn(move || {
                        sampler::cooperative_task(&mut pipeline, &SystemClock::new(), period_us, None);
                    })?;
                None
            }
        };

        log::info!("Boot complete — sampling");

        // Main thread has nothing left to do — park it forever.
        loop {
            thread::sleep(Duration::from_secs(60));
        }
    }
}

#[cfg(not(target_os = "espidf"))]
mod host {
    use ecg_telemetry::config::PipelineConfig;
    use ecg_telemetry::sim;

    /// Ticks per simulated session, about two seconds at either rate.
    const SESSION_TICKS: u32 = 800;

    pub fn run() -> anyhow::Result<()> {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

        let script = sim::default_peer_script();
        for config in [
            PipelineConfig::text_stream(),
            PipelineConfig::binary_batch(),
            PipelineConfig::binary_batch_with_motion(),
        ] {
            let report = sim::run_session(&config, SESSION_TICKS, &script)?;
            log::info!(
                "ticks={} delivered={} discarded={} failed={} advertised={}x overflows={}",
                report.stats.ticks,
                report.delivered,
                report.stats.dispatch.discarded,
                report.stats.dispatch.failed,
                report.advertise_count,
                report.stats.overflows,
            );
        }
        Ok(())
    }
}
