// ECG Telemetry — ESP32-C3 drivers (device build only)

pub mod ble;
pub mod ecg;
pub mod imu;
pub mod leads;
pub mod timer;
