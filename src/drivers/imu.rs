// ECG Telemetry — MPU6050 Accelerometer Driver
//
// Register-level driver over I2C. Only the accelerometer is used; raw counts
// feed the motion artifact filter directly, no unit conversion.

use anyhow::bail;
use esp_idf_hal::i2c::I2cDriver;

use crate::acquisition::InertialChannel;
use crate::config::*;
use crate::events::InertialReading;

// MPU6050 register addresses
const REG_PWR_MGMT_1: u8 = 0x6B;
const REG_CONFIG: u8 = 0x1A;
const REG_ACCEL_CONFIG: u8 = 0x1C;
const REG_ACCEL_XOUT_H: u8 = 0x3B; // Start of 6-byte accel burst
const REG_WHO_AM_I: u8 = 0x75;
const WHO_AM_I_EXPECTED: u8 = 0x68;

pub struct Mpu6050 {
    bus: I2cDriver<'static>,
    ready: bool,
}

impl Mpu6050 {
    pub fn new(bus: I2cDriver<'static>) -> Self {
        Self { bus, ready: false }
    }

    /// Verify the device is reachable on the I2C bus.
    pub fn is_connected(&mut self) -> bool {
        let mut buf = [0u8; 1];
        match self
            .bus
            .write_read(I2C_ADDR_MPU6050, &[REG_WHO_AM_I], &mut buf, I2C_TIMEOUT_TICKS)
        {
            Ok(()) => buf[0] == WHO_AM_I_EXPECTED,
            Err(_) => false,
        }
    }
}

impl InertialChannel for Mpu6050 {
    /// Wake the sensor and configure accel (±2 g), DLPF 44 Hz.
    fn begin(&mut self) -> anyhow::Result<()> {
        if self.ready {
            return Ok(());
        }
        if !self.is_connected() {
            bail!("MPU6050 not responding at 0x{:02x}", I2C_ADDR_MPU6050);
        }

        // Wake up (clear SLEEP bit)
        self.bus
            .write(I2C_ADDR_MPU6050, &[REG_PWR_MGMT_1, 0x00], I2C_TIMEOUT_TICKS)?;

        // DLPF bandwidth 44 Hz
        self.bus
            .write(I2C_ADDR_MPU6050, &[REG_CONFIG, 0x03], I2C_TIMEOUT_TICKS)?;

        // Accelerometer: ±2 g
        self.bus
            .write(I2C_ADDR_MPU6050, &[REG_ACCEL_CONFIG, 0x00], I2C_TIMEOUT_TICKS)?;

        self.ready = true;
        log::info!("MPU6050 connected (±2g, DLPF 44Hz)");
        Ok(())
    }

    /// Burst-read the three accelerometer axes.
    fn read(&mut self) -> anyhow::Result<InertialReading> {
        let mut raw = [0u8; 6];
        self.bus.write_read(
            I2C_ADDR_MPU6050,
            &[REG_ACCEL_XOUT_H],
            &mut raw,
            I2C_TIMEOUT_TICKS,
        )?;

        Ok(InertialReading {
            x: i16::from_be_bytes([raw[0], raw[1]]),
            y: i16::from_be_bytes([raw[2], raw[3]]),
            z: i16::from_be_bytes([raw[4], raw[5]]),
        })
    }
}
