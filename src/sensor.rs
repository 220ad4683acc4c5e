use crate::config::Config;
use crate::engine::SensorSource;
use crate::error::ReadError;
use crate::reading::{Reading, SensorIdentity};
use chrono::Utc;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_modbus::client::{rtu, Context};
use tokio_modbus::prelude::Reader;
use tokio_modbus::slave::Slave;
use tokio_serial::SerialStream;

const REGISTER_BASE: u16 = 0x0000;
const CHANNEL_COUNT: u16 = 7;

/// 7-in-1 soil probe on a Modbus RTU serial link. The port is opened lazily
/// and dropped on any failed exchange, so a flaky link recovers on the next
/// cycle instead of wedging the session.
pub struct SoilProbe {
    port_path: String,
    baud: u32,
    unit: u8,
    read_timeout: Duration,
    identity: SensorIdentity,
    ctx: Option<Context>,
}

impl SoilProbe {
    pub fn new(config: &Config) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("model".to_string(), "npk-7in1".to_string());
        metadata.insert("serial_port".to_string(), config.serial_port.clone());
        metadata.insert("baud".to_string(), config.serial_baud.to_string());
        metadata.insert("modbus_unit".to_string(), config.modbus_unit.to_string());

        Self {
            port_path: config.serial_port.clone(),
            baud: config.serial_baud,
            unit: config.modbus_unit,
            read_timeout: config.serial_timeout,
            identity: SensorIdentity {
                machine_id: config.machine_id.clone(),
                metadata,
            },
            ctx: None,
        }
    }

    fn open_port(&self) -> Result<Context, ReadError> {
        let builder = tokio_serial::new(self.port_path.clone(), self.baud).timeout(self.read_timeout);
        let port = SerialStream::open(&builder)?;
        tracing::info!(port = %self.port_path, baud = self.baud, "serial port opened");
        Ok(rtu::attach_slave(port, Slave(self.unit)))
    }

    async fn poll_registers(&mut self) -> Result<Vec<u16>, ReadError> {
        let mut ctx = match self.ctx.take() {
            Some(ctx) => ctx,
            None => self.open_port()?,
        };
        let poll = ctx.read_holding_registers(REGISTER_BASE, CHANNEL_COUNT);
        match tokio::time::timeout(self.read_timeout, poll).await {
            Ok(Ok(registers)) => {
                // Keep the session only after a clean exchange.
                self.ctx = Some(ctx);
                Ok(registers)
            }
            Ok(Err(err)) => Err(ReadError::Transport(err)),
            Err(_) => Err(ReadError::Timeout(self.read_timeout)),
        }
    }
}

impl SensorSource for SoilProbe {
    fn identity(&self) -> SensorIdentity {
        self.identity.clone()
    }

    async fn read_once(&mut self) -> Result<Reading, ReadError> {
        let registers = self.poll_registers().await?;
        let measurements = decode_channels(&registers)?;
        Ok(Reading {
            sensor_id: self.identity.machine_id.clone(),
            timestamp: Utc::now(),
            measurements,
        })
    }
}

/// Register map of the probe: moisture, temperature and pH are fixed-point
/// with one decimal; conductivity and N/P/K are raw integer readings.
fn decode_channels(registers: &[u16]) -> Result<BTreeMap<String, f64>, ReadError> {
    if registers.len() < CHANNEL_COUNT as usize {
        return Err(ReadError::ShortResponse {
            want: CHANNEL_COUNT as usize,
            got: registers.len(),
        });
    }

    let mut channels = BTreeMap::new();
    channels.insert("moisture".to_string(), f64::from(registers[0]) / 10.0);
    channels.insert("temperature".to_string(), f64::from(registers[1] as i16) / 10.0);
    channels.insert("conductivity".to_string(), f64::from(registers[2]));
    channels.insert("ph".to_string(), f64::from(registers[3]) / 10.0);
    channels.insert("nitrogen".to_string(), f64::from(registers[4]));
    channels.insert("phosphorus".to_string(), f64::from(registers[5]));
    channels.insert("potassium".to_string(), f64::from(registers[6]));
    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_channels_scales_fixed_point_values() {
        // 0xFF38 is -200 as i16, i.e. -20.0 degrees.
        let registers = [123u16, 0xFF38, 450, 68, 12, 5, 9];
        let channels = decode_channels(&registers).unwrap();

        assert_eq!(channels["moisture"], 12.3);
        assert_eq!(channels["temperature"], -20.0);
        assert_eq!(channels["conductivity"], 450.0);
        assert_eq!(channels["ph"], 6.8);
        assert_eq!(channels["nitrogen"], 12.0);
        assert_eq!(channels["phosphorus"], 5.0);
        assert_eq!(channels["potassium"], 9.0);
    }

    #[test]
    fn decode_channels_rejects_short_response() {
        let err = decode_channels(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, ReadError::ShortResponse { want: 7, got: 3 }));
    }
}
