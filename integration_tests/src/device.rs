//! Modem communication client.

use std::io::{Read as _, Write as _};
use std::time::{Duration, Instant};

use anyhow::Result;
use embedded_hal_async::delay::DelayNs;
use embedded_io::{ErrorKind, ErrorType};
use serialport::SerialPort;
use water_level_rust_firmware::lorawan::Region;
use water_level_rust_firmware::modem::Rn2903Modem;

/// Find ports with an RN2903 attached by probing with `sys get ver`.
pub fn find_modem_ports(baud_rate: u32) -> Result<Vec<String>> {
    let ports = serialport::available_ports()?;
    let mut modem_ports = Vec::new();

    for port_info in ports {
        // USB-UART bridges and CDC-ACM devices
        let name = &port_info.port_name;
        if !(name.contains("ttyUSB") || name.contains("ttyACM") || name.contains("usbserial")) {
            continue;
        }

        if let Ok(mut client) = DeviceClient::new(name, baud_rate) {
            // Set short timeout for probing
            client.set_timeout(Duration::from_millis(500));
            if let Ok(version) = client.command("sys get ver") {
                if version.starts_with("RN2903") {
                    modem_ports.push(name.clone());
                }
            }
        }
    }

    Ok(modem_ports)
}

/// Resolve a port argument - returns the port path if not "auto", otherwise auto-detects.
pub fn resolve_port(port_arg: &str, baud_rate: u32) -> Result<String> {
    if port_arg != "auto" {
        return Ok(port_arg.to_string());
    }
    match find_modem_ports(baud_rate)?.into_iter().next() {
        Some(port) => Ok(port),
        None => anyhow::bail!("No modem found - ensure the RN2903 is connected and powered"),
    }
}

/// Client for talking to the modem directly and through the firmware driver.
pub struct DeviceClient {
    port: Box<dyn SerialPort>,
    timeout: Duration,
}

impl DeviceClient {
    /// Open the modem port.
    pub fn new(port_name: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(100))
            .open()?;

        Ok(Self {
            port,
            timeout: Duration::from_secs(2),
        })
    }

    /// Set the reply timeout for raw commands.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Clear any pending data in the serial buffer.
    pub fn clear_buffer(&mut self) -> Result<()> {
        self.port.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }

    /// Send one raw command line and return the reply line.
    pub fn command(&mut self, line: &str) -> Result<String> {
        self.port.write_all(line.as_bytes())?;
        self.port.write_all(b"\r\n")?;
        self.port.flush()?;
        self.read_line()
    }

    /// Read bytes until a non-empty CRLF-terminated line.
    fn read_line(&mut self) -> Result<String> {
        let mut data = Vec::new();
        let mut buf = [0u8; 1];
        let start = Instant::now();

        while start.elapsed() < self.timeout {
            match self.port.read(&mut buf) {
                Ok(1) => match buf[0] {
                    b'\n' if !data.is_empty() => {
                        return Ok(String::from_utf8_lossy(&data).into_owned());
                    }
                    b'\r' | b'\n' => {}
                    byte => data.push(byte),
                },
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(e.into()),
            }
        }

        anyhow::bail!(
            "Timeout waiting for reply, got {} bytes: {:?}",
            data.len(),
            String::from_utf8_lossy(&data)
        );
    }

    /// The firmware's modem driver running over this port, for a modem
    /// whose firmware runs `region`.
    pub fn modem(&mut self, region: Region) -> Rn2903Modem<PortIo<'_>, StdDelay> {
        Rn2903Modem::new(
            PortIo {
                port: self.port.as_mut(),
                timeout: self.timeout,
            },
            StdDelay,
            region,
        )
    }
}

/// Serial I/O error as seen by the driver.
#[derive(Debug)]
pub struct PortError(std::io::ErrorKind);

impl embedded_io::Error for PortError {
    fn kind(&self) -> ErrorKind {
        match self.0 {
            std::io::ErrorKind::TimedOut => ErrorKind::TimedOut,
            std::io::ErrorKind::Interrupted => ErrorKind::Interrupted,
            _ => ErrorKind::Other,
        }
    }
}

/// Async I/O adapter over a blocking serial port.
///
/// A read that sees no data for `timeout` is reported as end of data, which
/// the driver turns into a `Timeout` error.
pub struct PortIo<'a> {
    port: &'a mut dyn SerialPort,
    timeout: Duration,
}

impl ErrorType for PortIo<'_> {
    type Error = PortError;
}

impl embedded_io_async::Read for PortIo<'_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, PortError> {
        let start = Instant::now();
        loop {
            match self.port.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                    if start.elapsed() >= self.timeout {
                        return Ok(0);
                    }
                }
                Err(e) => return Err(PortError(e.kind())),
            }
        }
    }
}

impl embedded_io_async::Write for PortIo<'_> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, PortError> {
        self.port.write(buf).map_err(|e| PortError(e.kind()))
    }

    async fn flush(&mut self) -> Result<(), PortError> {
        self.port.flush().map_err(|e| PortError(e.kind()))
    }
}

/// Blocking delay for driving the async code under `block_on`.
pub struct StdDelay;

impl DelayNs for StdDelay {
    async fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(ns as u64));
    }
}
