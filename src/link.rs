//! # Serial Link
//!
//! The protocol engine talks to the controller through the `Link` trait, so
//! the engine can be exercised without hardware.  The one production
//! implementation wraps a host serial port configured 8N1 with DTR and RTS
//! raised, which is what the FDC+ expects.
//!
//! Supported line rates are 230.4K, 403.2K, and 460.8K baud.  403.2K is
//! preferred: it allows full speed operation and is the most accurate of the
//! three choices on the controller side.  460.8K is off by about 3.5% and
//! borderline; 230.4K is available nearly everywhere but runs at 80-90% of
//! real disk speed.

use std::io::{self,Read,Write};
use std::time::Duration;
use log::error;
use serialport::{ClearBuffer,DataBits,Parity,SerialPort,StopBits};

/// How long a blocking read may hold the event loop before handing back
/// control so the inactivity deadline can be checked.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Byte transport between the server and the controller.
pub trait Link {
    /// Pull whatever bytes are waiting, up to `buf.len()`.  Returns 0 when
    /// the poll interval elapses with nothing to read.
    fn recv(&mut self,buf: &mut [u8]) -> Result<usize,io::Error>;
    /// Queue a buffer for transmission.
    fn send(&mut self,buf: &[u8]) -> Result<(),io::Error>;
    /// Change the line rate on the open port.
    fn set_baud(&mut self,baud: u32) -> Result<(),io::Error>;
    /// Throw away any unread inbound bytes.
    fn clear_input(&mut self);
    fn name(&self) -> &str;
}

/// Host serial port implementation of `Link`.
pub struct SerialLink {
    name: String,
    port: Box<dyn SerialPort>
}

impl SerialLink {
    /// Open and configure the named device.  8 data bits, no parity, one
    /// stop bit; DTR and RTS are asserted once the port is open.
    pub fn open(name: &str,baud: u32) -> Result<Self,serialport::Error> {
        let mut port = serialport::new(name,baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(POLL_INTERVAL)
            .open()?;
        port.write_data_terminal_ready(true)?;
        port.write_request_to_send(true)?;
        Ok(Self {
            name: name.to_string(),
            port
        })
    }
}

impl Link for SerialLink {
    fn recv(&mut self,buf: &mut [u8]) -> Result<usize,io::Error> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e)
        }
    }
    fn send(&mut self,buf: &[u8]) -> Result<(),io::Error> {
        self.port.write_all(buf)
    }
    fn set_baud(&mut self,baud: u32) -> Result<(),io::Error> {
        match self.port.set_baud_rate(baud) {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::from(e))
        }
    }
    fn clear_input(&mut self) {
        if let Err(e) = self.port.clear(ClearBuffer::Input) {
            error!("could not clear input on {}: {}",self.name,e);
        }
    }
    fn name(&self) -> &str {
        &self.name
    }
}

/// Names of the serial devices on this host.  Enumeration failure is logged
/// and yields an empty list.
pub fn available_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(list) => list.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            error!("could not enumerate serial ports: {}",e);
            Vec::new()
        }
    }
}
