//! # Protocol Engine
//!
//! Reactive core of the disk server.  Bytes pulled from the link go into
//! `Fdc::receive`; complete frames drive the command handlers, which touch
//! the drive table, answer over the link, and push `Notification`s to the
//! front end.  The engine is single threaded: a handler runs to completion
//! before the next byte burst or deadline check is looked at, which is what
//! makes the ordering guarantees of the protocol hold.
//!
//! The framer has two states.  In the command state it accumulates ten byte
//! frames; a WRIT command moves it to the payload state, which accumulates
//! the announced track length plus a two byte checksum trailer, answers with
//! the final write status, and drops back to the command state.  There is no
//! sync pattern to search for; a lost frame boundary is recovered by the
//! inactivity timeout clearing the staging buffer.

use std::path::{Path,PathBuf};
use std::sync::mpsc::Sender;
use std::time::{Duration,Instant};
use log::{debug,error,trace,warn};
use crate::drive::{DriveTable,MAX_DRIVE};
use crate::link::{Link,SerialLink};
use crate::proto;
use crate::proto::{Frame,CMDBUF_SIZE,CRC_LEN,TRKBUF_SIZE};
use crate::{DYNERR,STDRESULT};

/// Inactivity window after which the controller is considered gone.  The
/// deadline is re-armed every time a response goes out.
pub const FDC_TIMEOUT: Duration = Duration::from_millis(2000);

/// Drive number meaning no drive is selected.
const NO_DRIVE: u8 = 0xff;

#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("no port is open")]
    PortClosed
}

/// State changes pushed to the attached front end.  Delivery is synchronous
/// with the handler that produced the change; the receiver must not call
/// back into the engine.
#[derive(PartialEq,Eq,Clone,Debug)]
pub enum Notification {
    /// link status line, e.g. "Online", "Connected", "Communications timeout"
    Status(String),
    /// free form text, currently the periodic traffic summary
    Message(String),
    /// something the operator should see, with a dialog style title
    Error { title: String, text: String },
    Mount { drive: u8, mounted: bool, path: Option<PathBuf>, tracks: u16, label: String },
    Track { drive: u8, track: u16 },
    Head { drive: u8, loaded: bool },
    /// the controller selected a different drive
    Drive(u8)
}

/// Receive side of the framer.  The WRIT parameters ride along as state
/// data so a resynchronization can never leave a stale length behind.
#[derive(Clone,Copy)]
enum State {
    AwaitCmd,
    AwaitWritePayload { drive: u8, track: u16, track_len: u16 }
}

/// The protocol engine.  Owns the drive table, the framer, and the link.
pub struct Fdc {
    link: Option<Box<dyn Link>>,
    drives: DriveTable,
    state: State,
    staging: Vec<u8>,
    drive_selected: u8,
    connected: bool,
    deadline: Instant,
    notify: Sender<Notification>,
    stat_pkts: u16,
    read_pkts: u16,
    write_pkts: u16,
    out_pkts: u16,
    crc_errs: u16
}

impl Fdc {
    /// Create an engine with no port attached.  Notifications will be pushed
    /// into `notify`; if the receiver goes away they are silently dropped.
    pub fn new(notify: Sender<Notification>) -> Self {
        Self {
            link: None,
            drives: DriveTable::new(),
            state: State::AwaitCmd,
            staging: Vec::with_capacity(TRKBUF_SIZE + CRC_LEN),
            drive_selected: NO_DRIVE,
            connected: false,
            deadline: Instant::now() + FDC_TIMEOUT,
            notify,
            stat_pkts: 0,
            read_pkts: 0,
            write_pkts: 0,
            out_pkts: 0,
            crc_errs: 0
        }
    }

    /// Open the named serial device and attach it.  Any port already
    /// attached is closed first.
    pub fn open_port(&mut self,name: &str,baud: u32) -> STDRESULT {
        if self.link.is_some() {
            self.close_port();
        }
        match SerialLink::open(name,baud) {
            Ok(link) => {
                self.attach(Box::new(link));
                Ok(())
            },
            Err(e) => {
                self.emit_error("COM Port Error",format!("could not open {} at {} baud: {}",name,baud,e));
                self.emit_status("Offline");
                Err(Box::new(e))
            }
        }
    }

    /// Attach an already open link.  The serial path goes through
    /// `open_port`; this is the seam for other transports and for tests.
    pub fn attach(&mut self,link: Box<dyn Link>) {
        debug!("link {} attached",link.name());
        self.link = Some(link);
        self.connected = true;
        self.emit_status("Online");
    }

    /// Detach and drop the port, if one is open.
    pub fn close_port(&mut self) {
        if self.link.take().is_some() {
            self.connected = false;
            self.emit_status("Offline");
        }
    }

    /// Change the line rate on the open port.
    pub fn set_baud(&mut self,baud: u32) -> STDRESULT {
        let outcome: Result<(),DYNERR> = match self.link.as_mut() {
            Some(link) => link.set_baud(baud).map_err(|e| e.into()),
            None => Err(Box::new(Error::PortClosed))
        };
        if let Err(e) = &outcome {
            self.emit_error("COM Port Error",format!("could not set baud rate to {}: {}",baud,e));
            self.emit_status("Offline");
        }
        outcome
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Count of inbound frames and payloads that failed their checksum.
    pub fn crc_errors(&self) -> u16 {
        self.crc_errs
    }

    /// Mount the image at `path` in the given drive, replacing any image
    /// already there.
    pub fn mount_disk(&mut self,drive: usize,path: &Path) -> STDRESULT {
        let (tracks,label) = match self.drives.mount(drive,path) {
            Ok(res) => res,
            Err(e) => {
                self.emit_error("Mount Error",format!("could not mount {} in drive {}: {}",path.display(),drive,e));
                return Err(e);
            }
        };
        self.update_track(drive,0);
        self.emit(Notification::Mount {
            drive: drive as u8,
            mounted: true,
            path: Some(path.to_path_buf()),
            tracks,
            label: label.to_string()
        });
        Ok(())
    }

    /// Unmount the given drive.  The mount notification goes out whether or
    /// not anything was mounted.
    pub fn unmount_disk(&mut self,drive: usize) {
        if drive >= MAX_DRIVE {
            self.emit_error("Unmount Error",format!("drive number {} is out of range",drive));
            return;
        }
        if self.drives.is_mounted(drive) {
            self.update_track(drive,0);
            self.drives.unmount(drive);
        }
        self.emit(Notification::Mount {
            drive: drive as u8,
            mounted: false,
            path: None,
            tracks: 0,
            label: String::new()
        });
    }

    /// One event loop turn: pull bytes from the link, run the framer, then
    /// check the inactivity deadline.
    pub fn poll(&mut self) -> STDRESULT {
        let mut chunk = [0;512];
        let count = match self.link.as_mut() {
            Some(link) => match link.recv(&mut chunk) {
                Ok(n) => n,
                Err(e) => {
                    error!("serial read failed: {}",e);
                    return Err(Box::new(e));
                }
            },
            None => {
                std::thread::sleep(Duration::from_millis(50));
                0
            }
        };
        if count > 0 {
            self.receive(&chunk[0..count]);
        }
        self.service_timeout(Instant::now());
        Ok(())
    }

    /// Feed inbound bytes to the framer.  A burst that cannot fit in the
    /// staging buffer is discarded whole; the next valid frame after the
    /// timeout resynchronizes the stream.
    pub fn receive(&mut self,data: &[u8]) {
        let cap = TRKBUF_SIZE + CRC_LEN;
        if data.len() > cap - self.staging.len() {
            if let Some(link) = self.link.as_mut() {
                link.clear_input();
            }
            self.staging.clear();
            self.emit_error("receive","staging buffer overflow".to_string());
            return;
        }
        self.staging.extend_from_slice(data);
        self.pump();
    }

    /// Advance the state machine over whatever is staged.
    fn pump(&mut self) {
        loop {
            match self.state {
                State::AwaitCmd => {
                    if self.staging.len() < CMDBUF_SIZE {
                        return;
                    }
                    let frame_bytes: Vec<u8> = self.staging.drain(0..CMDBUF_SIZE).collect();
                    self.dispatch(&frame_bytes);
                },
                State::AwaitWritePayload { drive, track, track_len } => {
                    let need = track_len as usize + CRC_LEN;
                    if self.staging.len() < need {
                        return;
                    }
                    let payload: Vec<u8> = self.staging.drain(0..need).collect();
                    self.write_track(drive,track,track_len,&payload);
                    self.state = State::AwaitCmd;
                }
            }
        }
    }

    /// Validate and route one staged command frame.
    fn dispatch(&mut self,buf: &[u8]) {
        trace!("CMD {}",hex::encode(buf));
        let frame = match Frame::from_bytes(buf) {
            Ok(frame) => frame,
            Err(e) => {
                self.crc_errs = self.crc_errs.wrapping_add(1);
                debug!("dropping frame: {}",e);
                return;
            }
        };
        match &frame.tag {
            b"STAT" => self.stat(&frame),
            b"READ" => self.read_track(&frame),
            b"WRIT" => self.write_response(&frame),
            _ => debug!("dropping unknown command {}",String::from_utf8_lossy(&frame.tag))
        }
    }

    /// STAT: bookkeeping for drive selection, head status, and track, then
    /// answer with the mount bitmask.  The controller sends this around ten
    /// times a second, so it also serves as the liveness signal.
    fn stat(&mut self,cmd: &Frame) {
        self.stat_pkts = self.stat_pkts.wrapping_add(1);
        let new_drive = (cmd.param1 & 0xff) as u8;
        let head = (cmd.param1 >> 8) != 0;

        if (new_drive as usize) < MAX_DRIVE && self.drive_selected != new_drive {
            if self.drive_selected != NO_DRIVE && (self.drive_selected as usize) < MAX_DRIVE {
                if self.drives.head_loaded(self.drive_selected as usize) {
                    self.drives.set_head(self.drive_selected as usize,false);
                    self.emit(Notification::Head { drive: self.drive_selected, loaded: false });
                }
            }
            self.emit(Notification::Drive(new_drive));
        }

        if (new_drive as usize) < MAX_DRIVE {
            if self.drives.head_loaded(new_drive as usize) != head {
                self.drives.set_head(new_drive as usize,head);
                self.emit(Notification::Head { drive: new_drive, loaded: head });
            }
            self.update_track(new_drive as usize,cmd.param2);
        }

        self.drive_selected = new_drive;

        let mut rdata: u16 = 0;
        for drive in 0..MAX_DRIVE {
            if self.drives.is_mounted(drive) {
                rdata |= 1 << drive;
            }
        }
        self.transmit_frame(Frame::new(*b"STAT",proto::STAT_OK,rdata));

        if !self.connected {
            self.connected = true;
            self.emit_status("Connected");
        }

        if self.stat_pkts % 10 == 0 {
            let msg = format!("stat {} read {} write {} out {} crc errors {}",
                self.stat_pkts,self.read_pkts,self.write_pkts,self.out_pkts,self.crc_errs);
            debug!("{}",msg);
            self.emit(Notification::Message(msg));
        }
    }

    /// READ: send the requested track as a bare payload with a checksum
    /// trailer.  A short read is reported but the full length still goes
    /// out, zero padded, with the checksum covering the bytes actually
    /// collected.
    fn read_track(&mut self,cmd: &Frame) {
        self.read_pkts = self.read_pkts.wrapping_add(1);
        let drive = cmd.drive() as usize;
        let mut track_len = cmd.param2 as usize;
        debug!("READ drive {} track {} len {}",drive,cmd.track(),track_len);

        if drive >= MAX_DRIVE {
            self.emit_error("READ",format!("drive number {} is out of range",drive));
            return;
        }
        if track_len > TRKBUF_SIZE {
            warn!("track length {} exceeds the buffer, clamping",track_len);
            track_len = TRKBUF_SIZE;
        }

        let track = self.update_track(drive,cmd.track());
        let mut out = vec![0;track_len];
        let collected = match self.drives.read_track(drive,track,&mut out) {
            Ok(n) => {
                if n != track_len {
                    warn!("short read, {} of {} bytes",n,track_len);
                }
                n
            },
            Err(e) => {
                warn!("track read failed: {}",e);
                0
            }
        };
        let sum = proto::checksum(&out[0..collected]);
        out.extend_from_slice(&sum.to_le_bytes());
        self.transmit(&out);
    }

    /// WRIT phase 1: acknowledge readiness and switch the framer to payload
    /// accumulation.  The response goes out even when the drive is not
    /// ready, because the controller transmits the payload regardless.
    fn write_response(&mut self,cmd: &Frame) {
        self.write_pkts = self.write_pkts.wrapping_add(1);
        let drive = cmd.drive();
        let track = cmd.track();
        let mut track_len = cmd.param2;
        debug!("WRIT drive {} track {} len {}",drive,track,track_len);

        if track_len as usize > TRKBUF_SIZE {
            warn!("track length {} exceeds the buffer, clamping",track_len);
            track_len = TRKBUF_SIZE as u16;
        }

        if (drive as usize) >= MAX_DRIVE {
            self.emit_error("WRIT",format!("drive number {} is out of range",drive));
        } else {
            let rcode = match self.drives.is_mounted(drive as usize) {
                true => proto::STAT_OK,
                false => proto::STAT_NOT_READY
            };
            self.transmit_frame(Frame::new(*b"WRIT",rcode,0));
        }
        self.state = State::AwaitWritePayload { drive, track, track_len };
    }

    /// WRIT phase 2: verify the payload trailer, commit the track, and
    /// answer WSTA with the final status.
    fn write_track(&mut self,drive: u8,track: u16,track_len: u16,payload: &[u8]) {
        let len = track_len as usize;
        let trailer = u16::from_le_bytes([payload[len],payload[len+1]]);
        debug!("WSTA drive {} track {} len {} trailer {:04x}",drive,track,track_len,trailer);

        if (drive as usize) >= MAX_DRIVE {
            self.emit_error("WRIT",format!("drive number {} is out of range",drive));
            return;
        }

        let rcode = if !self.drives.is_mounted(drive as usize) {
            proto::STAT_NOT_READY
        } else if trailer != proto::checksum(&payload[0..len]) {
            self.crc_errs = self.crc_errs.wrapping_add(1);
            debug!("payload checksum mismatch");
            proto::STAT_CHECKSUM_ERR
        } else {
            let track = self.update_track(drive as usize,track);
            match self.drives.write_track(drive as usize,track,&payload[0..len]) {
                Ok(()) => proto::STAT_OK,
                Err(e) => {
                    warn!("track write failed: {}",e);
                    proto::STAT_WRITE_ERR
                }
            }
        };
        self.transmit_frame(Frame::new(*b"WSTA",rcode,0));
    }

    /// Record the last seen track for a drive, coercing to 0 when the drive
    /// is not mounted so we never seek in a file that is not there.  Returns
    /// the effective track.
    fn update_track(&mut self,drive: usize,track: u16) -> u16 {
        if drive >= MAX_DRIVE {
            self.emit_error("seek",format!("drive number {} is out of range",drive));
            return track;
        }
        let track = if self.drives.is_mounted(drive) { track } else { 0 };
        if track != self.drives.cur_track(drive) {
            self.drives.set_cur_track(drive,track);
            self.emit(Notification::Track { drive: drive as u8, track });
        }
        track
    }

    /// Check the inactivity deadline.  The caller supplies the clock so the
    /// loop stays testable.  On expiry with an open port the staging buffer
    /// and framer state are dropped; a silent controller also loses its
    /// connected status.
    pub fn service_timeout(&mut self,now: Instant) {
        if now < self.deadline {
            return;
        }
        match self.link.as_mut() {
            Some(link) => {
                link.clear_input();
                self.staging.clear();
                if self.connected {
                    self.connected = false;
                    self.emit_status("Communications timeout");
                }
                debug!("timeout");
            },
            None => self.emit_status("Offline")
        }
        self.state = State::AwaitCmd;
        self.deadline = now + FDC_TIMEOUT;
    }

    /// Send raw bytes and re-arm the inactivity deadline.
    fn transmit(&mut self,buf: &[u8]) {
        if let Some(link) = self.link.as_mut() {
            if let Err(e) = link.send(buf) {
                error!("serial write failed: {}",e);
            }
            self.out_pkts = self.out_pkts.wrapping_add(1);
            self.deadline = Instant::now() + FDC_TIMEOUT;
        }
    }

    fn transmit_frame(&mut self,frame: Frame) {
        let buf = frame.to_bytes();
        trace!("RESP {}",hex::encode(buf));
        self.transmit(&buf);
    }

    fn emit(&self,note: Notification) {
        // the front end may have gone away, that is its business
        let _ = self.notify.send(note);
    }

    fn emit_status(&self,text: &str) {
        self.emit(Notification::Status(text.to_string()));
    }

    fn emit_error(&self,title: &str,text: String) {
        error!("{}: {}",title,text);
        self.emit(Notification::Error { title: title.to_string(), text });
    }
}
