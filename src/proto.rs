//! # Wire Protocol Structures
//!
//! Every transaction starts with a fixed ten byte frame: a four byte ASCII
//! command tag, two 16-bit parameter words, and a 16-bit checksum, all little
//! endian.  The same layout serves responses, with the parameter words
//! reinterpreted as response code and response data.  Track data is carried
//! outside of frames, as a bare run of bytes with a two byte checksum trailer.
//!
//! The checksum is a plain additive sum, not a CRC.  This is contractual;
//! both ends of the link compute it the same way over frames and payloads.

use log::trace;

/// Length of the summed portion of a frame, i.e. everything but the checksum.
pub const CMD_LEN: usize = 8;
/// Length of a checksum, whether in a frame or trailing a track payload.
pub const CRC_LEN: usize = 2;
/// Full length of a command or response frame.
pub const CMDBUF_SIZE: usize = CMD_LEN + CRC_LEN;
/// Maximum valid track length in bytes.
pub const TRKBUF_SIZE: usize = 137*32;

/// Response code: request satisfied.
pub const STAT_OK: u16 = 0x0000;
/// Response code: drive not mounted.
pub const STAT_NOT_READY: u16 = 0x0001;
/// Response code: track payload failed its checksum.
pub const STAT_CHECKSUM_ERR: u16 = 0x0002;
/// Response code: track could not be written to the backing file.
pub const STAT_WRITE_ERR: u16 = 0x0003;

#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("frame checksum did not match")]
    BadChecksum,
    #[error("frame had the wrong length")]
    BadLength
}

/// 16-bit additive checksum with natural wrap-around.  Used over the first
/// eight bytes of a frame and over entire track payloads.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u16 = 0;
    for b in data {
        sum = sum.wrapping_add(*b as u16);
    }
    sum
}

/// Structured view of a ten byte frame.  `param1` and `param2` double as the
/// response code and response data on the way back to the controller.
#[derive(PartialEq,Eq,Clone,Copy,Debug)]
pub struct Frame {
    pub tag: [u8;4],
    pub param1: u16,
    pub param2: u16
}

impl Frame {
    pub fn new(tag: [u8;4],param1: u16,param2: u16) -> Self {
        Self { tag, param1, param2 }
    }
    /// Deserialize a staged buffer, verifying length and checksum.
    pub fn from_bytes(buf: &[u8]) -> Result<Self,Error> {
        if buf.len() != CMDBUF_SIZE {
            return Err(Error::BadLength);
        }
        let stored = u16::from_le_bytes([buf[8],buf[9]]);
        let computed = checksum(&buf[0..CMD_LEN]);
        if stored != computed {
            trace!("checksum stored {:04x} computed {:04x}",stored,computed);
            return Err(Error::BadChecksum);
        }
        Ok(Self {
            tag: [buf[0],buf[1],buf[2],buf[3]],
            param1: u16::from_le_bytes([buf[4],buf[5]]),
            param2: u16::from_le_bytes([buf[6],buf[7]])
        })
    }
    /// Serialize with a freshly computed checksum.
    pub fn to_bytes(&self) -> [u8;CMDBUF_SIZE] {
        let mut buf = [0;CMDBUF_SIZE];
        buf[0..4].copy_from_slice(&self.tag);
        buf[4..6].copy_from_slice(&self.param1.to_le_bytes());
        buf[6..8].copy_from_slice(&self.param2.to_le_bytes());
        let sum = checksum(&buf[0..CMD_LEN]);
        buf[8..10].copy_from_slice(&sum.to_le_bytes());
        buf
    }
    /// Drive number from the top nibble of `param1` (READ and WRIT).
    pub fn drive(&self) -> u8 {
        (self.param1 >> 12) as u8
    }
    /// Track number from the low 12 bits of `param1` (READ and WRIT).
    pub fn track(&self) -> u16 {
        self.param1 & 0x0fff
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_wrapping_sum() {
        assert_eq!(checksum(&[]),0);
        assert_eq!(checksum(&[1,2,3]),6);
        // 300 * 0xff = 76500, keep only the low 16 bits
        let big = vec![0xff;300];
        assert_eq!(checksum(&big),(300u32*0xff) as u16);
    }

    #[test]
    fn checksum_ignores_byte_order() {
        let fwd = [0x12,0x80,0x03,0xfe];
        let rev = [0xfe,0x03,0x80,0x12];
        assert_eq!(checksum(&fwd),checksum(&rev));
    }

    #[test]
    fn frame_round_trip() {
        let frame = Frame::new(*b"READ",0x1005,137);
        let buf = frame.to_bytes();
        assert_eq!(Frame::from_bytes(&buf).expect("parse failed"),frame);
    }

    #[test]
    fn frame_rejects_bad_checksum() {
        let mut buf = Frame::new(*b"STAT",0xffff,0).to_bytes();
        buf[8] = buf[8].wrapping_add(1);
        match Frame::from_bytes(&buf) {
            Err(Error::BadChecksum) => {},
            _ => panic!("bad checksum was accepted")
        }
    }

    #[test]
    fn frame_rejects_bad_length() {
        match Frame::from_bytes(&[0;9]) {
            Err(Error::BadLength) => {},
            _ => panic!("short frame was accepted")
        }
    }

    #[test]
    fn drive_and_track_unpack() {
        let frame = Frame::new(*b"READ",(1 << 12) | 5,137);
        assert_eq!(frame.drive(),1);
        assert_eq!(frame.track(),5);
        let frame = Frame::new(*b"WRIT",(3 << 12) | 0x0fff,4384);
        assert_eq!(frame.drive(),3);
        assert_eq!(frame.track(),0x0fff);
    }
}
