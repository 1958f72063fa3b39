//! # FDC+ Serial Disk Server
//!
//! This library serves raw disk images to computers running the FDC+ Enhanced
//! Floppy Disk Controller.  All transactions are initiated by the controller
//! over a high speed serial link; the server answers with drive status, track
//! reads, and write acknowledgements.
//!
//! ## Architecture
//!
//! The server is built around two seams:
//! * `link::Link` abstracts the serial port, so the protocol engine can be
//!   driven by a real port or by a test double
//! * `fdc::Notification` carries state changes out to whatever front end is
//!   attached (the bundled CLI simply turns them into log lines)
//!
//! The `fdc::Fdc` engine owns the drive table and the framer.  Bytes go in
//! through `Fdc::receive`, responses go out through the attached link, and
//! the inactivity deadline is checked from the caller's event loop.  The
//! engine is strictly reactive: every action is the consequence of an inbound
//! byte burst or a deadline expiry, and nothing runs concurrently with a
//! handler.
//!
//! ## Wire Protocol
//!
//! Commands are fixed ten byte frames: a four byte ASCII tag, two little
//! endian parameter words, and a 16-bit additive checksum of the first eight
//! bytes.  Track data moves as a bare payload followed by a two byte checksum
//! trailer.  The `proto` module has the exact layout.
//!
//! ## Disk Images
//!
//! Images are raw sequential tracks with no header.  Geometry is inferred
//! from the file length when a drive is mounted, see `drive::geometry`.

pub mod proto;
pub mod drive;
pub mod link;
pub mod fdc;

type DYNERR = Box<dyn std::error::Error>;
type STDRESULT = Result<(),Box<dyn std::error::Error>>;
