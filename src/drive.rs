//! # Drive Table
//!
//! The server exposes a fixed array of drive slots.  Each slot may hold an
//! open disk image file, in which case the drive is mounted.  Images are raw
//! sequential tracks with no header, so a track lives at byte offset
//! `track * track_len` and the geometry is inferred from the file length.
//!
//! The table is pure state and file I/O; it emits no notifications of its
//! own.  The protocol engine drives it and reports the changes.

use std::fs::{File,OpenOptions};
use std::io::{Read,Seek,SeekFrom,Write};
use std::path::Path;
use log::debug;
use crate::DYNERR;

/// Number of drive slots the server exposes.
pub const MAX_DRIVE: usize = 4;

#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("drive number is out of range")]
    DriveRange,
    #[error("drive is not mounted")]
    NotMounted
}

/// Geometry inferred from the image file length.  Returns the highest track
/// number and a cosmetic size label.  Unrecognized lengths get the large
/// track limit and an unknown label; they are still served.
pub fn geometry(file_size: u64) -> (u16,&'static str) {
    match file_size {
        76800 => (34,"75K"),
        337664 => (76,"330K"),
        8978432 => (2047,"8MB"),
        _ => (2047,"???")
    }
}

/// One drive slot.  The backing file is open if and only if the drive is
/// mounted, and the current track is 0 whenever it is not.
struct Slot {
    file: Option<File>,
    max_track: u16,
    cur_track: u16,
    head_loaded: bool
}

impl Slot {
    fn new() -> Self {
        Self {
            file: None,
            max_track: 77,
            cur_track: 0,
            head_loaded: false
        }
    }
}

/// Fixed array of drive slots, indexed 0 through `MAX_DRIVE`-1.
pub struct DriveTable {
    slots: [Slot;MAX_DRIVE]
}

impl DriveTable {
    pub fn new() -> Self {
        Self {
            slots: [Slot::new(),Slot::new(),Slot::new(),Slot::new()]
        }
    }
    /// Open `path` read+write as the image for `drive`, closing whatever was
    /// there before.  Returns the inferred (max track, size label).  On any
    /// failure the slot's geometry is left untouched.  The current track is
    /// deliberately not reset here: the engine does that through its seek
    /// bookkeeping so the front end hears about it.
    pub fn mount(&mut self,drive: usize,path: &Path) -> Result<(u16,&'static str),DYNERR> {
        if drive >= MAX_DRIVE {
            return Err(Box::new(Error::DriveRange));
        }
        let slot = &mut self.slots[drive];
        if slot.file.is_some() {
            debug!("drive {} already holds an image, closing it",drive);
            slot.file = None;
        }
        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(e) => {
                slot.cur_track = 0;
                return Err(Box::new(e));
            }
        };
        let file_size = match file.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => {
                slot.cur_track = 0;
                return Err(Box::new(e));
            }
        };
        let (max_track,label) = geometry(file_size);
        slot.file = Some(file);
        slot.max_track = max_track;
        debug!("mounted {} in drive {}, {} bytes, {} tracks",path.display(),drive,file_size,max_track as u32 + 1);
        Ok((max_track,label))
    }
    /// Close the backing file and reset the slot.  Harmless if the drive is
    /// not mounted or out of range.
    pub fn unmount(&mut self,drive: usize) {
        if drive >= MAX_DRIVE {
            return;
        }
        let slot = &mut self.slots[drive];
        slot.file = None;
        slot.cur_track = 0;
        debug!("unmounted drive {}",drive);
    }
    pub fn is_mounted(&self,drive: usize) -> bool {
        drive < MAX_DRIVE && self.slots[drive].file.is_some()
    }
    pub fn max_track(&self,drive: usize) -> u16 {
        self.slots[drive].max_track
    }
    pub fn cur_track(&self,drive: usize) -> u16 {
        self.slots[drive].cur_track
    }
    pub fn set_cur_track(&mut self,drive: usize,track: u16) {
        self.slots[drive].cur_track = track;
    }
    pub fn head_loaded(&self,drive: usize) -> bool {
        self.slots[drive].head_loaded
    }
    pub fn set_head(&mut self,drive: usize,loaded: bool) {
        self.slots[drive].head_loaded = loaded;
    }
    /// Fill `buf` from the track at `track * buf.len()`.  Returns the byte
    /// count actually read; a short count means the image ended early, and
    /// the caller decides what that means.
    pub fn read_track(&mut self,drive: usize,track: u16,buf: &mut [u8]) -> Result<usize,DYNERR> {
        if drive >= MAX_DRIVE {
            return Err(Box::new(Error::DriveRange));
        }
        match self.slots[drive].file.as_mut() {
            Some(file) => {
                file.seek(SeekFrom::Start(track as u64 * buf.len() as u64))?;
                let mut total = 0;
                while total < buf.len() {
                    let n = file.read(&mut buf[total..])?;
                    if n == 0 {
                        break;
                    }
                    total += n;
                }
                Ok(total)
            },
            None => Err(Box::new(Error::NotMounted))
        }
    }
    /// Write `data` as the track at `track * data.len()`.
    pub fn write_track(&mut self,drive: usize,track: u16,data: &[u8]) -> Result<(),DYNERR> {
        if drive >= MAX_DRIVE {
            return Err(Box::new(Error::DriveRange));
        }
        match self.slots[drive].file.as_mut() {
            Some(file) => {
                file.seek(SeekFrom::Start(track as u64 * data.len() as u64))?;
                file.write_all(data)?;
                file.flush()?;
                Ok(())
            },
            None => Err(Box::new(Error::NotMounted))
        }
    }
}
