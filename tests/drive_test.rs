// Drive table behavior: mount geometry, slot invariants, track file I/O.
use std::io::Write;
use fdcplus::drive::{geometry,DriveTable,MAX_DRIVE};

fn scratch_image(size: u64) -> tempfile::NamedTempFile {
    let file = tempfile::NamedTempFile::new().expect("could not create temp image");
    file.as_file().set_len(size).expect("could not size temp image");
    file
}

#[test]
fn geometry_from_file_length() {
    assert_eq!(geometry(76800),(34,"75K"));
    assert_eq!(geometry(337664),(76,"330K"));
    assert_eq!(geometry(8978432),(2047,"8MB"));
    assert_eq!(geometry(4096),(2047,"???"));
    assert_eq!(geometry(0),(2047,"???"));
}

#[test]
fn mount_infers_geometry() {
    let mut table = DriveTable::new();
    let img = scratch_image(337664);
    let (tracks,label) = table.mount(2,img.path()).expect("mount failed");
    assert_eq!(tracks,76);
    assert_eq!(label,"330K");
    assert!(table.is_mounted(2));
    assert_eq!(table.max_track(2),76);
    assert_eq!(table.cur_track(2),0);
}

#[test]
fn mount_out_of_range_fails() {
    let mut table = DriveTable::new();
    let img = scratch_image(76800);
    assert!(table.mount(MAX_DRIVE,img.path()).is_err());
}

#[test]
fn mount_missing_file_fails_cleanly() {
    let mut table = DriveTable::new();
    assert!(table.mount(0,std::path::Path::new("no-such-image.dsk")).is_err());
    assert!(!table.is_mounted(0));
}

#[test]
fn remount_replaces_the_image() {
    let mut table = DriveTable::new();
    let small = scratch_image(76800);
    let large = scratch_image(8978432);
    table.mount(0,small.path()).expect("mount failed");
    assert_eq!(table.max_track(0),34);
    table.mount(0,large.path()).expect("remount failed");
    assert_eq!(table.max_track(0),2047);
}

#[test]
fn unmount_resets_the_slot() {
    let mut table = DriveTable::new();
    let img = scratch_image(76800);
    table.mount(1,img.path()).expect("mount failed");
    table.set_cur_track(1,12);
    table.unmount(1);
    assert!(!table.is_mounted(1));
    assert_eq!(table.cur_track(1),0);
}

#[test]
fn track_io_lands_at_the_right_offset() {
    let mut table = DriveTable::new();
    let img = scratch_image(76800);
    table.mount(0,img.path()).expect("mount failed");

    let data: Vec<u8> = (0..137).map(|i| i as u8).collect();
    table.write_track(0,10,&data).expect("write failed");

    let mut buf = vec![0;137];
    let n = table.read_track(0,10,&mut buf).expect("read failed");
    assert_eq!(n,137);
    assert_eq!(buf,data);

    // confirm placement against the raw file
    let raw = std::fs::read(img.path()).expect("could not read image back");
    assert_eq!(&raw[1370..1370+137],&data[..]);
    assert!(raw[0..1370].iter().all(|b| *b == 0));
}

#[test]
fn short_read_reports_the_count() {
    let mut table = DriveTable::new();
    let mut img = tempfile::NamedTempFile::new().expect("could not create temp image");
    img.write_all(&[0x11;100]).expect("could not fill temp image");
    img.flush().expect("could not flush temp image");
    table.mount(0,img.path()).expect("mount failed");

    let mut buf = vec![0;137];
    let n = table.read_track(0,0,&mut buf).expect("read failed");
    assert_eq!(n,100);
    assert!(buf[0..100].iter().all(|b| *b == 0x11));
    assert!(buf[100..].iter().all(|b| *b == 0));
}

#[test]
fn io_on_unmounted_drive_is_an_error() {
    let mut table = DriveTable::new();
    let mut buf = vec![0;137];
    assert!(table.read_track(0,0,&mut buf).is_err());
    assert!(table.write_track(0,0,&buf).is_err());
}
