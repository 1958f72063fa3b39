//! # Command Line Interface
//!
//! The server is operated through subcommands: `ports` lists the serial
//! devices on this host, `serve` mounts images and answers the controller
//! until interrupted.  Notifications from the engine are turned into log
//! lines here; a graphical front end would subscribe to the same channel.

use clap::{arg,crate_version,Command};
use env_logger;
use log::{debug,error,info};
use std::path::Path;
use std::str::FromStr;
use std::sync::mpsc;
use fdcplus::fdc::{Fdc,Notification};
use fdcplus::link;

const RCH: &str = "unreachable was reached";

fn main() -> Result<(),Box<dyn std::error::Error>>
{
    env_logger::init();
    let long_help =
"The server exposes mounted disk images to an FDC+ enhanced floppy disk
controller over a high speed serial link.  All transactions are initiated
by the controller; the server answers until interrupted.
Set RUST_LOG environment variable to control logging level.
  levels: trace,debug,info,warn,error

Examples:
---------
list serial devices:  `fdcplus ports`
serve two images:     `fdcplus serve -p /dev/ttyUSB0 --disk0 cpm.dsk --disk1 work.dsk`
use the backup rate:  `fdcplus serve -p COM3 -b 230400 --disk0 cpm.dsk`";

    let baud_rates = ["230400","403200","460800"];

    let matches = Command::new("fdcplus")
        .about("Serves disk images to FDC+ enhanced floppy disk controllers")
        .version(crate_version!())
        .after_long_help(long_help)
        .subcommand_required(true)
        .subcommand(Command::new("ports")
            .about("list serial devices on this host"))
        .subcommand(Command::new("serve")
            .arg(arg!(-p --port <DEVICE> "serial device connected to the controller"))
            .arg(arg!(-b --baud <RATE> "line rate, 403200 is preferred").value_parser(baud_rates)
                .required(false)
                .default_value("403200"))
            .arg(arg!(--disk0 <PATH> "image to mount in drive 0").required(false))
            .arg(arg!(--disk1 <PATH> "image to mount in drive 1").required(false))
            .arg(arg!(--disk2 <PATH> "image to mount in drive 2").required(false))
            .arg(arg!(--disk3 <PATH> "image to mount in drive 3").required(false))
            .about("serve mounted images over the serial link"))
        .get_matches();

    match matches.subcommand() {
        Some(("ports",_)) => {
            for name in link::available_ports() {
                println!("{}",name);
            }
            Ok(())
        },
        Some(("serve",cmd)) => serve(cmd),
        _ => panic!("{}",RCH)
    }
}

fn serve(cmd: &clap::ArgMatches) -> Result<(),Box<dyn std::error::Error>> {
    let port = cmd.get_one::<String>("port").expect(RCH);
    let baud = u32::from_str(cmd.get_one::<String>("baud").expect(RCH)).expect(RCH);

    let (tx,rx) = mpsc::channel();
    let mut fdc = Fdc::new(tx);

    // front end stand-in: notifications become log lines
    std::thread::spawn(move || {
        for note in rx {
            match note {
                Notification::Status(text) => info!("status: {}",text),
                Notification::Message(text) => info!("{}",text),
                Notification::Error { title, text } => error!("{}: {}",title,text),
                Notification::Mount { drive, mounted: true, path, tracks, label } => {
                    let name = match path {
                        Some(p) => p.display().to_string(),
                        None => String::new()
                    };
                    info!("drive {}: mounted {} ({} tracks, {})",drive,name,tracks as u32 + 1,label);
                },
                Notification::Mount { drive, mounted: false, .. } => info!("drive {}: unmounted",drive),
                Notification::Track { drive, track } => debug!("drive {}: track {}",drive,track),
                Notification::Head { drive, loaded: true } => debug!("drive {}: head loaded",drive),
                Notification::Head { drive, loaded: false } => debug!("drive {}: head unloaded",drive),
                Notification::Drive(drive) => debug!("drive {} selected",drive)
            }
        }
    });

    fdc.open_port(port,baud)?;
    for (drive,key) in ["disk0","disk1","disk2","disk3"].into_iter().enumerate() {
        if let Some(path) = cmd.get_one::<String>(key) {
            fdc.mount_disk(drive,Path::new(path))?;
        }
    }
    info!("serving on {} at {} baud",port,baud);
    loop {
        fdc.poll()?;
    }
}
