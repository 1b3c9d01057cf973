//! Mounts uxfs at the CLI-given path and runs the FUSE event loop until
//! the host unmounts it.

use clap::Parser;
use fuser::MountOption;
use log::{error, info};
use uxfs::config::{sidecar_path, Args};
use uxfs::device::{read_sidecar, FileBlockDevice};
use uxfs::fs::FileSystem;
use uxfs::ops::Ops;

fn main() {
    env_logger::init();
    let args = Args::parse();

    let device_root = match read_sidecar(&sidecar_path()) {
        Ok(root) => root,
        Err(e) => {
            error!("failed to read fuse~ sidecar: {e}");
            std::process::exit(1);
        }
    };
    let dev = FileBlockDevice::new(device_root);

    let mounted = if args.noinit {
        FileSystem::load(dev)
    } else {
        FileSystem::format(dev)
    };
    let fs = match mounted {
        Ok(fs) => fs,
        Err(e) => {
            error!("failed to mount filesystem: {e}");
            std::process::exit(1);
        }
    };

    let options = [
        MountOption::FSName("uxfs".to_string()),
        MountOption::AutoUnmount,
    ];

    info!("mounting uxfs at {}", args.mountpoint.display());
    if let Err(e) = fuser::mount2(Ops::new(fs), &args.mountpoint, &options) {
        error!("mount failed: {e}");
        std::process::exit(1);
    }
}
