#[macro_use]
extern crate anyhow;

mod mkfs;
mod mount;
mod tfs;

use clap::{Arg, Command};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let matches = Command::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .global(true)
                .help("Log every file system request. RUST_LOG takes precedence when set."),
        )
        .subcommand(
            Command::new("mkfs")
                .about("Create a new file system image")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .help("Location of the new file system image"),
                )
                .arg(
                    Arg::new("source")
                        .long("source")
                        .takes_value(true)
                        .help("Directory whose files are copied into the image"),
                )
                .arg(
                    Arg::new("reserved-blocks")
                        .short('r')
                        .long("reserved-blocks")
                        .takes_value(true)
                        .default_value("0")
                        .help("Number of blocks reserved after the boot block (0-255)"),
                )
                .arg(
                    Arg::new("size")
                        .short('s')
                        .long("size")
                        .takes_value(true)
                        .help("Minimum size of the image, e.g. 16MiB. The image grows beyond it when the content needs more space."),
                ),
        )
        .subcommand(
            Command::new("mount")
                .about("Mount a file system image read-only")
                .arg(
                    Arg::new("image")
                        .required(true)
                        .help("Location of the file system image"),
                )
                .arg(Arg::new("mountpoint").required(true).help("Mountpoint"))
                .arg(
                    Arg::new("allow-other")
                        .long("allow-other")
                        .help("Allow other users to access the mounted file system"),
                )
                .arg(
                    Arg::new("auto-unmount")
                        .long("auto-unmount")
                        .help("Unmount automatically when the process exits"),
                ),
        )
        .subcommand_required(true)
        .get_matches();

    init_logging(matches.is_present("debug"));

    if let Some(matches) = matches.subcommand_matches("mkfs") {
        let file_name = matches.value_of("file").unwrap_or_default();
        let source = matches.value_of("source");
        let reserved_blocks = matches
            .value_of("reserved-blocks")
            .unwrap_or("0")
            .parse::<u8>()
            .map_err(|e| anyhow!("Invalid reserved block count: {}", e))?;

        let size = match matches.value_of("size") {
            Some(size) => match byte_unit::Byte::from_str(size) {
                Ok(size) => size.get_bytes() as u64,
                Err(err) => return Err(anyhow!(err)),
            },
            None => 0,
        };

        mkfs::make(file_name, source, reserved_blocks, size)?;
    }

    if let Some(matches) = matches.subcommand_matches("mount") {
        let image = matches.value_of("image").unwrap_or_default();
        let mountpoint = matches.value_of("mountpoint").unwrap_or_default();
        let options = mount::MountOptions {
            allow_other: matches.is_present("allow-other"),
            auto_unmount: matches.is_present("auto-unmount"),
        };

        mount::mount(image, mountpoint, &options)?;
    }

    Ok(())
}

fn init_logging(debug: bool) {
    let default = if debug { "tfs=trace" } else { "tfs=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
