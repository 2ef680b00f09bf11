//! Creates a fresh, empty filesystem image.

use blockfs::device::FileBlockDevice;
use blockfs::format;
use blockfs::superblock::Superblock;
use clap::Parser;
use log::{info, warn};
use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;
use std::process::exit;
use utils::prompt::prompt;
use utils::util::ByteSize;

/// Creates a blockfs image on the given file.
#[derive(Parser)]
#[command(name = "mkfs-blockfs")]
struct Args {
	/// Path to the image file. Created if it doesn't already exist.
	image: PathBuf,

	/// Total size of the image, in blocks of 1024 bytes.
	#[arg(long, default_value_t = 65536)]
	blocks: u32,

	/// Minimum number of inodes the image must be able to hold.
	#[arg(long, default_value_t = 4096)]
	inodes: u32,

	/// Format even if the image already looks like a blockfs image.
	#[arg(short, long)]
	force: bool,
}

fn already_formatted(path: &PathBuf, block_count: u32) -> io::Result<bool> {
	let file = OpenOptions::new().read(true).open(path)?;
	let mut dev = FileBlockDevice::new(file, block_count);
	Ok(Superblock::read(&mut dev).map(|sb| sb.is_valid()).unwrap_or(false))
}

fn main() {
	env_logger::init();
	let args = Args::parse();

	let byte_size = ByteSize(args.blocks as u64 * blockfs::BLOCK_SIZE as u64);
	if !args.force && args.image.exists() {
		match already_formatted(&args.image, args.blocks) {
			Ok(true) => {
				println!("{} already contains a blockfs image.", args.image.display());
				let confirm = prompt(Some("Proceed anyway? (y/N) "), false)
					.map(|s| s.to_lowercase() == "y")
					.unwrap_or(false);
				if !confirm {
					warn!("{}: overwrite declined by user", args.image.display());
					eprintln!("Abort.");
					exit(1);
				}
				info!("{}: overwrite confirmed by user", args.image.display());
			}
			Ok(false) => {}
			Err(e) => {
				eprintln!("{}: {e}", args.image.display());
				exit(1);
			}
		}
	}

	let file = OpenOptions::new()
		.create(true)
		.write(true)
		.truncate(false)
		.open(&args.image)
		.unwrap_or_else(|e| {
			eprintln!("{}: {e}", args.image.display());
			exit(1);
		});
	file.set_len(args.blocks as u64 * blockfs::BLOCK_SIZE as u64).unwrap_or_else(|e| {
		eprintln!("{}: {e}", args.image.display());
		exit(1);
	});

	let mut dev = FileBlockDevice::new(file, args.blocks);
	format::format(&mut dev, args.blocks, args.inodes).unwrap_or_else(|e| {
		eprintln!("{}: failed to format: {e}", args.image.display());
		exit(1);
	});

	println!("{}: formatted ({byte_size}, {} inodes)", args.image.display(), args.inodes);
}
