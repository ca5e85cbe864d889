mod image;
mod logger;

use clap::{Parser, Subcommand};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chainfs::config::{DEFAULT_BLOCKS_PER_CHUNK, DEFAULT_BLOCK_SIZE};
use chainfs::layout::NAME_LEN;
use chainfs::{ChainDriver, DirectoryLister, File, FileConfig, ImageBuilder};
use log::warn;

use crate::image::ImageFile;

/// Bytes copied per read when streaming a file out
const COPY_CHUNK: usize = 4096;

#[derive(Parser)]
#[command(name = "mkfs", about = "Build and inspect chainfs disk images")]
struct Args {
    /// Show library debug output on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an image, importing a directory tree into it
    Pack {
        /// Output disk image path
        #[arg(short, long)]
        output: PathBuf,

        /// Directory to import files from
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Disk size in MB
        #[arg(short, long, default_value_t = 16)]
        size: u64,

        /// Block size in bytes
        #[arg(short, long, default_value_t = DEFAULT_BLOCK_SIZE)]
        block_size: u32,

        /// Blocks per chunk
        #[arg(short, long, default_value_t = DEFAULT_BLOCKS_PER_CHUNK)]
        chunk_blocks: u32,
    },
    /// List a directory
    Ls {
        #[arg(short, long)]
        image: PathBuf,

        #[arg(default_value = "/")]
        path: String,
    },
    /// Print a file, optionally from an offset
    Cat {
        #[arg(short, long)]
        image: PathBuf,

        path: String,

        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Stop after this many bytes
        #[arg(long)]
        length: Option<u64>,
    },
    /// Overwrite bytes of an existing file in place
    Patch {
        #[arg(short, long)]
        image: PathBuf,

        path: String,

        #[arg(long, default_value_t = 0)]
        offset: u64,

        /// Replacement text
        text: String,
    },
}

fn main() -> io::Result<()> {
    let args = Args::parse();
    logger::init_logger(args.verbose);

    match args.command {
        Command::Pack {
            output,
            dir,
            size,
            block_size,
            chunk_blocks,
        } => pack(&output, dir.as_deref(), size, block_size, chunk_blocks),
        Command::Ls { image, path } => list(&image, &path),
        Command::Cat {
            image,
            path,
            offset,
            length,
        } => cat(&image, &path, offset, length),
        Command::Patch {
            image,
            path,
            offset,
            text,
        } => patch(&image, &path, offset, text.as_bytes()),
    }
}

fn pack(
    output: &Path,
    dir: Option<&Path>,
    size_mb: u64,
    block_size: u32,
    chunk_blocks: u32,
) -> io::Result<()> {
    let bytes = size_mb * 1024 * 1024;
    println!(
        "Creating chainfs image: {:?} ({} MB, {} byte blocks, {} blocks per chunk)",
        output, size_mb, block_size, chunk_blocks
    );

    let image = ImageFile::create(output, block_size as usize, bytes)?;
    let mut builder = ImageBuilder::format(image, chunk_blocks).map_err(io::Error::other)?;

    let mut imported = 0;
    if let Some(src_dir) = dir {
        if src_dir.is_dir() {
            imported = import_directory(&mut builder, src_dir, "")?;
        } else {
            warn!("mkfs: {:?} is not a directory, image left empty", src_dir);
        }
    }

    let used = builder.superblock().chunk_count - builder.free_chunks();
    builder.finish().map_err(io::Error::other)?;
    println!("\n✅ Done. {} files imported, {} chunks used.", imported, used);
    Ok(())
}

/// Import a directory tree into the image under `prefix`
fn import_directory(
    builder: &mut ImageBuilder<ImageFile>,
    dir: &Path,
    prefix: &str,
) -> io::Result<u64> {
    let mut entries = fs::read_dir(dir)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    let mut imported = 0;
    for entry in entries {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            println!("  ⚠️  Skipping {:?}: Name is not UTF-8", path);
            continue;
        };
        let fs_path = format!("{}/{}", prefix, name);

        if name.len() > NAME_LEN {
            println!("  ⚠️  Skipping {}: Name too long (max {} chars)", fs_path, NAME_LEN);
            continue;
        }

        if path.is_dir() {
            println!("  📁 Creating {}", fs_path);
            builder.mkdir(&fs_path).map_err(io::Error::other)?;
            imported += import_directory(builder, &path, &fs_path)?;
        } else if path.is_file() {
            let data = fs::read(&path)?;
            println!("  📄 Importing {} ({} bytes)", fs_path, data.len());
            builder.add_file(&fs_path, &data).map_err(io::Error::other)?;
            imported += 1;
        }
    }
    Ok(imported)
}

fn mount(image: &Path, writable: bool) -> io::Result<ChainDriver<ImageFile>> {
    ChainDriver::mount(ImageFile::open(image, writable)?).map_err(io::Error::other)
}

fn list(image: &Path, path: &str) -> io::Result<()> {
    let driver = mount(image, false)?;
    let lister = DirectoryLister::new(&driver);
    let entries = lister.list(path).ok_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, format!("{}: not a directory", path))
    })?;

    println!("SIZE        NAME");
    println!("----------  --------------------");
    for entry in entries {
        let suffix = if entry.is_dir() { "/" } else { "" };
        println!("{:>10}  {}{}", entry.size, entry.name, suffix);
    }
    Ok(())
}

fn cat(image: &Path, path: &str, offset: u64, length: Option<u64>) -> io::Result<()> {
    let driver = mount(image, false)?;
    let lister = DirectoryLister::new(&driver);
    let mut file = File::open(&driver, &lister, path, FileConfig::default());
    if !file.exists() {
        return Err(io::Error::new(io::ErrorKind::NotFound, format!("{}: no such file", path)));
    }
    if offset > 0 && !file.seek(offset) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{}: offset {} is past the end ({} bytes)", path, offset, file.size()),
        ));
    }

    let mut remaining = length.unwrap_or(u64::MAX);
    let mut buf = vec![0u8; COPY_CHUNK];
    let stdout = io::stdout();
    let mut out = stdout.lock();
    while remaining > 0 {
        let want = remaining.min(COPY_CHUNK as u64) as usize;
        let n = file.read(&mut buf[..want]);
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
        remaining -= n as u64;
    }
    out.flush()
}

fn patch(image: &Path, path: &str, offset: u64, text: &[u8]) -> io::Result<()> {
    let driver = mount(image, true)?;
    let lister = DirectoryLister::new(&driver);
    let mut file = File::open(&driver, &lister, path, FileConfig::writable());
    if !file.exists() {
        return Err(io::Error::new(io::ErrorKind::NotFound, format!("{}: no such file", path)));
    }
    if !file.seek(offset) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{}: offset {} is past the end ({} bytes)", path, offset, file.size()),
        ));
    }

    let written = file.write(text);
    file.sync().map_err(|e| io::Error::other(e.as_str()))?;
    if written < text.len() {
        println!("⚠️  File ends after {} of {} bytes", written, text.len());
    }
    println!("Patched {} bytes of {} at offset {}", written, path, offset);
    Ok(())
}
