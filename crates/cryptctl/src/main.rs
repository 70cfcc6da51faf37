use anyhow::{bail, Context, Result};
use blockdev_sim::{open_sim_device, FileBlockDevice, SimDeviceConfig};
use clap::{Args, Parser, Subcommand};
use common::{BlockDevice, ControlOp, DEFAULT_BLOCK_SIZE};
use encryption::{CryptConfig, EncryptingBlockDevice, IvMode, KeySource, VolumeKey};
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Once;
use tracing::info;
use tracing_subscriber::EnvFilter;

type Volume = EncryptingBlockDevice<FileBlockDevice>;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let format =
            std::env::var("CRYPTBDEV_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

        // Logs go to stderr; stdout carries block data.
        if format.eq_ignore_ascii_case("json") {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter.clone())
                .with_target(true)
                .with_writer(io::stderr)
                .json()
                .flatten_event(true)
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .with_writer(io::stderr)
                .compact()
                .init();
        }
    });
}

#[derive(Parser)]
#[command(name = "cryptctl")]
#[command(about = "Encrypted block image utility (dm-crypt plain layout)", long_about = None)]
struct Cli {
    #[command(flatten)]
    volume: VolumeArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Default)]
struct VolumeArgs {
    /// IV mode: plain64, essiv, or a dm-crypt cipher spec
    #[arg(long, global = true)]
    mode: Option<IvMode>,
    /// Hex-encoded 256-bit key (prefer CRYPTBDEV_KEY; argv is visible to other users)
    #[arg(long, global = true)]
    key_hex: Option<String>,
    /// YAML volume configuration
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Block size of the image in bytes
    #[arg(long, global = true, default_value_t = DEFAULT_BLOCK_SIZE)]
    block_size: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a fresh random key as hex
    Keygen,
    /// Create an image and fill it with encrypted zero blocks
    Create {
        image: PathBuf,
        #[arg(long)]
        blocks: u64,
    },
    /// Describe an image and the cipher used to open it
    Info {
        image: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Read decrypted bytes from one block (writes to stdout)
    Read {
        image: PathBuf,
        #[arg(long)]
        block: u64,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Defaults to the rest of the block
        #[arg(long)]
        length: Option<usize>,
        #[arg(long)]
        hex: bool,
    },
    /// Write bytes from a file into one block
    Write {
        image: PathBuf,
        #[arg(long)]
        block: u64,
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Replace one block with encrypted zeros
    Erase {
        image: PathBuf,
        #[arg(long)]
        block: u64,
    },
}

#[derive(Serialize)]
struct VolumeInfo {
    image: String,
    block_size: usize,
    block_count: u64,
    mode: IvMode,
    cipher: &'static str,
    key_source: &'static str,
}

/// Flags beat environment, environment beats the config file.
fn load_config(args: &VolumeArgs) -> Result<CryptConfig> {
    let config = match &args.config {
        Some(path) => CryptConfig::from_yaml_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => CryptConfig::default(),
    };
    let mut config = config
        .with_env_overrides()
        .context("applying environment overrides")?;

    if let Some(mode) = args.mode {
        config.mode = mode;
    }
    if let Some(value) = &args.key_hex {
        config.key = KeySource::Hex {
            value: value.clone(),
        };
    }
    Ok(config)
}

fn persistent_config(args: &VolumeArgs) -> Result<CryptConfig> {
    let config = load_config(args)?;
    if !config.key.is_persistent() {
        bail!("no volume key given; set CRYPTBDEV_KEY, pass --key-hex or use --config");
    }
    Ok(config)
}

fn attach<D: BlockDevice>(device: D, config: &CryptConfig) -> Result<EncryptingBlockDevice<D>> {
    EncryptingBlockDevice::from_config(device, config).context("attaching encryption layer")
}

fn open_volume(image: &Path, args: &VolumeArgs) -> Result<Volume> {
    let config = persistent_config(args)?;
    let device = FileBlockDevice::open(image, args.block_size)
        .with_context(|| format!("opening image {}", image.display()))?;
    attach(device, &config)
}

fn key_source_name(source: &KeySource) -> &'static str {
    match source {
        KeySource::Generate => "generate",
        KeySource::Hex { .. } => "hex",
        KeySource::Env { .. } => "env",
    }
}

fn run(cli: Cli, out: &mut impl Write) -> Result<()> {
    let args = &cli.volume;

    match cli.command {
        Commands::Keygen => {
            writeln!(out, "{}", VolumeKey::generate().to_hex())?;
        }
        Commands::Create { image, blocks } => {
            let config = persistent_config(args)?;
            if image.exists() {
                bail!("refusing to overwrite existing image {}", image.display());
            }
            let device = open_sim_device(&SimDeviceConfig {
                block_size: args.block_size,
                block_count: blocks,
                backing_path: Some(image.clone()),
            })
            .with_context(|| format!("creating image {}", image.display()))?;
            let mut volume = attach(device, &config)?;

            for block in 0..blocks {
                volume
                    .control(ControlOp::EraseBlock, block)
                    .with_context(|| format!("initialising block {block}"))?;
            }
            volume.control(ControlOp::Sync, 0).context("syncing image")?;

            info!(image = %image.display(), blocks, cipher = config.mode.cipher_spec(), "created encrypted image");
            writeln!(
                out,
                "Created {} ({} blocks of {} bytes, cipher {})",
                image.display(),
                blocks,
                args.block_size,
                config.mode.cipher_spec()
            )?;
        }
        Commands::Info { image, json } => {
            let config = load_config(args)?;
            let mut device = FileBlockDevice::open(&image, args.block_size)
                .with_context(|| format!("opening image {}", image.display()))?;
            let info = VolumeInfo {
                image: device.path().display().to_string(),
                block_size: args.block_size,
                block_count: device.block_count()?.unwrap_or(0),
                mode: config.mode,
                cipher: config.mode.cipher_spec(),
                key_source: key_source_name(&config.key),
            };

            if json {
                writeln!(out, "{}", serde_json::to_string_pretty(&info)?)?;
            } else {
                writeln!(out, "Image: {}", info.image)?;
                writeln!(out, "Block Size: {}", info.block_size)?;
                writeln!(out, "Blocks: {}", info.block_count)?;
                writeln!(out, "Cipher: {}", info.cipher)?;
                writeln!(out, "Key Source: {}", info.key_source)?;
            }
        }
        Commands::Read {
            image,
            block,
            offset,
            length,
            hex,
        } => {
            let mut volume = open_volume(&image, args)?;
            let length = length.unwrap_or_else(|| volume.block_size().saturating_sub(offset));
            let mut buf = vec![0u8; length];
            volume
                .read(block, &mut buf, offset)
                .with_context(|| format!("reading block {block}"))?;

            if hex {
                writeln!(out, "{}", hex::encode(&buf))?;
            } else {
                out.write_all(&buf)?;
            }
        }
        Commands::Write {
            image,
            block,
            offset,
            file,
        } => {
            let data =
                fs::read(&file).with_context(|| format!("reading input {}", file.display()))?;
            let mut volume = open_volume(&image, args)?;
            volume
                .write(block, &data, offset)
                .with_context(|| format!("writing block {block}"))?;
            volume.control(ControlOp::Sync, 0).context("syncing image")?;
            writeln!(
                out,
                "Wrote {} bytes to block {} at offset {} from {}",
                data.len(),
                block,
                offset,
                file.display()
            )?;
        }
        Commands::Erase { image, block } => {
            let mut volume = open_volume(&image, args)?;
            volume
                .control(ControlOp::EraseBlock, block)
                .with_context(|| format!("erasing block {block}"))?;
            volume.control(ControlOp::Sync, 0).context("syncing image")?;
            writeln!(out, "Erased block {block}")?;
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    run(cli, &mut out)
}
