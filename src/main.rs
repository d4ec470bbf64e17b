use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use remote_marshal::config::{self, Config, ConfigLoader, ConfigValidator};
use remote_marshal::memory::scanner::pattern_file;
use remote_marshal::{
    Address, MemoryAddress, MemoryValue, ProtectionFlags, SandboxMemory, StringEncoding, ValueType,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version)]
#[command(about = "Typed access and pattern scanning over process memory", long_about = None)]
struct Args {
    /// Configuration file (defaults to remote-marshal.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level or filter directive, overrides the configuration
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve every pattern of a pattern file against a module dump
    Scan {
        /// Raw module image dumped from a target
        #[arg(short, long)]
        image: PathBuf,

        /// JSON or TOML pattern definitions
        #[arg(short, long)]
        patterns: PathBuf,

        /// Base address the image was loaded at
        #[arg(short, long, default_value = "0x400000")]
        base: Address,

        #[arg(long, default_value_t = std::mem::size_of::<usize>())]
        pointer_width: usize,
    },

    /// Read one value from a module dump
    Read {
        #[arg(short, long)]
        image: PathBuf,

        /// Offset from the start of the image
        #[arg(short, long)]
        offset: Address,

        /// Value type such as u32, f64, ptr, bytes or string
        #[arg(short = 't', long = "type")]
        value_type: ValueType,

        /// Byte count for bytes, maximum length for strings
        #[arg(short, long)]
        len: Option<usize>,

        /// String encoding, defaults to the configured one
        #[arg(short, long)]
        encoding: Option<StringEncoding>,

        #[arg(short, long, default_value = "0x400000")]
        base: Address,

        #[arg(long, default_value_t = std::mem::size_of::<usize>())]
        pointer_width: usize,
    },

    /// Check a pattern file and print each pattern's length and mask
    Validate {
        #[arg(short, long)]
        patterns: PathBuf,
    },

    /// Write the default configuration
    Config {
        #[arg(short, long, default_value = config::DEFAULT_CONFIG_FILE)]
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let config = config::load_config(args.config.as_deref())
        .with_context(|| "Failed to load configuration")?;
    ConfigValidator::validate(&config)?;
    init_logging(&config, args.log_level.as_deref());

    if let Err(err) = rayon::ThreadPoolBuilder::new()
        .num_threads(config.scanner.max_threads)
        .build_global()
    {
        warn!(error = %err, "Could not size the scan thread pool");
    }

    match args.command {
        Command::Scan {
            image,
            patterns,
            base,
            pointer_width,
        } => scan(&config, &image, &patterns, base, pointer_width),
        Command::Read {
            image,
            offset,
            value_type,
            len,
            encoding,
            base,
            pointer_width,
        } => {
            let target = load_image(&image, base, pointer_width)?;
            let ops = config.memory.operations(&target).with_module_base(base);
            let address = MemoryAddress::relative(offset.as_usize());

            let value = if value_type == ValueType::String {
                let read = ops.reader().read_string_detailed(
                    address,
                    encoding.unwrap_or(config.memory.default_encoding),
                    len.unwrap_or(config.memory.max_string_bytes),
                )?;
                if !read.terminated {
                    warn!("String is not terminated within the read length");
                }
                MemoryValue::String(read.text)
            } else {
                ops.read_dynamic(address, value_type, len)?
            };
            println!("{}", value);
            Ok(())
        }
        Command::Validate { patterns } => {
            let definitions = pattern_file::load(&patterns)
                .with_context(|| format!("Invalid pattern file {}", patterns.display()))?;
            for definition in &definitions {
                let pattern = definition.to_pattern()?;
                println!(
                    "{}: {} bytes, mask {}{}{}",
                    definition.name,
                    pattern.len(),
                    pattern.mask(),
                    if pattern.offset_mode { ", offset mode" } else { "" },
                    if pattern.rebase { ", rebased" } else { "" },
                );
            }
            info!(count = definitions.len(), "Pattern file is valid");
            Ok(())
        }
        Command::Config { output } => {
            if output.exists() {
                bail!("{} already exists", output.display());
            }
            ConfigLoader::new(&output).save(&Config::default())?;
            info!(path = %output.display(), "Wrote default configuration");
            Ok(())
        }
    }
}

fn init_logging(config: &Config, override_level: Option<&str>) {
    let filter = match override_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.logging.ansi)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn load_image(path: &Path, base: Address, pointer_width: usize) -> Result<SandboxMemory> {
    let image = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let target = SandboxMemory::new().with_pointer_width(pointer_width)?;
    target.map_image(base, &image, ProtectionFlags::execute_read())?;
    info!(
        path = %path.display(),
        %base,
        size = image.len(),
        "Mapped module image"
    );
    Ok(target)
}

fn scan(
    config: &Config,
    image: &Path,
    patterns: &Path,
    base: Address,
    pointer_width: usize,
) -> Result<()> {
    let definitions = pattern_file::load(patterns)
        .with_context(|| format!("Invalid pattern file {}", patterns.display()))?;
    let target = load_image(image, base, pointer_width)?;
    let size = fs::metadata(image)?.len() as usize;

    let scanner = config.scanner.scanner(&target, base, size);
    let found: BTreeMap<String, String> = scanner
        .collect_from_pattern_set(&definitions)?
        .into_iter()
        .map(|(name, address)| (name, format!("{:#x}", address.as_usize())))
        .collect();

    println!("{}", serde_json::to_string_pretty(&found)?);
    Ok(())
}
