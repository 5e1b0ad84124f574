use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
mod auth;
use saltshade::crypto::kdf::{DEFAULT_ITERATIONS, OFFLINE_ITERATIONS};
use saltshade::{
    Carrier, DEFAULT_CHUNK_SIZE, EncryptOutcome, KdfParams, LsbCodec, Pipeline, SaltCodec,
    inspect, stego,
};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum KdfAlgorithm {
    /// PBKDF2-HMAC-SHA512
    Pbkdf2,
    /// Argon2id
    Argon2id,
}

#[derive(Debug, clap::Args)]
struct KdfArgs {
    /// Key derivation function (recorded in the carrier on encrypt)
    #[arg(long, value_enum, default_value_t = KdfAlgorithm::Pbkdf2, env = "SALTSHADE_KDF")]
    kdf: KdfAlgorithm,

    /// PBKDF2 iteration count (default: 100000)
    #[arg(long, env = "SALTSHADE_ITERATIONS", conflicts_with = "offline")]
    iterations: Option<u32>,

    /// Use the slow offline PBKDF2 iteration count (10000000)
    #[arg(long, default_value_t = false)]
    offline: bool,

    /// Argon2 memory cost in KiB (default: 65536)
    #[arg(long = "argon-mem")]
    mem_cost_kib: Option<u32>,

    /// Argon2 time cost / iterations (default: 3)
    #[arg(long = "argon-time")]
    time_cost: Option<u32>,

    /// Argon2 parallelism (default: 1)
    #[arg(long = "argon-parallelism")]
    parallelism: Option<u32>,
}

impl KdfArgs {
    fn to_kdf_params(&self) -> Result<KdfParams> {
        let params = match self.kdf {
            KdfAlgorithm::Pbkdf2 => {
                let iterations = match (self.iterations, self.offline) {
                    (Some(n), _) => n,
                    (None, true) => OFFLINE_ITERATIONS,
                    (None, false) => DEFAULT_ITERATIONS,
                };
                KdfParams::pbkdf2(iterations)?
            }
            KdfAlgorithm::Argon2id => KdfParams::argon2id(
                self.mem_cost_kib.unwrap_or(64 * 1024),
                self.time_cost.unwrap_or(3),
                self.parallelism.unwrap_or(1),
            )?,
        };
        Ok(params)
    }
}

#[derive(Debug, Parser)]
#[command(name = "saltshade")]
#[command(
    version,
    about = "Encrypt a file with a password and hide the key salt inside an image."
)]
struct Cli {
    /// Hide the progress bar
    #[arg(long, short, global = true, default_value_t = false)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Encrypts a file in place and hides the salt in a PNG or BMP carrier
    #[command(arg_required_else_help = true)]
    Encrypt {
        file: PathBuf,

        /// Carrier image that receives the salt (rewritten in place)
        #[arg(long, short, value_name = "IMAGE")]
        carrier: PathBuf,

        /// Plaintext bytes per encrypted chunk
        #[arg(long, env = "SALTSHADE_CHUNK_SIZE", default_value_t = DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,

        #[command(flatten)]
        kdf: KdfArgs,
    },

    /// Decrypts a file in place using the salt hidden in the carrier
    #[command(arg_required_else_help = true)]
    Decrypt {
        file: PathBuf,

        /// Carrier image holding the salt
        #[arg(long, short, value_name = "IMAGE")]
        carrier: PathBuf,

        // only used when the carrier holds a bare salt
        #[command(flatten)]
        kdf: KdfArgs,
    },

    /// Shows how many payload bytes a carrier image can hold
    #[command(arg_required_else_help = true)]
    Capacity { image: PathBuf },

    /// Shows the chunk layout of an encrypted file without decrypting it
    #[command(arg_required_else_help = true)]
    Inspect {
        file: PathBuf,

        /// Print as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn make_progress_bar(prefix: &str, quiet: bool) -> Result<ProgressBar> {
    if quiet {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::with_template(
            "{prefix:.bold} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {percent}%",
        )?
        .progress_chars("=>-"),
    );
    pb.set_prefix(prefix.to_string());
    Ok(pb)
}

fn encrypt(file: &Path, carrier: &Path, pipeline: &Pipeline, quiet: bool) -> Result<()> {
    let password = auth::read_new_password_with_confirmation()?;
    let pb = make_progress_bar("Encrypting", quiet)?;
    let mut report = |done: u64, total: u64| {
        pb.set_length(total);
        pb.set_position(done);
    };

    let outcome = pipeline
        .encrypt(&password, file, carrier, Some(&mut report))
        .with_context(|| format!("failed to encrypt '{}'", file.display()))?;
    pb.finish_and_clear();

    match outcome {
        EncryptOutcome::Sealed => {
            println!(
                "file '{}' encrypted; salt hidden in '{}'",
                file.display(),
                carrier.display()
            );
            Ok(())
        }
        EncryptOutcome::SaltNotEmbedded(e) => bail!(
            "file '{}' was encrypted but the salt could not be hidden in '{}': {e}; \
             the file cannot be decrypted",
            file.display(),
            carrier.display()
        ),
    }
}

fn decrypt(file: &Path, carrier: &Path, pipeline: &Pipeline, quiet: bool) -> Result<()> {
    let password = auth::read_password()?;
    let pb = make_progress_bar("Decrypting", quiet)?;
    let mut report = |done: u64, total: u64| {
        pb.set_length(total);
        pb.set_position(done);
    };

    pipeline
        .decrypt(&password, file, carrier, Some(&mut report))
        .with_context(|| format!("failed to decrypt '{}'", file.display()))?;
    pb.finish_and_clear();

    println!("file '{}' decrypted", file.display());
    Ok(())
}

fn capacity(image: &Path) -> Result<()> {
    let carrier = Carrier::open(image)?;
    let capacity = LsbCodec.capacity(&carrier);
    let kdf = Some(KdfParams::default());
    let needed = stego::encode_salt_payload(&[0u8; saltshade::SALT_LEN], kdf).len();

    println!(
        "{}x{} {:?} {:?}: {} color samples, {} payload bytes",
        carrier.width(),
        carrier.height(),
        carrier.color(),
        carrier.format(),
        carrier.sample_count(),
        capacity
    );
    if capacity >= needed {
        println!("salt fits ({needed} bytes needed)");
    } else {
        println!("too small for a salt ({needed} bytes needed)");
    }
    Ok(())
}

fn inspect_file(file: &Path, json: bool) -> Result<()> {
    let reader = BufReader::new(
        File::open(file).with_context(|| format!("cannot open '{}'", file.display()))?,
    );
    let summary = inspect(reader).context("not a valid encrypted container")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Version:        {}", summary.version);
    println!("Chunks:         {}", summary.chunks);
    println!("Plaintext size: {}", summary.plaintext_len);
    println!("Container size: {}", summary.container_len);
    println!(
        "Complete:       {}",
        if summary.complete { "yes" } else { "no (truncated)" }
    );
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let args = Cli::parse();

    match args.command {
        Commands::Encrypt {
            file,
            carrier,
            chunk_size,
            kdf,
        } => {
            let pipeline = Pipeline::new(kdf.to_kdf_params()?).chunk_size(chunk_size);
            encrypt(&file, &carrier, &pipeline, args.quiet)?;
        }
        Commands::Decrypt { file, carrier, kdf } => {
            let pipeline = Pipeline::new(kdf.to_kdf_params()?);
            decrypt(&file, &carrier, &pipeline, args.quiet)?;
        }
        Commands::Capacity { image } => capacity(&image)?,
        Commands::Inspect { file, json } => inspect_file(&file, json)?,
    }

    Ok(())
}
