use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
mod auth;
use sealfile::crypto::digest::{from_hex, to_hex};
use sealfile::{Config, ContainerInfo, EncryptionService, KdfParams, KeySource, Summary};
use serde_json::json;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Debug, clap::Args)]
struct Argon2Args {
    /// Argon2 memory cost in KiB (default: 65536)
    #[arg(long = "argon-mem", global = true)]
    mem_cost_kib: Option<u32>,

    /// Argon2 time cost / iterations (default: 3)
    #[arg(long = "argon-time", global = true)]
    time_cost: Option<u32>,

    /// Argon2 parallelism (default: 1)
    #[arg(long = "argon-parallelism", global = true)]
    parallelism: Option<u32>,
}

impl Argon2Args {
    fn apply(&self, base: KdfParams) -> Result<KdfParams> {
        Ok(KdfParams::new(
            self.mem_cost_kib.unwrap_or(base.mem_cost_kib()),
            self.time_cost.unwrap_or(base.time_cost()),
            self.parallelism.unwrap_or(base.parallelism()),
        )?)
    }
}

#[derive(Debug, clap::Args)]
struct KeyArgs {
    /// Derive the key from a password
    #[arg(long, conflicts_with = "key_file")]
    password: bool,

    /// Use the key stored in a key file
    #[arg(long, value_name = "PATH")]
    key_file: Option<PathBuf>,

    /// The key file is password-protected
    #[arg(long, requires = "key_file")]
    key_file_protected: bool,
}

impl KeyArgs {
    fn key_file_source(&self) -> Result<Option<KeySource>> {
        let Some(path) = &self.key_file else {
            return Ok(None);
        };
        let password = if self.key_file_protected {
            Some(auth::read_password("Key file password: ")?)
        } else {
            None
        };
        Ok(Some(KeySource::KeyFile {
            path: path.clone(),
            password,
        }))
    }
}

#[derive(Debug, Parser)]
#[command(name = "sealfile")]
#[command(
    version,
    about = "Encrypts files into authenticated, self-describing containers."
)]
struct Cli {
    /// Path to the JSON config file
    #[arg(long, global = true, value_name = "PATH", env = "SEALFILE_CONFIG")]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(flatten)]
    argon2: Argon2Args,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Generates a random key and writes it to a key file
    Keygen {
        #[arg(long, value_name = "PATH")]
        out: PathBuf,

        /// Protect the key file with a password
        #[arg(long, default_value_t = false)]
        protect: bool,
    },

    /// Encrypts a file into a container
    #[command(arg_required_else_help = true)]
    Encrypt {
        input: PathBuf,
        output: PathBuf,

        #[command(flatten)]
        key: KeyArgs,

        /// Generate a fresh key and save it here before encrypting
        #[arg(long, value_name = "PATH", conflicts_with_all = ["password", "key_file"])]
        save_key: Option<PathBuf>,
    },

    /// Decrypts a container back into a file
    #[command(arg_required_else_help = true)]
    Decrypt {
        input: PathBuf,
        output: PathBuf,

        #[command(flatten)]
        key: KeyArgs,
    },

    /// Shows container metadata without decrypting
    #[command(arg_required_else_help = true)]
    Inspect { container: PathBuf },

    /// Prints the SHA-256 digest of a file
    #[command(arg_required_else_help = true)]
    Digest { file: PathBuf },

    /// Checks a file against a hex SHA-256 digest
    #[command(arg_required_else_help = true)]
    Verify { file: PathBuf, digest: String },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("SEALFILE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .init();
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load_or_default(cli.config.as_deref())?;
    config.kdf = cli.argon2.apply(config.kdf)?;
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let service = EncryptionService::new(&load_config(&cli)?);

    match &cli.command {
        Commands::Keygen { out, protect } => {
            let password = if *protect {
                Some(auth::read_new_password_with_confirmation()?)
            } else {
                None
            };
            let key = service.generate_key()?;
            service
                .export_key(&key, out, password.as_ref().map(|p| p.as_str()))
                .with_context(|| format!("failed to write key file {}", out.display()))?;

            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({ "key_file": out, "protected": protect }))?
                );
            } else {
                println!("key written to {}", out.display());
            }
        }
        Commands::Encrypt {
            input,
            output,
            key,
            save_key,
        } => {
            let source = if key.password {
                KeySource::Password(auth::read_new_password_with_confirmation()?)
            } else if let Some(source) = key.key_file_source()? {
                source
            } else if let Some(path) = save_key {
                // the key must be on disk before anything depends on it
                let generated = service.generate_key()?;
                service
                    .export_key(&generated, path, None)
                    .with_context(|| format!("failed to write key file {}", path.display()))?;
                KeySource::Key(generated)
            } else {
                bail!("no key source: pass --password, --key-file, or --save-key");
            };

            let summary = service
                .encrypt_file(input, output, &source)
                .with_context(|| format!("failed to encrypt {}", input.display()))?;
            print_summary(&summary, cli.json)?;
        }
        Commands::Decrypt { input, output, key } => {
            let source = if key.password {
                KeySource::Password(auth::read_password("Password: ")?)
            } else if let Some(source) = key.key_file_source()? {
                source
            } else {
                bail!("no key source: pass --password or --key-file");
            };

            let summary = service
                .decrypt_file(input, output, &source)
                .with_context(|| format!("failed to decrypt {}", input.display()))?;
            print_summary(&summary, cli.json)?;
        }
        Commands::Inspect { container } => {
            let info = service
                .inspect(container)
                .with_context(|| format!("failed to read {}", container.display()))?;
            print_info(container, &info, cli.json)?;
        }
        Commands::Digest { file } => {
            let digest = to_hex(&service.digest_file(file)?);
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({ "file": file, "sha256": digest }))?
                );
            } else {
                println!("{digest}  {}", file.display());
            }
        }
        Commands::Verify { file, digest } => {
            let expected = from_hex(digest.trim())?;
            let matches = service.verify_file(file, &expected)?;

            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({ "file": file, "matches": matches }))?
                );
            } else if matches {
                println!("{}: OK", file.display());
            }
            if !matches {
                bail!("digest mismatch for {}", file.display());
            }
        }
    }

    Ok(())
}

fn print_summary(summary: &Summary, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summary)?);
        return Ok(());
    }

    let verb = match summary.operation() {
        sealfile::Operation::Encrypt => "encrypted",
        sealfile::Operation::Decrypt => "decrypted",
    };
    println!(
        "{verb} {} -> {} ({} bytes, {} key)",
        summary.input().display(),
        summary.output().display(),
        summary.plaintext_length(),
        summary.origin()
    );
    println!("sha256: {}", summary.content_digest());
    Ok(())
}

fn print_info(path: &Path, info: &ContainerInfo, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(info)?);
        return Ok(());
    }

    let rows = [
        ("Container", path.display().to_string()),
        ("Format", format!("v{}", info.format_version)),
        ("Key", info.origin.to_string()),
        ("Filename", info.original_filename.clone().unwrap_or_else(|| "-".into())),
        ("Plaintext", format!("{} bytes", info.plaintext_length)),
        ("Size", format!("{} bytes", info.container_size)),
        ("SHA-256", info.content_digest.clone()),
    ];
    let width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);

    for (label, value) in rows {
        println!("{label:<width$}  {value}");
    }
    Ok(())
}
