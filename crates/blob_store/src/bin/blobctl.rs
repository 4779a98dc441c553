use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use bits_blobstore::{
    BlobOrRedirect,
    BlobStorage,
    BlobStoreConfig,
    source_from_reader,
    validate_expiry,
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{Layer, layer::SubscriberExt};

#[derive(Parser, Debug)]
#[command(name = "blobctl")]
#[command(about = "Inspect and manage a bits blob store", long_about = None)]
struct Args {
    /// Path to the blob store configuration file
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check whether a blob exists
    Exists { path: String },
    /// Stream a blob to stdout or a file
    Get {
        path: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print a signed GET URL, or the blob when the provider cannot redirect
    GetOrRedirect { path: String },
    /// Upload a file
    Put { path: String, file: PathBuf },
    /// Copy a blob within the bucket
    Copy { src: String, dest: String },
    /// Delete a blob
    Delete { path: String },
    /// Delete every blob under a prefix
    DeleteDir { prefix: String },
    /// List keys under a prefix
    List {
        #[arg(default_value = "")]
        prefix: String,
    },
    /// Print a signed URL
    Sign {
        path: String,
        #[arg(short, long, default_value = "get")]
        method: String,
        /// Validity in seconds
        #[arg(short, long, default_value_t = 3600)]
        expires_in: u64,
    },
}

fn setup_tracing() -> Result<()> {
    // RUST_LOG used to control logging level.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::default()
            .add_directive(tracing_subscriber::filter::LevelFilter::WARN.into())
    });
    let log_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    let subscriber = tracing_subscriber::Registry::default().with(log_layer);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_tracing()?;
    let args = Args::parse();

    info!("loading config from: {:?}", args.config);
    let storage = BlobStorage::new(BlobStoreConfig::from_path(&args.config)?)?;

    match args.command {
        Command::Exists { path } => {
            println!("{}", storage.exists(&path).await?);
        }
        Command::Get { path, output } => {
            let mut reader = storage.get(&path).await?.into_async_read();
            match output {
                Some(output) => {
                    let mut file = tokio::fs::File::create(&output).await?;
                    tokio::io::copy(&mut reader, &mut file).await?;
                }
                None => {
                    tokio::io::copy(&mut reader, &mut tokio::io::stdout()).await?;
                }
            }
        }
        Command::GetOrRedirect { path } => match storage.get_or_redirect(&path).await? {
            BlobOrRedirect::Redirect(url) => println!("{url}"),
            BlobOrRedirect::Body(body) => {
                let mut reader = body.into_async_read();
                tokio::io::copy(&mut reader, &mut tokio::io::stdout()).await?;
            }
        },
        Command::Put { path, file } => {
            let file = tokio::fs::File::open(&file).await?;
            let result = storage.put(&path, source_from_reader(file)).await?;
            println!("{}", serde_json::to_string(&result)?);
        }
        Command::Copy { src, dest } => storage.copy(&src, &dest).await?,
        Command::Delete { path } => storage.delete(&path).await?,
        Command::DeleteDir { prefix } => storage.delete_dir(&prefix).await?,
        Command::List { prefix } => {
            for key in storage.list(&prefix).await? {
                println!("{key}");
            }
        }
        Command::Sign {
            path,
            method,
            expires_in,
        } => {
            let expires_in = Duration::from_secs(expires_in);
            validate_expiry(expires_in).map_err(anyhow::Error::msg)?;
            let expires_at = Utc::now() + chrono::Duration::from_std(expires_in)?;
            let url = storage.sign_str(&path, &method, expires_at).await?;
            println!("{url}");
            for (name, value) in &url.required_headers {
                println!("{name}: {value}");
            }
        }
    }
    Ok(())
}
