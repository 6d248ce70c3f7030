use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use echowave::{
    CodeStore, Device, DeviceConfig, DeviceEvent, DeviceEvents, DeviceHandle, Error, RcCode,
    Result, SerialConnector,
};

/// Command-line args for the `echowave` binary
#[derive(Parser, Debug)]
#[command(
    name = "echowave",
    version,
    about = "Capture and replay 433 MHz remote codes through an EchoWave relay"
)]
struct Args {
    /// Serial port of the relay, overrides the configuration file
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// JSON device configuration
    #[arg(short, long, global = true, value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// File holding captured codes
    #[arg(short, long, global = true, default_value = "echowave-codes.txt")]
    store: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print received codes until Ctrl-C, adding them to the store
    Listen,
    /// Transmit a stored code
    Send {
        /// Position of the code as printed by `list`
        index: usize,
    },
    /// Print the stored codes
    List,
    /// Remove every stored code
    Clear,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if let Err(err) = run(args).await {
        error!("{}", err);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let mut store = CodeStore::open(&args.store)?;

    match args.command {
        Command::List => {
            list(&store);
            Ok(())
        }
        Command::Clear => {
            let removed = store.codes().len();
            store.clear();
            store.save()?;
            info!("Removed {} codes", removed);
            Ok(())
        }
        Command::Send { index } => {
            let code = *store
                .codes()
                .get(index)
                .ok_or_else(|| Error::store(format!("No code at index {}", index)))?;

            let config = load_config(args.port, args.config.as_deref())?;
            let (handle, _events) = DeviceHandle::spawn(Device::new(SerialConnector, config))?;
            handle.send_code(code.data).await?;
            info!("Sent {}", code.data);
            handle.close().await
        }
        Command::Listen => {
            let config = load_config(args.port, args.config.as_deref())?;
            let (handle, events) = DeviceHandle::spawn(Device::new(SerialConnector, config))?;
            listen(&handle, events, &mut store).await?;
            handle.close().await
        }
    }
}

/// Reads the configuration file, if any, and applies the port override
fn load_config(port: Option<String>, path: Option<&Path>) -> Result<DeviceConfig> {
    let mut config = match path {
        Some(path) => {
            let json = fs::read_to_string(path).map_err(|e| {
                Error::config(format!("Cannot read {}: {}", path.display(), e))
            })?;
            info!("Loaded config file: {}", path.display());
            DeviceConfig::from_json(&json)?
        }
        None => DeviceConfig::default(),
    };

    if let Some(port) = port {
        config.port_name = port;
    }
    config.validate()?;
    Ok(config)
}

async fn listen(handle: &DeviceHandle, mut events: DeviceEvents, store: &mut CodeStore) -> Result<()> {
    handle.start_listening().await?;
    info!("Listening, press Ctrl-C to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                result?;
                break;
            }
            event = events.next() => match event {
                Some(DeviceEvent::CodeReceived(data)) => {
                    let code = RcCode::captured(data);
                    if store.insert(code) {
                        store.save()?;
                        let index = store.codes().iter().position(|c| *c == code).unwrap_or_default();
                        println!("{}", describe(index, &code));
                    }
                }
                Some(DeviceEvent::ListenMode { enabled: false, success: false }) => {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::BrokenPipe,
                        "listening aborted by a device failure",
                    )));
                }
                Some(_) => {}
                None => {
                    warn!("Device worker stopped");
                    return Ok(());
                }
            }
        }
    }

    handle.stop_listening().await
}

fn list(store: &CodeStore) {
    if store.codes().is_empty() {
        println!("No codes stored in {}", store.path().display());
        return;
    }
    for (index, code) in store.codes().iter().enumerate() {
        println!("{}", describe(index, code));
    }
}

fn describe(index: usize, code: &RcCode) -> String {
    let captured = code
        .captured_at()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!("{:>3}  {}  {}", index, captured, code.data)
}
