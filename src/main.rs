use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use gcodelink::{
    init_logging, Config, DriverEvent, FileSource, Hook, Offset, Printer, Program,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print program statistics as JSON
    Analyze {
        /// G-code file to analyze
        file: PathBuf,
    },
    /// Shift every absolute move by a fixed offset
    Offset {
        file: PathBuf,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        x: f64,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        y: f64,
        #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
        z: f64,
        /// Write here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Stream a program to a printer
    Print {
        file: PathBuf,
        /// Serial port, e.g. /dev/ttyUSB0 or COM3
        #[arg(short, long)]
        port: Option<String>,
        #[arg(short, long)]
        baud: Option<u32>,
        /// Configuration file (.toml or .json)
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Stream the file lazily without layer tracking
        #[arg(long)]
        low_power: bool,
        /// Seconds to wait for the device to come online
        #[arg(long, default_value_t = 10)]
        online_timeout: u64,
    },
    /// List serial ports that look like printers
    Ports,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging()?;

    match args.command {
        Commands::Analyze { file } => {
            let program = Program::from_file(&file)
                .with_context(|| format!("Failed to load {}", file.display()))?;
            println!("{}", serde_json::to_string_pretty(program.stats())?);
        }
        Commands::Offset {
            file,
            x,
            y,
            z,
            output,
        } => {
            let mut program = Program::from_file(&file)
                .with_context(|| format!("Failed to load {}", file.display()))?;
            program.offset(Offset { x, y, z });
            match output {
                Some(path) => program.write_to_file(&path)?,
                None => print!("{}", program.to_gcode()),
            }
        }
        Commands::Print {
            file,
            port,
            baud,
            config,
            low_power,
            online_timeout,
        } => {
            let mut config = match config {
                Some(path) => Config::load_from_file(&path)
                    .with_context(|| format!("Failed to load {}", path.display()))?,
                None => Config::default(),
            };
            if port.is_some() {
                config.connection.port = port;
            }
            if baud.is_some() {
                config.connection.baud_rate = baud;
            }
            config.low_power |= low_power;
            config.validate()?;
            print(config, &file, Duration::from_secs(online_timeout))?;
        }
        Commands::Ports => {
            for port in gcodelink::list_ports()? {
                println!("{}\t{}", port.port_name, port.description);
            }
        }
    }
    Ok(())
}

fn print(config: Config, file: &Path, online_timeout: Duration) -> anyhow::Result<()> {
    let low_power = config.low_power;
    let mut printer = Printer::new(config);
    printer.set_hook(Hook::Temperature, |e| {
        if let DriverEvent::Temperature(line) = e {
            tracing::info!("{}", line);
        }
    });
    printer.set_hook(Hook::Error, |e| tracing::warn!("{}", e));
    let mut events = printer.subscribe();

    printer.connect()?;
    printer.wait_until_online(online_timeout)?;

    if low_power {
        printer.print_source(Box::new(FileSource::open(file)?))?;
    } else {
        let program = Program::from_file(file)?;
        tracing::info!(
            "{} lines, {} layers, {:.1} mm of filament",
            program.len(),
            program.stats().layers,
            program.stats().filament_total
        );
        printer.print(Arc::new(program))?;
    }

    loop {
        match events.blocking_recv() {
            Ok(DriverEvent::Finished) => break,
            Ok(DriverEvent::CriticalError(reason)) => bail!("Print failed: {}", reason),
            Ok(DriverEvent::LayerChange(layer)) => {
                let progress = printer.progress();
                match progress.fraction() {
                    Some(fraction) => {
                        tracing::info!("Layer {} ({:.0}%)", layer, fraction * 100.0)
                    }
                    None => tracing::info!("Layer {}", layer),
                }
            }
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
        }
    }
    printer.disconnect()?;
    Ok(())
}
