//! Sensor Silo
//!
//! Operator tool for calibrating pH, ORP, dissolved oxygen and thermistor
//! sensors and for streaming their filtered readings once deployed.

mod config;
mod operator;
mod store;
mod stream;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sensor_silo_core::{Procedure, RollingAverage, RunOutcome, Sensor, Silo, Streams};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use operator::TerminalOperator;
use store::SiloFile;

#[derive(Parser)]
#[command(name = "silo")]
#[command(about = "Calibrate and deploy Sensor Silo sensors")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Application configuration file
    #[arg(short, long, default_value = "silo.toml")]
    config: PathBuf,

    /// Silo document name (default from configuration)
    #[arg(short, long)]
    file: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Calibration procedure templates
    Procedures {
        #[command(subcommand)]
        action: ProcedureCommands,
    },
    /// Sensor collection commands
    Sensors {
        #[command(subcommand)]
        action: SensorsCommands,
    },
    /// Single sensor commands
    Sensor {
        #[command(subcommand)]
        action: SensorCommands,
    },
    /// Acquire calibration data for a sensor
    Cal {
        /// Sensor id
        id: String,
    },
    /// Read a sensor in raw and engineering units
    Meas {
        /// Sensor id
        id: String,
    },
    /// Evaluate a raw reading with a sensor's equation
    Eval {
        /// Sensor id
        id: String,
        /// Raw reading in millivolts
        #[arg(allow_hyphen_values = true)]
        raw: f64,
    },
    /// Evaluate sensor calibration quality
    Qual {
        /// Sensor id
        id: String,
    },
    /// Print a sensor's persisted record
    Dump {
        /// Sensor id
        id: String,
    },
    /// Deployment settings
    Deploy {
        #[command(subcommand)]
        action: DeployCommands,
    },
    /// Stream filtered readings of deployed sensors
    Stream {
        /// Take one sample of each sensor and exit
        #[arg(long)]
        once: bool,
    },
}

#[derive(Subcommand)]
enum ProcedureCommands {
    /// List procedure kinds
    List,
    /// Show a procedure's settings
    Show {
        /// Procedure kind: ph, orp, do, ntc
        kind: String,
    },
    /// Change a procedure setting
    Set {
        /// Procedure kind: ph, orp, do, ntc
        kind: String,
        /// interval, address, points, or a parameter name (sp1, beta, ...)
        field: String,
        /// New value
        #[arg(allow_hyphen_values = true)]
        value: String,
    },
}

#[derive(Subcommand)]
enum SensorsCommands {
    /// List sensors with their calibration state
    List,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SensorField {
    /// Deployed name
    Name,
    /// Deployed location
    Location,
    /// Deployed board/channel address (e.g. b3) or ND
    Address,
}

#[derive(Subcommand)]
enum SensorCommands {
    /// Create a sensor
    New {
        /// Sensor id
        id: String,
        /// Procedure kind: ph, orp, do, ntc
        kind: String,
    },
    /// Show a sensor
    Show {
        /// Sensor id
        id: String,
    },
    /// Change a sensor setting
    Set {
        /// Sensor id
        id: String,
        #[arg(value_enum)]
        field: SensorField,
        /// New value
        value: String,
    },
    /// Delete a sensor
    Del {
        /// Sensor id
        id: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DeployField {
    /// API key name, typically the deployed host name
    Key,
    /// Folder name
    Folder,
    /// Group name
    Group,
    /// Update interval in minutes (at least 10)
    Interval,
    /// Samples filtered per interval (1-100)
    Osr,
    /// Filter time constant in percent of the interval (0-250)
    Filter,
}

#[derive(Subcommand)]
enum DeployCommands {
    /// Show deployment settings
    Show,
    /// Change a deployment setting
    Set {
        #[arg(value_enum)]
        field: DeployField,
        /// New value
        value: String,
    },
}

/// Loaded configuration, streams and silo document.
struct App {
    config: Config,
    file: SiloFile,
    silo: Silo,
}

impl App {
    fn save(&self) -> Result<()> {
        self.file.save(&self.silo)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    let streams = stream::simulated_streams(&config.simulator);
    let name = cli.file.as_deref().unwrap_or(&config.silo_file);
    let file = SiloFile::new(&config.data_dir, name, &config.silo_file);
    let silo = file.load(&streams)?;
    info!("Using silo document {}", file.path().display());

    let mut app = App { config, file, silo };

    match cli.command {
        Commands::Procedures { action } => handle_procedures(action, &mut app, &streams),
        Commands::Sensors { action } => handle_sensors(action, &app),
        Commands::Sensor { action } => handle_sensor(action, &mut app, &streams),
        Commands::Cal { id } => handle_cal(&id, &mut app).await,
        Commands::Meas { id } => handle_meas(&id, &mut app).await,
        Commands::Eval { id, raw } => handle_eval(&id, raw, &app),
        Commands::Qual { id } => handle_qual(&id, &app),
        Commands::Dump { id } => handle_dump(&id, &app),
        Commands::Deploy { action } => handle_deploy(action, &mut app),
        Commands::Stream { once } => handle_stream(once, &mut app).await,
    }
}

fn print_procedure(procedure: &Procedure) {
    println!("{} ({})", procedure.kind(), procedure.procedure_type());
    println!("  Stream Type: {}", procedure.stream_type());
    println!("  Stream Address: {}", procedure.stream_address());
    println!("  Property: {}", procedure.property());
    println!("  Units: {}", procedure.scaled_units());
    if procedure.procedure_type().is_fitted() {
        println!("  Spread: {} point", procedure.point_count());
    }
    let active = procedure.active_parameter_names();
    for (name, setpoint) in procedure.parameters() {
        let marker = if active.contains(name) { "*" } else { " " };
        println!("   {} {}", marker, setpoint.target());
    }
    println!("  Interval: {} days", procedure.interval().num_days());
}

fn handle_procedures(action: ProcedureCommands, app: &mut App, streams: &Streams) -> Result<()> {
    match action {
        ProcedureCommands::List => {
            println!("Procedures:");
            for procedure in app.silo.procedures().iter() {
                println!("  {} - {}", procedure.kind(), procedure.property());
            }
            let stream_types: Vec<&str> = streams.stream_types().collect();
            println!("Stream types: {}", stream_types.join(", "));
        }
        ProcedureCommands::Show { kind } => {
            print_procedure(app.silo.procedures().get(&kind)?);
        }
        ProcedureCommands::Set { kind, field, value } => {
            let procedure = app.silo.procedures_mut().get_mut(&kind)?;
            match field.to_lowercase().as_str() {
                "interval" => {
                    let days: i64 = value
                        .trim()
                        .parse()
                        .with_context(|| format!("Interval must be whole days, not '{}'", value))?;
                    procedure.set_interval_days(days)?;
                }
                "address" => procedure.set_stream_address(&value)?,
                "points" => {
                    let count: usize = value
                        .trim()
                        .parse()
                        .with_context(|| format!("Point count must be 2 or 3, not '{}'", value))?;
                    procedure.set_point_count(count)?;
                }
                name => procedure.set_parameter(name, &value)?,
            }
            print_procedure(procedure);
            app.save()?;
        }
    }

    Ok(())
}

fn calibration_state(sensor: &Sensor) -> String {
    match sensor.calibration() {
        Some(cal) if cal.is_valid() => match cal.due_date() {
            Some(due) if due == chrono::NaiveDate::MAX => "calibrated".to_string(),
            Some(due) => format!("due {}", due),
            None => "calibrated".to_string(),
        },
        _ => "out of calibration".to_string(),
    }
}

fn handle_sensors(action: SensorsCommands, app: &App) -> Result<()> {
    match action {
        SensorsCommands::List => {
            if app.silo.sensors().is_empty() {
                println!("No sensors");
            }
            for sensor in app.silo.sensors().iter() {
                println!(
                    "  {:<12} {:<5} {:<4} {}",
                    sensor.id(),
                    sensor.kind().unwrap_or("-"),
                    sensor.address(),
                    calibration_state(sensor)
                );
            }
        }
    }

    Ok(())
}

fn print_sensor(sensor: &Sensor) {
    println!("ID: {}", sensor.id());
    println!("  Kind: {}", sensor.kind().unwrap_or("-"));
    println!("  Property: {}", sensor.property());
    println!("  Name: {}", sensor.name());
    println!("  Location: {}", sensor.location());
    println!("  Stream Type: {}", sensor.stream_type().unwrap_or("-"));
    println!("  Deployed Address: {}", sensor.address());
    println!("  Calibration: {}", calibration_state(sensor));
}

fn handle_sensor(action: SensorCommands, app: &mut App, streams: &Streams) -> Result<()> {
    match action {
        SensorCommands::New { id, kind } => {
            let sensor = app.silo.new_sensor(&id, &kind, streams)?;
            print_sensor(sensor);
            app.save()?;
        }
        SensorCommands::Show { id } => {
            print_sensor(app.silo.sensors().get(&id)?);
        }
        SensorCommands::Set { id, field, value } => {
            let sensor = app.silo.sensors_mut().get_mut(&id)?;
            match field {
                SensorField::Name => sensor.set_name(&value),
                SensorField::Location => sensor.set_location(&value),
                SensorField::Address => sensor.set_address(&value)?,
            }
            print_sensor(sensor);
            app.save()?;
        }
        SensorCommands::Del { id } => {
            let sensor = app.silo.remove_sensor(&id)?;
            println!("Deleted sensor: {}", sensor.id());
            app.save()?;
        }
    }

    Ok(())
}

async fn handle_cal(id: &str, app: &mut App) -> Result<()> {
    let (sensor, procedure) = app.silo.sensor_with_procedure(id)?;
    if let (Some(sampling), Some(calibration)) = (app.config.sampling, sensor.calibration_mut()) {
        calibration.set_sampling(sampling)?;
    }

    let mut operator = TerminalOperator::new();
    let outcome = procedure.run(sensor, &mut operator).await?;
    match outcome {
        RunOutcome::Committed => println!("Sensor {} calibrated", id),
        RunOutcome::Canceled => println!("Sensor {} calibration canceled", id),
        RunOutcome::Failed => println!("Sensor {} calibration failed", id),
    }
    app.save()
}

async fn handle_meas(id: &str, app: &mut App) -> Result<()> {
    let sensor = app.silo.sensors_mut().get_mut(id)?;
    sensor.update().await?;
    let address = sensor
        .stream()
        .and_then(|stream| stream.address())
        .unwrap_or("ND")
        .to_string();
    let raw = format!("{:.3} {}", sensor.raw_value()?, sensor.raw_units()?);
    if sensor.is_calibrated() {
        println!(
            "{} ({}): {} = {:.3} {}",
            sensor.id(),
            address,
            raw,
            sensor.scaled_value()?,
            sensor.scaled_units()
        );
    } else {
        println!("{} ({}): {} (out of calibration)", sensor.id(), address, raw);
    }

    Ok(())
}

fn handle_eval(id: &str, raw: f64, app: &App) -> Result<()> {
    let sensor = app.silo.sensors().get(id)?;
    let scaled = sensor.evaluate(raw)?;
    println!("{:.3} mV = {:.3} {}", raw, scaled, sensor.scaled_units());
    if !sensor.is_calibrated() {
        println!("(sensor {} is out of calibration)", sensor.id());
    }
    Ok(())
}

fn handle_qual(id: &str, app: &App) -> Result<()> {
    let sensor = app.silo.sensors().get(id)?;
    let procedure = app.silo.procedures().for_sensor(sensor)?;
    println!("{}", procedure.quality(sensor));
    Ok(())
}

fn handle_dump(id: &str, app: &App) -> Result<()> {
    let sensor = app.silo.sensors().get(id)?;
    let record = toml::to_string_pretty(sensor).context("Failed to serialize sensor")?;
    print!("{}", record);
    Ok(())
}

fn print_deployment(app: &App) {
    let deployment = app.silo.deployment();
    println!("Group: {}", deployment.group_name());
    println!("  Folder: {}", deployment.folder_name());
    println!("  Key Name: {}", deployment.key_name());
    println!("  Interval: {} minutes", deployment.update_interval());
    println!("  OSR: {} samples per interval", deployment.over_sample_rate());
    println!("  Filter TC: {}% interval", deployment.filter_in_percent());
}

fn handle_deploy(action: DeployCommands, app: &mut App) -> Result<()> {
    match action {
        DeployCommands::Show => print_deployment(app),
        DeployCommands::Set { field, value } => {
            let number = || -> Result<u32> {
                value
                    .trim()
                    .parse()
                    .with_context(|| format!("{:?} must be a whole number, not '{}'", field, value))
            };
            let deployment = app.silo.deployment_mut();
            match field {
                DeployField::Key => deployment.set_key_name(&value),
                DeployField::Folder => deployment.set_folder_name(&value),
                DeployField::Group => deployment.set_group_name(&value),
                DeployField::Interval => deployment.set_update_interval(number()?),
                DeployField::Osr => deployment.set_over_sample_rate(number()?),
                DeployField::Filter => deployment.set_filter_in_percent(number()?),
            }
            print_deployment(app);
            app.save()?;
        }
    }

    Ok(())
}

/// Samples every streamed sensor once and feeds its filter.
async fn sample_sensors(
    app: &mut App,
    ids: &[String],
    filters: &mut BTreeMap<String, RollingAverage>,
    time_constant: f64,
) {
    for id in ids {
        let Ok(sensor) = app.silo.sensors_mut().get_mut(id) else {
            continue;
        };
        let value = match sensor.update().await.and_then(|_| sensor.scaled_value()) {
            Ok(value) => value,
            Err(e) => {
                warn!("Sensor {} read failed: {}", id, e);
                continue;
            }
        };
        filters
            .entry(id.clone())
            .and_modify(|filter| {
                filter.update(value);
            })
            .or_insert_with(|| RollingAverage::new(time_constant, value));
    }
}

fn report_sensors(app: &App, ids: &[String], filters: &BTreeMap<String, RollingAverage>) {
    let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    for id in ids {
        let (Ok(sensor), Some(filter)) = (app.silo.sensors().get(id), filters.get(id)) else {
            continue;
        };
        println!(
            "{} {}.{}: {:.3} {}",
            stamp,
            sensor.location(),
            sensor.name(),
            filter.value(),
            sensor.scaled_units()
        );
    }
}

async fn handle_stream(once: bool, app: &mut App) -> Result<()> {
    let deployment = app.silo.deployment().clone();
    let ids: Vec<String> = app
        .silo
        .sensors()
        .iter()
        .filter(|sensor| sensor.is_deployed())
        .filter(|sensor| {
            if !sensor.is_calibrated() {
                warn!("Sensor {} is out of calibration, not streamed", sensor.id());
            }
            sensor.is_calibrated()
        })
        .map(|sensor| sensor.id().to_string())
        .collect();
    if ids.is_empty() {
        bail!("No deployed, calibrated sensors to stream");
    }

    let time_constant = deployment.time_constant();
    let mut filters = BTreeMap::new();
    if once {
        sample_sensors(app, &ids, &mut filters, time_constant).await;
        report_sensors(app, &ids, &filters);
        return Ok(());
    }

    println!(
        "Streaming {}/{}: report every {:?}, sample every {:?}",
        deployment.folder_name(),
        deployment.group_name(),
        deployment.stream_period(),
        deployment.sample_period()
    );

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sample_tick = tokio::time::interval(deployment.sample_period());
    let mut report_tick = tokio::time::interval(deployment.stream_period());
    // the first report waits a full period
    report_tick.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down");
                break;
            }
            _ = report_tick.tick() => {
                report_sensors(app, &ids, &filters);
            }
            _ = sample_tick.tick() => {
                sample_sensors(app, &ids, &mut filters, time_constant).await;
            }
        }
    }

    Ok(())
}
