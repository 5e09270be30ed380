use std::io::Write;
use std::path::PathBuf;

use clap::Parser;
use kafka_input::{setup_tracing, AppError, AppResult, InputKafkaConfig, KafkaInput};
use tracing::{error, info, warn};

/// Largest message copied to stdout, longer ones are truncated.
const READ_BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    /// comma separated broker list, overrides the config file
    #[arg(long)]
    pub host: Option<String>,
    /// topic to consume, overrides the config file
    #[arg(long)]
    pub topic: Option<String>,
    /// decode payloads as json envelopes
    #[arg(long)]
    pub json: bool,
    /// shared queue capacity
    #[arg(long)]
    pub capacity: Option<usize>,
    #[command(subcommand)]
    pub command: Option<Command>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Parser)]
pub enum Command {
    PrintConfig,
}

fn load_config(commandline: &CommandLine) -> AppResult<InputKafkaConfig> {
    let mut config = match (&commandline.conf, &commandline.host, &commandline.topic) {
        (Some(path), _, _) => InputKafkaConfig::set_up_config(PathBuf::from(path))?,
        (None, Some(host), Some(topic)) => InputKafkaConfig::new(host, topic, commandline.json),
        _ => {
            let default_path = PathBuf::from("./conf.toml");
            InputKafkaConfig::set_up_config(default_path)?
        }
    };
    if let Some(host) = &commandline.host {
        config.host = host.clone();
    }
    if let Some(topic) = &commandline.topic {
        config.topic = topic.clone();
    }
    if commandline.json {
        config.use_json = true;
    }
    if let Some(capacity) = commandline.capacity {
        config.queue_capacity = capacity;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> AppResult<()> {
    let commandline: CommandLine = CommandLine::parse();
    let _log_guard = setup_tracing(commandline.verbose)?;

    let config = load_config(&commandline)?;
    if let Some(Command::PrintConfig) = commandline.command {
        println!("{config:#?}");
        return Ok(());
    }

    let input = match KafkaInput::connect(config) {
        Ok(input) => input,
        Err(err) => {
            error!("failed to start kafka input: {err}");
            std::process::exit(1);
        }
    };
    info!("{input} started");

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match input.read_message(&mut buf) {
            Ok(0) => {
                info!("every partition of {input} closed");
                break;
            }
            Ok(n) => {
                out.write_all(&buf[..n])?;
                out.write_all(b"\n")?;
                out.flush()?;
            }
            Err(err @ AppError::Decode(_)) => warn!("skipping message: {err}"),
            Err(err) => return Err(err),
        }
    }

    Ok(())
}
