use std::error::Error;

use clap::Parser;
use courier::{Client, Message};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Broker address, e.g. tcp://localhost:3000
    target: String,
    /// Action name for the request
    action: String,
    /// Text parameters, repeatable as --param key=value
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, String)>,
    /// Send attempts before giving up
    #[arg(long, default_value_t = 30)]
    retries: u32,
    /// Reply readiness wait per attempt, in milliseconds
    #[arg(long, default_value_t = 5)]
    interval_ms: i64,
}

fn parse_param(arg: &str) -> Result<(String, String), String> {
    match arg.split_once('=') {
        Some((key, value)) => Ok((key.to_string(), value.to_string())),
        None => Err(format!("expected key=value, got '{arg}'")),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let client = Client::new(zmq::Context::new());

    let mut msg = Message::new(cli.action.as_str());
    for (key, value) in cli.params {
        msg.insert(key, value);
    }

    match client.send_with_retry(&cli.target, &msg, cli.retries, cli.interval_ms)? {
        Some(reply) => println!("{reply:?}"),
        None => eprintln!("no reply from {}", cli.target),
    }
    Ok(())
}
