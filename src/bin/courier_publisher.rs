use std::{
    error::Error,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use clap::Parser;
use courier::{Message, Publisher};
use log::info;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Bind the broadcast socket at address, e.g. tcp://*:3001
    endpoint: String,
    /// Action to broadcast
    #[arg(default_value = "tick")]
    action: String,
    /// Seconds between broadcasts
    #[arg(long, default_value_t = 1)]
    every: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let ctx = zmq::Context::new();
    let publisher = Publisher::bind(&ctx, &cli.endpoint)?;

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))?;

    let msg = Message::new(cli.action.as_str());
    while running.load(Ordering::SeqCst) {
        publisher.publish(&msg)?;
        thread::sleep(Duration::from_secs(cli.every));
    }

    info!("interrupted, closing publisher");
    publisher.close();
    Ok(())
}
