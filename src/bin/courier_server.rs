use std::{error::Error, process, sync::Arc};

use clap::Parser;
use courier::{Broker, Dispatcher, Message, Subscriber};
use log::info;

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Bind the request broker at address, e.g. tcp://*:3000
    address: String,
    /// Worker threads handling requests
    #[arg(long, default_value_t = 10)]
    workers: usize,
    /// Also subscribe to broadcasts from these publisher endpoints
    #[arg(long = "subscribe")]
    subscribe: Vec<String>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let ctx = zmq::Context::new();

    let mut dispatcher = Dispatcher::new();
    dispatcher.register("ping", |_| Message::new("pong"));
    dispatcher.register("echo", |msg| msg);
    let dispatcher = Arc::new(dispatcher);

    let _subscriber = if cli.subscribe.is_empty() {
        None
    } else {
        let subscriber = Subscriber::start(&ctx, "", Arc::clone(&dispatcher))?;
        for endpoint in &cli.subscribe {
            subscriber.connect(endpoint)?;
        }
        Some(subscriber)
    };

    ctrlc::set_handler(|| {
        info!("interrupted, shutting down");
        process::exit(0);
    })?;

    Broker::new(ctx, cli.address, dispatcher)
        .with_workers(cli.workers)
        .serve()?;
    Ok(())
}
