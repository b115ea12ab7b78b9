use std::time::Duration;

use clap::Parser;
use datastore::{
    Datastore, DatastoreConfig, DatastoreService, Family, Float, Schema, channel::snapshot_channel,
};
use tokio::select;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Options {
    /// Seconds between writes
    #[clap(short, long, default_value_t = 1.0, value_parser = parse_interval)]
    interval: f32,
    /// Stop after this many writes (0 runs until interrupted)
    #[clap(short = 'n', long, default_value_t = 0)]
    count: usize,
    /// Subscription slots per family (overrides DATASTORE_MAX_SUBS)
    #[clap(long)]
    max_subscriptions: Option<usize>,
    /// Show debug output
    #[clap(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn parse_interval(arg: &str) -> Result<f32, String> {
    let seconds: f32 = arg.parse().map_err(|err| format!("{err}"))?;
    match Duration::try_from_secs_f32(seconds) {
        Ok(interval) if !interval.is_zero() => Ok(seconds),
        _ => Err(format!("interval must be a positive number of seconds, not {arg}")),
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() {
    let opts = Options::parse();

    let filter = EnvFilter::default().add_directive(
        match opts.verbose {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            2.. => LevelFilter::TRACE,
        }
        .into(),
    );
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = DatastoreConfig::from_env();
    if let Some(max) = opts.max_subscriptions {
        config = config.with_max_subscriptions(max);
    }
    let datastore = match Datastore::init(Schema::firmware(), &config) {
        Ok(datastore) => datastore,
        Err(err) => {
            error!("Could not create datastore: {err}");
            std::process::exit(1);
        }
    };
    let schema_floats = datastore.count(Family::Float);
    let service = DatastoreService::spawn(datastore, &config);
    let client = service.client();

    let (subscriber, mut updates) = snapshot_channel::<Float>(config.queue_depth);
    if let Err(err) = client.subscribe::<Float>(0, schema_floats, &subscriber).await {
        error!("Could not subscribe to float datapoints: {err}");
        std::process::exit(1);
    }

    let mut ticker = tokio::time::interval(Duration::from_secs_f32(opts.interval));
    let mut written = 0usize;
    loop {
        select! {
            _ = tokio::signal::ctrl_c() => break,
            update = updates.recv() => match update {
                Ok(values) => println!("FLOAT[0..{}] = {values:?}", values.len()),
                Err(err) => {
                    error!("Lost float updates: {err}");
                    break;
                }
            },
            _ = ticker.tick() => {
                if opts.count > 0 && written >= opts.count {
                    break;
                }
                let id = written % schema_floats.max(1);
                let value = written as f32 * 0.5;
                if let Err(err) = client.write::<Float>(id, &[value]).await {
                    error!("Write of {value} to FLOAT[{id}] failed: {err}");
                }
                written += 1;
            }
        }
    }

    match service.stop().await {
        Ok(datastore) => info!("Stopped after {written} writes: {datastore:?}"),
        Err(err) => error!("Service did not stop cleanly: {err}"),
    }
}
