use anyhow::Result;
use clap::Parser;
use futures::executor::block_on;
use pledge::{
    pool::LanePool,
    promise::{Promise, Resolution},
};
use std::{thread, time::Duration};

/// Start a number of producers that each settle a promise after a delay and
/// gather all of their results.
#[derive(Parser)]
struct Args {
    /// Number of producers.
    #[arg(short, long, default_value_t = 10)]
    producers: u64,

    /// Producer that rejects instead of resolving.
    #[arg(short, long)]
    reject: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let pool = LanePool::new()?;

    println!("{} lanes", pool.size());

    let promises: Vec<Promise<u64>> = (0..args.producers)
        .map(|i| {
            let (deferred, promise) = pool.deferred();
            let reject = args.reject == Some(i);

            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10 * (args.producers - i)));
                if reject {
                    deferred.reject(format!("producer {i} gave up"));
                } else {
                    deferred.resolve(i * i);
                }
            });

            promise
        })
        .collect();

    let total: Promise<u64> = pool
        .all::<u64, _>(promises)
        .and_then(|squares| Ok(Resolution::Value(squares.iter().sum())));

    match block_on(async { total.await }) {
        Ok(total) => println!("sum of squares: {total}"),
        Err(reason) => println!("failed: {reason}"),
    }

    Ok(())
}
