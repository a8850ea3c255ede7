use anyhow::{bail, Result};
use clap::Parser;
use pledge::{
    pool::LanePool,
    promise::{Promise, Resolution},
};
use std::{thread, time::Duration};

/// Push a number through a chain of promise stages, failing on the way if
/// asked to.
#[derive(Parser)]
struct Args {
    /// Starting value.
    #[arg(short, long, default_value_t = 1)]
    start: u64,

    /// Number of doubling stages.
    #[arg(short = 'n', long, default_value_t = 8)]
    stages: usize,

    /// Fail at this stage and recover at the end.
    #[arg(short, long)]
    fail_at: Option<usize>,

    /// Number of lanes; defaults to the available parallelism.
    #[arg(short, long)]
    lanes: Option<usize>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut builder = LanePool::builder();
    if let Some(n) = args.lanes {
        builder = builder.lanes(n);
    }
    let pool = builder.build()?;

    let (deferred, head) = pool.deferred::<u64>();
    let mut tail = head;

    for stage in 0..args.stages {
        let fail = args.fail_at == Some(stage);
        tail = tail.and_then(move |v| {
            if fail {
                bail!("stage {stage} refused {v}");
            }
            println!("stage {stage}: {v} on {:?}", thread::current().name());
            Ok(Resolution::Value(v * 2))
        });
    }

    let result: Promise<u64> = tail.or_else(|reason| {
        println!("recovering from: {reason}");
        Ok(Resolution::Value(0))
    });

    thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        deferred.resolve(args.start);
    });

    println!("result: {}", result.wait()?);

    Ok(())
}
