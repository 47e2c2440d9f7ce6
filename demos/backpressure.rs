use reactive_dispatch::{
    Capacity, Consumer, Demand, Dispatcher, DispatcherConfig, EmissionMode, OverflowPolicy,
};
use std::sync::Arc;

struct Printer;

impl Consumer<u32, ()> for Printer {
    fn on_item(&self, item: Arc<u32>) {
        println!("  got {}", item);
    }

    fn on_overflow(&self, skipped: u64) {
        println!("  skipped {}", skipped);
    }

    fn on_complete(&self) {
        println!("  done");
    }

    fn on_error(&self, error: reactive_dispatch::Failure<()>) {
        println!("  failed: {:?}", error);
    }
}

fn run(policy: OverflowPolicy) {
    println!("--- {:?} ---", policy);
    let config = DispatcherConfig::builder()
        .capacity(Capacity::Bounded(4))
        .overflow_policy(policy)
        .emission_mode(EmissionMode::Unicast)
        .build()
        .unwrap();
    let dispatcher = Dispatcher::<u32, ()>::with_drop_hook(config, |item| {
        println!("  drop hook: {}", item)
    });
    let handle = dispatcher.subscribe(Printer).unwrap();

    // A consumer that only keeps up with every third item.
    for i in 0..10 {
        if let Err(err) = dispatcher.publish(i) {
            println!("  publish {} failed: {}", i, err);
        }
        if i % 3 == 0 {
            handle.request(1u64);
        }
    }
    handle.request(Demand::Unbounded);
    let _ = dispatcher.complete();
    println!("  {:?}", dispatcher.stats());
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    for policy in [
        OverflowPolicy::Error,
        OverflowPolicy::DropLatest,
        OverflowPolicy::DropOldest,
        OverflowPolicy::Drop,
        OverflowPolicy::Unbounded,
    ] {
        run(policy);
    }
}
