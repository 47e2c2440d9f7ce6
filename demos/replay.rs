use reactive_dispatch::{consumer, dispatcher, Demand, DispatcherConfig, Retention};
use std::sync::Arc;

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    // Late subscribers see the last three items before anything live.
    let dispatcher = dispatcher::<String, ()>(DispatcherConfig::replay(Retention::KeepLast(3)));
    for i in 1..=5 {
        dispatcher.publish(format!("tick {}", i)).unwrap();
    }

    let late = dispatcher
        .subscribe(consumer::from_fn(|item: Arc<String>| {
            println!("late subscriber got {}", item)
        }))
        .unwrap();
    late.request(Demand::Unbounded);

    dispatcher.publish("tick 6".to_string()).unwrap();
    dispatcher.complete().unwrap();
}
