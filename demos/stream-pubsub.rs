use futures::executor::{block_on, ThreadPool};
use futures::stream::{self, StreamExt};
use futures::task::SpawnExt;
use reactive_dispatch::{dispatcher, DispatcherConfig};

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let pool = ThreadPool::new().unwrap();
    let dispatcher = dispatcher::<u32, ()>(DispatcherConfig::multicast());
    let subscriber1 = dispatcher.subscribe_stream(4).unwrap();
    let subscriber2 = dispatcher.subscribe_stream(4).unwrap();
    let publisher = dispatcher.sink();
    drop(dispatcher);

    pool.spawn(async move {
        stream::iter(1..15)
            .map(Ok)
            .forward(publisher)
            .await
            .unwrap();
    })
    .unwrap();

    let received1 = pool
        .spawn_with_handle(subscriber1.map(|x| *x.unwrap()).collect::<Vec<u32>>())
        .unwrap();
    let received2 = pool
        .spawn_with_handle(subscriber2.map(|x| *x.unwrap()).collect::<Vec<u32>>())
        .unwrap();

    println!("subscriber 1: {:?}", block_on(received1));
    println!("subscriber 2: {:?}", block_on(received2));
}
