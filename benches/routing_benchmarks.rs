use criterion::{black_box, criterion_group, criterion_main, Criterion};
use futures::FutureExt;
use serde_json::json;

use avatar_core::{MessagePriority, MessageRouter, PublishOptions};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn benchmark_publish_only(c: &mut Criterion) {
    let rt = runtime();
    c.bench_function("publish_100_no_subscribers", |b| {
        b.iter(|| {
            rt.block_on(async {
                let router = MessageRouter::default();
                for i in 0..100 {
                    router
                        .publish("task.created", json!({"i": i}), "bench")
                        .await;
                }
                router.wait_until_idle().await;
                black_box(router.stats().await)
            })
        })
    });
}

fn benchmark_publish_and_deliver(c: &mut Criterion) {
    let rt = runtime();
    c.bench_function("deliver_100_one_subscriber", |b| {
        b.iter(|| {
            rt.block_on(async {
                let router = MessageRouter::default();
                router
                    .subscribe_fn("task.created", "noop", |_| async { Ok(()) }.boxed())
                    .await;
                for i in 0..100 {
                    let priority = match i % 4 {
                        0 => MessagePriority::Low,
                        1 => MessagePriority::Normal,
                        2 => MessagePriority::High,
                        _ => MessagePriority::Urgent,
                    };
                    router
                        .publish_with(
                            "task.created",
                            json!({"i": i}),
                            "bench",
                            PublishOptions::default().with_priority(priority),
                        )
                        .await;
                }
                router.wait_until_idle().await;
                black_box(router.stats().await)
            })
        })
    });
}

criterion_group!(benches, benchmark_publish_only, benchmark_publish_and_deliver);
criterion_main!(benches);
