//! Transient failure and redelivery walkthrough.
//!
//! Three trades (10, 20, 30) are scaled by 1.5. Trade 2 fails once, so the first
//! round persists and acknowledges 1 and 3 only. The source redelivers trade 2
//! and the second round completes it; every trade is stored and acknowledged
//! exactly once.
//!
//! ```text
//! RUST_LOG=debug cargo run --example scenario
//! ```

use std::sync::Arc;

use stream_weaver::{
    DurableStore, FaultInjectingTransform, FaultPlan, InMemorySource, InMemoryStore, Message,
    MessageId, Pipeline, PipelineConfig, TracingObserver, TransformError,
};

fn scale(msg: &Message) -> Result<Vec<u8>, TransformError> {
    let raw: [u8; 8] = msg
        .payload
        .as_slice()
        .try_into()
        .map_err(|_| TransformError::transient("payload is not an f64"))?;
    Ok((f64::from_le_bytes(raw) * 1.5).to_le_bytes().to_vec())
}

fn trade(id: u64, value: f64) -> Message {
    Message::new(id, value.to_le_bytes().to_vec())
}

fn print_store(store: &InMemoryStore) {
    for record in store.records() {
        let value = <[u8; 8]>::try_from(record.result.as_slice())
            .map(f64::from_le_bytes)
            .unwrap_or(f64::NAN);
        println!("  {} -> {} ({})", record.id, value, record.producer);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let source = Arc::new(InMemorySource::with_messages([
        trade(1, 10.0),
        trade(2, 20.0),
        trade(3, 30.0),
    ]));
    let store = Arc::new(InMemoryStore::new());
    let transform = Arc::new(FaultInjectingTransform::new(
        Arc::new(scale),
        FaultPlan::new().fail_first(2, 1),
    ));

    let config = PipelineConfig::from_env().with_processor_name("FinancialTradeEngine");
    let pipeline = Pipeline::builder(source.clone(), store.clone(), transform)
        .config(config)
        .observer(Arc::new(TracingObserver))
        .build();

    for round in 1..=2 {
        let summary = pipeline.run_once().await?;
        let committed = pipeline.committer().flush()?;
        println!(
            "round {}: polled={} persisted={} duplicates={} unresolved={} acked={}",
            round,
            summary.polled,
            summary.persisted,
            summary.duplicates,
            summary.unresolved,
            committed.count()
        );
        print_store(&store);
    }

    assert!(store.exists(MessageId(2))?);
    println!("ack batches: {:?}", source.ack_batches());
    println!("{:#?}", pipeline.stats());
    Ok(())
}
