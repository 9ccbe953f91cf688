use std::collections::HashMap;

use color_eyre::eyre::Result;
use dataflow::{config::ManagerConfig, engine::Manager};
use mimalloc_rust::GlobalMiMalloc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

// Recommended global allocator to get the best performance out of the
// worker pool.
#[global_allocator]
static GLOBAL_MIMALLOC: GlobalMiMalloc = GlobalMiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    init()?;

    let config = ManagerConfig::new("linear-pipeline", 4);
    let mut manager: Manager<i64> = Manager::new(config)?;

    manager.node("add", |x: i64| HashMap::from([("add_to_square_next".into(), Some(x + 1))]))?;
    manager.node("square", |x: i64| HashMap::from([("square_to_halve_next".into(), Some(x * x))]))?;
    manager.node("halve", |x: i64| HashMap::from([("result".into(), Some(x / 2))]))?;

    manager.edge("add", "square", "next")?;
    manager.edge("square", "halve", "next")?;
    let output = manager.output("halve", "result")?;

    manager.start()?;

    let inputs = vec![1, 2, 3, 4, 5];
    let completion = manager.batch_invoke("add", inputs.clone())?;
    let results = manager.gather(completion, inputs.len(), output).await;

    tracing::info!(?inputs, ?results, "pipeline run complete");

    manager.stop()?;
    Ok(())
}

/// Initializes logging and error reporting.
fn init() -> Result<()> {
    color_eyre::install()?;

    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    Ok(())
}
