use std::time::Duration;
use tasklib::logging::init_logging;
use tasklib::prelude::*;

#[tokio::main]
async fn main() -> TasklibResult<()> {
    let config = TasklibConfig::development();
    init_logging(&config.logging)?;

    let app = TaskApp::in_memory(config)?;

    let add3 = app
        .task("add3", |args, _| {
            Ok::<_, Fault>(arg::<i64>(&args, 0)? + arg::<i64>(&args, 1)? + arg::<i64>(&args, 2)?)
        })
        .await;
    let fails = app
        .task("fails", |_, _| -> Result<i64, Fault> {
            Err(Fault::new("RuntimeError", "this task always fails"))
        })
        .await;

    println!("Direct call: add3(2, 3, 4) = {}", add3.call(args![2, 3, 4], kwargs! {}).await?);

    let mut queued = add3.enqueue(args![2, 3, 4], kwargs! {}).await?;
    let mut failing = fails.enqueue(args![], kwargs! {}).await?;
    println!("📥 Enqueued {:?} and {:?}", queued.task_id(), failing.task_id());

    let mut engine = app.engine();
    engine.start()?;

    let poll = Duration::from_millis(50);
    let limit = Duration::from_secs(10);
    queued.wait(poll, limit).await?;
    failing.wait(poll, limit).await?;

    println!("✅ add3 -> {:?} {:?}", queued.status(), queued.result());
    println!("❌ fails -> {:?} {:?}", failing.status(), failing.excinfo());

    engine.stop().await?;
    Ok(())
}
