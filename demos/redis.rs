use tasklib::logging::init_logging;
use tasklib::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = TasklibConfig::development();
    init_logging(&config.logging)?;

    println!("🔗 Connecting to Redis at {}", config.store.connection_url());
    let app = TaskApp::with_redis(config).await?;

    let greet = app
        .async_task("greet", |args: Args, _: Kwargs| async move {
            let name = arg::<String>(&args, 0)?;
            tokio::time::sleep(std::time::Duration::from_millis(500)).await;
            Ok::<_, Fault>(format!("Hello {name}"))
        })
        .await;

    for name in ["Alice", "Bob", "Charlie", "Dave"] {
        let handle = greet.enqueue(args![name], kwargs! {}).await?;
        println!("📥 Enqueued greet({}) as {:?}", name, handle.task_id());
    }

    println!("🔨 Workers running, press Ctrl+C to stop...");
    app.engine().run_until_ctrl_c().await?;
    Ok(())
}
