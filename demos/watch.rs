use std::time::Duration;

use gallery_notify::{ConnectionState, Handlers, QueryKey, Severity};

#[tokio::main]
async fn main() {
    pretty_env_logger::init();

    let handlers = Handlers::new()
        .on_toast(|severity: Severity, message: &str| println!("[{}] {}", severity, message))
        .invalidator(|key: &QueryKey| println!("stale: {}", key));

    let client = gallery_notify::from_env(handlers).unwrap_or_else(|err| {
        println!("Create notification client failed: {}", err);
        std::process::exit(1);
    });
    let max_attempts = client.policy().max_attempts();

    let mut status = client.subscribe();
    client.start();

    while status.changed().await.is_ok() {
        let now = *status.borrow();
        println!("status: {:?}, attempts: {}", now.state, now.attempts);

        // stands in for the user pressing "Retry"
        if now.state == ConnectionState::Closed && now.attempts >= max_attempts {
            tokio::time::sleep(Duration::from_secs(30)).await;
            client.retry_now();
        }
    }
}
