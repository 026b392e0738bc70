use std::time::Duration;

use reqwire::{ClientBuilder, RetryPolicy};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct Todo {
    id: u32,
    title: String,
    completed: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let base_url = std::env::var("REQWIRE_DEMO_URL")
        .unwrap_or_else(|_| "https://jsonplaceholder.typicode.com".to_owned());

    let client = ClientBuilder::new()
        .base_url(base_url)
        .header("Accept", reqwire::mime::APPLICATION_JSON)
        .retry(
            RetryPolicy::exponential_backoff(Duration::from_millis(200), 4, 2.0)
                .with_max_delay(Duration::from_secs(2))
                .retry_if(|response| response.status().is_server_error()),
        )
        .build();

    let response = client
        .get("/todos/1")
        .timeout(Duration::from_secs(10))
        .send()
        .await?;

    println!("{} after {} attempt(s)", response.status(), response.attempt());
    let todo: Todo = response.as_json().await?;
    println!("#{} {} (done: {})", todo.id, todo.title, todo.completed);

    Ok(())
}
