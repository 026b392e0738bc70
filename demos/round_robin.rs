use reqwire::ClientBuilder;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let client = ClientBuilder::from_env().map_err(anyhow::Error::msg)?.build();

    for _ in 0..client.base_url().urls().len() * 2 {
        let response = client.get("/").send().await?;
        println!("{} {}", response.request().url(), response.status());
        response.close().await;
    }

    Ok(())
}
