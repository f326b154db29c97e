mod devices;
mod host;
mod service;
mod store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
