mod host;
mod http;
mod link;
mod portal;
mod sim;
mod store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}
