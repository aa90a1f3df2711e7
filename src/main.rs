#[tokio::main]
async fn main() -> anyhow::Result<()> {
    personal_blog::run().await
}
