//! Binary entrypoint for the deepdive tool

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    deepdive::cli::run().await
}
