//! API Gateway Server
//!
//! Main entry point for the gateway routing service

use api_gateway::start_server;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    start_server().await?;
    Ok(())
}
