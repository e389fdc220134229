use clap::Subcommand;
use portrait_core::Brand;
use serde_json::json;

use crate::util::{api_request, parse_brand};

#[derive(Subcommand)]
pub enum LinkCommands {
    /// Create a hosted sign-in link for a brand
    Create {
        /// amazon, wayfair, officedepot or goodreads
        #[arg(value_parser = parse_brand)]
        brand: Brand,
    },
    /// Check a hosted link through the link service
    Status {
        link_id: String,
    },
}

pub async fn run(client: &reqwest::Client, api_url: &str, command: LinkCommands) -> i32 {
    match command {
        LinkCommands::Create { brand } => {
            api_request(
                client,
                api_url,
                reqwest::Method::POST,
                "/getgather/link/create",
                Some(&json!({ "brand_id": brand.id() })),
            )
            .await
        }
        LinkCommands::Status { link_id } => {
            api_request(
                client,
                api_url,
                reqwest::Method::GET,
                &format!("/getgather/link/status/{link_id}"),
                None,
            )
            .await
        }
    }
}

/// One completion check through this session's tool client.
pub async fn poll(client: &reqwest::Client, api_url: &str, link_id: &str) -> i32 {
    api_request(
        client,
        api_url,
        reqwest::Method::GET,
        &format!("/getgather/mcp-poll/{link_id}"),
        None,
    )
    .await
}
