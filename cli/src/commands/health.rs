use crate::util::api_request;

pub async fn run(client: &reqwest::Client, api_url: &str) -> i32 {
    api_request(client, api_url, reqwest::Method::GET, "/health", None).await
}
