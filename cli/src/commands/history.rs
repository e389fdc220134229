use portrait_core::Brand;

use crate::util::api_request;

pub async fn history(client: &reqwest::Client, api_url: &str, brand: Brand) -> i32 {
    api_request(
        client,
        api_url,
        reqwest::Method::GET,
        &format!("/getgather/purchase-history/{}", brand.id()),
        None,
    )
    .await
}

pub async fn detail(client: &reqwest::Client, api_url: &str, brand: Brand, order_id: &str) -> i32 {
    api_request(
        client,
        api_url,
        reqwest::Method::GET,
        &format!("/getgather/purchase-history-details/{}/{order_id}", brand.id()),
        None,
    )
    .await
}
