use portrait_core::Brand;
use serde_json::{Value, json};

/// HTTP client that keeps the API's session cookie across requests, so one
/// invocation talks to one tool client on the server.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .cookie_store(true)
        .build()
        .unwrap_or_else(|e| exit_error(&format!("Failed to build HTTP client: {e}"), None))
}

pub fn exit_error(message: &str, docs_hint: Option<&str>) -> ! {
    let mut err = json!({
        "error": "cli_error",
        "message": message
    });
    if let Some(hint) = docs_hint {
        err["docs_hint"] = json!(hint);
    }
    eprintln!(
        "{}",
        serde_json::to_string_pretty(&err).unwrap_or_else(|_| message.to_string())
    );
    std::process::exit(1);
}

/// clap value parser for brand arguments.
pub fn parse_brand(raw: &str) -> Result<Brand, String> {
    raw.parse::<Brand>().map_err(|e| e.to_string())
}

/// Map an HTTP status to the CLI exit code.
///
/// Exit codes: 0=success (2xx), 1=client error (4xx), 2=server error (5xx),
///             3=connection error
pub fn exit_code_for(status: u16) -> i32 {
    match status {
        200..=299 => 0,
        400..=499 => 1,
        _ => 2,
    }
}

pub fn print_json(value: &Value, to_stderr: bool) {
    let formatted = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    if to_stderr {
        eprintln!("{formatted}");
    } else {
        println!("{formatted}");
    }
}

fn connection_error(api_url: &str, err: &reqwest::Error) -> Value {
    json!({
        "error": "connection_error",
        "message": format!("{err}"),
        "docs_hint": format!("Is the API server running at {api_url}? Check PORTRAIT_API_URL.")
    })
}

/// Send a request and return status plus JSON body (no printing).
pub async fn send_json(
    client: &reqwest::Client,
    api_url: &str,
    method: reqwest::Method,
    path: &str,
    body: Option<&Value>,
) -> Result<(u16, Value), Value> {
    let mut req = client.request(method, format!("{api_url}{path}"));
    if let Some(b) = body {
        req = req.json(b);
    }
    let resp = req
        .send()
        .await
        .map_err(|e| connection_error(api_url, &e))?;
    let status = resp.status().as_u16();
    let body = resp
        .json()
        .await
        .unwrap_or_else(|e| json!({"raw_error": format!("Failed to parse response as JSON: {e}")}));
    Ok((status, body))
}

/// Execute an API request, print the response, return the exit code.
pub async fn api_request(
    client: &reqwest::Client,
    api_url: &str,
    method: reqwest::Method,
    path: &str,
    body: Option<&Value>,
) -> i32 {
    match send_json(client, api_url, method, path, body).await {
        Ok((status, body)) => {
            let code = exit_code_for(status);
            print_json(&body, code != 0);
            code
        }
        Err(err) => {
            print_json(&err, true);
            3
        }
    }
}
