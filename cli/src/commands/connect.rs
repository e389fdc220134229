//! End-to-end retrieval: fetch history, walk the user through the hosted
//! link when one is required, then fetch again on the same session.

use std::time::Duration;

use clap::Args;
use portrait_core::Brand;
use portrait_mcp_runtime::link::poll_until_finished;
use portrait_mcp_runtime::{HostedLink, LinkSession, LinkStatus, PollPolicy};
use serde_json::{Value, json};

use crate::util::{exit_code_for, parse_brand, print_json, send_json};

#[derive(Args)]
pub struct ConnectArgs {
    /// amazon, wayfair, officedepot or goodreads
    #[arg(value_parser = parse_brand)]
    pub brand: Brand,

    /// Seconds between completion checks
    #[arg(long, default_value_t = 1)]
    pub interval_secs: u64,

    /// Completion checks before giving up
    #[arg(long, default_value_t = 120)]
    pub max_attempts: u32,

    /// Print the sign-in URL instead of opening a browser
    #[arg(long)]
    pub no_open: bool,
}

/// What a purchase-history response asks the CLI to do next.
#[derive(Debug, PartialEq)]
enum Next {
    Done(Value),
    SignIn(HostedLink),
    Failed(Value),
}

fn classify(body: Value) -> Next {
    match body.get("status").and_then(Value::as_str) {
        Some("ready") => Next::Done(body),
        Some("link_required") => match HostedLink::from_payload(&body) {
            Some(link) => Next::SignIn(link),
            None => Next::Failed(body),
        },
        _ => Next::Failed(body),
    }
}

pub async fn run(client: &reqwest::Client, api_url: &str, args: ConnectArgs) -> i32 {
    let path = format!("/getgather/purchase-history/{}", args.brand.id());

    let link = match fetch(client, api_url, &path).await {
        Ok(Next::Done(body)) => {
            print_json(&body, false);
            return 0;
        }
        Ok(Next::SignIn(link)) => link,
        Ok(Next::Failed(body)) => {
            print_json(&body, true);
            return 2;
        }
        Err(code) => return code,
    };

    announce(&link, args.no_open);

    let mut session = LinkSession::resume(args.brand, link);
    let policy = PollPolicy::new(Duration::from_secs(args.interval_secs), args.max_attempts);
    let polled = poll_until_finished(&mut session, &policy, |link_id| async move {
        let (status, body) = send_json(
            client,
            api_url,
            reqwest::Method::GET,
            &format!("/getgather/mcp-poll/{link_id}"),
            None,
        )
        .await
        .map_err(|err| err.to_string())?;
        if exit_code_for(status) != 0 {
            return Err(format!("poll answered HTTP {status}"));
        }
        Ok::<_, String>(LinkStatus::from_payload(&body))
    })
    .await;

    if let Err(err) = polled {
        print_json(
            &json!({
                "error": "link_not_completed",
                "message": err.to_string(),
                "docs_hint": "Finish signing in within the polling window, or raise --max-attempts."
            }),
            true,
        );
        return 1;
    }
    tracing::info!(event = "link_completed", brand = %args.brand, attempts = session.attempts());

    match fetch(client, api_url, &path).await {
        Ok(Next::Done(body)) => {
            print_json(&body, false);
            0
        }
        Ok(Next::SignIn(link)) => {
            print_json(
                &json!({
                    "error": "link_still_required",
                    "message": format!("The service still asks for sign-in (link {})", link.link_id)
                }),
                true,
            );
            1
        }
        Ok(Next::Failed(body)) => {
            print_json(&body, true);
            2
        }
        Err(code) => code,
    }
}

async fn fetch(client: &reqwest::Client, api_url: &str, path: &str) -> Result<Next, i32> {
    match send_json(client, api_url, reqwest::Method::GET, path, None).await {
        Ok((status, body)) if exit_code_for(status) == 0 => Ok(classify(body)),
        Ok((status, body)) => {
            print_json(&body, true);
            Err(exit_code_for(status))
        }
        Err(err) => {
            print_json(&err, true);
            Err(3)
        }
    }
}

fn announce(link: &HostedLink, no_open: bool) {
    let message = link.message.as_deref().unwrap_or("Sign in to continue");
    eprintln!("{message}: {}", link.hosted_link_url);
    if no_open {
        return;
    }
    if let Err(err) = open::that(&link.hosted_link_url) {
        tracing::warn!(event = "browser_open_failed", error = %err);
        eprintln!("Could not open a browser; visit the URL above.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_bodies_are_done() {
        let body = json!({ "status": "ready", "brand_id": "amazon", "records": [] });
        assert_eq!(classify(body.clone()), Next::Done(body));
    }

    #[test]
    fn link_required_bodies_carry_the_hosted_link() {
        let body = json!({
            "status": "link_required",
            "brand_id": "amazon",
            "link_id": "L7",
            "hosted_link_url": "http://app.test/link/L7",
            "message": "Sign in"
        });
        match classify(body) {
            Next::SignIn(link) => {
                assert_eq!(link.link_id, "L7");
                assert_eq!(link.hosted_link_url, "http://app.test/link/L7");
                assert_eq!(link.message.as_deref(), Some("Sign in"));
            }
            other => panic!("expected sign-in, got {other:?}"),
        }
    }

    #[test]
    fn unknown_bodies_fail() {
        assert!(matches!(classify(json!({ "error": "x" })), Next::Failed(_)));
        assert!(matches!(
            classify(json!({ "status": "link_required" })),
            Next::Failed(_)
        ));
    }
}
