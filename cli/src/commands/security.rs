use clap::{Args, Subcommand};
use serde_json::json;

use crate::util::{Target, api_path, api_request, exit_error, parse_key_value};

#[derive(Args)]
pub struct EvaluateArgs {
    #[arg(long)]
    subject: String,
    #[arg(long)]
    user_agent: Option<String>,
    /// Free text submitted by the subject
    #[arg(long)]
    content: Option<String>,
    /// Request header as name=value (repeatable)
    #[arg(long = "header")]
    headers: Vec<String>,
    #[arg(long, default_value_t = 0)]
    consecutive_failures: u32,
    /// Milliseconds since the subject's previous request
    #[arg(long)]
    interval_ms: Option<i64>,
    /// Report the request as failed
    #[arg(long)]
    failed: bool,
}

#[derive(Subcommand)]
pub enum AlertCommands {
    /// Most recent alerts first
    List {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Unresolved critical alerts
    Critical,
    /// Show one alert
    Get {
        #[arg(long)]
        id: uuid::Uuid,
    },
    /// Mark an alert resolved (admin)
    Resolve {
        #[arg(long)]
        id: uuid::Uuid,
    },
}

#[derive(Subcommand)]
pub enum BlockCommands {
    /// Block, throttle and recovery state of a subject
    Status {
        #[arg(long)]
        subject: String,
    },
    /// Block a subject (admin)
    Set {
        #[arg(long)]
        subject: String,
        #[arg(long, default_value = "manual")]
        reason: String,
        /// Defaults to the server's block TTL
        #[arg(long)]
        duration_secs: Option<i64>,
    },
    /// Lift a block (admin)
    Clear {
        #[arg(long)]
        subject: String,
    },
}

pub async fn evaluate(target: &Target<'_>, args: EvaluateArgs) -> i32 {
    let mut headers = serde_json::Map::new();
    for raw in &args.headers {
        match parse_key_value(raw) {
            Ok((name, value)) => {
                headers.insert(name, json!(value));
            }
            Err(message) => exit_error(&message, Some("Use --header name=value")),
        }
    }

    let body = json!({
        "subject_id": args.subject,
        "user_agent": args.user_agent,
        "content": args.content,
        "headers": headers,
        "consecutive_failures": args.consecutive_failures,
        "interval_ms": args.interval_ms,
        "success": !args.failed,
    });
    api_request(
        target,
        reqwest::Method::POST,
        "/v1/security/evaluate",
        Some(body),
        &[],
    )
    .await
}

pub async fn rules(target: &Target<'_>) -> i32 {
    api_request(target, reqwest::Method::GET, "/v1/security/rules", None, &[]).await
}

pub async fn alerts(target: &Target<'_>, command: AlertCommands) -> i32 {
    match command {
        AlertCommands::List { limit } => {
            let query: Vec<(String, String)> = limit
                .map(|l| vec![("limit".to_string(), l.to_string())])
                .unwrap_or_default();
            api_request(target, reqwest::Method::GET, "/v1/security/alerts", None, &query).await
        }
        AlertCommands::Critical => {
            api_request(
                target,
                reqwest::Method::GET,
                "/v1/security/alerts/critical",
                None,
                &[],
            )
            .await
        }
        AlertCommands::Get { id } => {
            let path = format!("/v1/security/alerts/{id}");
            api_request(target, reqwest::Method::GET, &path, None, &[]).await
        }
        AlertCommands::Resolve { id } => {
            let path = format!("/v1/security/alerts/{id}/resolve");
            api_request(target, reqwest::Method::POST, &path, None, &[]).await
        }
    }
}

pub async fn block(target: &Target<'_>, command: BlockCommands) -> i32 {
    match command {
        BlockCommands::Status { subject } => {
            let path = api_path(&["v1", "security", "subjects", &subject]);
            api_request(target, reqwest::Method::GET, &path, None, &[]).await
        }
        BlockCommands::Set {
            subject,
            reason,
            duration_secs,
        } => {
            let path = api_path(&["v1", "security", "subjects", &subject, "block"]);
            let body = json!({ "reason": reason, "duration_secs": duration_secs });
            api_request(target, reqwest::Method::POST, &path, Some(body), &[]).await
        }
        BlockCommands::Clear { subject } => {
            let path = api_path(&["v1", "security", "subjects", &subject, "block"]);
            api_request(target, reqwest::Method::DELETE, &path, None, &[]).await
        }
    }
}
