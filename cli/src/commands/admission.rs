use clap::Args;
use serde_json::json;

use crate::util::{Target, api_path, api_request};

#[derive(Args)]
pub struct AdmitArgs {
    /// Subject (user or client) identifier
    #[arg(long)]
    subject: String,
    /// Action kind, e.g. login or post_create
    #[arg(long)]
    action: String,
    /// Account age in days
    #[arg(long, default_value_t = 0.0)]
    account_age_days: f64,
    /// Report the previous attempt as failed
    #[arg(long)]
    failed: bool,
}

#[derive(Args)]
pub struct StatsArgs {
    #[arg(long)]
    subject: String,
    #[arg(long)]
    action: String,
}

#[derive(Args)]
pub struct ResetArgs {
    #[arg(long)]
    subject: String,
}

pub async fn admit(target: &Target<'_>, args: AdmitArgs) -> i32 {
    let body = json!({
        "subject_id": args.subject,
        "action": args.action,
        "account_age_days": args.account_age_days,
        "was_success": !args.failed,
    });
    api_request(
        target,
        reqwest::Method::POST,
        "/v1/admission/check",
        Some(body),
        &[],
    )
    .await
}

pub async fn stats(target: &Target<'_>, args: StatsArgs) -> i32 {
    let path = api_path(&[
        "v1",
        "admission",
        "subjects",
        &args.subject,
        "actions",
        &args.action,
    ]);
    api_request(target, reqwest::Method::GET, &path, None, &[]).await
}

pub async fn reset(target: &Target<'_>, args: ResetArgs) -> i32 {
    let path = api_path(&["v1", "admission", "subjects", &args.subject, "reset"]);
    api_request(target, reqwest::Method::POST, &path, None, &[]).await
}
