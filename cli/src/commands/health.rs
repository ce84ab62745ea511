use crate::util::{Target, api_request};

pub async fn run(target: &Target<'_>) -> i32 {
    api_request(target, reqwest::Method::GET, "/health", None, &[]).await
}
