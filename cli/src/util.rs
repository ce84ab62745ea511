use serde_json::json;

pub fn client() -> reqwest::Client {
    reqwest::Client::new()
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
    std::process::exit(4);
}

/// Connection settings shared by every command.
pub struct Target<'a> {
    pub api_url: &'a str,
    pub admin_token: Option<&'a str>,
    pub raw: bool,
}

/// Execute an API request, print the response, return a structured exit code.
///
/// Exit codes: 0=success (2xx), 1=client error (4xx), 2=server error (5xx),
///             3=connection error, 4=usage error
pub async fn api_request(
    target: &Target<'_>,
    method: reqwest::Method,
    path: &str,
    body: Option<serde_json::Value>,
    query: &[(String, String)],
) -> i32 {
    let url = match reqwest::Url::parse(&format!("{}{path}", target.api_url)) {
        Ok(mut u) => {
            if !query.is_empty() {
                let mut q = u.query_pairs_mut();
                for (k, v) in query {
                    q.append_pair(k, v);
                }
            }
            u
        }
        Err(e) => {
            print_json(
                &json!({
                    "error": "cli_error",
                    "message": format!("Invalid URL: {}{path}: {e}", target.api_url)
                }),
                target.raw,
                true,
            );
            return 4;
        }
    };

    let mut req = client().request(method, url);
    if let Some(t) = target.admin_token {
        req = req.header("Authorization", format!("Bearer {t}"));
    }
    if let Some(b) = body {
        req = req.json(&b);
    }

    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => {
            print_json(
                &json!({
                    "error": "connection_error",
                    "message": format!("{e}"),
                    "docs_hint": "Is the API server running? Check GATEKEEP_API_URL."
                }),
                target.raw,
                true,
            );
            return 3;
        }
    };

    let status = resp.status().as_u16();
    let exit_code = exit_code_for(status);

    let resp_body: serde_json::Value = match resp.json().await {
        Ok(v) => v,
        Err(e) => json!({"raw_error": format!("Failed to parse response as JSON: {e}")}),
    };
    print_json(&resp_body, target.raw, exit_code != 0);

    exit_code
}

fn exit_code_for(status: u16) -> i32 {
    match status {
        200..=299 => 0,
        400..=499 => 1,
        _ => 2,
    }
}

fn print_json(value: &serde_json::Value, raw: bool, to_stderr: bool) {
    let formatted = if raw {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    }
    .unwrap_or_else(|_| value.to_string());

    if to_stderr {
        eprintln!("{formatted}");
    } else {
        println!("{formatted}");
    }
}

/// Build an API path from segments, percent-encoding each one so a subject
/// or action name cannot add segments or start a query.
pub fn api_path(segments: &[&str]) -> String {
    let mut url = reqwest::Url::parse("http://gatekeep.local/").expect("static base URL");
    if let Ok(mut path) = url.path_segments_mut() {
        path.clear().extend(segments);
    }
    url.path().to_string()
}

/// Parse a `name=value` argument.
pub fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected name=value, got '{raw}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_status_class() {
        assert_eq!(exit_code_for(200), 0);
        assert_eq!(exit_code_for(204), 0);
        assert_eq!(exit_code_for(401), 1);
        assert_eq!(exit_code_for(429), 1);
        assert_eq!(exit_code_for(503), 2);
    }

    #[test]
    fn path_segments_are_escaped() {
        assert_eq!(
            api_path(&["v1", "security", "subjects", "u-42", "block"]),
            "/v1/security/subjects/u-42/block"
        );
        assert_eq!(
            api_path(&["v1", "security", "subjects", "a/b?c#d"]),
            "/v1/security/subjects/a%2Fb%3Fc%23d"
        );
        assert_eq!(
            api_path(&["v1", "admission", "subjects", "50%", "reset"]),
            "/v1/admission/subjects/50%25/reset"
        );
    }

    #[test]
    fn key_value_parsing() {
        assert_eq!(
            parse_key_value("x-forwarded-for=10.0.0.1").unwrap(),
            ("x-forwarded-for".to_string(), "10.0.0.1".to_string())
        );
        assert_eq!(
            parse_key_value("referer=https://a.example/?q=1").unwrap().1,
            "https://a.example/?q=1"
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=value").is_err());
    }
}
