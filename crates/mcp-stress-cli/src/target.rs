// ABOUTME: Shared target resolution: build a TransportSpec from URL or trailing command args
// ABOUTME: Parses repeated --header "K: V" and --env "K=V" options
//
// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2026 dravr.ai

use std::collections::HashMap;

use mcp_stress::TransportSpec;

/// Build a transport spec from CLI target options
///
/// Exactly one of `url` or a trailing command must be given. The `sse`
/// flag selects the legacy SSE transport for URLs.
pub fn build_spec(
    url: Option<&str>,
    sse: bool,
    headers: &[String],
    env: &[String],
    command: &[String],
) -> Result<TransportSpec, String> {
    match (url, command.is_empty()) {
        (Some(url), true) => {
            let headers = parse_headers(headers)?;
            if sse {
                Ok(TransportSpec::Sse {
                    url: url.to_owned(),
                    headers,
                })
            } else {
                Ok(TransportSpec::StreamableHttp {
                    url: url.to_owned(),
                    headers,
                })
            }
        }
        (None, false) => Ok(TransportSpec::Stdio {
            command: command[0].clone(),
            args: command[1..].to_vec(),
            env: parse_env(env)?,
        }),
        (Some(_), false) => Err("give either --url or a command after --, not both".to_owned()),
        (None, true) => Err("give a target: --url URL, or a command after --".to_owned()),
    }
}

/// Parse repeated `"Name: value"` header options
fn parse_headers(headers: &[String]) -> Result<Vec<(String, String)>, String> {
    headers
        .iter()
        .map(|entry| {
            entry
                .split_once(':')
                .map(|(name, value)| (name.trim().to_owned(), value.trim().to_owned()))
                .ok_or_else(|| format!("invalid header '{entry}': expected 'Name: value'"))
        })
        .collect()
}

/// Parse repeated `"KEY=value"` environment options
fn parse_env(env: &[String]) -> Result<HashMap<String, String>, String> {
    env.iter()
        .map(|entry| {
            entry
                .split_once('=')
                .map(|(key, value)| (key.to_owned(), value.to_owned()))
                .ok_or_else(|| format!("invalid env '{entry}': expected 'KEY=value'"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_without_sse_is_streamable() {
        let spec = build_spec(Some("http://localhost:3000/mcp"), false, &[], &[], &[])
            .expect("spec");
        assert_eq!(spec.kind(), "streamable-http");
    }

    #[test]
    fn url_with_sse_flag_is_legacy() {
        let spec =
            build_spec(Some("http://localhost:3000/sse"), true, &[], &[], &[]).expect("spec");
        assert_eq!(spec.kind(), "sse");
    }

    #[test]
    fn trailing_command_is_stdio() {
        let command = vec!["my-server".to_owned(), "--flag".to_owned()];
        let spec = build_spec(None, false, &[], &[], &command).expect("spec");
        assert_eq!(spec.kind(), "stdio");
    }

    #[test]
    fn both_targets_is_an_error() {
        let command = vec!["srv".to_owned()];
        assert!(build_spec(Some("http://x"), false, &[], &[], &command).is_err());
    }

    #[test]
    fn no_target_is_an_error() {
        assert!(build_spec(None, false, &[], &[], &[]).is_err());
    }

    #[test]
    fn headers_and_env_parse() {
        let headers = vec!["Authorization: Bearer tok".to_owned()];
        let env = vec!["DEBUG=1".to_owned()];
        let command = vec!["srv".to_owned()];
        let spec = build_spec(None, false, &headers, &env, &command).expect("spec");
        match spec {
            TransportSpec::Stdio { env, .. } => {
                assert_eq!(env.get("DEBUG").map(String::as_str), Some("1"));
            }
            other => panic!("expected stdio, got {}", other.kind()),
        }
    }

    #[test]
    fn malformed_header_is_rejected() {
        let headers = vec!["no-colon-here".to_owned()];
        assert!(build_spec(Some("http://x"), false, &headers, &[], &[]).is_err());
    }
}
