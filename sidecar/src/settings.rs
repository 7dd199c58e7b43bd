use indexmap::IndexSet;
use serde::Serialize;
use url::Url;
use url::form_urlencoded;

use crate::config::Config;
use crate::errors::{Result, SidecarError};

pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;

/// Fallback routing policy forwarded to the aggregator.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Fallback {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_ids: Option<IndexSet<String>>,
}

/// Per-request settings for the aggregator client. Fully determined by the
/// request's query string plus process-wide configuration; immutable once
/// built and discarded when the request completes.
#[derive(Clone, Debug, Serialize)]
pub struct ProviderSettings {
    pub dkey: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_ids: Option<IndexSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<String>,
    pub timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quorum_from: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quorum_of: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<Fallback>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_type: Option<String>,
    pub skip_signature_check: bool,
    pub skip_response_deep_check: bool,
    /// Aggregator endpoint, process-wide. Not part of the wire settings.
    #[serde(skip)]
    pub url: Url,
}

/// Resolves the query string of an inbound request into validated settings.
///
/// The grammar follows the `qs` array convention: both `key[]=a&key[]=b`
/// and repeated `key=a&key=b` produce an array, while a single plain
/// `key=a` stays a scalar. Unrecognized keys are ignored.
pub fn resolve_settings(query: &str, config: &Config) -> Result<ProviderSettings> {
    let pairs = parse_query(query);

    // `api_key` is the legacy name for the credential.
    let dkey = scalar(&pairs, "dkey")
        .or_else(|| scalar(&pairs, "api_key"))
        .ok_or(SidecarError::MissingDkey)?
        .to_string();

    let provider_ids = array(&pairs, "provider_ids").map(collect_ids);

    let quorum_from = parse_quorum(scalar(&pairs, "quorum_from"), "quorum_from")?;
    let quorum_of = parse_quorum(scalar(&pairs, "quorum_of"), "quorum_of")?;

    // Only an exact (case-insensitive) boolean literal enables the field;
    // anything else leaves it unset.
    let fallback = match scalar(&pairs, "fallback") {
        Some(raw) if raw.eq_ignore_ascii_case("true") || raw.eq_ignore_ascii_case("false") => {
            Some(Fallback {
                enabled: raw.eq_ignore_ascii_case("true"),
                provider_ids: array(&pairs, "fallback_provider_ids")
                    .filter(|ids| !ids.is_empty())
                    .map(collect_ids),
            })
        }
        _ => None,
    };

    let timeout = scalar(&pairs, "timeout")
        .and_then(|raw| raw.parse::<u64>().ok())
        .filter(|&ms| ms != 0)
        .unwrap_or(DEFAULT_TIMEOUT_MS);

    Ok(ProviderSettings {
        dkey,
        provider_ids,
        network: scalar(&pairs, "network").map(str::to_string),
        timeout,
        quorum_from,
        quorum_of,
        fallback,
        client_type: scalar(&pairs, "client_type").map(str::to_string),
        skip_signature_check: config.skip_signature_check,
        skip_response_deep_check: config.skip_response_deep_check,
        url: config.drpc_url.clone(),
    })
}

fn parse_query(query: &str) -> Vec<(String, String)> {
    let trimmed = query.strip_prefix('?').unwrap_or(query);
    form_urlencoded::parse(trimmed.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// A key is a scalar only when it occurs exactly once in plain form. Bracket
/// form or repetition makes it an array, which scalar consumers reject.
fn scalar<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    let mut found = None;
    for (k, v) in pairs {
        if k == key {
            if found.is_some() {
                return None;
            }
            found = Some(v.as_str());
        }
    }
    found
}

/// Array-valued lookup: all `key[]` occurrences, or two-plus plain `key`
/// occurrences. A single plain occurrence is a scalar, not a one-element
/// array.
fn array(pairs: &[(String, String)], key: &str) -> Option<Vec<String>> {
    let bracket = format!("{key}[]");
    let bracketed: Vec<String> = pairs
        .iter()
        .filter(|(k, _)| *k == bracket)
        .map(|(_, v)| v.clone())
        .collect();
    if !bracketed.is_empty() {
        return Some(bracketed);
    }

    let plain: Vec<String> = pairs
        .iter()
        .filter(|(k, _)| k == key)
        .map(|(_, v)| v.clone())
        .collect();
    if plain.len() >= 2 { Some(plain) } else { None }
}

fn collect_ids(values: Vec<String>) -> IndexSet<String> {
    values.into_iter().collect()
}

fn parse_quorum(raw: Option<&str>, field: &'static str) -> Result<Option<u32>> {
    match raw {
        Some(raw) => raw
            .parse::<u32>()
            .map(Some)
            .map_err(|_| SidecarError::NonNumericField(field)),
        None => Ok(None),
    }
}
