use regex::Regex;

use crate::config::RoutingRule;
use crate::error::{CoreResult, StreamError};

/// Compiled routing rule
#[derive(Debug)]
struct CompiledRule {
    regex: Regex,
    decoder: String,
}

/// Maps provider ids that no decoder claims by name onto a decoder id.
/// Rules are tried in order; the first match wins.
#[derive(Debug, Default)]
pub struct DecoderRouter {
    rules: Vec<CompiledRule>,
}

impl DecoderRouter {
    /// Build a router by compiling the rule regexes.
    pub fn new(rules: &[RoutingRule]) -> CoreResult<Self> {
        let mut compiled = Vec::with_capacity(rules.len());
        for RoutingRule { provider, decoder } in rules {
            let regex = Regex::new(provider).map_err(|e| {
                StreamError::Validation(format!("invalid routing regex '{provider}': {e}"))
            })?;
            compiled.push(CompiledRule {
                regex,
                decoder: decoder.clone(),
            });
        }
        Ok(Self { rules: compiled })
    }

    pub fn pick<'a>(&'a self, provider_id: &str) -> Option<&'a str> {
        self.rules
            .iter()
            .find(|r| r.regex.is_match(provider_id))
            .map(|r| r.decoder.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
