use crate::config::Config;
use crate::decoder::{Decoder, StreamDecoder};
use crate::decoders::claude_cli::{ClaudeCliDecoder, ClaudeCliOptions};
use crate::decoders::openai_compat::{OpenAiCompatDecoder, OpenAiCompatOptions};
use crate::error::{CoreResult, StreamError};
use crate::router::DecoderRouter;

/// Registry of decoder instances, looked up by provider id and content type.
#[derive(Debug, Default)]
pub struct DecoderRegistry {
    decoders: Vec<Decoder>,
    router: DecoderRouter,
}

impl DecoderRegistry {
    /// Both built-in decoders with default options and no routing rules.
    pub fn with_defaults() -> Self {
        Self::with_options(OpenAiCompatOptions::default(), ClaudeCliOptions::default())
    }

    pub fn with_options(openai: OpenAiCompatOptions, claude: ClaudeCliOptions) -> Self {
        let mut reg = Self::default();
        reg.register(OpenAiCompatDecoder::new(openai));
        reg.register(ClaudeCliDecoder::new(claude));
        reg
    }

    /// Built-in decoders configured from `cfg`, plus its routing rules.
    pub fn from_config(cfg: &Config) -> CoreResult<Self> {
        let mut reg = Self::with_options(cfg.openai_compat_options(), cfg.claude_cli_options());
        reg.router = DecoderRouter::new(&cfg.routing.rules)?;
        for rule in &cfg.routing.rules {
            if reg.get(&rule.decoder).is_none() {
                return Err(StreamError::Validation(format!(
                    "routing rule '{}' points to unknown decoder '{}'",
                    rule.provider, rule.decoder
                )));
            }
        }
        Ok(reg)
    }

    /// Adds a decoder, replacing any existing one with the same id.
    pub fn register(&mut self, decoder: impl Into<Decoder>) {
        let decoder = decoder.into();
        self.decoders.retain(|d| d.id() != decoder.id());
        self.decoders.push(decoder);
    }

    pub fn get(&self, id: &str) -> Option<&Decoder> {
        self.decoders.iter().find(|d| d.id() == id)
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.decoders.iter().map(|d| d.id()).collect()
    }

    /// Picks a decoder for a stream.
    ///
    /// Order: a decoder that names `provider_id`, then a routing rule, then the
    /// first decoder that accepts `content_type` alone.
    pub fn select(&self, provider_id: &str, content_type: &str) -> CoreResult<&Decoder> {
        if let Some(d) = self
            .decoders
            .iter()
            .find(|d| d.can_decode_for_provider(provider_id, content_type))
        {
            return Ok(d);
        }
        if let Some(id) = self.router.pick(provider_id) {
            return self.get(id).ok_or_else(|| {
                StreamError::Validation(format!("decoder '{id}' not found"))
            });
        }
        self.decoders
            .iter()
            .find(|d| d.can_decode(content_type))
            .ok_or_else(|| {
                StreamError::Validation(format!(
                    "no decoder for provider '{provider_id}' with content type '{content_type}'"
                ))
            })
    }
}
