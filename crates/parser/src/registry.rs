use crate::backend::{AstBackend, ParserBackend, RegexBackend, ResolvedParser, SemanticBackend};
use crate::config::ParserConfig;
use crate::error::Result;
use crate::language::Language;
use crate::types::Tier;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Cached probe results for one language, one cell per tier.
#[derive(Default)]
struct Availability {
    semantic: OnceCell<bool>,
    ast: OnceCell<bool>,
    regex: OnceCell<bool>,
}

impl Availability {
    fn cell(&self, tier: Tier) -> &OnceCell<bool> {
        match tier {
            Tier::Semantic => &self.semantic,
            Tier::Ast => &self.ast,
            Tier::Regex => &self.regex,
        }
    }
}

/// Per-language tier resolution: Semantic, then AST, then Regex, then a no-op parser.
///
/// Each backend is probed at most once per language; the answer is cached until [`reprobe`].
/// Construct one registry per process and share it behind an `Arc`.
///
/// [`reprobe`]: ParserRegistry::reprobe
pub struct ParserRegistry {
    backends: BTreeMap<Tier, Arc<dyn ParserBackend>>,
    availability: Vec<Availability>,
}

#[derive(Default)]
pub struct ParserRegistryBuilder {
    backends: BTreeMap<Tier, Arc<dyn ParserBackend>>,
}

impl ParserRegistryBuilder {
    /// Register `backend` in the slot of its tier, replacing any previous one.
    #[must_use]
    pub fn backend(mut self, backend: Arc<dyn ParserBackend>) -> Self {
        self.backends.insert(backend.tier(), backend);
        self
    }

    #[must_use]
    pub fn build(self) -> ParserRegistry {
        ParserRegistry {
            backends: self.backends,
            availability: fresh_availability(),
        }
    }
}

fn fresh_availability() -> Vec<Availability> {
    Language::ALL.iter().map(|_| Availability::default()).collect()
}

impl ParserRegistry {
    pub fn builder() -> ParserRegistryBuilder {
        ParserRegistryBuilder::default()
    }

    /// [`from_config`](Self::from_config) after [`ParserConfig::validate`].
    pub fn try_from_config(config: &ParserConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_config(config))
    }

    /// Registry with the tiers enabled in `config`.
    pub fn from_config(config: &ParserConfig) -> Self {
        let mut builder = Self::builder();
        if config.enable_semantic {
            builder = builder.backend(Arc::new(SemanticBackend::new(config.semantic.clone())));
        }
        if config.enable_ast {
            builder = builder.backend(Arc::new(AstBackend::new()));
        }
        if config.enable_regex {
            builder = builder.backend(Arc::new(RegexBackend::new()));
        }
        builder.build()
    }

    /// Tiers with a registered backend, most accurate first.
    pub fn registered_tiers(&self) -> Vec<Tier> {
        Tier::PREFERENCE
            .into_iter()
            .filter(|tier| self.backends.contains_key(tier))
            .collect()
    }

    /// Cached probe result, `None` if the tier was never probed for `language`.
    pub fn cached_availability(&self, language: Language, tier: Tier) -> Option<bool> {
        self.availability
            .get(language.index())
            .and_then(|a| a.cell(tier).get().copied())
    }

    /// Pick the parser for `language`. Never fails: with no usable backend the result is the
    /// no-op parser.
    pub async fn resolve(&self, language: Language) -> ResolvedParser {
        let Some(availability) = self.availability.get(language.index()) else {
            return ResolvedParser::noop(language);
        };

        for tier in Tier::PREFERENCE {
            let Some(backend) = self.backends.get(&tier) else {
                continue;
            };
            if !backend.supports(language) || backend.is_demoted(language) {
                continue;
            }

            let available = *availability
                .cell(tier)
                .get_or_init(|| async {
                    let ok = backend.probe(language).await;
                    log::debug!("Probed {tier} tier for {language}: {ok}");
                    ok
                })
                .await;

            // A backend can demote itself during its own probe.
            if available && !backend.is_demoted(language) {
                return ResolvedParser::new(language, Arc::clone(backend));
            }
        }

        log::debug!("No parser tier for {language}; using no-op parser");
        ResolvedParser::noop(language)
    }

    /// Forget every cached probe so the next resolution probes again.
    pub fn reprobe(&mut self) {
        self.availability = fresh_availability();
    }

    /// Release backend resources (language-server processes).
    pub async fn shutdown(&self) {
        for backend in self.backends.values() {
            backend.shutdown().await;
        }
    }
}

impl std::fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserRegistry")
            .field("tiers", &self.registered_tiers())
            .finish()
    }
}
