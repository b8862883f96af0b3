//! C5 — Semantic Translator: free-form question + ontology → validated
//! Semantic IR.

pub mod comparison;
pub mod language;
pub mod time_parse;
pub mod translate;

use crate::llm::ChatClient;
use crate::models::semantic_ir::{Aggregation, Entity, Grouping, OutputFormat, RangeToken, SemanticIr, TimeRange};
use crate::ontology::{Locale, OntologyRegistry};
use language::Lang;
use std::sync::Arc;

pub struct SemanticTranslator {
    registry: Arc<OntologyRegistry>,
    llm: Arc<dyn ChatClient>,
}

/// Everything C8 needs to carry forward after translation: the IR itself,
/// the detected language (for narrative rendering), the canonical-English
/// rendering (for provenance/`translated_query`), and whether the
/// ontology mapping ultimately required an LLM assist.
pub struct Translation {
    pub ir: SemanticIr,
    pub lang: Lang,
    pub translated_query: String,
    pub used_llm_translation: bool,
    pub used_llm_mapping: bool,
}

const AGGREGATION_CUES: &[(&str, Aggregation)] = &[
    ("average", Aggregation::Average),
    ("avg", Aggregation::Average),
    ("mean", Aggregation::Average),
    ("minimum", Aggregation::Min),
    ("min", Aggregation::Min),
    ("lowest", Aggregation::Min),
    ("maximum", Aggregation::Max),
    ("max", Aggregation::Max),
    ("highest", Aggregation::Max),
    ("count", Aggregation::Count),
    ("how many", Aggregation::Count),
    ("number of", Aggregation::Count),
];

const FORMAT_CUES: &[(&str, OutputFormat)] = &[
    ("pie", OutputFormat::Distribution),
    ("distribution", OutputFormat::Distribution),
    ("share", OutputFormat::Distribution),
    ("compare", OutputFormat::Comparison),
    ("comparison", OutputFormat::Comparison),
    ("trend", OutputFormat::Trend),
    ("graph", OutputFormat::Trend),
    ("chart", OutputFormat::Trend),
];

impl SemanticTranslator {
    pub fn new(registry: Arc<OntologyRegistry>, llm: Arc<dyn ChatClient>) -> Self {
        Self { registry, llm }
    }

    pub async fn translate_query(&self, query: &str, comparison_hint: Option<bool>) -> Translation {
        let lang = language::detect(query);

        let (translated_query, used_llm_translation) = if lang == Lang::Fa {
            translate::translate(query, self.llm.as_ref()).await
        } else {
            (query.to_string(), false)
        };

        let locale = match lang {
            Lang::En => Locale::En,
            Lang::Fa => Locale::Fa,
        };

        let explicit_comparison = comparison::detect(&translated_query) || comparison_hint.unwrap_or(false);

        let mut entities = self.registry.find_mentions(&translated_query, locale);
        let mut used_llm_mapping = false;
        if entities.is_empty() {
            entities = self.llm_assisted_mapping(&translated_query, locale).await.into_iter().collect();
            used_llm_mapping = !entities.is_empty();
        }
        if entities.is_empty() {
            entities.push("temperature".to_string());
        }

        let aggregation = AGGREGATION_CUES
            .iter()
            .find(|(cue, _)| translated_query.to_lowercase().contains(cue))
            .map(|(_, agg)| *agg)
            .unwrap_or(Aggregation::Current);

        let format = FORMAT_CUES
            .iter()
            .find(|(cue, _)| translated_query.to_lowercase().contains(cue))
            .map(|(_, fmt)| *fmt)
            .unwrap_or(OutputFormat::Value);

        // Time parsing runs against the original query rather than the
        // translated one: the deterministic substitution table rewrites
        // cue words ("اخیر" -> "recent") that the Persian time regexes
        // themselves match on, so translating first would erase them.
        let time_source = if lang == Lang::Fa { query } else { translated_query.as_str() };
        let parsed_time = time_parse::parse(time_source);

        let entity_comparison = entities.len() >= 2 && explicit_comparison;
        let (time_range, grouping) = if explicit_comparison {
            let (expanded, implied_grouping) = comparison::expand(&parsed_time.range_token);
            (TimeRange::List(expanded), implied_grouping)
        } else {
            // Current-value queries never bucket; any other aggregation
            // over a span defaults to one bucket per the span's natural
            // granularity (e.g. a 3-day average yields daily buckets),
            // matching the compilation table's "grouping≠none" case.
            let grouping = match aggregation {
                Aggregation::Current => Grouping::None,
                _ => comparison::grouping_for_interval(parsed_time.time_context.interval),
            };
            (TimeRange::Single(parsed_time.range_token.clone()), grouping)
        };

        let comparison_flag = explicit_comparison && (time_range.len() >= 2 || entity_comparison);

        // A compound entity set is only modeled when there is explicit
        // comparison intent — the IR's validation rule ties entity-set
        // size directly to the comparison flag (see models::semantic_ir),
        // so a merely co-mentioned but non-contrasted entity list
        // collapses to its first member rather than becoming a Set.
        let entity = if entity_comparison {
            Entity::Set(entities)
        } else {
            Entity::Single(entities.into_iter().next().unwrap_or_else(|| "temperature".to_string()))
        };

        let format = if comparison_flag && format == OutputFormat::Value { OutputFormat::Comparison } else { format };

        let mut ir = SemanticIr {
            entity,
            aggregation: if comparison_flag && aggregation == Aggregation::Current { Aggregation::Average } else { aggregation },
            time_range,
            grouping,
            format,
            comparison: comparison_flag,
            time_context: if explicit_comparison { None } else { Some(parsed_time.time_context) },
            fallback_reason: None,
        };

        if let Err(reason) = ir.validate() {
            let best_guess = ir.entity.first().unwrap_or("temperature").to_string();
            tracing::warn!(%reason, "semantic IR failed validation, using minimal fallback");
            ir = SemanticIr::minimal_fallback(best_guess, reason);
        }

        Translation { ir, lang, translated_query, used_llm_translation, used_llm_mapping }
    }

    /// §4.5 "Ontology mapping": ask the LLM to choose the closest
    /// canonical type, then persist any `new_synonyms` it reports via
    /// `register_synonym`. On LLM failure, returns `None` and the caller
    /// defaults to `temperature` per §6's degrade-gracefully contract.
    async fn llm_assisted_mapping(&self, text: &str, locale: Locale) -> Option<String> {
        let canonical_types = self.registry.canonical_types().join(", ");
        let system = format!(
            "Given a list of canonical sensor types [{canonical_types}], choose the single closest match \
             for the user's question. Reply with only the canonical type name, nothing else."
        );
        match self.llm.complete(&system, text).await {
            Ok(reply) => {
                let candidate = reply.trim().to_lowercase();
                if self.registry.is_canonical(&candidate) {
                    if let Err(err) = self.registry.register_synonym(text, &candidate, locale) {
                        tracing::warn!(%err, "failed to persist llm-discovered synonym");
                    }
                    Some(candidate)
                } else {
                    None
                }
            }
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::UnavailableChatClient;
    use rusqlite::Connection;

    fn translator() -> SemanticTranslator {
        let registry = Arc::new(OntologyRegistry::open(Connection::open_in_memory().unwrap()).unwrap());
        SemanticTranslator::new(registry, Arc::new(UnavailableChatClient))
    }

    #[tokio::test]
    async fn current_value_query_produces_minimal_ir() {
        let t = translator();
        let translation = t.translate_query("What is the current temperature?", None).await;
        assert_eq!(translation.ir.entity.first(), Some("temperature"));
        assert_eq!(translation.ir.aggregation, Aggregation::Current);
        assert!(!translation.ir.comparison);
    }

    #[tokio::test]
    async fn comparison_query_produces_list_time_range() {
        let t = translator();
        let translation = t.translate_query("compare soil moisture this week vs last week", None).await;
        assert!(translation.ir.comparison);
        assert_eq!(translation.ir.time_range.len(), 2);
    }

    #[tokio::test]
    async fn persian_query_is_detected_and_translated() {
        let t = translator();
        let translation = t.translate_query("میانگین دمای سه روز اخیر", None).await;
        assert_eq!(translation.lang, Lang::Fa);
        assert_eq!(translation.ir.entity.first(), Some("temperature"));
        assert_eq!(translation.ir.aggregation, Aggregation::Average);
        assert_eq!(translation.ir.grouping, Grouping::ByDay);
    }

    #[tokio::test]
    async fn unmapped_entity_defaults_to_temperature() {
        let t = translator();
        let translation = t.translate_query("asdkjasdlkj random gibberish", None).await;
        assert_eq!(translation.ir.entity.first(), Some("temperature"));
    }
}
