//! C7/§4.7 — Execution & Fallback Engine. Compiles and validates the IR,
//! executes it, and on an empty result progressively relaxes the query
//! before giving up, the same retry-then-relax idiom as the ingestion
//! writer loop's "retry the same write", turned into "retry a weaker read".

use crate::error::CoreError;
use crate::executor::{self, ExecutionOutcome};
use crate::llm::ChatClient;
use crate::models::semantic_ir::{Aggregation, Entity, Grouping, SemanticIr};
use crate::ontology::OntologyRegistry;
use crate::query_builder::{self, CompiledQuery};
use crate::sensor_store::SensorStore;

/// Outcome of `run`: the rows that were ultimately returned, the SQL that
/// produced them, the (possibly relaxed) IR used, and the two flags
/// §4.7 requires tests to be able to observe.
pub struct FallbackOutcome {
    pub rows: Vec<crate::sensor_store::ResultRow>,
    pub sql: String,
    pub ir: SemanticIr,
    pub fallback_used: bool,
    pub refined_by_llm: bool,
}

const FREE_FORM_SYSTEM_PROMPT: &str = "You write exactly one SQLite SELECT statement against a table \
named sensor_data with columns (id, ts, sensor_type, value, unit, source, raw). Reply with only the SQL \
statement, no explanation, no markdown fences. The statement must begin with SELECT and reference sensor_data.";

/// §4.7's five-step sequence. Never loops more than three times: the
/// initial attempt plus at most two recompiled-and-revalidated fallbacks,
/// plus the final fixed "last 10 rows" query (not a recompile, so not a
/// loop iteration).
pub async fn run(
    ir: SemanticIr,
    store: &SensorStore,
    registry: &OntologyRegistry,
    llm: &dyn ChatClient,
) -> Result<FallbackOutcome, CoreError> {
    let compiled = query_builder::compile(&ir);
    let outcome = execute(&compiled, store, registry)?;

    if !outcome.rows.is_empty() {
        return Ok(FallbackOutcome {
            rows: outcome.rows,
            sql: compiled.sql,
            ir,
            fallback_used: false,
            refined_by_llm: false,
        });
    }

    tracing::info!(sql = %compiled.sql, "empty result, attempting first fallback");
    let relaxed_ir = relax(&ir);
    let relaxed_compiled = query_builder::compile(&relaxed_ir);
    let relaxed_outcome = execute(&relaxed_compiled, store, registry)?;

    if !relaxed_outcome.rows.is_empty() {
        return Ok(FallbackOutcome {
            rows: relaxed_outcome.rows,
            sql: relaxed_compiled.sql,
            ir: relaxed_ir,
            fallback_used: true,
            refined_by_llm: false,
        });
    }

    tracing::info!("first fallback still empty, attempting llm free-form fallback");
    if let Some((sql, rows)) = try_llm_free_form(&relaxed_ir, store, registry, llm).await {
        return Ok(FallbackOutcome {
            rows,
            sql,
            ir: relaxed_ir,
            fallback_used: true,
            refined_by_llm: true,
        });
    }

    tracing::info!("llm fallback unavailable or empty, using final fallback");
    let final_sql = "SELECT * FROM sensor_data ORDER BY ts DESC LIMIT 10".to_string();
    let final_compiled = CompiledQuery { sql: final_sql.clone(), params: vec![] };
    let final_outcome = execute(&final_compiled, store, registry)?;

    Ok(FallbackOutcome {
        rows: final_outcome.rows,
        sql: final_sql,
        ir: relaxed_ir,
        fallback_used: true,
        refined_by_llm: false,
    })
}

fn execute(compiled: &CompiledQuery, store: &SensorStore, registry: &OntologyRegistry) -> Result<ExecutionOutcome, CoreError> {
    executor::execute(compiled, store, registry)
}

/// First fallback: drop grouping, demote an average to current, collapse
/// an entity set to its first element.
fn relax(ir: &SemanticIr) -> SemanticIr {
    let mut relaxed = ir.clone();
    relaxed.grouping = Grouping::None;
    if relaxed.aggregation == Aggregation::Average {
        relaxed.aggregation = Aggregation::Current;
    }
    if let Entity::Set(types) = &relaxed.entity {
        if let Some(first) = types.first() {
            relaxed.entity = Entity::Single(first.clone());
        }
    }
    relaxed.comparison = false;
    relaxed.fallback_reason = Some("empty result, relaxed grouping/aggregation/entity".to_string());
    relaxed
}

/// Second fallback: ask the LLM for a restricted free-form SELECT, run it
/// through the same allow-list as compiler output, and discard anything
/// that fails validation or still returns no rows.
async fn try_llm_free_form(
    ir: &SemanticIr,
    store: &SensorStore,
    registry: &OntologyRegistry,
    llm: &dyn ChatClient,
) -> Option<(String, Vec<crate::sensor_store::ResultRow>)> {
    let entity_hint = ir.entity.as_slice().join(", ");
    let user_prompt = format!("Sensor types of interest: {entity_hint}. Find the most recent relevant rows.");

    let reply = llm.complete(FREE_FORM_SYSTEM_PROMPT, &user_prompt).await.ok()?;
    let sql = reply.trim().trim_end_matches(';').to_string();

    if executor::validate(&sql, registry).is_err() {
        tracing::warn!(%sql, "llm free-form fallback produced sql that failed the allow-list, discarding");
        return None;
    }

    let compiled = CompiledQuery { sql: sql.clone(), params: vec![] };
    match executor::execute(&compiled, store, registry) {
        Ok(outcome) if !outcome.rows.is_empty() => Some((sql, outcome.rows)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::UnavailableChatClient;
    use crate::models::semantic_ir::{OutputFormat, RangeToken, TimeRange};
    use rusqlite::Connection;

    fn setup() -> (SensorStore, OntologyRegistry) {
        let store = SensorStore::open_in_memory().unwrap();
        let registry = OntologyRegistry::open(Connection::open_in_memory().unwrap()).unwrap();
        (store, registry)
    }

    fn base_ir() -> SemanticIr {
        SemanticIr {
            entity: Entity::Single("temperature".to_string()),
            aggregation: Aggregation::Current,
            time_range: TimeRange::Single(RangeToken::last_24_hours()),
            grouping: Grouping::None,
            format: OutputFormat::Value,
            comparison: false,
            time_context: None,
            fallback_reason: None,
        }
    }

    #[tokio::test]
    async fn empty_store_falls_through_to_final_fallback() {
        let (store, registry) = setup();
        let outcome = run(base_ir(), &store, &registry, &UnavailableChatClient).await.unwrap();
        assert!(outcome.fallback_used);
        assert!(!outcome.refined_by_llm);
        assert!(outcome.rows.is_empty());
        assert!(outcome.sql.contains("LIMIT 10"));
    }

    #[tokio::test]
    async fn non_empty_result_never_triggers_fallback() {
        let (store, registry) = setup();
        store
            .insert_batch(&[crate::models::reading::Reading {
                id: 0,
                timestamp: chrono::Utc::now(),
                sensor_type: "temperature".to_string(),
                value: 21.5,
                unit: "C".to_string(),
                source: "test".to_string(),
                raw: "{}".to_string(),
            }])
            .unwrap();

        let outcome = run(base_ir(), &store, &registry, &UnavailableChatClient).await.unwrap();
        assert!(!outcome.fallback_used);
        assert_eq!(outcome.rows.len(), 1);
    }

    #[tokio::test]
    async fn grouped_average_over_set_relaxes_on_empty_result() {
        let (store, registry) = setup();
        let mut ir = base_ir();
        ir.entity = Entity::Set(vec!["temperature".to_string(), "humidity".to_string()]);
        ir.aggregation = Aggregation::Average;
        ir.grouping = Grouping::ByDay;
        ir.comparison = true;
        ir.time_range = TimeRange::List(vec![RangeToken::ThisWeek, RangeToken::LastWeek]);

        let outcome = run(ir, &store, &registry, &UnavailableChatClient).await.unwrap();
        assert!(outcome.fallback_used);
        assert_eq!(outcome.ir.grouping, Grouping::None);
        assert_eq!(outcome.ir.aggregation, Aggregation::Current);
        assert!(matches!(outcome.ir.entity, Entity::Single(_)));
    }
}
