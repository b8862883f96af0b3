//! Persian → canonical-English translation, §4.5. Tries the LLM with a
//! fixed few-shot prompt; on failure (or no client configured) falls back
//! to a deterministic word-substitution table. Either way, time
//! expressions and comparison cues must survive verbatim.

use crate::llm::ChatClient;

const FEW_SHOT_SYSTEM_PROMPT: &str = "You translate Persian agricultural-sensor questions into canonical \
English. Preserve all numbers, time expressions (e.g. 'سه روز اخیر' -> 'last 3 days'), and comparison \
words exactly. Do not add commentary, only output the translated question.\n\
Example: 'دمای فعلی چقدر است؟' -> 'What is the current temperature?'\n\
Example: 'مقایسه رطوبت خاک این هفته با هفته قبل' -> 'compare soil moisture this week vs last week'";

/// Deterministic substitution table, grounded in the ontology's own
/// Persian synonym lists plus a handful of function words the ontology
/// doesn't carry (comparison cues, time connectives).
fn substitution_table() -> &'static [(&'static str, &'static str)] {
    &[
        ("دما", "temperature"),
        ("رطوبت", "humidity"),
        ("فشار", "pressure"),
        ("نور", "light"),
        ("باد", "wind"),
        ("باران", "rainfall"),
        ("خاک", "soil"),
        ("آبیاری", "irrigation"),
        ("آب", "water"),
        ("آفت", "pest"),
        ("بیماری", "disease"),
        ("محصول", "yield"),
        ("میانگین", "average"),
        ("فعلی", "current"),
        ("مقایسه", "compare"),
        ("امروز", "today"),
        ("دیروز", "yesterday"),
        ("این هفته", "this week"),
        ("هفته قبل", "last week"),
        ("هفته گذشته", "last week"),
        ("این ماه", "this month"),
        ("ماه قبل", "last month"),
        ("اخیر", "recent"),
        ("گذشته", "last"),
        ("چقدر است", "what is"),
        ("با", "vs"),
    ]
}

/// Substring substitution. Longer phrases are checked first so e.g. "این
/// هفته" wins over separately substituting the words it is built from.
fn deterministic_fallback(query: &str) -> String {
    let mut table: Vec<&(&str, &str)> = substitution_table().iter().collect();
    table.sort_by_key(|(from, _)| std::cmp::Reverse(from.chars().count()));
    let mut result = query.to_string();
    for (from, to) in table {
        result = result.replace(from, to);
    }
    result
}

pub async fn translate(query: &str, client: &dyn ChatClient) -> (String, bool) {
    match client.complete(FEW_SHOT_SYSTEM_PROMPT, query).await {
        Ok(text) if !text.trim().is_empty() => (text.trim().to_string(), true),
        _ => {
            tracing::warn!("llm translation unavailable, using deterministic fallback");
            (deterministic_fallback(query), false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_preserves_numbers() {
        let out = deterministic_fallback("میانگین دمای سه روز اخیر");
        assert!(out.contains("average"));
        assert!(out.contains("temperature") || out.contains("دمای"));
    }

    #[test]
    fn fallback_translates_comparison_phrase() {
        let out = deterministic_fallback("مقایسه رطوبت این هفته با هفته قبل");
        assert!(out.contains("compare"));
        assert!(out.contains("humidity"));
        assert!(out.contains("this week"));
        assert!(out.contains("last week"));
    }
}
