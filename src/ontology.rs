//! C1 — Ontology Registry: the canonical sensor catalog (synonyms, units,
//! plausible ranges, descriptions). Read-mostly; writes (new synonyms
//! discovered by C5) are serialized through a `Mutex` over the backing
//! SQLite connection.

use rusqlite::{Connection, params};
use std::collections::HashMap;
use std::sync::Mutex;
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Locale {
    En,
    Fa,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingType {
    Exact,
    Partial,
    Context,
    Heuristic,
    FeatureBias,
    Llm,
    Fallback,
}

impl MappingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingType::Exact => "exact",
            MappingType::Partial => "partial",
            MappingType::Context => "context",
            MappingType::Heuristic => "heuristic",
            MappingType::FeatureBias => "feature_bias",
            MappingType::Llm => "llm",
            MappingType::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Range {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

/// Canonical entry. Synonyms are case-folded and NFKC-normalized at
/// registration time (both at seed time and via `register_synonym`).
#[derive(Debug, Clone)]
pub struct SensorDescriptor {
    pub sensor_type: String,
    pub unit: String,
    pub range: Range,
    pub description: String,
    pub synonyms_en: Vec<String>,
    pub synonyms_fa: Vec<String>,
}

fn normalize(phrase: &str) -> String {
    phrase.nfkc().collect::<String>().to_lowercase().trim().to_string()
}

/// Context keywords that hint at a sensor family when no direct synonym
/// matches — grounded in the original ontology's broader "soil"/"weather"
/// compound-query term tables, narrowed here to a single-hit keyword map
/// (the original's full multi-sensor expansion lives in C5's comparison and
/// compound-entity expansion, not in C1).
fn context_keywords() -> &'static [(&'static str, &'static str)] {
    &[
        ("soil", "soil_moisture"),
        ("خاک", "soil_moisture"),
        ("weather", "temperature"),
        ("هوا", "temperature"),
        ("climate", "temperature"),
        ("irrigation", "water_usage"),
        ("آبیاری", "water_usage"),
        ("pest", "pest_count"),
        ("آفت", "pest_count"),
        ("disease", "disease_risk"),
        ("بیماری", "disease_risk"),
        ("nutrient", "nitrogen_level"),
        ("greenhouse", "temperature"),
        ("گلخانه", "temperature"),
    ]
}

pub struct OntologyRegistry {
    inner: Mutex<Inner>,
}

struct Inner {
    conn: Connection,
    descriptors: HashMap<String, SensorDescriptor>,
    /// registration order, for tie-breaking lookup_synonym matches.
    registration_order: Vec<String>,
}

impl OntologyRegistry {
    /// Open (or create) the synonym-override table at `path` and seed the
    /// base catalog in-process.
    pub fn open(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS synonym_overrides (
                phrase TEXT NOT NULL,
                sensor_type TEXT NOT NULL,
                locale TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now')),
                PRIMARY KEY (phrase, locale)
            );",
        )?;

        let mut descriptors = HashMap::new();
        let mut registration_order = Vec::new();
        for d in seed_descriptors() {
            registration_order.push(d.sensor_type.clone());
            descriptors.insert(d.sensor_type.clone(), d);
        }

        let mut inner = Inner {
            conn,
            descriptors,
            registration_order,
        };
        inner.load_overrides()?;

        Ok(Self { inner: Mutex::new(inner) })
    }

    pub fn canonical_unit(&self, sensor_type: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.descriptors.get(sensor_type).map(|d| d.unit.clone())
    }

    pub fn plausible_range(&self, sensor_type: &str) -> Option<Range> {
        let inner = self.inner.lock().unwrap();
        inner.descriptors.get(sensor_type).map(|d| d.range)
    }

    pub fn description(&self, sensor_type: &str) -> Option<String> {
        let inner = self.inner.lock().unwrap();
        inner.descriptors.get(sensor_type).map(|d| d.description.clone())
    }

    pub fn is_canonical(&self, sensor_type: &str) -> bool {
        let inner = self.inner.lock().unwrap();
        inner.descriptors.contains_key(sensor_type)
    }

    pub fn canonical_types(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.registration_order.clone()
    }

    /// Every distinct canonical type mentioned anywhere in `text`, in
    /// order of first occurrence — used by C5 to detect compound entity
    /// queries (e.g. "temperature and humidity") without requiring the
    /// caller to pre-split on conjunctions.
    pub fn find_mentions(&self, text: &str, locale: Locale) -> Vec<String> {
        let needle = normalize(text);
        let inner = self.inner.lock().unwrap();
        let mut hits: Vec<(usize, String)> = Vec::new();
        for sensor_type in &inner.registration_order {
            let mut best_pos: Option<usize> = None;
            for syn in inner
                .synonyms_for(sensor_type, locale)
                .iter()
                .chain(inner.synonyms_for(sensor_type, Locale::En))
            {
                if syn.is_empty() {
                    continue;
                }
                if let Some(pos) = needle.find(syn.as_str()) {
                    best_pos = Some(best_pos.map_or(pos, |p| p.min(pos)));
                }
            }
            if let Some(pos) = best_pos {
                hits.push((pos, sensor_type.clone()));
            }
        }
        hits.sort_by_key(|(pos, _)| *pos);
        hits.into_iter().map(|(_, t)| t).collect()
    }

    /// §4.1 `lookup_synonym`. Returns `(type, mapping_type, confidence)`.
    pub fn lookup_synonym(&self, phrase: &str, locale: Locale) -> Option<(String, MappingType, f64)> {
        let needle = normalize(phrase);
        if needle.is_empty() {
            return None;
        }
        let inner = self.inner.lock().unwrap();

        // (1) exact longest-match against synonyms[locale]
        if let Some(hit) = inner.longest_exact_match(&needle, locale) {
            return Some((hit, MappingType::Exact, 0.95));
        }
        // (2) exact longest-match against synonyms[en] regardless of locale
        if locale != Locale::En {
            if let Some(hit) = inner.longest_exact_match(&needle, Locale::En) {
                return Some((hit, MappingType::Exact, 0.9));
            }
        }
        // (3) word-level partial match, minimum token length 3
        if let Some(hit) = inner.partial_word_match(&needle, locale) {
            return Some((hit, MappingType::Partial, 0.6));
        }
        // (4) context keywords
        for (kw, sensor_type) in context_keywords() {
            if needle.contains(kw) && inner.descriptors.contains_key(*sensor_type) {
                return Some((sensor_type.to_string(), MappingType::Context, 0.4));
            }
        }
        None
    }

    /// §4.1 `register_synonym` — persists a new synonym discovered by C5.
    /// Writes are serialized through the registry's mutex.
    pub fn register_synonym(&self, phrase: &str, sensor_type: &str, locale: Locale) -> anyhow::Result<()> {
        let normalized = normalize(phrase);
        let mut inner = self.inner.lock().unwrap();
        if !inner.descriptors.contains_key(sensor_type) {
            anyhow::bail!("cannot register synonym for unknown sensor type '{sensor_type}'");
        }
        let locale_str = match locale {
            Locale::En => "en",
            Locale::Fa => "fa",
        };
        inner.conn.execute(
            "INSERT OR REPLACE INTO synonym_overrides (phrase, sensor_type, locale) VALUES (?1, ?2, ?3)",
            params![normalized, sensor_type, locale_str],
        )?;
        if let Some(d) = inner.descriptors.get_mut(sensor_type) {
            match locale {
                Locale::En => d.synonyms_en.push(normalized),
                Locale::Fa => d.synonyms_fa.push(normalized),
            }
        }
        Ok(())
    }
}

impl Inner {
    fn load_overrides(&mut self) -> anyhow::Result<()> {
        let mut stmt = self
            .conn
            .prepare("SELECT phrase, sensor_type, locale FROM synonym_overrides")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (phrase, sensor_type, locale) in rows {
            if let Some(d) = self.descriptors.get_mut(&sensor_type) {
                if locale == "en" {
                    d.synonyms_en.push(phrase);
                } else {
                    d.synonyms_fa.push(phrase);
                }
            }
        }
        Ok(())
    }

    fn synonyms_for(&self, sensor_type: &str, locale: Locale) -> &[String] {
        let d = &self.descriptors[sensor_type];
        match locale {
            Locale::En => &d.synonyms_en,
            Locale::Fa => &d.synonyms_fa,
        }
    }

    /// Longest matching synonym wins; ties broken by registration order.
    fn longest_exact_match(&self, needle: &str, locale: Locale) -> Option<String> {
        let mut best: Option<(usize, &str)> = None;
        for sensor_type in &self.registration_order {
            for syn in self.synonyms_for(sensor_type, locale) {
                if needle == syn.as_str() || needle.contains(syn.as_str()) {
                    let len = syn.len();
                    match best {
                        Some((best_len, _)) if best_len >= len => {}
                        _ => best = Some((len, sensor_type.as_str())),
                    }
                }
            }
        }
        best.map(|(_, t)| t.to_string())
    }

    fn partial_word_match(&self, needle: &str, locale: Locale) -> Option<String> {
        let tokens: Vec<&str> = needle.split_whitespace().filter(|t| t.len() >= 3).collect();
        if tokens.is_empty() {
            return None;
        }
        let mut best: Option<(usize, &str)> = None;
        for sensor_type in &self.registration_order {
            for syn in self
                .synonyms_for(sensor_type, locale)
                .iter()
                .chain(self.synonyms_for(sensor_type, Locale::En))
            {
                for tok in &tokens {
                    if syn.split_whitespace().any(|w| w == *tok) {
                        let len = tok.len();
                        match best {
                            Some((best_len, _)) if best_len >= len => {}
                            _ => best = Some((len, sensor_type.as_str())),
                        }
                    }
                }
            }
        }
        best.map(|(_, t)| t.to_string())
    }
}

/// Base catalog, grounded in the original system's comprehensive ontology
/// (`unified_semantic_service.py::_build_comprehensive_ontology`), with the
/// crop-price entries dropped (they carry no physical unit and are not
/// ingestible sensor readings — see DESIGN.md).
fn seed_descriptors() -> Vec<SensorDescriptor> {
    fn d(
        sensor_type: &str,
        unit: &str,
        range: (f64, f64, f64),
        description: &str,
        en: &[&str],
        fa: &[&str],
    ) -> SensorDescriptor {
        SensorDescriptor {
            sensor_type: sensor_type.to_string(),
            unit: unit.to_string(),
            range: Range { min: range.0, max: range.1, avg: range.2 },
            description: description.to_string(),
            synonyms_en: en.iter().map(|s| normalize(s)).collect(),
            synonyms_fa: fa.iter().map(|s| normalize(s)).collect(),
        }
    }

    vec![
        d("temperature", "°C", (-50.0, 70.0, 21.5),
            "Air temperature readings",
            &["temperature", "temp", "heat", "thermal", "air temperature", "ambient temperature", "greenhouse temperature"],
            &["دما", "گرما", "حرارت", "درجه حرارت", "دمای هوا", "دمای محیط", "دمای گلخانه"]),
        d("humidity", "%", (0.0, 100.0, 72.7),
            "Air humidity percentage",
            &["humidity", "moisture", "dampness", "air humidity", "relative humidity"],
            &["رطوبت", "نم", "شرجی", "رطوبت هوا", "رطوبت نسبی"]),
        d("pressure", "hPa", (800.0, 1200.0, 1004.8),
            "Atmospheric pressure readings",
            &["pressure", "atmospheric", "barometric"],
            &["فشار", "بارومتر", "فشار هوا"]),
        d("light", "lux", (0.0, 100000.0, 277.6),
            "Light intensity measurements",
            &["light", "brightness", "illumination", "lux"],
            &["نور", "روشنایی", "نور خورشید"]),
        d("co2_level", "ppm", (0.0, 5000.0, 425.5),
            "Carbon dioxide concentration",
            &["co2", "carbon dioxide", "co2 level"],
            &["دی اکسید کربن", "کربن دی اکسید"]),
        d("wind_speed", "m/s", (0.0, 100.0, 10.3),
            "Wind speed measurements",
            &["wind", "wind speed", "air velocity"],
            &["سرعت باد", "باد"]),
        d("rainfall", "mm", (0.0, 500.0, 0.6),
            "Rainfall measurements",
            &["rain", "rainfall", "precipitation"],
            &["باران", "بارندگی", "میزان باران"]),
        d("soil_moisture", "%", (0.0, 100.0, 51.2),
            "Soil moisture percentage",
            &["soil moisture", "soil water", "ground moisture", "soil", "ground", "substrate"],
            &["رطوبت خاک", "نم خاک", "آب خاک", "خاک", "زمین"]),
        d("soil_ph", "pH", (0.0, 14.0, 6.7),
            "Soil pH level",
            &["soil ph", "soil acidity", "ph level"],
            &["پی اچ خاک", "اسیدیته خاک"]),
        d("soil_temperature", "°C", (-50.0, 70.0, 22.3),
            "Soil temperature readings",
            &["soil temperature", "ground temperature"],
            &["دمای خاک", "حرارت خاک"]),
        d("plant_height", "cm", (0.0, 1000.0, 20.0),
            "Plant height measurements",
            &["plant height", "plant growth", "height"],
            &["قد گیاه", "ارتفاع گیاه"]),
        d("fruit_count", "count", (0.0, 10000.0, 1.7),
            "Number of fruits per plant",
            &["fruit count", "fruit number", "fruits"],
            &["تعداد میوه", "شمار میوه"]),
        d("fruit_size", "cm", (0.0, 100.0, 1.2),
            "Fruit size measurements",
            &["fruit size", "fruit diameter"],
            &["اندازه میوه", "سایز میوه"]),
        d("nitrogen_level", "ppm", (0.0, 2000.0, 63.0),
            "Nitrogen level in soil",
            &["nitrogen", "n level", "nitrogen content"],
            &["نیتروژن", "ازت"]),
        d("phosphorus_level", "ppm", (0.0, 2000.0, 35.0),
            "Phosphorus level in soil",
            &["phosphorus", "p level", "phosphorus content"],
            &["فسفر"]),
        d("potassium_level", "ppm", (0.0, 2000.0, 95.6),
            "Potassium level in soil",
            &["potassium", "k level", "potassium content"],
            &["پتاسیم"]),
        d("pest_count", "count", (0.0, 100000.0, 1.4),
            "Number of pests detected",
            &["pest count", "pests", "pest", "insect", "insects"],
            &["تعداد آفت", "آفات", "آفت", "حشره", "حشرات"]),
        d("pest_detection", "binary", (0.0, 1.0, 0.02),
            "Pest detection status",
            &["pest detection", "pest identified"],
            &["تشخیص آفت", "شناسایی آفت"]),
        d("disease_risk", "%", (0.0, 100.0, 47.3),
            "Disease risk percentage",
            &["disease risk", "risk level", "disease probability"],
            &["خطر بیماری", "ریسک بیماری"]),
        d("water_usage", "L", (0.0, 100000.0, 4.3),
            "Water usage in liters",
            &["water usage", "water consumption", "irrigation", "watering", "water"],
            &["مصرف آب", "آبیاری", "ابیاری", "آب"]),
        d("water_efficiency", "%", (0.0, 100.0, 81.2),
            "Water usage efficiency",
            &["water efficiency", "water optimization"],
            &["بازدهی آب", "کارایی آب"]),
        d("yield_prediction", "kg", (0.0, 100000.0, 105.5),
            "Predicted crop yield",
            &["yield prediction", "crop yield", "predicted yield"],
            &["پیش بینی محصول", "تخمین محصول"]),
        d("yield_efficiency", "%", (0.0, 100.0, 86.4),
            "Crop yield efficiency",
            &["yield efficiency", "production efficiency"],
            &["بازدهی محصول", "کارایی محصول"]),
        d("motion", "count", (0.0, 100000.0, 0.5),
            "Motion/activity events detected",
            &["motion", "movement", "activity"],
            &["حرکت", "جنبش", "فعالیت"]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry() -> OntologyRegistry {
        let conn = Connection::open_in_memory().unwrap();
        OntologyRegistry::open(conn).unwrap()
    }

    #[test]
    fn exact_match_has_high_confidence() {
        let reg = test_registry();
        let (t, m, c) = reg.lookup_synonym("temperature", Locale::En).unwrap();
        assert_eq!(t, "temperature");
        assert_eq!(m.as_str(), "exact");
        assert!(c >= 0.9);
    }

    #[test]
    fn persian_exact_match() {
        let reg = test_registry();
        let (t, m, _) = reg.lookup_synonym("رطوبت", Locale::Fa).unwrap();
        assert_eq!(t, "humidity");
        assert_eq!(m.as_str(), "exact");
    }

    #[test]
    fn context_keyword_fallback() {
        let reg = test_registry();
        let (t, m, _) = reg.lookup_synonym("how is the soil doing", Locale::En).unwrap();
        assert_eq!(t, "soil_moisture");
        assert_eq!(m.as_str(), "context");
    }

    #[test]
    fn unknown_phrase_returns_none() {
        let reg = test_registry();
        assert!(reg.lookup_synonym("xyzxyz", Locale::En).is_none());
    }

    #[test]
    fn register_synonym_then_lookup() {
        let reg = test_registry();
        reg.register_synonym("thermo reading", "temperature", Locale::En).unwrap();
        let (t, _, _) = reg.lookup_synonym("thermo reading", Locale::En).unwrap();
        assert_eq!(t, "temperature");
    }

    #[test]
    fn find_mentions_detects_compound_entities_in_order() {
        let reg = test_registry();
        let hits = reg.find_mentions("compare humidity and temperature this week", Locale::En);
        assert_eq!(hits, vec!["humidity".to_string(), "temperature".to_string()]);
    }

    #[test]
    fn plausible_range_matches_humidity_bounds() {
        let reg = test_registry();
        let r = reg.plausible_range("humidity").unwrap();
        assert_eq!(r.min, 0.0);
        assert_eq!(r.max, 100.0);
    }
}
