//! Language detection, §4.5. Ratio-based over the Arabic/Persian Unicode
//! block vs. ASCII letters, with a short domain-keyword tiebreak.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lang {
    En,
    Fa,
}

impl Lang {
    pub fn as_str(&self) -> &'static str {
        match self {
            Lang::En => "en",
            Lang::Fa => "fa",
        }
    }
}

const PERSIAN_DOMAIN_KEYWORDS: &[&str] = &["دما", "رطوبت", "خاک", "آب", "هشدار", "میانگین", "مقایسه"];

fn is_persian_block(c: char) -> bool {
    ('\u{0600}'..='\u{06FF}').contains(&c)
}

pub fn detect(query: &str) -> Lang {
    let persian_count = query.chars().filter(|c| is_persian_block(*c)).count();
    let ascii_count = query.chars().filter(|c| c.is_ascii_alphabetic()).count();
    let total_letters = persian_count + ascii_count;

    if total_letters == 0 {
        return Lang::En;
    }

    let persian_ratio = persian_count as f64 / total_letters as f64;
    let english_ratio = ascii_count as f64 / total_letters as f64;

    if persian_ratio > 0.4 {
        return Lang::Fa;
    }
    if english_ratio > 0.6 {
        return Lang::En;
    }

    if PERSIAN_DOMAIN_KEYWORDS.iter().any(|kw| query.contains(kw)) {
        return Lang::Fa;
    }
    Lang::En
}
