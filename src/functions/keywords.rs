//! Keyword fallback for function resolution.

/// Keyword stems and the catalog codes they stand for, checked in order.
pub const KEYWORD_CODES: &[(&str, &[i64])] = &[
    ("wohn", &[1000, 1010, 1020, 1100]),
    ("büro", &[2000, 2010]),
    ("industrie", &[2500, 2510]),
    ("schule", &[3000, 3010]),
    ("kirche", &[3200]),
    ("krankenhaus", &[3100]),
    ("hotel", &[2100]),
    ("geschäft", &[2300]),
    ("landwirtschaft", &[2700]),
];

/// Codes whose keyword stem occurs in `text`, case-insensitively.
///
/// Each code appears once, paired with the first keyword that produced it.
pub fn keyword_codes(text: &str) -> Vec<(&'static str, i64)> {
    let lowered = text.to_lowercase();
    let mut matches: Vec<(&'static str, i64)> = Vec::new();

    for (keyword, codes) in KEYWORD_CODES {
        if !lowered.contains(keyword) {
            continue;
        }
        for code in *codes {
            if !matches.iter().any(|(_, c)| c == code) {
                matches.push((*keyword, *code));
            }
        }
    }

    matches
}
