//! Fuzzy "did you mean" matching for filters, functions and engine names

/// Maximum Levenshtein distance to consider for suggestions
const MAX_SUGGESTION_DISTANCE: usize = 2;

/// Filters registered by the Jinja engines, plus the MiniJinja builtins people reach for
pub const AVAILABLE_FILTERS: &[&str] = &[
    "toyaml",
    "tojson",
    "b64encode",
    "b64decode",
    "quote",
    "squote",
    "nindent",
    "indent",
    "required",
    "empty",
    "sha256",
    "trunc",
    "trimprefix",
    "trimsuffix",
    "semver_match",
    "default",
    "upper",
    "lower",
    "replace",
    "trim",
    "join",
    "length",
    "items",
    "int",
    "string",
];

/// Functions registered by the Jinja engines
pub const AVAILABLE_FUNCTIONS: &[&str] = &[
    "fail", "dict", "list", "get", "coalesce", "ternary", "tostring", "range",
];

/// Closest candidate to `input`, if any is within suggestion distance
pub fn closest_match<'a, I>(input: &str, candidates: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    candidates
        .into_iter()
        .map(|candidate| (strsim::levenshtein(input, candidate), candidate))
        .filter(|(distance, _)| *distance > 0 && *distance <= MAX_SUGGESTION_DISTANCE)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, candidate)| candidate)
}

/// Scan an error message for a word that is a near-miss of a known name
fn near_miss<'a>(message: &str, candidates: &[&'a str]) -> Option<&'a str> {
    message
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|word| word.len() > 2 && !candidates.contains(word))
        .find_map(|word| closest_match(word, candidates.iter().copied()))
}

pub fn suggest_unknown_filter(message: &str) -> Option<String> {
    Some(match near_miss(message, AVAILABLE_FILTERS) {
        Some(found) => format!("Did you mean `{}`?", found),
        None => "Common filters: toyaml, tojson, b64encode, quote, default, nindent".to_string(),
    })
}

pub fn suggest_unknown_function(message: &str) -> Option<String> {
    Some(match near_miss(message, AVAILABLE_FUNCTIONS) {
        Some(found) => format!("Did you mean `{}`?", found),
        None => format!("Available functions: {}", AVAILABLE_FUNCTIONS.join(", ")),
    })
}
