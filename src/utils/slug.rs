// file: src/utils/slug.rs
// description: ascii slugs and normalized names for cities, regions and countries
// reference: https://docs.rs/deunicode

use deunicode::deunicode;

/// Lowercase ASCII slug with `-` separators.
pub fn slugify(value: &str) -> String {
    slugify_with(value, "-")
}

/// Transliterates to ASCII and drops punctuation while keeping words separated by spaces.
pub fn normalize_unicode_name(value: &str) -> String {
    slugify_with(value, " ")
}

pub fn slugify_with(value: &str, separator: &str) -> String {
    let ascii = deunicode(value).replace('\'', "").to_lowercase();

    ascii
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}
