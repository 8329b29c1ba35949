//! Recipient roster parsing and validation.
//!
//! Rosters come from repeated `--to` flags or from a file of numbers
//! separated by newlines and/or commas (a bare CSV export works).

/// Tokens that show up as column headers in exported contact lists.
const HEADER_TOKENS: &[&str] = &["phone", "phones", "number", "numbers"];

/// Recipients shorter than this cannot be a country code plus a subscriber
/// number (the `+` counts toward the length).
pub const MIN_NUMBER_LEN: usize = 10;

/// Split raw roster text into candidate phone numbers.
///
/// Splits on newlines and commas, strips all interior whitespace from each
/// entry (`+49 170 1234567` becomes `+491701234567`), and drops empties and
/// obvious header tokens.
pub fn parse(input: &str) -> Vec<String> {
    input
        .split(['\n', ','])
        .map(|entry| entry.split_whitespace().collect::<String>())
        .filter(|number| {
            !number.is_empty() && !HEADER_TOKENS.contains(&number.to_ascii_lowercase().as_str())
        })
        .collect()
}

/// A number is sendable when it is in international format and long enough
/// to hold a country code.
pub fn is_valid_number(number: &str) -> bool {
    number.starts_with('+') && number.len() >= MIN_NUMBER_LEN
}

/// Return every roster entry that fails [`is_valid_number`], preserving
/// roster order so errors can name the offenders.
pub fn invalid_numbers(numbers: &[String]) -> Vec<String> {
    numbers
        .iter()
        .filter(|number| !is_valid_number(number))
        .cloned()
        .collect()
}
