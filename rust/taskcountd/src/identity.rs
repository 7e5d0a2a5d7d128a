use regex::Regex;
use std::sync::OnceLock;

/// Width the roster's registration number is padded to before slicing.
const RA_WIDTH: usize = 9;

/// Fixed suffix of the task platform's student identifier.
const KEY_SUFFIX: &str = "-sp";

/// Rebuilds the task platform's identifier from the roster's RA fields.
///
/// The platform writes the RA without its leading digit, followed by the check
/// digit and "-sp": RA 123456789 / check "X" becomes "23456789x-sp". The slice
/// is a format contract with that system; do not normalise it further.
pub fn canonical_key_from_roster(registration_number: u64, check_digit: &str) -> String {
    let ra = format!("{:0width$}", registration_number, width = RA_WIDTH);
    let mut key = String::with_capacity(ra.len() + check_digit.len() + KEY_SUFFIX.len());
    key.push_str(&ra[1..2]);
    key.push_str(&ra[2..]);
    key.push_str(check_digit.trim());
    key.push_str(KEY_SUFFIX);
    key.to_lowercase()
}

fn candidate_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+.*").expect("static pattern"))
}

/// Pulls a candidate key out of a free-text "Aluno" cell.
///
/// Everything from the first digit to the end of the line is kept, trailing
/// noise included. Keys are compared with exact equality, so that noise makes
/// a row miss rather than collide with another student.
pub fn candidate_key_from_label(raw_label: Option<&str>) -> Option<String> {
    let lower = raw_label?.to_lowercase();
    candidate_re().find(&lower).map(|m| m.as_str().to_string())
}
