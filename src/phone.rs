use crate::consts::COUNTRY_CODE;

/// Canonicalize a raw counterparty number into `+55…` form.
///
/// Total function: strips non-digits, drops one domestic trunk `0`, prepends
/// the agent's DDD when the number is a bare 8/9-digit subscriber number,
/// and guarantees the country code.  An input with no digits yields the
/// empty string, which downstream treats as a resolution failure.
pub fn normalize_phone(raw: &str, default_ddd: Option<&str>) -> String {
    let mut digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return String::new();
    }
    if digits.starts_with('0') {
        digits.remove(0);
    }
    if matches!(digits.len(), 8 | 9) {
        if let Some(ddd) = default_ddd {
            digits.insert_str(0, ddd);
        }
    }
    if !digits.starts_with(COUNTRY_CODE) {
        digits.insert_str(0, COUNTRY_CODE);
    }
    format!("+{digits}")
}
