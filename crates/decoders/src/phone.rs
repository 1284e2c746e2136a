//! E.164 phone normalisation.

/// Normalise a storefront phone number to E.164 (`+` followed by 8-15 digits).
///
/// Spaces, dashes, dots and parentheses are dropped and a leading `00`
/// international prefix becomes `+`. Numbers without a country code (a
/// leading trunk `0`) cannot be converted and yield `None`.
pub fn normalize_e164(raw: &str) -> Option<String> {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '.' | '(' | ')'))
        .collect();

    let digits = if let Some(rest) = compact.strip_prefix('+') {
        rest
    } else if let Some(rest) = compact.strip_prefix("00") {
        rest
    } else if compact.starts_with('0') {
        return None;
    } else {
        compact.as_str()
    };

    if !(8..=15).contains(&digits.len())
        || !digits.chars().all(|c| c.is_ascii_digit())
        || digits.starts_with('0')
    {
        return None;
    }

    Some(format!("+{}", digits))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_e164() {
        assert_eq!(normalize_e164("+923001234567").as_deref(), Some("+923001234567"));
    }

    #[test]
    fn test_strips_formatting() {
        assert_eq!(
            normalize_e164(" +92 (300) 123-4567 ").as_deref(),
            Some("+923001234567")
        );
    }

    #[test]
    fn test_international_prefix() {
        assert_eq!(normalize_e164("00923001234567").as_deref(), Some("+923001234567"));
    }

    #[test]
    fn test_missing_country_code_rejected() {
        assert_eq!(normalize_e164("03001234567"), None);
    }

    #[test]
    fn test_garbage_rejected() {
        assert_eq!(normalize_e164("call me"), None);
        assert_eq!(normalize_e164("+12"), None);
        assert_eq!(normalize_e164(""), None);
    }
}
