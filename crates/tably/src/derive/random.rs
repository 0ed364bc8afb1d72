use rand::Rng;

const TEXT_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

/// A random digit string of `digits` length (no leading-zero trimming),
/// prefixed when a prefix is configured.
pub fn number(prefix: &str, digits: usize) -> String {
    let mut rng = rand::thread_rng();
    let mut out = String::with_capacity(prefix.len() + digits);
    out.push_str(prefix);
    for _ in 0..digits.max(1) {
        out.push(char::from(b'0' + rng.gen_range(0..10)));
    }
    out
}

/// A random alphanumeric string of `length`, prefixed when configured.
pub fn text(prefix: &str, length: usize) -> String {
    let mut rng = rand::thread_rng();
    let mut out = String::with_capacity(prefix.len() + length);
    out.push_str(prefix);
    for _ in 0..length.max(1) {
        out.push(char::from(TEXT_ALPHABET[rng.gen_range(0..TEXT_ALPHABET.len())]));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_has_prefix_and_width() {
        let value = number("INV-", 6);
        assert!(value.starts_with("INV-"));
        assert_eq!(value.len(), 10);
        assert!(value["INV-".len()..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn text_is_alphanumeric() {
        let value = text("", 12);
        assert_eq!(value.len(), 12);
        assert!(value.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn zero_width_still_produces_a_character() {
        assert_eq!(number("", 0).len(), 1);
        assert_eq!(text("", 0).len(), 1);
    }
}
