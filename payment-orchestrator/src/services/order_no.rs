use chrono::Utc;
use rand::Rng;

/// `YYYYMMDDHHMMSS` (UTC) followed by six random digits.
///
/// Uniqueness is enforced by the order store; callers retry on collision.
pub fn generate_order_no() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{}{:06}", Utc::now().format("%Y%m%d%H%M%S"), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_numbers_are_twenty_digits() {
        let no = generate_order_no();
        assert_eq!(no.len(), 20);
        assert!(no.chars().all(|c| c.is_ascii_digit()));
    }
}
