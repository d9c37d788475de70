use crate::config::{COIN_DECIMALS, COIN_SYMBOL};

// Format any coin value using the requested decimals count
// Integer arithmetic only, a lamport amount must never be rounded for display
pub fn format_coin(value: u64, decimals: u8) -> String {
    if decimals == 0 {
        return value.to_string()
    }

    let scale = 10u64.pow(decimals as u32);
    format!("{}.{:0width$}", value / scale, value % scale, width = decimals as usize)
}

// Format lamports using SOL decimals
pub fn format_sol(value: u64) -> String {
    format_coin(value, COIN_DECIMALS)
}

// Format a signed lamports delta, always showing its sign
pub fn format_signed_sol(value: i64) -> String {
    let sign = if value < 0 { "-" } else { "+" };
    format!("{}{}", sign, format_sol(value.unsigned_abs()))
}

// Format lamports with the coin symbol appended
pub fn format_sol_with_symbol(value: u64) -> String {
    format!("{} {}", format_sol(value), COIN_SYMBOL)
}

// Convert a SOL amount from string to lamports
pub fn from_sol(value: impl Into<String>) -> Option<u64> {
    from_coin(value, COIN_DECIMALS)
}

// Convert a coin amount from string to a u64 based on the provided decimals
// Returns None on malformed input, too many decimals or overflow
pub fn from_coin(value: impl Into<String>, coin_decimals: u8) -> Option<u64> {
    let value = value.into();
    let mut split = value.trim().split('.');
    let left = split.next()?;
    let right_part = split.next().unwrap_or("0");
    if split.next().is_some() || right_part.len() > coin_decimals as usize {
        return None
    }

    if !left.chars().all(|c| c.is_ascii_digit()) || !right_part.chars().all(|c| c.is_ascii_digit()) {
        return None
    }

    let value: u64 = if left.is_empty() { 0 } else { left.parse::<u64>().ok()? };
    let decimals: String = right_part.chars().chain(std::iter::repeat('0')).take(coin_decimals as usize).collect();
    let decimals_value = if decimals.is_empty() { 0 } else { decimals.parse::<u64>().ok()? };
    value.checked_mul(10u64.pow(coin_decimals as u32))?.checked_add(decimals_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LAMPORTS_PER_SOL;

    #[test]
    fn test_format_sol() {
        assert_eq!(format_sol(0), "0.000000000");
        assert_eq!(format_sol(1), "0.000000001");
        assert_eq!(format_sol(1_500_000_000), "1.500000000");
        assert_eq!(format_signed_sol(-20), "-0.000000020");
        assert_eq!(format_signed_sol(20), "+0.000000020");
    }

    #[test]
    fn test_from_sol() {
        assert_eq!(from_sol("1"), Some(LAMPORTS_PER_SOL));
        assert_eq!(from_sol("0.5"), Some(500_000_000));
        assert_eq!(from_sol(".000000001"), Some(1));
        assert_eq!(from_sol("0.0000000001"), None);
        assert_eq!(from_sol("1.2.3"), None);
        assert_eq!(from_sol("-1"), None);
        assert_eq!(from_sol("abc"), None);
        assert_eq!(from_sol("99999999999999999999"), None);
    }

    #[test]
    fn test_format_coin_without_decimals() {
        assert_eq!(format_coin(42, 0), "42");
    }
}
