// Base58 codec used for addresses, signatures and exported keypairs
// Bytes are handled as one big-endian unsigned integer

use num_bigint::BigUint;
use num_traits::Zero;
use thiserror::Error;

const ALPHABET: &[u8; 58] = b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";
const BASE: u32 = 58;
// Character used for each leading zero byte
const LEADING_CHAR: char = '1';

pub const PUBLIC_KEY_SIZE: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Base58Error {
    #[error("Invalid base58 character '{}' at position {}", _0, _1)]
    InvalidCharacter(char, usize),
    #[error("Invalid decoded length: expected {} bytes, got {}", expected, got)]
    InvalidLength {
        expected: usize,
        got: usize
    }
}

// Position of the character in the alphabet, None if excluded (0, O, I, l...)
fn alphabet_index(c: char) -> Option<u32> {
    if !c.is_ascii() {
        return None
    }

    ALPHABET.iter()
        .position(|v| *v == c as u8)
        .map(|index| index as u32)
}

pub fn encode(bytes: &[u8]) -> String {
    let zeros = bytes.iter().take_while(|b| **b == 0).count();

    let base = BigUint::from(BASE);
    let mut value = BigUint::from_bytes_be(&bytes[zeros..]);
    // digits are produced least significant first
    let mut digits = Vec::new();
    while !value.is_zero() {
        let remainder = &value % &base;
        value /= &base;
        // remainder is below 58 so it holds in one digit, zero has none
        let index = remainder.iter_u32_digits().next().unwrap_or(0) as usize;
        digits.push(ALPHABET[index] as char);
    }

    let mut encoded = String::with_capacity(zeros + digits.len());
    encoded.extend(std::iter::repeat(LEADING_CHAR).take(zeros));
    encoded.extend(digits.into_iter().rev());
    encoded
}

pub fn decode(value: &str) -> Result<Vec<u8>, Base58Error> {
    let mut number = BigUint::zero();
    for (position, c) in value.chars().enumerate() {
        let index = alphabet_index(c).ok_or(Base58Error::InvalidCharacter(c, position))?;
        number = number * BASE + index;
    }

    let zeros = value.chars().take_while(|c| *c == LEADING_CHAR).count();
    let mut decoded = vec![0u8; zeros];
    if !number.is_zero() {
        decoded.extend(number.to_bytes_be());
    }

    Ok(decoded)
}

// Decode an address into its fixed width public key
pub fn decode_pubkey(address: &str) -> Result<[u8; PUBLIC_KEY_SIZE], Base58Error> {
    let decoded = decode(address)?;
    if decoded.is_empty() || decoded.len() > PUBLIC_KEY_SIZE {
        return Err(Base58Error::InvalidLength {
            expected: PUBLIC_KEY_SIZE,
            got: decoded.len()
        })
    }

    let mut key = [0u8; PUBLIC_KEY_SIZE];
    key[PUBLIC_KEY_SIZE - decoded.len()..].copy_from_slice(&decoded);
    Ok(key)
}

pub fn is_valid_address(address: &str) -> bool {
    decode_pubkey(address).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vectors() {
        assert_eq!(encode(b""), "");
        assert_eq!(encode(b"hello world"), "StV1DL6CwTryKyV");
        assert_eq!(encode(&[0, 0, 0, 1]), "1112");
        assert_eq!(decode("StV1DL6CwTryKyV").unwrap(), b"hello world");
        // System program id is 32 zero bytes
        assert_eq!(encode(&[0u8; 32]), "11111111111111111111111111111111");
    }

    #[test]
    fn test_leading_zero_bytes() {
        for bytes in [vec![0u8], vec![0, 0], vec![0, 0, 255], vec![0, 1, 0], vec![0u8; 32]] {
            let encoded = encode(&bytes);
            let zeros = bytes.iter().take_while(|b| **b == 0).count();
            assert!(encoded.starts_with(&"1".repeat(zeros)));
            assert_eq!(decode(&encoded).unwrap(), bytes);
        }
    }

    #[test]
    fn test_round_trip_matches_reference() {
        let samples: Vec<Vec<u8>> = vec![
            vec![1],
            vec![57],
            vec![58],
            vec![255; 32],
            (0u8..64).collect(),
            [vec![0, 0], (1u8..40).rev().collect()].concat()
        ];

        for bytes in samples {
            let encoded = encode(&bytes);
            assert_eq!(encoded, bs58::encode(&bytes).into_string());
            assert_eq!(decode(&encoded).unwrap(), bytes);
        }
    }

    #[test]
    fn test_invalid_characters() {
        for (input, c, position) in [("0abc", '0', 0), ("abO", 'O', 2), ("1I", 'I', 1), ("xyzl", 'l', 3), ("ab é", ' ', 2)] {
            assert_eq!(decode(input), Err(Base58Error::InvalidCharacter(c, position)));
        }
    }

    #[test]
    fn test_decode_pubkey() {
        let key = [7u8; 32];
        let address = encode(&key);
        assert_eq!(decode_pubkey(&address).unwrap(), key);
        assert!(is_valid_address(&address));

        let mut with_zero = [9u8; 32];
        with_zero[0] = 0;
        assert_eq!(decode_pubkey(&encode(&with_zero)).unwrap(), with_zero);

        assert_eq!(decode_pubkey(""), Err(Base58Error::InvalidLength { expected: 32, got: 0 }));
        assert!(matches!(decode_pubkey(&encode(&[1u8; 33])), Err(Base58Error::InvalidLength { got: 33, .. })));
    }
}
