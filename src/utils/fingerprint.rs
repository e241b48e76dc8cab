/// Order fingerprints, idempotency keys and archive checksums
use sha2::{Digest, Sha256};

use crate::types::Side;

/// Deterministic key over arbitrary components
pub fn generate_idempotency_key(components: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for component in components {
        hasher.update(component.as_bytes());
        hasher.update(b"|");
    }
    let result = hasher.finalize();
    format!("{:x}", result)
}

/// Fingerprint for duplicate / self-cross detection. Prices are bucketed
/// to the 0.05 tick so two immediately-repeated orders at noise-level
/// price differences collide.
pub fn order_fingerprint(
    symbol: &str,
    side: Side,
    quantity: i64,
    price: f64,
    client_id: &str,
) -> String {
    let price_bucket = (price / 0.05).round() as i64;
    generate_idempotency_key(&[
        symbol,
        side.as_str(),
        &quantity.to_string(),
        &price_bucket.to_string(),
        client_id,
    ])
}

/// 64-bit archive checksum: SHA-256 over the concatenated trade ids,
/// truncated to the first eight bytes
pub fn trade_checksum(trade_ids: &[String]) -> u64 {
    let mut hasher = Sha256::new();
    for id in trade_ids {
        hasher.update(id.as_bytes());
    }
    let digest = hasher.finalize();
    u64::from_be_bytes(digest[..8].try_into().expect("digest is at least 8 bytes"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_key_deterministic() {
        let key1 = generate_idempotency_key(&["session1", "NIFTY", "CE", "24500"]);
        let key2 = generate_idempotency_key(&["session1", "NIFTY", "CE", "24500"]);
        let key3 = generate_idempotency_key(&["session1", "NIFTY", "PE", "24500"]);

        assert_eq!(key1, key2);
        assert_ne!(key1, key3);
    }

    #[test]
    fn test_fingerprint_buckets_price() {
        let a = order_fingerprint("NIFTY24OCT24500CE", Side::Buy, 75, 100.00, "client-1");
        let b = order_fingerprint("NIFTY24OCT24500CE", Side::Buy, 75, 100.01, "client-1");
        let c = order_fingerprint("NIFTY24OCT24500CE", Side::Buy, 75, 100.40, "client-1");

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_trade_checksum_order_sensitive() {
        let ids = vec!["2026-01-05-paper-0001".to_string(), "2026-01-05-paper-0002".to_string()];
        let mut reversed = ids.clone();
        reversed.reverse();

        assert_eq!(trade_checksum(&ids), trade_checksum(&ids.clone()));
        assert_ne!(trade_checksum(&ids), trade_checksum(&reversed));
    }
}
