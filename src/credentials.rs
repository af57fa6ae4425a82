use sha2::{Digest, Sha256};
use uuid::Uuid;

fn digest_hex(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Stored form: `<salt>$<hex sha256(salt || password)>`.
pub fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    let digest = digest_hex(&salt, password);
    format!("{salt}${digest}")
}

pub fn verify_password(stored: &str, candidate: &str) -> bool {
    let Some((salt, expected)) = stored.split_once('$') else {
        return false;
    };
    let actual = digest_hex(salt, candidate);
    if actual.len() != expected.len() {
        return false;
    }
    actual
        .bytes()
        .zip(expected.bytes())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_verifies_and_is_salted() {
        let a = hash_password("pass");
        let b = hash_password("pass");
        assert_ne!(a, b);
        assert!(verify_password(&a, "pass"));
        assert!(!verify_password(&a, "Pass"));
        assert!(!verify_password("garbage", "pass"));
    }
}
