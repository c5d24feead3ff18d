use rand::{Rng, distributions::Alphanumeric};

/// Uppercase alphanumeric string of `len` characters
fn random_segment(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect()
}

/// Referral code: up to three initials from the name followed by a random
/// segment, e.g. `NVA7K2QD`.
pub fn referral_code(full_name: &str) -> String {
    let initials: String = full_name
        .split_whitespace()
        .filter_map(|word| word.chars().find(|c| c.is_ascii_alphabetic()))
        .take(3)
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let prefix = if initials.is_empty() {
        "REF".to_string()
    } else {
        initials
    };
    format!("{}{}", prefix, random_segment(5))
}

pub fn voucher_code() -> String {
    format!("VC-{}", random_segment(8))
}
