#[path = "../src/identity.rs"]
mod identity;

use identity::{candidate_key_from_label, canonical_key_from_roster};

#[test]
fn platform_labels_meet_roster_keys() {
    let cases = [
        (123456789u64, "X", "Aluno 23456789x-sp"),
        (111222333, "4", "BRUNO 112223334-SP"),
        (98765, "1", "carla 000987651-sp"),
        (987654321, " 7 ", "Joao da Silva 876543217-sp"),
    ];
    for (ra, dig, label) in cases {
        assert_eq!(
            candidate_key_from_label(Some(label)),
            Some(canonical_key_from_roster(ra, dig)),
            "label {:?} vs RA {} / {:?}",
            label,
            ra,
            dig
        );
    }
}

#[test]
fn trailing_noise_keeps_a_label_from_matching() {
    let key = canonical_key_from_roster(123456789, "X");
    let noisy = candidate_key_from_label(Some("Aluno 123456789x-sp extra"));
    assert_eq!(noisy.as_deref(), Some("123456789x-sp extra"));
    assert_ne!(noisy, Some(key));
}

#[test]
fn labels_without_digits_have_no_key() {
    assert_eq!(candidate_key_from_label(Some("sem chave")), None);
    assert_eq!(candidate_key_from_label(None), None);
}
