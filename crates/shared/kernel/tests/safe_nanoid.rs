use evbus_kernel::SAFE_ALPHABET;
use evbus_kernel::safe_nanoid;

#[test]
fn generates_expected_length_and_charset() {
    let id = safe_nanoid!();
    assert_eq!(id.len(), 12);

    for ch in id.chars() {
        assert!(SAFE_ALPHABET.contains(&ch), "unexpected character in nanoid: {ch}");
    }
}

#[test]
fn custom_length_for_consumer_names() {
    let id = safe_nanoid!(8);
    assert_eq!(id.len(), 8);
    assert!(!id.contains(['0', '1', 'I', 'O', 'l']));
}
