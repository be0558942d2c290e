use dagd_script::standard::{
    classify_script_pubkey, is_push_only, is_unspendable, parse_push_only_stack, ScriptClass,
    MAX_NULL_DATA_SIZE,
};

fn p2pkh() -> Vec<u8> {
    let mut script = vec![0x76, 0xa9, 0x14];
    script.extend_from_slice(&[0x11; 20]);
    script.extend_from_slice(&[0x88, 0xac]);
    script
}

#[test]
fn classify_p2pkh() {
    assert_eq!(classify_script_pubkey(&p2pkh()), ScriptClass::P2Pkh);
}

#[test]
fn classify_p2sh() {
    let mut script = vec![0xa9, 0x14];
    script.extend_from_slice(&[0x22; 20]);
    script.push(0x87);
    assert_eq!(classify_script_pubkey(&script), ScriptClass::P2Sh);
}

#[test]
fn classify_p2pk() {
    let mut script = vec![33];
    script.extend_from_slice(&[0x02; 33]);
    script.push(0xac);
    assert_eq!(classify_script_pubkey(&script), ScriptClass::P2Pk);
}

#[test]
fn classify_bare_multisig() {
    let mut script = vec![0x51];
    for _ in 0..2 {
        script.push(33);
        script.extend_from_slice(&[0x03; 33]);
    }
    script.extend_from_slice(&[0x52, 0xae]);
    assert_eq!(classify_script_pubkey(&script), ScriptClass::MultiSig);

    // m greater than n
    script[0] = 0x53;
    assert_eq!(classify_script_pubkey(&script), ScriptClass::NonStandard);
}

#[test]
fn null_data_is_capped() {
    let mut direct = vec![0x6a, 0x4b];
    direct.extend_from_slice(&[0xee; 0x4b]);
    assert_eq!(classify_script_pubkey(&direct), ScriptClass::NullData);

    let mut script = vec![0x6a, 0x4c, MAX_NULL_DATA_SIZE as u8];
    script.extend_from_slice(&[0xee; MAX_NULL_DATA_SIZE]);
    assert_eq!(classify_script_pubkey(&script), ScriptClass::NullData);

    let mut too_big = vec![0x6a, 0x4c, (MAX_NULL_DATA_SIZE + 1) as u8];
    too_big.extend_from_slice(&[0xee; MAX_NULL_DATA_SIZE + 1]);
    assert_eq!(classify_script_pubkey(&too_big), ScriptClass::NonStandard);

    assert_eq!(classify_script_pubkey(&[0x6a]), ScriptClass::NullData);
    assert_eq!(classify_script_pubkey(&[0x6a, 0xac]), ScriptClass::NonStandard);
}

#[test]
fn unspendable_scripts() {
    assert!(is_unspendable(&[0x6a, 0x01, 0x01]));
    assert!(is_unspendable(&[0x05, 0x01]));
    assert!(!is_unspendable(&p2pkh()));
}

#[test]
fn push_only_stack() {
    let script = [0x00, 0x02, 0xaa, 0xbb, 0x4f, 0x53];
    let stack = parse_push_only_stack(&script).expect("push only");
    assert_eq!(
        stack,
        vec![vec![], vec![0xaa, 0xbb], vec![0x81], vec![0x03]]
    );
    assert!(!is_push_only(&[0x01, 0xaa, 0xac]));
    assert!(!is_push_only(&[0x4c]));
}
