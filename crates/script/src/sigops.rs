//! Signature operation counting.

use crate::standard::{
    decode_small_int, Instructions, OP_CHECKMULTISIG, OP_CHECKMULTISIGVERIFY, OP_CHECKSIG,
    OP_CHECKSIGVERIFY,
};
use crate::standard::{is_p2sh, parse_push_only_stack};

/// Sigops charged for a multisig whose key count is not known.
pub const MAX_PUBKEYS_PER_MULTISIG: u32 = 20;

/// Counts signature operations in `script`.
///
/// With `accurate`, a multisig preceded by a small-int opcode is charged that
/// many keys instead of the worst case. Counting stops at a malformed push,
/// keeping whatever was counted up to that point.
pub fn count_sigops(script: &[u8], accurate: bool) -> u32 {
    let mut count = 0u32;
    let mut last_opcode = None;
    for item in Instructions::new(script) {
        let Ok(instruction) = item else {
            break;
        };
        match instruction.opcode {
            OP_CHECKSIG | OP_CHECKSIGVERIFY => count = count.saturating_add(1),
            OP_CHECKMULTISIG | OP_CHECKMULTISIGVERIFY => {
                let keys = match last_opcode.and_then(decode_small_int) {
                    Some(keys) if accurate && keys > 0 => u32::from(keys),
                    _ => MAX_PUBKEYS_PER_MULTISIG,
                };
                count = count.saturating_add(keys);
            }
            _ => {}
        }
        last_opcode = if instruction.data.is_none() {
            Some(instruction.opcode)
        } else {
            None
        };
    }
    count
}

/// Sigops of the redeem script carried as the last push of a p2sh spend.
///
/// Returns 0 when `prev_script` is not p2sh or `script_sig` is not push-only.
pub fn p2sh_sigops(prev_script: &[u8], script_sig: &[u8]) -> u32 {
    if !is_p2sh(prev_script) {
        return 0;
    }
    match parse_push_only_stack(script_sig) {
        Some(stack) => stack
            .last()
            .map(|redeem| count_sigops(redeem, true))
            .unwrap_or(0),
        None => 0,
    }
}
