//! Standard script classification and signature-operation counting.

pub mod sigops;
pub mod standard;

pub use sigops::{count_sigops, p2sh_sigops};
pub use standard::{
    classify_script_pubkey, is_push_only, is_unspendable, parse_push_only_stack, ScriptClass,
    MAX_NULL_DATA_SIZE,
};
