//! Standard script classification utilities.

/// Largest payload accepted in a standard null-data output.
pub const MAX_NULL_DATA_SIZE: usize = 80;

/// Largest number of keys a standard bare multisig output may name.
pub const MAX_STANDARD_MULTISIG_KEYS: u8 = 3;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScriptClass {
    P2Pk,
    P2Pkh,
    P2Sh,
    MultiSig,
    NullData,
    NonStandard,
}

impl ScriptClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ScriptClass::P2Pk => "pubkey",
            ScriptClass::P2Pkh => "pubkeyhash",
            ScriptClass::P2Sh => "scripthash",
            ScriptClass::MultiSig => "multisig",
            ScriptClass::NullData => "nulldata",
            ScriptClass::NonStandard => "nonstandard",
        }
    }
}

pub(crate) const OP_0: u8 = 0x00;
pub(crate) const OP_PUSHDATA1: u8 = 0x4c;
pub(crate) const OP_PUSHDATA2: u8 = 0x4d;
pub(crate) const OP_PUSHDATA4: u8 = 0x4e;
pub(crate) const OP_1NEGATE: u8 = 0x4f;
pub(crate) const OP_1: u8 = 0x51;
pub(crate) const OP_16: u8 = 0x60;
pub(crate) const OP_RETURN: u8 = 0x6a;
pub(crate) const OP_DUP: u8 = 0x76;
pub(crate) const OP_EQUAL: u8 = 0x87;
pub(crate) const OP_EQUALVERIFY: u8 = 0x88;
pub(crate) const OP_HASH160: u8 = 0xa9;
pub(crate) const OP_CHECKSIG: u8 = 0xac;
pub(crate) const OP_CHECKSIGVERIFY: u8 = 0xad;
pub(crate) const OP_CHECKMULTISIG: u8 = 0xae;
pub(crate) const OP_CHECKMULTISIGVERIFY: u8 = 0xaf;

/// One parsed script element: an opcode and, for pushes, the pushed bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Instruction<'a> {
    pub opcode: u8,
    pub data: Option<&'a [u8]>,
}

/// Walks a script opcode by opcode, yielding `Err(())` once on a truncated push.
pub(crate) struct Instructions<'a> {
    script: &'a [u8],
    cursor: usize,
    failed: bool,
}

impl<'a> Instructions<'a> {
    pub(crate) fn new(script: &'a [u8]) -> Self {
        Self {
            script,
            cursor: 0,
            failed: false,
        }
    }

    fn read_len(&mut self, width: usize) -> Option<usize> {
        let bytes = self.script.get(self.cursor..self.cursor.checked_add(width)?)?;
        self.cursor += width;
        let mut len = 0usize;
        for (shift, byte) in bytes.iter().enumerate() {
            len |= (*byte as usize) << (8 * shift);
        }
        Some(len)
    }
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Result<Instruction<'a>, ()>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.cursor >= self.script.len() {
            return None;
        }
        let opcode = self.script[self.cursor];
        self.cursor += 1;
        let len = match opcode {
            0x01..=0x4b => Some(opcode as usize),
            OP_PUSHDATA1 => self.read_len(1),
            OP_PUSHDATA2 => self.read_len(2),
            OP_PUSHDATA4 => self.read_len(4),
            _ => return Some(Ok(Instruction { opcode, data: None })),
        };
        let data = len.and_then(|len| {
            let end = self.cursor.checked_add(len)?;
            let data = self.script.get(self.cursor..end)?;
            self.cursor = end;
            Some(data)
        });
        match data {
            Some(data) => Some(Ok(Instruction {
                opcode,
                data: Some(data),
            })),
            None => {
                self.failed = true;
                Some(Err(()))
            }
        }
    }
}

pub(crate) fn decode_small_int(opcode: u8) -> Option<u8> {
    match opcode {
        OP_0 => Some(0),
        OP_1..=OP_16 => Some(opcode - OP_1 + 1),
        _ => None,
    }
}

pub fn classify_script_pubkey(script: &[u8]) -> ScriptClass {
    if is_p2pkh(script) {
        ScriptClass::P2Pkh
    } else if is_p2sh(script) {
        ScriptClass::P2Sh
    } else if is_p2pk(script) {
        ScriptClass::P2Pk
    } else if is_null_data(script) {
        ScriptClass::NullData
    } else if is_multisig(script) {
        ScriptClass::MultiSig
    } else {
        ScriptClass::NonStandard
    }
}

/// Scripts that can never be satisfied: an `OP_RETURN` prefix or a malformed push.
pub fn is_unspendable(script: &[u8]) -> bool {
    if script.first().copied() == Some(OP_RETURN) {
        return true;
    }
    Instructions::new(script).any(|item| item.is_err())
}

pub fn is_push_only(script: &[u8]) -> bool {
    parse_push_only_stack(script).is_some()
}

/// Evaluates a push-only script into its resulting stack; `None` if any
/// opcode is not a push.
pub fn parse_push_only_stack(script: &[u8]) -> Option<Vec<Vec<u8>>> {
    let mut stack = Vec::new();
    for item in Instructions::new(script) {
        let Instruction { opcode, data } = item.ok()?;
        match (opcode, data) {
            (_, Some(data)) => stack.push(data.to_vec()),
            (OP_0, None) => stack.push(Vec::new()),
            (OP_1NEGATE, None) => stack.push(vec![0x81]),
            (OP_1..=OP_16, None) => stack.push(vec![opcode - OP_1 + 1]),
            _ => return None,
        }
    }
    Some(stack)
}

fn is_p2pkh(script: &[u8]) -> bool {
    script.len() == 25
        && script[0] == OP_DUP
        && script[1] == OP_HASH160
        && script[2] == 0x14
        && script[23] == OP_EQUALVERIFY
        && script[24] == OP_CHECKSIG
}

pub(crate) fn is_p2sh(script: &[u8]) -> bool {
    script.len() == 23 && script[0] == OP_HASH160 && script[1] == 0x14 && script[22] == OP_EQUAL
}

fn is_p2pk(script: &[u8]) -> bool {
    match script.first().copied() {
        Some(len @ (33 | 65)) => {
            script.len() == len as usize + 2 && script[script.len() - 1] == OP_CHECKSIG
        }
        _ => false,
    }
}

fn is_null_data(script: &[u8]) -> bool {
    if script.first().copied() != Some(OP_RETURN) {
        return false;
    }
    if script.len() == 1 {
        return true;
    }
    let mut rest = Instructions::new(&script[1..]);
    match (rest.next(), rest.next()) {
        (Some(Ok(Instruction { opcode, data })), None) => match data {
            Some(data) => data.len() <= MAX_NULL_DATA_SIZE,
            None => decode_small_int(opcode).is_some(),
        },
        _ => false,
    }
}

fn is_multisig(script: &[u8]) -> bool {
    let Some(items) = Instructions::new(script).collect::<Result<Vec<_>, ()>>().ok() else {
        return false;
    };
    if items.len() < 4 {
        return false;
    }
    let last = items[items.len() - 1];
    if last.opcode != OP_CHECKMULTISIG || last.data.is_some() {
        return false;
    }
    let required = match decode_small_int(items[0].opcode).filter(|_| items[0].data.is_none()) {
        Some(value) => value,
        None => return false,
    };
    let total_item = items[items.len() - 2];
    let total = match decode_small_int(total_item.opcode).filter(|_| total_item.data.is_none()) {
        Some(value) => value,
        None => return false,
    };
    let keys = &items[1..items.len() - 2];
    if required == 0 || required > total || total > MAX_STANDARD_MULTISIG_KEYS {
        return false;
    }
    keys.len() == total as usize
        && keys
            .iter()
            .all(|key| matches!(key.data, Some(data) if data.len() == 33 || data.len() == 65))
}
