//! `dagd.conf` loading.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use dagd_consensus::params::hash256_from_hex;
use dagd_consensus::{Checkpoint, Network, COIN};
use dagd_log::{Format, Level, LogConfig};

use crate::block_manager::BlockManagerConfig;
use crate::mempool::MempoolPolicy;

pub const DEFAULT_CONF_FILE_NAME: &str = "dagd.conf";
pub const DEFAULT_DATA_DIR: &str = "data";

const SUPPORTED_KEYS: &[&str] = &[
    "acceptnonstd",
    "addcheckpoint",
    "datadir",
    "limitfreerelay",
    "logformat",
    "loglevel",
    "logtimestamps",
    "maxfeemultiplier",
    "maxorphantx",
    "maxorphantxsize",
    "maxsigopspertx",
    "maxtxversion",
    "mempoolexpiry",
    "minrelaytxfee",
    "nocheckpoints",
    "norelaypriority",
    "orphanttl",
    "regtest",
    "testnet",
];

#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub network: Network,
    pub data_dir: PathBuf,
    pub log: LogConfig,
    pub mempool: MempoolPolicy,
    pub block_manager: BlockManagerConfig,
    /// Checkpoints added on top of the network's built-in list.
    pub extra_checkpoints: Vec<Checkpoint>,
    /// Keys present in the file that this node does not understand.
    pub unsupported_keys: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            log: LogConfig::default(),
            mempool: MempoolPolicy::default(),
            block_manager: BlockManagerConfig::default(),
            extra_checkpoints: Vec::new(),
            unsupported_keys: Vec::new(),
        }
    }
}

impl NodeConfig {
    /// Reads `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, String> {
        match load_conf(path)? {
            Some(conf) => {
                Self::from_conf(&conf).map_err(|err| format!("{err} in {}", path.display()))
            }
            None => Ok(Self::default()),
        }
    }

    /// Applies recognised keys; when a key repeats the last value wins.
    pub fn from_conf(conf: &HashMap<String, Vec<String>>) -> Result<Self, String> {
        let mut config = Self::default();
        let last = |key: &str| conf.get(key).and_then(|values| values.last());

        let testnet = match last("testnet") {
            Some(raw) => conf_bool("testnet", raw)?,
            None => false,
        };
        let regtest = match last("regtest") {
            Some(raw) => conf_bool("regtest", raw)?,
            None => false,
        };
        config.network = match (testnet, regtest) {
            (true, true) => return Err("testnet and regtest are mutually exclusive".to_string()),
            (true, false) => Network::Testnet,
            (false, true) => Network::Regtest,
            (false, false) => Network::Mainnet,
        };

        if let Some(raw) = last("datadir") {
            if raw.is_empty() {
                return Err("invalid datadir ''".to_string());
            }
            config.data_dir = PathBuf::from(raw);
        }

        if let Some(raw) = last("loglevel") {
            config.log.level =
                Level::parse(raw).ok_or_else(|| format!("invalid loglevel '{raw}'"))?;
        }
        if let Some(raw) = last("logformat") {
            config.log.format =
                Format::parse(raw).ok_or_else(|| format!("invalid logformat '{raw}'"))?;
        }
        if let Some(raw) = last("logtimestamps") {
            config.log.timestamps = conf_bool("logtimestamps", raw)?;
        }

        let policy = &mut config.mempool;
        if let Some(raw) = last("acceptnonstd") {
            policy.accept_non_standard = conf_bool("acceptnonstd", raw)?;
        }
        if let Some(raw) = last("maxtxversion") {
            policy.max_tx_version = parse_number("maxtxversion", raw)?;
            if policy.max_tx_version == 0 {
                return Err(format!("invalid maxtxversion '{raw}'"));
            }
        }
        if let Some(raw) = last("minrelaytxfee") {
            policy.min_relay_fee_per_kb = parse_fee_rate_per_kb(raw)
                .map_err(|err| format!("invalid minrelaytxfee '{raw}': {err}"))?;
        }
        if let Some(raw) = last("limitfreerelay") {
            let limit: f64 = parse_number("limitfreerelay", raw)?;
            if !limit.is_finite() || limit < 0.0 {
                return Err(format!("invalid limitfreerelay '{raw}'"));
            }
            policy.free_tx_relay_limit = limit;
        }
        if let Some(raw) = last("maxorphantx") {
            policy.max_orphan_txs = parse_number("maxorphantx", raw)?;
        }
        if let Some(raw) = last("maxorphantxsize") {
            policy.max_orphan_tx_size = parse_number("maxorphantxsize", raw)?;
        }
        if let Some(raw) = last("maxsigopspertx") {
            policy.max_sig_ops_per_tx = parse_number("maxsigopspertx", raw)?;
        }
        if let Some(raw) = last("maxfeemultiplier") {
            policy.max_fee_multiplier = parse_number("maxfeemultiplier", raw)?;
            if policy.max_fee_multiplier <= 0 {
                return Err(format!("invalid maxfeemultiplier '{raw}'"));
            }
        }
        if let Some(raw) = last("orphanttl") {
            policy.orphan_ttl_secs = parse_number("orphanttl", raw)?;
        }
        if let Some(raw) = last("norelaypriority") {
            policy.disable_relay_priority = conf_bool("norelaypriority", raw)?;
        }
        if let Some(raw) = last("mempoolexpiry") {
            let hours: u64 = parse_number("mempoolexpiry", raw)?;
            policy.mempool_expiry_secs = hours.saturating_mul(60 * 60);
        }

        if let Some(raw) = last("nocheckpoints") {
            config.block_manager.disable_checkpoints = conf_bool("nocheckpoints", raw)?;
        }
        if let Some(values) = conf.get("addcheckpoint") {
            for raw in values {
                config.extra_checkpoints.push(parse_checkpoint(raw)?);
            }
        }

        let mut unsupported: Vec<String> = conf
            .keys()
            .filter(|key| !SUPPORTED_KEYS.contains(&key.as_str()))
            .cloned()
            .collect();
        unsupported.sort();
        config.unsupported_keys = unsupported;
        Ok(config)
    }
}

/// Parses a `key=value` conf file. Returns `Ok(None)` when it does not exist.
pub fn load_conf(path: &Path) -> Result<Option<HashMap<String, Vec<String>>>, String> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.to_string()),
    };
    Ok(Some(parse_conf(&contents)))
}

pub fn parse_conf(contents: &str) -> HashMap<String, Vec<String>> {
    let mut out: HashMap<String, Vec<String>> = HashMap::new();
    for raw_line in contents.lines() {
        let mut line = raw_line.trim();
        if let Some(idx) = line.find(['#', ';']) {
            line = line[..idx].trim();
        }
        if line.is_empty() {
            continue;
        }
        let (key, value) = match line.split_once('=') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => (line, "1"),
        };
        if key.is_empty() {
            continue;
        }
        out.entry(key.to_ascii_lowercase())
            .or_default()
            .push(value.to_string());
    }
    out
}

pub fn parse_conf_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.is_empty() {
        return Some(true);
    }
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn conf_bool(key: &str, raw: &str) -> Result<bool, String> {
    parse_conf_bool(raw).ok_or_else(|| format!("invalid {key} value '{raw}'"))
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, String> {
    raw.parse::<T>()
        .map_err(|_| format!("invalid {key} '{raw}'"))
}

/// Atoms per kilobyte. A value with a decimal point is read in whole coins.
pub fn parse_fee_rate_per_kb(value: &str) -> Result<i64, String> {
    let value = value.trim();
    if value.starts_with('-') {
        return Err("fee rate must be >= 0".to_string());
    }
    let Some((whole, frac)) = value.split_once('.') else {
        return value
            .parse::<i64>()
            .map_err(|_| format!("invalid fee rate '{value}'"));
    };
    if (whole.is_empty() && frac.is_empty()) || frac.len() > 8 {
        return Err(format!("invalid fee rate '{value}'"));
    }
    let whole = if whole.is_empty() {
        0
    } else {
        whole
            .parse::<i64>()
            .map_err(|_| format!("invalid fee rate '{value}'"))?
    };
    let mut frac_atoms = 0i64;
    if !frac.is_empty() {
        if !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("invalid fee rate '{value}'"));
        }
        let padded = format!("{frac:0<8}");
        frac_atoms = padded
            .parse::<i64>()
            .map_err(|_| format!("invalid fee rate '{value}'"))?;
    }
    whole
        .checked_mul(COIN)
        .and_then(|atoms| atoms.checked_add(frac_atoms))
        .ok_or_else(|| "fee rate out of range".to_string())
}

/// `height:hash`, hash in display (byte-reversed) hex.
pub fn parse_checkpoint(raw: &str) -> Result<Checkpoint, String> {
    let (height, hash) = raw
        .split_once(':')
        .ok_or_else(|| format!("invalid addcheckpoint '{raw}': expected height:hash"))?;
    let height = height
        .trim()
        .parse::<u64>()
        .map_err(|_| format!("invalid addcheckpoint height '{height}'"))?;
    let hash = hash256_from_hex(hash.trim())
        .map_err(|err| format!("invalid addcheckpoint hash '{hash}': {err}"))?;
    Ok(Checkpoint { height, hash })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_conf_handles_comments_and_bare_keys() {
        let conf = parse_conf(
            "# node settings\n\
             testnet\n\
             MinRelayTxFee = 2000 ; inline\n\
             addcheckpoint=1:aa\n\
             addcheckpoint=2:bb\n\
             \n\
             =orphan\n",
        );
        assert_eq!(conf.get("testnet"), Some(&vec!["1".to_string()]));
        assert_eq!(conf.get("minrelaytxfee"), Some(&vec!["2000".to_string()]));
        assert_eq!(conf.get("addcheckpoint").map(Vec::len), Some(2));
        assert_eq!(conf.len(), 3);
    }

    #[test]
    fn conf_bool_values() {
        assert_eq!(parse_conf_bool(""), Some(true));
        assert_eq!(parse_conf_bool("Yes"), Some(true));
        assert_eq!(parse_conf_bool("0"), Some(false));
        assert_eq!(parse_conf_bool("maybe"), None);
    }

    #[test]
    fn fee_rates_accept_coins_and_atoms() {
        assert_eq!(parse_fee_rate_per_kb("10000"), Ok(10_000));
        assert_eq!(parse_fee_rate_per_kb("0.0001"), Ok(10_000));
        assert_eq!(parse_fee_rate_per_kb("1."), Ok(COIN));
        assert!(parse_fee_rate_per_kb("-1").is_err());
        assert!(parse_fee_rate_per_kb("0.000000001").is_err());
    }

    #[test]
    fn last_value_wins() {
        let conf = parse_conf("maxorphantx=5\nmaxorphantx=7\n");
        let config = NodeConfig::from_conf(&conf).expect("config");
        assert_eq!(config.mempool.max_orphan_txs, 7);
    }

    #[test]
    fn network_flags_conflict() {
        let conf = parse_conf("testnet=1\nregtest=1\n");
        assert!(NodeConfig::from_conf(&conf).is_err());
    }
}
