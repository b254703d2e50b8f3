use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io;
use std::path::Path;

use super::{ErrorKind, Result, ResultExt};

/// Out-of-band controller coordinates for one machine
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Bmc {
    pub ip: String,
    pub username: String,
    pub password: String,
}

/// One bare metal machine in the inventory
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Hardware {
    pub hostname: String,
    pub mac: String,
    pub ip_address: String,
    pub gateway: String,
    pub netmask: String,
    #[serde(default)]
    pub nameservers: Vec<String>,
    pub disk: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bmc: Option<Bmc>,
}

impl Hardware {
    /// Subset match: every selector pair must be present in the labels
    pub fn matches(&self, selector: &BTreeMap<String, String>) -> bool {
        if selector.is_empty() {
            return false;
        }
        selector.iter().all(|(k, v)| self.labels.get(k) == Some(v))
    }
}

/// Csv row shape; the header is part of the external contract
#[derive(Deserialize, Debug)]
struct HardwareRow {
    hostname: String,
    bmc_ip: String,
    bmc_username: String,
    bmc_password: String,
    mac: String,
    ip_address: String,
    gateway: String,
    nameservers: String,
    netmask: String,
    disk: String,
    labels: String,
}

/// Parse `k=v;k2=v2` label strings
pub fn parse_labels(raw: &str) -> Result<BTreeMap<String, String>> {
    let mut labels = BTreeMap::new();
    if raw.trim().is_empty() {
        return Ok(labels);
    }
    for pair in raw.split(';') {
        let mut kv = pair.splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some(k), Some(v)) if !k.trim().is_empty() => {
                labels.insert(k.trim().to_string(), v.trim().to_string());
            }
            _ => return Err(ErrorKind::InvalidHardwareLabels(raw.to_string()).into()),
        }
    }
    Ok(labels)
}

impl From<HardwareRow> for Hardware {
    fn from(row: HardwareRow) -> Hardware {
        let bmc = if row.bmc_ip.is_empty() {
            None
        } else {
            Some(Bmc {
                ip: row.bmc_ip,
                username: row.bmc_username,
                password: row.bmc_password,
            })
        };
        Hardware {
            hostname: row.hostname,
            mac: row.mac.to_lowercase(),
            ip_address: row.ip_address,
            gateway: row.gateway,
            netmask: row.netmask,
            nameservers: row
                .nameservers
                .split('|')
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            disk: row.disk,
            labels: BTreeMap::new(), // filled by the caller after label parse
            bmc,
        }
    }
}

/// The selector-indexed hardware inventory
///
/// Rebuilt from scratch at the start of every reconciliation; holds no state
/// across reconciles.
#[derive(Debug, Clone, Default)]
pub struct Catalogue {
    records: Vec<Hardware>,
}

impl Catalogue {
    /// Ingest a csv inventory, rejecting duplicate mac addresses
    pub fn from_csv_file(path: &Path) -> Result<Catalogue> {
        let f = File::open(path).chain_err(|| format!("opening hardware csv {}", path.display()))?;
        Self::from_csv_reader(f)
    }

    pub fn from_csv_reader<R: io::Read>(reader: R) -> Result<Catalogue> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut records = vec![];
        for row in rdr.deserialize() {
            let row: HardwareRow = row?;
            let labels = parse_labels(&row.labels)?;
            let mut hw: Hardware = row.into();
            hw.labels = labels;
            records.push(hw);
        }
        Self::from_records(records)
    }

    /// Build from already-typed records (e.g. listed from a cluster)
    pub fn from_records(records: Vec<Hardware>) -> Result<Catalogue> {
        let mut seen = BTreeSet::new();
        for hw in &records {
            if !seen.insert(hw.mac.clone()) {
                return Err(ErrorKind::DuplicateHardware(hw.mac.clone()).into());
            }
        }
        info!("hardware catalogue built with {} machines", records.len());
        Ok(Catalogue { records })
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[Hardware] {
        &self.records
    }

    /// All machines matching a selector
    pub fn matching(&self, selector: &BTreeMap<String, String>) -> Vec<&Hardware> {
        self.records.iter().filter(|h| h.matches(selector)).collect()
    }

    pub fn count_matching(&self, selector: &BTreeMap<String, String>) -> usize {
        self.matching(selector).len()
    }

    /// Every machine must match at most one of the given selectors
    pub fn assert_disjoint_selectors(&self, selectors: &[&BTreeMap<String, String>]) -> Result<()> {
        for hw in &self.records {
            let matches = selectors.iter().filter(|s| hw.matches(s)).count();
            if matches > 1 {
                return Err(ErrorKind::SelectorOverlap(hw.hostname.clone()).into());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_labels, Catalogue};

    const CSV: &str = "\
hostname,bmc_ip,bmc_username,bmc_password,mac,ip_address,gateway,nameservers,netmask,disk,labels
node-1,10.0.0.1,admin,secret,00:00:00:00:00:01,10.1.0.1,10.1.0.254,8.8.8.8,255.255.255.0,/dev/sda,type=cp
node-2,10.0.0.2,admin,secret,00:00:00:00:00:02,10.1.0.2,10.1.0.254,8.8.8.8|1.1.1.1,255.255.255.0,/dev/sda,type=worker
node-3,10.0.0.3,admin,secret,00:00:00:00:00:03,10.1.0.3,10.1.0.254,8.8.8.8,255.255.255.0,/dev/sda,type=worker
";

    #[test]
    fn csv_ingest() {
        let cat = Catalogue::from_csv_reader(CSV.as_bytes()).unwrap();
        assert_eq!(cat.len(), 3);
        let cp = btreemap! {"type".to_string() => "cp".to_string()};
        let workers = btreemap! {"type".to_string() => "worker".to_string()};
        assert_eq!(cat.count_matching(&cp), 1);
        assert_eq!(cat.count_matching(&workers), 2);
        assert_eq!(cat.records()[1].nameservers.len(), 2);
        assert_eq!(cat.records()[0].bmc.as_ref().unwrap().ip, "10.0.0.1");
    }

    #[test]
    fn duplicate_mac_rejected() {
        let dup = CSV.replace("00:00:00:00:00:03", "00:00:00:00:00:02");
        assert!(Catalogue::from_csv_reader(dup.as_bytes()).is_err());
    }

    #[test]
    fn selector_overlap_detected() {
        let csv = CSV.replace("type=cp", "type=cp;tier=metal").replace("type=worker", "tier=metal");
        let cat = Catalogue::from_csv_reader(csv.as_bytes()).unwrap();
        let cp = btreemap! {"type".to_string() => "cp".to_string()};
        let metal = btreemap! {"tier".to_string() => "metal".to_string()};
        // node-1 matches both selectors
        assert!(cat.assert_disjoint_selectors(&[&cp, &metal]).is_err());
        // but each alone is fine
        assert!(cat.assert_disjoint_selectors(&[&metal]).is_ok());
    }

    #[test]
    fn empty_selector_matches_nothing() {
        let cat = Catalogue::from_csv_reader(CSV.as_bytes()).unwrap();
        assert_eq!(cat.count_matching(&Default::default()), 0);
    }

    #[test]
    fn label_parse_failures() {
        assert!(parse_labels("type=cp;tier=metal").is_ok());
        assert!(parse_labels("").unwrap().is_empty());
        assert!(parse_labels("notakv").is_err());
        assert!(parse_labels("=v").is_err());
    }
}
