/// PLMN code -> operator name for the networks the node is expected to roam on.
const PLMN: &[(&str, &str)] = &[
    ("310260", "T-Mobile USA"),
    ("310410", "AT&T"),
    ("313100", "FirstNet (AT&T)"),
    ("311480", "Verizon"),
    ("310120", "Sprint (legacy/T-Mobile)"),
];

/// Strip everything outside printable ASCII.
pub fn clean(raw: &str) -> String {
    raw.chars().filter(|c| (' '..='~').contains(c)).collect()
}

pub fn operator_name(code: &str) -> Option<&'static str> {
    PLMN.iter().find(|(k, _)| *k == code).map(|(_, name)| *name)
}

/// Human-readable carrier for a raw modem string.
pub fn resolve(raw: &str) -> String {
    let cleaned = clean(raw);
    if let Some(name) = operator_name(&cleaned) {
        return name.to_string();
    }
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}
