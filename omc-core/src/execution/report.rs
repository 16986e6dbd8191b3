//! `CycleReport`: every cycle returns one of these instead of letting
//! per-intent outcomes propagate as exceptions.

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub submitted: u32,
    pub canceled: u32,
    pub rejected: u32,
    pub unknown: u32,
    pub reasons: Vec<String>,
}

impl CycleReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, reason_code: &str, client_order_id: Option<&str>, detail: impl AsRef<str>) {
        match client_order_id {
            Some(cid) => self.reasons.push(format!("{}: cid={} {}", reason_code, cid, detail.as_ref())),
            None => self.reasons.push(format!("{}: {}", reason_code, detail.as_ref())),
        }
    }

    pub fn merge(&mut self, other: CycleReport) {
        self.submitted += other.submitted;
        self.canceled += other.canceled;
        self.rejected += other.rejected;
        self.unknown += other.unknown;
        self.reasons.extend(other.reasons);
    }
}
