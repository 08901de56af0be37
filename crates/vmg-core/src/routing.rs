//! Zone to ZGW routing
//!
//! A Vehicle Package names zones by number; the gateway decides which Zone
//! Gateway each zone package is pushed to. The mapping is supplied by
//! configuration; the built-in default mirrors the fleet's reference wiring.

use serde::{Deserialize, Serialize};

/// A Zone Gateway endpoint. Also the identity key for the DoIP client cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ZgwEndpoint {
    pub host: String,
    pub port: u16,
}

impl ZgwEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for ZgwEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One routing rule: an inclusive zone-number range mapped to an endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneRoute {
    pub first_zone: u8,
    pub last_zone: u8,
    pub host: String,
    #[serde(default = "default_doip_port")]
    pub port: u16,
}

fn default_doip_port() -> u16 {
    13400
}

/// Ordered routing table; the first matching rule wins, the last rule is the
/// catch-all for zone numbers past every explicit range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneRoutingTable {
    rules: Vec<ZoneRoute>,
}

impl ZoneRoutingTable {
    /// Build a table from explicit rules. An empty rule set falls back to
    /// the built-in default wiring.
    pub fn new(rules: Vec<ZoneRoute>) -> Self {
        if rules.is_empty() {
            Self::default()
        } else {
            Self { rules }
        }
    }

    /// Resolve a zone number to its target ZGW.
    pub fn resolve(&self, zone_number: u8) -> ZgwEndpoint {
        for rule in &self.rules {
            if zone_number >= rule.first_zone && zone_number <= rule.last_zone {
                return ZgwEndpoint::new(rule.host.clone(), rule.port);
            }
        }
        // Past every range: route like the highest configured rule
        let last = self.rules.last().expect("routing table is never empty");
        ZgwEndpoint::new(last.host.clone(), last.port)
    }
}

impl Default for ZoneRoutingTable {
    fn default() -> Self {
        Self::new(vec![
            ZoneRoute {
                first_zone: 1,
                last_zone: 4,
                host: "192.168.1.10".into(),
                port: 13400,
            },
            ZoneRoute {
                first_zone: 5,
                last_zone: 8,
                host: "192.168.1.11".into(),
                port: 13400,
            },
            ZoneRoute {
                first_zone: 9,
                last_zone: 16,
                host: "192.168.1.12".into(),
                port: 13400,
            },
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_matches_reference_wiring() {
        let table = ZoneRoutingTable::default();
        assert_eq!(table.resolve(1).host, "192.168.1.10");
        assert_eq!(table.resolve(4).host, "192.168.1.10");
        assert_eq!(table.resolve(5).host, "192.168.1.11");
        assert_eq!(table.resolve(9).host, "192.168.1.12");
        assert_eq!(table.resolve(16).host, "192.168.1.12");
        assert_eq!(table.resolve(3).port, 13400);
    }

    #[test]
    fn custom_rules_take_precedence_in_order() {
        let table = ZoneRoutingTable::new(vec![
            ZoneRoute {
                first_zone: 1,
                last_zone: 16,
                host: "10.0.0.5".into(),
                port: 23400,
            },
        ]);
        let endpoint = table.resolve(7);
        assert_eq!(endpoint, ZgwEndpoint::new("10.0.0.5", 23400));
        assert_eq!(endpoint.to_string(), "10.0.0.5:23400");
    }
}
