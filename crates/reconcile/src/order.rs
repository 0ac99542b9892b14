//! Resource kind ordering
//!
//! Creates are applied in pattern order and deletes in reverse, so the list
//! encodes the dependency order between kinds (network objects before
//! protocol objects before application objects).

use crate::error::{Error, Result};
use regex::Regex;
use std::collections::BTreeSet;

/// Default dependency order of resource kinds
pub const DEFAULT_ORDER: &[&str] = &[
    r"sys/folder",
    r"shared/file-transfer/uploads",
    r"sys/file/ssl-(cert|key)",
    r"sys/file/.+",
    r"net/tunnels/.+",
    r"net/fdb/.+",
    r"net/(vlan|self|route-domain)",
    r"net/(arp|ndp|route)",
    r"ltm/monitor/.+",
    r"ltm/node",
    r"ltm/pool",
    r"ltm/snat-translation",
    r"ltm/snatpool",
    r"ltm/data-group/.+",
    r"ltm/ifile",
    r"ltm/profile/.+",
    r"ltm/persistence/.+",
    r"ltm/rule",
    r"ltm/policy",
    r"ltm/virtual-address",
    r"ltm/virtual",
    r"ltm/snat",
];

/// Ordered list of kind patterns, each matching whole kind strings
#[derive(Debug, Clone)]
pub struct ResourceOrder {
    patterns: Vec<(String, Regex)>,
}

impl ResourceOrder {
    /// Compile an ordering list
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let patterns = patterns
            .iter()
            .map(|p| {
                let p = p.as_ref();
                Regex::new(&format!("^(?:{p})$"))
                    .map(|re| (p.to_string(), re))
                    .map_err(|e| Error::InvalidOrder {
                        pattern: p.to_string(),
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Source patterns in order
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(|(p, _)| p.as_str())
    }

    /// Index of the first pattern matching `kind`
    pub fn position(&self, kind: &str) -> Option<usize> {
        self.patterns.iter().position(|(_, re)| re.is_match(kind))
    }

    /// Sort rank of `kind`; unmatched kinds rank after every pattern
    pub fn rank(&self, kind: &str) -> usize {
        self.position(kind).unwrap_or(self.patterns.len())
    }

    /// Group kinds by the first pattern they match, in pattern order
    ///
    /// Kinds are de-duplicated and sorted within a group. Kinds matching no
    /// pattern form a trailing group.
    pub fn group<'a>(&self, kinds: impl IntoIterator<Item = &'a str>) -> Vec<Vec<String>> {
        let unique: BTreeSet<&str> = kinds.into_iter().collect();
        let mut groups: Vec<Vec<String>> = vec![Vec::new(); self.patterns.len() + 1];
        for kind in unique {
            let rank = self.rank(kind);
            if rank == self.patterns.len() {
                log::warn!("kind {kind} matches no ordering pattern, applying it last");
            }
            groups[rank].push(kind.to_string());
        }
        groups.retain(|g| !g.is_empty());
        groups
    }
}

impl Default for ResourceOrder {
    fn default() -> Self {
        let patterns = DEFAULT_ORDER
            .iter()
            .map(|p| {
                let re = Regex::new(&format!("^(?:{p})$"));
                (p.to_string(), re)
            })
            .filter_map(|(p, re)| re.ok().map(|re| (p, re)))
            .collect();
        Self { patterns }
    }
}
