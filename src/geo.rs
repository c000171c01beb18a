//! Region → weather site lookup.
//!
//! A region without its own observation site must be given an explicit proxy
//! entry. Proxy resolutions are flagged on every enriched row and logged once
//! per run so they stay auditable.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::info;

use crate::error::UnmappedRegionError;

pub const DEFAULT_MAP_VERSION: &str = "2025-11";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProxyEntry {
    pub region: String,
    pub site_id: String,
    #[serde(default)]
    pub proxy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteResolution<'a> {
    pub site_id: &'a str,
    pub proxy_used: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoProxyMap {
    version: String,
    entries: BTreeMap<String, ProxyEntry>,
}

impl GeoProxyMap {
    pub fn new(version: impl Into<String>, entries: impl IntoIterator<Item = ProxyEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|entry| (entry.region.clone(), entry))
            .collect();
        Self {
            version: version.into(),
            entries,
        }
    }

    /// England regions onto the eight observed cities. South East has no
    /// dedicated site and borrows London.
    pub fn england_default() -> Self {
        let entries = [
            ("London", "London", false),
            ("North West", "Manchester", false),
            ("Midlands", "Birmingham", false),
            ("North East and Yorkshire", "Leeds", false),
            ("South West", "Bristol", false),
            ("East of England", "Norwich", false),
            ("South East", "London", true),
        ]
        .into_iter()
        .map(|(region, site_id, proxy)| ProxyEntry {
            region: region.to_string(),
            site_id: site_id.to_string(),
            proxy,
        });
        Self::new(DEFAULT_MAP_VERSION, entries)
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn resolve(&self, region: &str) -> Result<SiteResolution<'_>, UnmappedRegionError> {
        self.entries
            .get(region)
            .map(|entry| SiteResolution {
                site_id: entry.site_id.as_str(),
                proxy_used: entry.proxy,
            })
            .ok_or_else(|| UnmappedRegionError {
                regions: vec![region.to_string()],
            })
    }

    /// Checks totality over the regions in use, reporting every gap at once.
    pub fn ensure_covers<'r>(
        &self,
        regions: impl IntoIterator<Item = &'r str>,
    ) -> Result<(), UnmappedRegionError> {
        let mut missing: Vec<String> = regions
            .into_iter()
            .filter(|region| !self.entries.contains_key(*region))
            .map(str::to_string)
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        missing.sort();
        missing.dedup();
        Err(UnmappedRegionError { regions: missing })
    }

    /// Proxy assignments among the given regions, logged for audit.
    pub fn proxies_in_use<'r>(
        &self,
        regions: impl IntoIterator<Item = &'r str>,
    ) -> Vec<(String, String)> {
        let mut used = Vec::new();
        for region in regions {
            if let Some(entry) = self.entries.get(region).filter(|entry| entry.proxy) {
                info!(
                    region,
                    site_id = %entry.site_id,
                    proxy = true,
                    map_version = %self.version,
                    "weather proxy site used"
                );
                used.push((region.to_string(), entry.site_id.clone()));
            }
        }
        used
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_and_proxy_regions_resolve_differently() {
        let map = GeoProxyMap::england_default();
        let london = map.resolve("London").unwrap();
        let south_east = map.resolve("South East").unwrap();

        assert_eq!(london.site_id, "London");
        assert!(!london.proxy_used);
        assert_eq!(south_east.site_id, "London");
        assert!(south_east.proxy_used);
    }

    #[test]
    fn unmapped_region_is_an_error() {
        let map = GeoProxyMap::england_default();
        let err = map.resolve("Wales").unwrap_err();
        assert_eq!(err.regions, vec!["Wales".to_string()]);
    }

    #[test]
    fn ensure_covers_lists_every_missing_region() {
        let map = GeoProxyMap::england_default();
        assert!(map.ensure_covers(["London", "Midlands"]).is_ok());

        let err = map
            .ensure_covers(["Wales", "London", "Scotland", "Wales"])
            .unwrap_err();
        assert_eq!(err.regions, vec!["Scotland".to_string(), "Wales".to_string()]);
    }

    #[test]
    fn substitute_map_can_be_injected() {
        let map = GeoProxyMap::new(
            "test-1",
            vec![ProxyEntry {
                region: "Wales".to_string(),
                site_id: "Bristol".to_string(),
                proxy: true,
            }],
        );
        assert_eq!(map.version(), "test-1");
        assert_eq!(map.resolve("Wales").unwrap().site_id, "Bristol");
        assert!(map.resolve("London").is_err());
        assert_eq!(
            map.proxies_in_use(["Wales"]),
            vec![("Wales".to_string(), "Bristol".to_string())]
        );
    }
}
