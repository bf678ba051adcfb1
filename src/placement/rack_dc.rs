//! Rack/data-center awareness helpers (`spec.md` §4.4 "Rack awareness",
//! "Data-center awareness").

use std::collections::HashSet;

use cm_config::DataCenterConfig;

/// The "alive" data-center set: configured storage DCs minus the banned
/// subset (`spec.md` §4.4).
pub fn alive_data_centers(cfg: &DataCenterConfig) -> Vec<String> {
    if !cfg.enabled {
        return Vec::new();
    }
    let banned: HashSet<&str> = cfg.banned_data_centers.iter().map(String::as_str).collect();
    cfg.storage_data_centers
        .iter()
        .filter(|dc| !banned.contains(dc.as_str()))
        .cloned()
        .collect()
}

/// `ceil(aggregated_rf / |alive_dcs|)` capped by `failure_domain_bound`
/// (`spec.md` §4.4).
pub fn max_replicas_per_data_center(aggregated_rf: u32, alive_dc_count: usize, failure_domain_bound: u32) -> u32 {
    if alive_dc_count == 0 {
        return failure_domain_bound;
    }
    let per_dc = (aggregated_rf as usize + alive_dc_count - 1) / alive_dc_count;
    (per_dc as u32).min(failure_domain_bound.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alive_dcs_excludes_banned() {
        let cfg = DataCenterConfig {
            enabled: true,
            storage_data_centers: vec!["dc1".into(), "dc2".into(), "dc3".into()],
            banned_data_centers: vec!["dc2".into()],
        };
        assert_eq!(alive_data_centers(&cfg), vec!["dc1".to_string(), "dc3".to_string()]);
    }

    #[test]
    fn disabled_config_yields_no_dc_constraint() {
        let cfg = DataCenterConfig { enabled: false, storage_data_centers: vec!["dc1".into()], banned_data_centers: vec![] };
        assert!(alive_data_centers(&cfg).is_empty());
    }

    #[test]
    fn per_dc_cap_rounds_up_and_is_bounded() {
        assert_eq!(max_replicas_per_data_center(5, 2, 10), 3);
        assert_eq!(max_replicas_per_data_center(5, 2, 2), 2);
    }
}
