// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

use std::collections::HashMap;

/// Last known register values of one device
///
/// Holds what this process last wrote or read. It never replaces the
/// read that precedes a write.
#[derive(Debug, Clone, Default)]
pub struct RegisterCache {
    values: HashMap<u32, String>,
}

impl RegisterCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, cid: u32) -> Option<&str> {
        self.values.get(&cid).map(String::as_str)
    }

    pub fn insert(&mut self, cid: u32, value: impl Into<String>) {
        self.values.insert(cid, value.into());
    }

    pub fn extend(&mut self, values: &HashMap<u32, String>) {
        for (cid, value) in values {
            self.values.insert(*cid, value.clone());
        }
    }

    pub fn get_f64(&self, cid: u32) -> Option<f64> {
        self.get(cid)?.trim().parse().ok()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Compare register values the way the device reports them ("35" == "35.0")
pub fn values_equal(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    if a == b {
        return true;
    }
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(x), Ok(y)) => (x - y).abs() < f64::EPSILON,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_roundtrip() {
        let mut cache = RegisterCache::new();
        cache.insert(636, "35");
        assert_eq!(cache.get(636), Some("35"));
        assert_eq!(cache.get_f64(636), Some(35.0));
        assert_eq!(cache.get(157), None);
    }

    #[test]
    fn test_values_equal() {
        assert!(values_equal("35", "35.0"));
        assert!(values_equal(" 02:00-05:30", "02:00-05:30"));
        assert!(!values_equal("33", "35"));
        assert!(!values_equal("abc", "abd"));
    }
}
