//! Profile selection
//!
//! A service without profiles is always active. A gated service is active
//! when one of its profiles is selected, when `*` is selected, or when it is
//! named explicitly.

use crate::container::ServiceSpec;
use std::collections::BTreeSet;

/// Selects every profile
pub const ALL_PROFILES: &str = "*";

/// Profiles and services selected for one orchestration run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profiles {
    profiles: BTreeSet<String>,
    services: BTreeSet<String>,
}

impl Profiles {
    /// Select no profiles: only ungated services are active
    pub fn none() -> Self {
        Self::default()
    }

    /// Select every profile
    pub fn all() -> Self {
        Self::new([ALL_PROFILES])
    }

    pub fn new<I, S>(profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            profiles: profiles
                .into_iter()
                .map(Into::into)
                .filter(|p: &String| !p.is_empty())
                .collect(),
            services: BTreeSet::new(),
        }
    }

    /// Parse a comma-separated list, as found in `COMPOSE_PROFILES`
    pub fn from_list(value: &str) -> Self {
        Self::new(value.split(',').map(str::trim))
    }

    /// Also activate the named services regardless of their profiles
    pub fn with_services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.services.extend(services.into_iter().map(Into::into));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty() && self.services.is_empty()
    }

    pub fn profiles(&self) -> impl Iterator<Item = &str> {
        self.profiles.iter().map(String::as_str)
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(String::as_str)
    }

    /// Whether `profile` is selected
    pub fn is_selected(&self, profile: &str) -> bool {
        self.profiles.contains(ALL_PROFILES) || self.profiles.contains(profile)
    }

    /// Whether a service is active under this selection
    pub fn activates(&self, service: &ServiceSpec) -> bool {
        !service.is_gated()
            || self.services.contains(&service.name)
            || service.profiles.iter().any(|p| self.is_selected(p))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gated(name: &str, profiles: &[&str]) -> ServiceSpec {
        let mut service = ServiceSpec::new(name, "image");
        service.profiles = profiles.iter().map(|p| p.to_string()).collect();
        service
    }

    #[test]
    fn test_ungated_services_are_always_active() {
        let mysql = gated("mysql", &[]);
        assert!(Profiles::none().activates(&mysql));
        assert!(Profiles::new(["infinity"]).activates(&mysql));
    }

    #[test]
    fn test_gated_service_needs_its_profile() {
        let infinity = gated("infinity", &["infinity"]);
        assert!(!Profiles::none().activates(&infinity));
        assert!(!Profiles::new(["elasticsearch"]).activates(&infinity));
        assert!(Profiles::new(["infinity"]).activates(&infinity));
        assert!(Profiles::all().activates(&infinity));
    }

    #[test]
    fn test_explicit_service_overrides_profiles() {
        let infinity = gated("infinity", &["infinity"]);
        assert!(Profiles::none().with_services(["infinity"]).activates(&infinity));
    }

    #[test]
    fn test_from_list() {
        let profiles = Profiles::from_list("infinity, debug,,");
        assert_eq!(profiles.profiles().collect::<Vec<_>>(), vec!["debug", "infinity"]);
        assert!(Profiles::from_list("").is_empty());
    }
}
