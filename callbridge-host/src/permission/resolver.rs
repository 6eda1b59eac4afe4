//! Alias to raw identifier resolution
//!
//! Pure functions over the declared permission groups: which raw host
//! identifiers a request must prompt for, which aliases are granted without
//! a prompt, and how raw per-identifier results fold back into per-alias
//! states.

use callbridge_api::{PermissionGroup, PermissionState, PermissionStates};
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// Error type for alias resolution
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("No valid permission alias was requested of this plugin (requested: {requested:?})")]
    NoValidAlias { requested: Vec<String> },

    #[error("No permission alias was provided")]
    NoAliasProvided,
}

/// Outcome of resolving a request against the declared groups
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Raw identifiers to prompt for, de-duplicated across groups
    pub to_request: BTreeSet<String>,
    /// Aliases granted without a prompt
    pub auto_grant: BTreeSet<String>,
    /// Aliases whose identifiers are in `to_request`
    pub request_aliases: BTreeSet<String>,
}

impl Resolution {
    /// Nothing to prompt for and nothing to grant
    pub fn is_empty(&self) -> bool {
        self.to_request.is_empty() && self.auto_grant.is_empty()
    }

    /// Whether a host round-trip is needed
    pub fn needs_host(&self) -> bool {
        !self.to_request.is_empty()
    }

    /// States reported when only auto-grant aliases were selected
    pub fn auto_grant_states(&self) -> PermissionStates {
        self.auto_grant
            .iter()
            .map(|alias| (alias.clone(), PermissionState::Granted))
            .collect()
    }
}

/// Resolver over one plugin's declared permission groups
#[derive(Debug, Clone, Default)]
pub struct PermissionResolver {
    groups: Vec<PermissionGroup>,
}

impl PermissionResolver {
    pub fn new(groups: Vec<PermissionGroup>) -> Self {
        Self { groups }
    }

    pub fn groups(&self) -> &[PermissionGroup] {
        &self.groups
    }

    pub fn has_groups(&self) -> bool {
        !self.groups.is_empty()
    }

    /// Every non-empty raw identifier declared by any group
    pub fn all_identifiers(&self) -> BTreeSet<String> {
        self.groups
            .iter()
            .flat_map(|g| g.raw_identifiers())
            .map(str::to_string)
            .collect()
    }

    /// Compute what a permission request has to do
    ///
    /// An empty `requested` list selects every declared group. Otherwise
    /// only declared aliases are kept; unknown ones are dropped, and if none
    /// survive the whole request fails with [`ResolveError::NoValidAlias`].
    pub fn resolve_requested(&self, requested: &[String]) -> Result<Resolution, ResolveError> {
        let selected: Vec<&PermissionGroup> = if requested.is_empty() {
            self.groups.iter().collect()
        } else {
            let picked: Vec<&PermissionGroup> = self
                .groups
                .iter()
                .filter(|g| requested.iter().any(|alias| *alias == g.alias))
                .collect();
            if picked.is_empty() {
                return Err(ResolveError::NoValidAlias {
                    requested: requested.to_vec(),
                });
            }
            picked
        };

        let mut resolution = Resolution::default();
        for group in selected {
            if group.is_auto_grant() {
                // Unnamed groups are never reported
                if !group.alias.is_empty() {
                    resolution.auto_grant.insert(group.alias.clone());
                }
            } else {
                resolution
                    .to_request
                    .extend(group.raw_identifiers().map(str::to_string));
                if !group.alias.is_empty() {
                    resolution.request_aliases.insert(group.alias.clone());
                }
            }
        }
        Ok(resolution)
    }

    fn named_groups(&self) -> impl Iterator<Item = &PermissionGroup> {
        self.groups.iter().filter(|g| !g.alias.is_empty())
    }

    /// Fold raw per-identifier grant results into per-alias states
    ///
    /// A group is granted iff every one of its identifiers is present and
    /// true; otherwise it is denied. Auto-grant groups are always granted.
    /// Unnamed groups are skipped.
    pub fn states_from_raw_results(&self, raw: &HashMap<String, bool>) -> PermissionStates {
        self.named_groups()
            .map(|group| {
                let granted = group
                    .raw_identifiers()
                    .all(|id| raw.get(id).copied().unwrap_or(false));
                let state = if granted {
                    PermissionState::Granted
                } else {
                    PermissionState::Denied
                };
                (group.alias.clone(), state)
            })
            .collect()
    }

    /// Fold current host statuses into per-alias states
    ///
    /// Any denied identifier denies the group; otherwise any undetermined
    /// identifier makes the group undetermined.
    pub fn states_from_statuses<F>(&self, status: F) -> PermissionStates
    where
        F: Fn(&str) -> PermissionState,
    {
        self.named_groups()
            .map(|group| {
                let mut state = PermissionState::Granted;
                for id in group.raw_identifiers() {
                    match status(id) {
                        PermissionState::Denied => {
                            state = PermissionState::Denied;
                            break;
                        }
                        PermissionState::PromptWithRationale => {
                            state = PermissionState::PromptWithRationale;
                        }
                        PermissionState::Prompt if state == PermissionState::Granted => {
                            state = PermissionState::Prompt;
                        }
                        _ => {}
                    }
                }
                (group.alias.clone(), state)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aliases(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn set(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn media_resolver() -> PermissionResolver {
        PermissionResolver::new(vec![
            PermissionGroup::new("camera", ["CAMERA"]),
            PermissionGroup::new("photos", ["READ_MEDIA", "WRITE_MEDIA"]),
            PermissionGroup::new("gallery", ["READ_MEDIA"]),
            PermissionGroup::auto_grant("net"),
        ])
    }

    #[test]
    fn test_single_group_request_all() {
        let resolver = PermissionResolver::new(vec![PermissionGroup::new("camera", ["CAMERA"])]);
        let resolution = resolver.resolve_requested(&[]).unwrap();

        assert_eq!(resolution.to_request, set(&["CAMERA"]));
        assert!(resolution.auto_grant.is_empty());
        assert_eq!(resolution.request_aliases, set(&["camera"]));
    }

    #[test]
    fn test_empty_request_selects_everything() {
        let resolver = media_resolver();
        let all = resolver.resolve_requested(&[]).unwrap();
        let explicit = resolver
            .resolve_requested(&aliases(&["camera", "photos", "gallery", "net"]))
            .unwrap();

        assert_eq!(all, explicit);
        assert_eq!(all.to_request, set(&["CAMERA", "READ_MEDIA", "WRITE_MEDIA"]));
        assert_eq!(all.auto_grant, set(&["net"]));
    }

    #[test]
    fn test_identifiers_deduplicated_across_groups() {
        let resolution = media_resolver()
            .resolve_requested(&aliases(&["photos", "gallery"]))
            .unwrap();

        assert_eq!(resolution.to_request, set(&["READ_MEDIA", "WRITE_MEDIA"]));
        assert_eq!(resolution.request_aliases, set(&["photos", "gallery"]));
    }

    #[test]
    fn test_unknown_aliases_dropped() {
        let resolution = media_resolver()
            .resolve_requested(&aliases(&["camera", "bogus"]))
            .unwrap();

        assert_eq!(resolution.to_request, set(&["CAMERA"]));
        assert_eq!(resolution.request_aliases, set(&["camera"]));
    }

    #[test]
    fn test_no_valid_alias() {
        let resolver = PermissionResolver::new(vec![PermissionGroup::new("camera", ["CAMERA"])]);
        let err = resolver.resolve_requested(&aliases(&["bogus"])).unwrap_err();

        assert_eq!(
            err,
            ResolveError::NoValidAlias {
                requested: aliases(&["bogus"])
            }
        );
    }

    #[test]
    fn test_auto_grant_only() {
        let resolver = PermissionResolver::new(vec![
            PermissionGroup::auto_grant("net"),
            PermissionGroup::new("wifi", [""]),
        ]);
        let resolution = resolver.resolve_requested(&[]).unwrap();

        assert!(!resolution.needs_host());
        assert_eq!(resolution.auto_grant, set(&["net", "wifi"]));
        assert_eq!(
            resolution.auto_grant_states().get("net"),
            Some(&PermissionState::Granted)
        );
    }

    #[test]
    fn test_unnamed_auto_grant_is_silent() {
        let resolver = PermissionResolver::new(vec![PermissionGroup::auto_grant("")]);
        assert!(resolver.resolve_requested(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_unnamed_groups_never_reported() {
        let resolver = PermissionResolver::new(vec![
            PermissionGroup::new("camera", ["CAMERA"]),
            PermissionGroup::auto_grant(""),
            PermissionGroup::new("", ["HIDDEN"]),
        ]);
        let resolution = resolver.resolve_requested(&[]).unwrap();
        assert_eq!(resolution.to_request, set(&["CAMERA", "HIDDEN"]));
        assert_eq!(resolution.request_aliases, set(&["camera"]));
        assert!(resolution.auto_grant.is_empty());

        let raw = HashMap::from([("CAMERA".to_string(), true), ("HIDDEN".to_string(), true)]);
        let states = resolver.states_from_raw_results(&raw);
        assert_eq!(states.keys().collect::<Vec<_>>(), vec!["camera"]);

        let states = resolver.states_from_statuses(|_| PermissionState::Granted);
        assert!(!states.contains_key(""));
    }

    #[test]
    fn test_all_empty_identifiers_is_auto_grant() {
        let resolver = PermissionResolver::new(vec![PermissionGroup::new("wifi", ["", ""])]);
        let resolution = resolver.resolve_requested(&[]).unwrap();

        assert!(!resolution.needs_host());
        assert_eq!(resolution.auto_grant, set(&["wifi"]));
    }

    #[test]
    fn test_no_groups_resolves_empty() {
        let resolver = PermissionResolver::default();
        assert!(resolver.resolve_requested(&[]).unwrap().is_empty());
        assert!(!resolver.has_groups());
    }

    #[test]
    fn test_states_from_raw_results() {
        let resolver = media_resolver();
        let raw: HashMap<String, bool> = [
            ("CAMERA".to_string(), true),
            ("READ_MEDIA".to_string(), true),
            ("WRITE_MEDIA".to_string(), false),
        ]
        .into_iter()
        .collect();

        let states = resolver.states_from_raw_results(&raw);
        assert_eq!(states["camera"], PermissionState::Granted);
        assert_eq!(states["photos"], PermissionState::Denied);
        assert_eq!(states["gallery"], PermissionState::Granted);
        assert_eq!(states["net"], PermissionState::Granted);
    }

    #[test]
    fn test_missing_identifier_is_denied() {
        let resolver = PermissionResolver::new(vec![PermissionGroup::new("camera", ["CAMERA"])]);
        let states = resolver.states_from_raw_results(&HashMap::new());
        assert_eq!(states["camera"], PermissionState::Denied);
    }

    #[test]
    fn test_states_from_statuses() {
        let resolver = PermissionResolver::new(vec![
            PermissionGroup::new("location", ["FINE", "COARSE"]),
            PermissionGroup::new("camera", ["CAMERA"]),
            PermissionGroup::new("mic", ["MIC"]),
            PermissionGroup::auto_grant("net"),
        ]);
        let states = resolver.states_from_statuses(|id| match id {
            "FINE" => PermissionState::Granted,
            "COARSE" => PermissionState::Prompt,
            "CAMERA" => PermissionState::Denied,
            _ => PermissionState::PromptWithRationale,
        });

        assert_eq!(states["location"], PermissionState::Prompt);
        assert_eq!(states["camera"], PermissionState::Denied);
        assert_eq!(states["mic"], PermissionState::PromptWithRationale);
        assert_eq!(states["net"], PermissionState::Granted);
    }
}
