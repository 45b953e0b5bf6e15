use std::collections::BTreeMap;

const ANION_SUFFIX: &str = "_a";
const CATION_SUFFIX: &str = "_c";

/// Returns the linked twin of a parameter name, if it has one.
///
/// Diamond-structure materials carry anion (`_a`) and cation (`_c`) variants of the
/// same on-site quantity; `E_s_a` and `E_s_c` are twins.
pub fn twin_of(name: &str) -> Option<String> {
    if let Some(base) = name.strip_suffix(ANION_SUFFIX) {
        Some(format!("{base}{CATION_SUFFIX}"))
    } else {
        name.strip_suffix(CATION_SUFFIX)
            .map(|base| format!("{base}{ANION_SUFFIX}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryOrigin {
    /// The value was assigned to this name directly.
    Explicit,
    /// The value was copied from the linked twin and never set directly.
    Mirrored,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterEntry {
    pub value: f64,
    pub origin: EntryOrigin,
}

impl ParameterEntry {
    pub fn is_explicit(&self) -> bool {
        self.origin == EntryOrigin::Explicit
    }
}

/// Named parameter values with the twin-mirroring rule applied on every update.
///
/// Setting one member of a linked pair copies the value onto the other member. When
/// both members are set, the one set last wins and its value ends up on both.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterMap {
    entries: BTreeMap<String, ParameterEntry>,
}

impl ParameterMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: f64) {
        self.entries.insert(
            name.to_string(),
            ParameterEntry {
                value,
                origin: EntryOrigin::Explicit,
            },
        );

        if let Some(twin) = twin_of(name) {
            self.entries
                .entry(twin)
                .and_modify(|entry| entry.value = value)
                .or_insert(ParameterEntry {
                    value,
                    origin: EntryOrigin::Mirrored,
                });
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries.get(name).map(|entry| entry.value)
    }

    pub fn entry(&self, name: &str) -> Option<&ParameterEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterEntry)> {
        self.entries.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn values(&self) -> impl Iterator<Item = (&str, f64)> {
        self.iter().map(|(name, entry)| (name, entry.value))
    }
}

impl<S: AsRef<str>> FromIterator<(S, f64)> for ParameterMap {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut map = ParameterMap::new();
        for (name, value) in iter {
            map.set(name.as_ref(), value);
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn twin_of_swaps_anion_and_cation_suffixes() {
        assert_eq!(twin_of("E_s_a").as_deref(), Some("E_s_c"));
        assert_eq!(twin_of("E_p_c").as_deref(), Some("E_p_a"));
        assert_eq!(twin_of("E_d"), None);
        assert_eq!(twin_of("sa_pc_sigma"), None);
    }

    #[test]
    fn setting_anion_mirrors_onto_cation() {
        let mut map = ParameterMap::new();
        map.set("E_s_a", -2.15);

        assert_eq!(map.get("E_s_c"), Some(-2.15));
        assert!(map.entry("E_s_a").unwrap().is_explicit());
        assert_eq!(map.entry("E_s_c").unwrap().origin, EntryOrigin::Mirrored);
    }

    #[test]
    fn later_twin_assignment_wins_for_both_members() {
        let mut map = ParameterMap::new();
        map.set("E_p_a", 4.0);
        map.set("E_p_c", 4.5);

        assert_eq!(map.get("E_p_a"), Some(4.5));
        assert_eq!(map.get("E_p_c"), Some(4.5));
        assert!(map.entry("E_p_a").unwrap().is_explicit());
        assert!(map.entry("E_p_c").unwrap().is_explicit());
    }

    #[test]
    fn unpaired_names_do_not_create_extra_entries() {
        let map: ParameterMap = [("pp_sigma", 1.0), ("E_d", 13.0)].into_iter().collect();
        assert_eq!(map.len(), 2);
    }
}
