use std::fmt;

/// Handle to a registered render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(u64);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "target#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Removal {
    Removed,
    Unknown,
    Master,
}

/// Output targets in insertion order, master first.
///
/// The scheduler thread owns the registry outright; mutations arrive as
/// commands between passes, and a [`Snapshot`] holds the registry mutably
/// borrowed for the whole of a pass.
pub(crate) struct TargetRegistry<T> {
    entries: Vec<(TargetId, T)>,
    next_id: u64,
    generation: u64,
}

impl<T> TargetRegistry<T> {
    pub fn with_master(master: T) -> Self {
        Self {
            entries: vec![(TargetId(0), master)],
            next_id: 1,
            generation: 0,
        }
    }

    pub fn master_id(&self) -> TargetId {
        TargetId(0)
    }

    pub fn master_mut(&mut self) -> Option<&mut T> {
        self.entries.first_mut().map(|(_, target)| target)
    }

    pub fn insert(&mut self, target: T) -> TargetId {
        let id = TargetId(self.next_id);
        self.next_id += 1;
        self.generation += 1;
        self.entries.push((id, target));
        id
    }

    pub fn remove(&mut self, id: TargetId) -> (Removal, Option<T>) {
        if id == self.master_id() {
            return (Removal::Master, None);
        }
        match self.entries.iter().position(|(entry, _)| *entry == id) {
            Some(index) => {
                self.generation += 1;
                let (_, target) = self.entries.remove(index);
                (Removal::Removed, Some(target))
            }
            None => (Removal::Unknown, None),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn ids(&self) -> Vec<TargetId> {
        self.entries.iter().map(|(id, _)| *id).collect()
    }

    pub fn snapshot(&mut self) -> Snapshot<'_, T> {
        Snapshot {
            generation: self.generation,
            entries: &mut self.entries,
        }
    }

    /// Empties the registry, yielding secondary targets before the master.
    pub fn drain(&mut self) -> Vec<(TargetId, T)> {
        self.generation += 1;
        let mut drained: Vec<_> = self.entries.drain(..).collect();
        let len = drained.len();
        drained.rotate_left(1.min(len));
        drained
    }
}

/// A pass-long view of the registry.
pub(crate) struct Snapshot<'a, T> {
    generation: u64,
    entries: &'a mut [(TargetId, T)],
}

impl<'a, T> Snapshot<'a, T> {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (TargetId, &mut T)> + '_ {
        self.entries.iter_mut().map(|(id, target)| (*id, target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn master_comes_first_and_ids_are_unique() {
        let mut registry = TargetRegistry::with_master("master");
        let a = registry.insert("a");
        let b = registry.insert("b");
        assert_ne!(a, b);
        assert_eq!(registry.ids(), vec![registry.master_id(), a, b]);
        assert_eq!(registry.master_mut(), Some(&mut "master"));
    }

    #[test]
    fn removing_unknown_target_is_a_no_op() {
        let mut registry = TargetRegistry::with_master(0);
        let id = registry.insert(1);
        assert_eq!(registry.remove(id), (Removal::Removed, Some(1)));
        assert_eq!(registry.remove(id), (Removal::Unknown, None));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn master_cannot_be_removed() {
        let mut registry = TargetRegistry::with_master(0);
        let master = registry.master_id();
        assert_eq!(registry.remove(master), (Removal::Master, None));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn snapshot_generation_tracks_mutations() {
        let mut registry = TargetRegistry::with_master(0);
        let before = registry.snapshot().generation();
        let id = registry.insert(1);
        let after_insert = registry.snapshot().generation();
        registry.remove(id);
        let after_remove = registry.snapshot().generation();
        assert!(before < after_insert && after_insert < after_remove);
    }

    #[test]
    fn snapshot_visits_targets_in_insertion_order() {
        let mut registry = TargetRegistry::with_master(String::from("m"));
        registry.insert(String::from("a"));
        registry.insert(String::from("b"));
        let mut snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 3);
        let names: Vec<String> = snapshot
            .iter_mut()
            .map(|(_, name)| {
                name.push('!');
                name.clone()
            })
            .collect();
        assert_eq!(names, vec!["m!", "a!", "b!"]);
    }

    #[test]
    fn drain_releases_master_last() {
        let mut registry = TargetRegistry::with_master("m");
        registry.insert("a");
        registry.insert("b");
        let order: Vec<_> = registry.drain().into_iter().map(|(_, t)| t).collect();
        assert_eq!(order, vec!["a", "b", "m"]);
        assert_eq!(registry.len(), 0);
    }
}
