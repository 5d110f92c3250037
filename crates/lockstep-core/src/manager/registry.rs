//! Name-keyed arena of transport masters.

use crate::master::TransportMaster;
use crate::{Error, Result};
use std::collections::HashMap;

pub(crate) struct MasterSlot {
    pub removable: bool,
    pub master: Box<dyn TransportMaster>,
}

/// Masters live in slots; `order` keeps insertion order and `by_name` maps
/// names to slot indices. Freed slots are reused.
#[derive(Default)]
pub(crate) struct Registry {
    slots: Vec<Option<MasterSlot>>,
    order: Vec<usize>,
    by_name: HashMap<String, usize>,
    current: Option<usize>,
}

impl Registry {
    pub fn insert(&mut self, master: Box<dyn TransportMaster>, removable: bool) -> Result<usize> {
        let name = master.name().to_string();
        if self.by_name.contains_key(&name) {
            return Err(Error::DuplicateName(name));
        }

        let slot = Some(MasterSlot { removable, master });
        let index = match self.slots.iter().position(Option::is_none) {
            Some(free) => {
                self.slots[free] = slot;
                free
            }
            None => {
                self.slots.push(slot);
                self.slots.len() - 1
            }
        };
        self.order.push(index);
        self.by_name.insert(name, index);
        Ok(index)
    }

    pub fn remove(&mut self, name: &str) -> Result<MasterSlot> {
        let index = self.index_of(name)?;
        if self.current == Some(index) {
            return Err(Error::RemoveCurrent(name.to_string()));
        }
        if !self.slots[index].as_ref().is_some_and(|s| s.removable) {
            return Err(Error::NotRemovable(name.to_string()));
        }

        self.by_name.remove(name);
        self.order.retain(|&i| i != index);
        self.slots[index]
            .take()
            .ok_or_else(|| Error::UnknownMaster(name.to_string()))
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.order.clear();
        self.by_name.clear();
        self.current = None;
    }

    pub fn index_of(&self, name: &str) -> Result<usize> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownMaster(name.to_string()))
    }

    pub fn get(&self, index: usize) -> Option<&MasterSlot> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut MasterSlot> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    pub fn by_name_mut(&mut self, name: &str) -> Result<&mut MasterSlot> {
        let index = self.index_of(name)?;
        self.get_mut(index)
            .ok_or_else(|| Error::UnknownMaster(name.to_string()))
    }

    /// Slots in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &MasterSlot)> {
        self.order
            .iter()
            .filter_map(|&i| self.slots[i].as_ref().map(|slot| (i, slot)))
    }

    /// Slot indices in insertion order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn current(&self) -> Option<usize> {
        self.current
    }

    pub fn set_current(&mut self, index: Option<usize>) {
        self.current = index;
    }

    pub fn current_name(&self) -> Option<String> {
        self.current
            .and_then(|i| self.get(i))
            .map(|slot| slot.master.name().to_string())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::master::{MidiClockMaster, MtcMaster};
    use crate::timecode::SmpteFrameRate;

    fn mtc(name: &str) -> Box<dyn TransportMaster> {
        Box::new(MtcMaster::new(name, 48_000.0, SmpteFrameRate::Fps25))
    }

    #[test]
    fn test_insert_and_order() {
        let mut reg = Registry::default();
        reg.insert(mtc("a"), true).unwrap();
        reg.insert(Box::new(MidiClockMaster::new("b", 48_000.0)), true)
            .unwrap();
        reg.insert(mtc("c"), true).unwrap();

        let names: Vec<_> = reg.iter().map(|(_, s)| s.master.name()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert!(matches!(reg.insert(mtc("b"), true), Err(Error::DuplicateName(_))));
    }

    #[test]
    fn test_remove_reuses_slot_keeps_order() {
        let mut reg = Registry::default();
        reg.insert(mtc("a"), true).unwrap();
        let b = reg.insert(mtc("b"), true).unwrap();
        reg.insert(mtc("c"), true).unwrap();

        reg.remove("b").unwrap();
        assert_eq!(reg.len(), 2);
        let d = reg.insert(mtc("d"), true).unwrap();
        assert_eq!(d, b);

        let names: Vec<_> = reg.iter().map(|(_, s)| s.master.name()).collect();
        assert_eq!(names, ["a", "c", "d"]);
    }

    #[test]
    fn test_remove_guards() {
        let mut reg = Registry::default();
        let a = reg.insert(mtc("a"), true).unwrap();
        reg.insert(mtc("fixed"), false).unwrap();
        reg.set_current(Some(a));

        assert!(matches!(reg.remove("a"), Err(Error::RemoveCurrent(_))));
        assert!(matches!(reg.remove("fixed"), Err(Error::NotRemovable(_))));
        assert!(matches!(reg.remove("zzz"), Err(Error::UnknownMaster(_))));
        assert_eq!(reg.current_name().as_deref(), Some("a"));
    }
}
