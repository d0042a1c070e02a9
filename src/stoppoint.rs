//! Generic storage for the stoppoints a process owns.

use crate::error::{Error, Result};
use crate::registers::Registers;
use crate::types::VAddr;

/// Common surface of software breakpoints, hardware breakpoints, and
/// watchpoints: enough for the collection to index and tear them down.
pub trait Stoppoint {
    fn id(&self) -> u32;
    fn address(&self) -> VAddr;
    fn is_enabled(&self) -> bool;
    fn disable(&mut self, regs: &mut Registers) -> Result<()>;
}

/// An insertion-ordered index of stoppoints, keyed by id and by address.
///
/// Lookup is a linear scan; collections hold tens of entries at most.
/// Address uniqueness is the owning process's responsibility, not enforced
/// here.
pub struct StoppointCollection<P> {
    points: Vec<P>,
}

impl<P> Default for StoppointCollection<P> {
    fn default() -> Self {
        StoppointCollection { points: Vec::new() }
    }
}

impl<P: Stoppoint> StoppointCollection<P> {
    pub(crate) fn push(&mut self, point: P) -> &mut P {
        self.points.push(point);
        let last = self.points.len() - 1;
        &mut self.points[last]
    }

    pub fn contains_id(&self, id: u32) -> bool {
        self.points.iter().any(|point| point.id() == id)
    }

    pub fn contains_address(&self, address: VAddr) -> bool {
        self.points.iter().any(|point| point.address() == address)
    }

    /// True iff a stoppoint exists at `address` and is enabled.
    pub fn enabled_stoppoint_at_address(&self, address: VAddr) -> bool {
        self.points
            .iter()
            .any(|point| point.address() == address && point.is_enabled())
    }

    pub fn get_by_id(&self, id: u32) -> Result<&P> {
        self.points
            .iter()
            .find(|point| point.id() == id)
            .ok_or_else(invalid_id)
    }

    pub(crate) fn get_by_id_mut(&mut self, id: u32) -> Result<&mut P> {
        self.points
            .iter_mut()
            .find(|point| point.id() == id)
            .ok_or_else(invalid_id)
    }

    pub fn get_by_address(&self, address: VAddr) -> Result<&P> {
        self.points
            .iter()
            .find(|point| point.address() == address)
            .ok_or_else(no_point_at_address)
    }

    pub(crate) fn get_by_address_mut(&mut self, address: VAddr) -> Result<&mut P> {
        self.points
            .iter_mut()
            .find(|point| point.address() == address)
            .ok_or_else(no_point_at_address)
    }

    /// Disables the stoppoint, then removes it.
    pub(crate) fn remove_by_id(&mut self, id: u32, regs: &mut Registers) -> Result<()> {
        let index = self
            .points
            .iter()
            .position(|point| point.id() == id)
            .ok_or_else(invalid_id)?;

        self.points[index].disable(regs)?;
        self.points.remove(index);
        Ok(())
    }

    /// Disables the stoppoint, then removes it.
    pub(crate) fn remove_by_address(&mut self, address: VAddr, regs: &mut Registers) -> Result<()> {
        let index = self
            .points
            .iter()
            .position(|point| point.address() == address)
            .ok_or_else(no_point_at_address)?;

        self.points[index].disable(regs)?;
        self.points.remove(index);
        Ok(())
    }

    /// Iterates in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, P> {
        self.points.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> std::slice::IterMut<'_, P> {
        self.points.iter_mut()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }
}

impl<'a, P: Stoppoint> IntoIterator for &'a StoppointCollection<P> {
    type Item = &'a P;
    type IntoIter = std::slice::Iter<'a, P>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

fn invalid_id() -> Error {
    Error::usage("Invalid stoppoint id")
}

fn no_point_at_address() -> Error {
    Error::usage("Stoppoint doesn't exist at given address")
}
