// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-modbus-slave project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register storage shared between the Modbus service and the updater
//!
//! The store keeps one [`RegisterBank`] per register kind. A bank owns the
//! cell blocks of every area of its kind and sits behind its own `Mutex`, so a
//! request touching holding registers never waits on an input register pass
//! and vice versa. Code that needs several kinds at once goes through
//! [`RegisterStore::with_exclusive_access_all`], which always locks the banks
//! in [`RegisterKind::ALL`] order.
//!
//! ## Lifecycle
//!
//! 1. Areas are registered through `&mut self` while the store is still owned
//!    by the initialization code.
//! 2. [`RegisterStore::seal`] freezes the descriptor set.
//! 3. The store is wrapped in an `Arc` and shared with the serving and updating
//!    tasks. From then on only cell values change.
//!
//! ## Example
//!
//! ```
//! use rust_modbus_slave::registers::{RegisterKind, RegisterStore};
//!
//! let mut store = RegisterStore::new();
//! store.register_area(RegisterKind::Holding, 0, 100).unwrap();
//! store.seal();
//!
//! store.write(RegisterKind::Holding, 10, &[1, 2, 3]).unwrap();
//! assert_eq!(store.read(RegisterKind::Holding, 10, 3).unwrap(), vec![1, 2, 3]);
//! ```

use std::ops::Range;
use std::sync::{Mutex, MutexGuard};

use log::debug;
use serde::Serialize;

use super::{RegisterArea, RegisterError, RegisterKind};

/// Identifies a registered area by kind and start offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AreaHandle {
    kind: RegisterKind,
    start_offset: u16,
}

impl AreaHandle {
    pub fn kind(&self) -> RegisterKind {
        self.kind
    }

    pub fn start_offset(&self) -> u16 {
        self.start_offset
    }
}

#[derive(Debug)]
struct AreaBlock {
    area: RegisterArea,
    cells: Vec<u16>,
}

/// All areas of one register kind, with their cells
///
/// A bank is only reachable through the store's exclusive-access primitives,
/// so holding a `&mut RegisterBank` means holding the bank lock.
#[derive(Debug)]
pub struct RegisterBank {
    kind: RegisterKind,
    // Sorted by start offset, never overlapping
    blocks: Vec<AreaBlock>,
}

impl RegisterBank {
    fn new(kind: RegisterKind) -> Self {
        Self {
            kind,
            blocks: Vec::new(),
        }
    }

    fn insert(&mut self, area: RegisterArea) -> Result<(), RegisterError> {
        if let Some(existing) = self.blocks.iter().find(|b| b.area.overlaps(&area)) {
            return Err(RegisterError::configuration(format!(
                "{} overlaps already registered {}",
                area, existing.area
            )));
        }
        let position = self
            .blocks
            .partition_point(|b| b.area.start_offset() < area.start_offset());
        self.blocks.insert(
            position,
            AreaBlock {
                area,
                cells: vec![0; area.cell_count()],
            },
        );
        Ok(())
    }

    fn locate(&self, address: u16, count: usize) -> Result<(usize, Range<usize>), RegisterError> {
        let out_of_range = || RegisterError::OutOfRange {
            kind: self.kind,
            address,
            count,
        };
        // Last block starting at or before the address
        let index = self
            .blocks
            .partition_point(|b| b.area.start_offset() <= address)
            .checked_sub(1)
            .ok_or_else(out_of_range)?;
        let range = self.blocks[index]
            .area
            .local_range(address, count)
            .ok_or_else(out_of_range)?;
        Ok((index, range))
    }

    /// Kind of every area in this bank
    pub fn kind(&self) -> RegisterKind {
        self.kind
    }

    /// Descriptors of the areas in this bank, by ascending start offset
    pub fn areas(&self) -> impl Iterator<Item = &RegisterArea> {
        self.blocks.iter().map(|b| &b.area)
    }

    /// Total number of cells in this bank
    pub fn cell_count(&self) -> usize {
        self.blocks.iter().map(|b| b.cells.len()).sum()
    }

    /// Borrow `count` cells starting at absolute `address`
    pub fn cells(&self, address: u16, count: usize) -> Result<&[u16], RegisterError> {
        let (index, range) = self.locate(address, count)?;
        Ok(&self.blocks[index].cells[range])
    }

    /// Mutably borrow `count` cells starting at absolute `address`
    pub fn cells_mut(&mut self, address: u16, count: usize) -> Result<&mut [u16], RegisterError> {
        let (index, range) = self.locate(address, count)?;
        Ok(&mut self.blocks[index].cells[range])
    }

    /// Copy `count` cells starting at absolute `address`
    pub fn read(&self, address: u16, count: usize) -> Result<Vec<u16>, RegisterError> {
        self.cells(address, count).map(<[u16]>::to_vec)
    }

    /// Overwrite cells starting at absolute `address`
    ///
    /// Bounds are checked before the first cell is touched.
    pub fn write(&mut self, address: u16, values: &[u16]) -> Result<(), RegisterError> {
        self.cells_mut(address, values.len())?.copy_from_slice(values);
        Ok(())
    }

    /// Every cell of every area in this bank
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut u16> {
        self.blocks.iter_mut().flat_map(|b| b.cells.iter_mut())
    }

    /// Add `delta` to every cell, wrapping on overflow
    pub fn wrapping_add_all(&mut self, delta: u16) {
        for cell in self.iter_mut() {
            *cell = cell.wrapping_add(delta);
        }
    }

    fn snapshot(&self) -> Vec<AreaSnapshot> {
        self.blocks
            .iter()
            .map(|b| AreaSnapshot {
                area: b.area,
                values: b.cells.clone(),
            })
            .collect()
    }
}

/// Every bank of the plane, locked together
///
/// Created by [`RegisterStore::with_exclusive_access_all`]; the locks are
/// released when the guard is dropped.
pub struct PlaneGuard<'a> {
    banks: Vec<MutexGuard<'a, RegisterBank>>,
}

impl PlaneGuard<'_> {
    /// Bank of the given kind
    pub fn bank(&self, kind: RegisterKind) -> Result<&RegisterBank, RegisterError> {
        self.banks
            .iter()
            .find(|b| b.kind == kind)
            .map(|b| &**b)
            .ok_or(RegisterError::NoSuchArea(kind))
    }

    /// Mutable bank of the given kind
    pub fn bank_mut(&mut self, kind: RegisterKind) -> Result<&mut RegisterBank, RegisterError> {
        self.banks
            .iter_mut()
            .find(|b| b.kind == kind)
            .map(|b| &mut **b)
            .ok_or(RegisterError::NoSuchArea(kind))
    }

    /// Kinds of the locked banks, in lock order
    pub fn kinds(&self) -> Vec<RegisterKind> {
        self.banks.iter().map(|b| b.kind).collect()
    }
}

/// Copy of one area taken under its bank lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AreaSnapshot {
    pub area: RegisterArea,
    pub values: Vec<u16>,
}

/// Copy of the whole plane taken while every bank was locked
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaneSnapshot {
    pub areas: Vec<AreaSnapshot>,
}

impl PlaneSnapshot {
    /// Values of every area of `kind`, by ascending address
    pub fn values(&self, kind: RegisterKind) -> impl Iterator<Item = u16> + '_ {
        self.areas
            .iter()
            .filter(move |a| a.area.kind() == kind)
            .flat_map(|a| a.values.iter().copied())
    }
}

/// Register cells plus their area descriptors
#[derive(Debug, Default)]
pub struct RegisterStore {
    // Indexed by `RegisterKind::index`, `None` until an area of the kind exists
    banks: [Option<Mutex<RegisterBank>>; 2],
    areas: Vec<RegisterArea>,
    sealed: bool,
}

impl RegisterStore {
    /// Create an empty, unsealed store
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a zeroed area of `cell_count` registers of `kind` at `start_offset`
    ///
    /// # Errors
    ///
    /// `RegisterError::Configuration` if the descriptor is invalid, overlaps an
    /// area of the same kind, or the store is sealed.
    pub fn register_area(
        &mut self,
        kind: RegisterKind,
        start_offset: u16,
        cell_count: usize,
    ) -> Result<AreaHandle, RegisterError> {
        let area = RegisterArea::new(kind, start_offset, cell_count)?;
        self.register_descriptor(area)
    }

    /// Register a prebuilt descriptor
    pub fn register_descriptor(&mut self, area: RegisterArea) -> Result<AreaHandle, RegisterError> {
        if self.sealed {
            return Err(RegisterError::configuration(format!(
                "cannot register {area}: the register plane is already serving"
            )));
        }
        area.validate()?;

        let kind = area.kind();
        let bank = self.banks[kind.index()]
            .get_or_insert_with(|| Mutex::new(RegisterBank::new(kind)))
            .get_mut()
            .map_err(|_| RegisterError::LockPoisoned(kind))?;
        bank.insert(area)?;
        self.areas.push(area);

        debug!("Registered {}", area);
        Ok(AreaHandle {
            kind,
            start_offset: area.start_offset(),
        })
    }

    /// Freeze the descriptor set; further registrations fail
    pub fn seal(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Registered descriptors, in registration order
    pub fn areas(&self) -> &[RegisterArea] {
        &self.areas
    }

    pub fn area_count(&self) -> usize {
        self.areas.len()
    }

    /// Descriptor behind a handle
    pub fn area(&self, handle: AreaHandle) -> Option<RegisterArea> {
        self.areas
            .iter()
            .find(|a| a.kind() == handle.kind && a.start_offset() == handle.start_offset)
            .copied()
    }

    /// `true` if at least one area of `kind` is registered
    pub fn has_kind(&self, kind: RegisterKind) -> bool {
        self.banks[kind.index()].is_some()
    }

    /// Total number of cells of `kind`
    pub fn cell_count(&self, kind: RegisterKind) -> usize {
        self.areas
            .iter()
            .filter(|a| a.kind() == kind)
            .map(RegisterArea::cell_count)
            .sum()
    }

    fn lock(&self, kind: RegisterKind) -> Result<MutexGuard<'_, RegisterBank>, RegisterError> {
        self.banks[kind.index()]
            .as_ref()
            .ok_or(RegisterError::NoSuchArea(kind))?
            .lock()
            .map_err(|_| RegisterError::LockPoisoned(kind))
    }

    /// Run `f` while holding the lock of the `kind` bank
    ///
    /// The lock is released when `f` returns, whatever it returns. Nothing in
    /// `f` may block on I/O.
    pub fn with_exclusive_access<R>(
        &self,
        kind: RegisterKind,
        f: impl FnOnce(&mut RegisterBank) -> R,
    ) -> Result<R, RegisterError> {
        let mut bank = self.lock(kind)?;
        Ok(f(&mut bank))
    }

    /// Run `f` while holding the locks of every registered bank
    ///
    /// Banks are locked in [`RegisterKind::ALL`] order.
    pub fn with_exclusive_access_all<R>(
        &self,
        f: impl FnOnce(&mut PlaneGuard<'_>) -> R,
    ) -> Result<R, RegisterError> {
        let mut guard = PlaneGuard {
            banks: Vec::with_capacity(RegisterKind::ALL.len()),
        };
        for kind in RegisterKind::ALL {
            if self.has_kind(kind) {
                guard.banks.push(self.lock(kind)?);
            }
        }
        Ok(f(&mut guard))
    }

    /// Read `count` registers of `kind` starting at `address`
    pub fn read(
        &self,
        kind: RegisterKind,
        address: u16,
        count: usize,
    ) -> Result<Vec<u16>, RegisterError> {
        self.with_exclusive_access(kind, |bank| bank.read(address, count))?
    }

    /// Write `values` to registers of `kind` starting at `address`
    ///
    /// On error no register is modified.
    pub fn write(
        &self,
        kind: RegisterKind,
        address: u16,
        values: &[u16],
    ) -> Result<(), RegisterError> {
        self.with_exclusive_access(kind, |bank| bank.write(address, values))?
    }

    /// Consistent copy of every area
    pub fn snapshot(&self) -> Result<PlaneSnapshot, RegisterError> {
        self.with_exclusive_access_all(|plane| PlaneSnapshot {
            areas: plane
                .banks
                .iter()
                .flat_map(|bank| bank.snapshot())
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_store() -> RegisterStore {
        let mut store = RegisterStore::new();
        store.register_area(RegisterKind::Holding, 0, 100).unwrap();
        store.register_area(RegisterKind::Input, 0, 100).unwrap();
        store.seal();
        store
    }

    #[test]
    fn test_registered_areas_keep_size_invariant() {
        let store = default_store();
        assert_eq!(store.area_count(), 2);
        for area in store.areas() {
            assert_eq!(area.byte_length(), 2 * area.cell_count());
        }
        assert_eq!(store.cell_count(RegisterKind::Holding), 100);
        assert_eq!(store.cell_count(RegisterKind::Input), 100);
    }

    #[test]
    fn test_overlapping_registration_fails() {
        let mut store = RegisterStore::new();
        store.register_area(RegisterKind::Holding, 0, 100).unwrap();

        let err = store.register_area(RegisterKind::Holding, 50, 100).unwrap_err();
        assert!(matches!(err, RegisterError::Configuration(_)));
        let err = store.register_area(RegisterKind::Holding, 0, 1).unwrap_err();
        assert!(matches!(err, RegisterError::Configuration(_)));

        // Adjacent and other-kind areas are fine
        store.register_area(RegisterKind::Holding, 100, 10).unwrap();
        store.register_area(RegisterKind::Input, 0, 100).unwrap();
        assert_eq!(store.areas().len(), 3);
    }

    #[test]
    fn test_registration_after_seal_fails() {
        let mut store = default_store();
        let err = store.register_area(RegisterKind::Holding, 200, 10).unwrap_err();
        assert!(matches!(err, RegisterError::Configuration(_)));
        assert_eq!(store.areas().len(), 2);
    }

    #[test]
    fn test_round_trip() {
        let store = default_store();
        store.write(RegisterKind::Holding, 98, &[7, 8]).unwrap();
        assert_eq!(store.read(RegisterKind::Holding, 98, 2).unwrap(), vec![7, 8]);
        assert_eq!(store.read(RegisterKind::Holding, 0, 0).unwrap(), Vec::<u16>::new());
        // Same offsets of the other kind are untouched
        assert_eq!(store.read(RegisterKind::Input, 98, 2).unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_out_of_range_leaves_contents_unchanged() {
        let store = default_store();
        store.write(RegisterKind::Holding, 95, &[1, 1, 1, 1, 1]).unwrap();

        let err = store
            .write(RegisterKind::Holding, 95, &[9, 9, 9, 9, 9, 9])
            .unwrap_err();
        assert_eq!(
            err,
            RegisterError::OutOfRange {
                kind: RegisterKind::Holding,
                address: 95,
                count: 6
            }
        );
        assert!(store.read(RegisterKind::Holding, 100, 1).is_err());
        assert!(store.read(RegisterKind::Holding, 96, 5).is_err());
        assert_eq!(
            store.read(RegisterKind::Holding, 95, 5).unwrap(),
            vec![1, 1, 1, 1, 1]
        );
    }

    #[test]
    fn test_unregistered_kind() {
        let mut store = RegisterStore::new();
        store.register_area(RegisterKind::Holding, 0, 10).unwrap();
        store.seal();

        assert_eq!(
            store.read(RegisterKind::Input, 0, 1),
            Err(RegisterError::NoSuchArea(RegisterKind::Input))
        );
        assert_eq!(
            store.write(RegisterKind::Input, 0, &[1]),
            Err(RegisterError::NoSuchArea(RegisterKind::Input))
        );
    }

    #[test]
    fn test_access_never_spans_areas() {
        let mut store = RegisterStore::new();
        let upper = store.register_area(RegisterKind::Holding, 100, 10).unwrap();
        let lower = store.register_area(RegisterKind::Holding, 0, 100).unwrap();
        store.seal();

        assert_eq!(store.area(lower).unwrap().address_range(), 0..100);
        assert_eq!(store.area(upper).unwrap().address_range(), 100..110);

        store.write(RegisterKind::Holding, 100, &[42]).unwrap();
        assert_eq!(store.read(RegisterKind::Holding, 100, 1).unwrap(), vec![42]);
        assert!(store.read(RegisterKind::Holding, 99, 2).is_err());
        assert!(store.read(RegisterKind::Holding, 110, 1).is_err());
    }

    #[test]
    fn test_gap_between_areas_is_out_of_range() {
        let mut store = RegisterStore::new();
        store.register_area(RegisterKind::Input, 0, 10).unwrap();
        store.register_area(RegisterKind::Input, 20, 10).unwrap();
        store.seal();

        assert!(matches!(
            store.read(RegisterKind::Input, 15, 1),
            Err(RegisterError::OutOfRange { .. })
        ));
        assert!(store.read(RegisterKind::Input, 20, 10).is_ok());
    }

    #[test]
    fn test_failed_closure_releases_lock() {
        let store = default_store();
        let result: Result<Result<(), RegisterError>, RegisterError> = store
            .with_exclusive_access(RegisterKind::Holding, |bank| {
                bank.write(0, &[5])?;
                bank.write(1000, &[5])
            });
        assert!(result.unwrap().is_err());

        // Lock is free again and the partial write stays visible
        assert_eq!(store.read(RegisterKind::Holding, 0, 1).unwrap(), vec![5]);
    }

    #[test]
    fn test_snapshot_groups_kinds() {
        let store = default_store();
        store
            .with_exclusive_access_all(|plane| {
                assert_eq!(plane.kinds(), RegisterKind::ALL.to_vec());
                plane.bank_mut(RegisterKind::Holding)?.wrapping_add_all(1);
                plane.bank_mut(RegisterKind::Input)?.wrapping_add_all(5);
                Ok::<(), RegisterError>(())
            })
            .unwrap()
            .unwrap();

        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.areas.len(), 2);
        assert!(snapshot.values(RegisterKind::Holding).all(|v| v == 1));
        assert!(snapshot.values(RegisterKind::Input).all(|v| v == 5));
        assert_eq!(snapshot.values(RegisterKind::Input).count(), 100);
    }
}
