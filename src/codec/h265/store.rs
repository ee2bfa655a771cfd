// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Storage for the parameter sets seen so far in a stream.
//!
//! Every parameter set kind has a fixed number of slots, addressed by the id
//! carried in the bitstream. Parsing a set with an id already in use replaces
//! the previous one. Sets refer to each other by id only, and the references
//! are resolved on demand by the `fill_*` methods.

use log::debug;
use log::warn;

use crate::codec::h265::parser::Pps;
use crate::codec::h265::parser::Sps;
use crate::codec::h265::parser::Vps;
use crate::codec::h265::ParseError;
use crate::codec::h265::ParseResult;

pub const MAX_VPS_COUNT: usize = 16;
pub const MAX_SPS_COUNT: usize = 16;
pub const MAX_PPS_COUNT: usize = 64;

/// A resolved reference to a stored parameter set.
///
/// `serial` identifies one particular insertion into the store, so a link
/// stops matching as soon as the slot it points to is overwritten.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParamSetLink {
    pub id: u8,
    pub serial: u64,
}

#[derive(Clone, Debug)]
struct Slot<T> {
    serial: u64,
    record: T,
}

fn empty_slots<T>(count: usize) -> Vec<Option<Slot<T>>> {
    std::iter::repeat_with(|| None).take(count).collect()
}

fn slot<T>(slots: &[Option<Slot<T>>], id: u8) -> Option<&Slot<T>> {
    slots.get(usize::from(id)).and_then(Option::as_ref)
}

fn slot_mut<T>(slots: &mut [Option<Slot<T>>], id: u8) -> Option<&mut Slot<T>> {
    slots.get_mut(usize::from(id)).and_then(Option::as_mut)
}

fn link<T>(slots: &[Option<Slot<T>>], id: u8) -> Option<ParamSetLink> {
    slot(slots, id).map(|s| ParamSetLink { id, serial: s.serial })
}

fn insert<T>(slots: &mut [Option<Slot<T>>], id: u8, serial: u64, record: T) -> ParseResult<&T> {
    let count = slots.len();
    let entry = slots
        .get_mut(usize::from(id))
        .ok_or_else(|| ParseError::out_of_range(id, 0, count as i64 - 1))?;

    Ok(&entry.insert(Slot { serial, record }).record)
}

/// Checks that a link recorded in a set still points to what the store holds.
fn check_link<T>(
    slots: &[Option<Slot<T>>],
    expected_id: u8,
    resolved: Option<ParamSetLink>,
    kind: &'static str,
) -> ParseResult<()> {
    let Some(resolved) = resolved else {
        return Ok(());
    };

    if resolved.id != expected_id || link(slots, resolved.id) != Some(resolved) {
        warn!("Linked {} {} is not identical to the stored one", kind, resolved.id);
        return Err(ParseError::BrokenLink {
            kind,
            id: u32::from(resolved.id),
        });
    }

    Ok(())
}

/// The VPS, SPS and PPS of a stream, indexed by id.
#[derive(Clone, Debug)]
pub struct ParameterSetStore {
    vpses: Vec<Option<Slot<Vps>>>,
    spses: Vec<Option<Slot<Sps>>>,
    ppses: Vec<Option<Slot<Pps>>>,

    last_vps: Option<u8>,
    last_sps: Option<u8>,
    last_pps: Option<u8>,

    next_serial: u64,
}

impl Default for ParameterSetStore {
    fn default() -> Self {
        Self {
            vpses: empty_slots(MAX_VPS_COUNT),
            spses: empty_slots(MAX_SPS_COUNT),
            ppses: empty_slots(MAX_PPS_COUNT),
            last_vps: None,
            last_sps: None,
            last_pps: None,
            next_serial: 0,
        }
    }
}

impl ParameterSetStore {
    pub fn new() -> Self {
        Default::default()
    }

    fn serial(&mut self) -> u64 {
        self.next_serial += 1;
        self.next_serial
    }

    /// Stores `vps` in the slot of its id and makes it the last VPS.
    pub fn put_vps(&mut self, vps: Vps) -> ParseResult<&Vps> {
        let id = vps.id;
        let serial = self.serial();
        let vps = insert(&mut self.vpses, id, serial, vps)?;
        self.last_vps = Some(id);
        Ok(vps)
    }

    /// Stores `sps` in the slot of its id and makes it the last SPS.
    pub fn put_sps(&mut self, sps: Sps) -> ParseResult<&Sps> {
        let id = sps.id;
        let serial = self.serial();
        let sps = insert(&mut self.spses, id, serial, sps)?;
        self.last_sps = Some(id);
        Ok(sps)
    }

    /// Stores `pps` in the slot of its id and makes it the last PPS.
    pub fn put_pps(&mut self, pps: Pps) -> ParseResult<&Pps> {
        let id = pps.id;
        let serial = self.serial();
        let pps = insert(&mut self.ppses, id, serial, pps)?;
        self.last_pps = Some(id);
        Ok(pps)
    }

    pub fn get_vps(&self, id: u8) -> Option<&Vps> {
        slot(&self.vpses, id).map(|s| &s.record)
    }

    pub fn get_sps(&self, id: u8) -> Option<&Sps> {
        slot(&self.spses, id).map(|s| &s.record)
    }

    pub fn get_pps(&self, id: u8) -> Option<&Pps> {
        slot(&self.ppses, id).map(|s| &s.record)
    }

    /// Returns a link to the VPS currently stored at `id`.
    pub fn vps_link(&self, id: u8) -> Option<ParamSetLink> {
        link(&self.vpses, id)
    }

    /// Returns a link to the SPS currently stored at `id`.
    pub fn sps_link(&self, id: u8) -> Option<ParamSetLink> {
        link(&self.spses, id)
    }

    /// Returns a link to the PPS currently stored at `id`.
    pub fn pps_link(&self, id: u8) -> Option<ParamSetLink> {
        link(&self.ppses, id)
    }

    /// The most recently stored VPS.
    pub fn last_vps(&self) -> Option<&Vps> {
        self.last_vps.and_then(|id| self.get_vps(id))
    }

    /// The most recently stored SPS.
    pub fn last_sps(&self) -> Option<&Sps> {
        self.last_sps.and_then(|id| self.get_sps(id))
    }

    /// The most recently stored PPS.
    pub fn last_pps(&self) -> Option<&Pps> {
        self.last_pps.and_then(|id| self.get_pps(id))
    }

    /// Replaces the VPS at the id of `vps` with a record built outside of the
    /// parser.
    pub fn update_vps(&mut self, vps: Vps) -> ParseResult<()> {
        debug!("Updating video parameter set with id: {}", vps.id);
        self.put_vps(vps).map(|_| ())
    }

    /// Replaces the SPS at the id of `sps` with a record built outside of the
    /// parser. If the SPS was already linked to a VPS, that VPS must still be
    /// the one held by the store.
    pub fn update_sps(&mut self, sps: Sps) -> ParseResult<()> {
        check_link(&self.vpses, sps.vps_id, sps.vps_link, "VPS")?;

        debug!("Updating sequence parameter set with id: {}", sps.id);
        self.put_sps(sps).map(|_| ())
    }

    /// Replaces the PPS at the id of `pps` with a record built outside of the
    /// parser. If the PPS was already linked to a SPS, that SPS must still be
    /// the one held by the store.
    pub fn update_pps(&mut self, pps: Pps) -> ParseResult<()> {
        check_link(&self.spses, pps.sps_id, pps.sps_link, "SPS")?;

        debug!("Updating picture parameter set with id: {}", pps.id);
        self.put_pps(pps).map(|_| ())
    }

    /// Resolves the VPS of the SPS stored at `id` and computes the fields
    /// that depend on it.
    pub fn fill_sps(&mut self, id: u8) -> ParseResult<()> {
        let sps = slot_mut(&mut self.spses, id).ok_or(ParseError::BrokenLink {
            kind: "SPS",
            id: u32::from(id),
        })?;

        let vps_id = sps.record.vps_id;
        let Some(vps) = slot(&self.vpses, vps_id) else {
            debug!("couldn't find associated video parameter set with id: {}", vps_id);
            return Err(ParseError::BrokenLink {
                kind: "VPS",
                id: u32::from(vps_id),
            });
        };

        sps.record.fill(&vps.record);
        sps.record.vps_link = Some(ParamSetLink {
            id: vps_id,
            serial: vps.serial,
        });

        Ok(())
    }

    /// Resolves the SPS (and transitively the VPS) of the PPS stored at `id`
    /// and computes the fields that depend on it.
    pub fn fill_pps(&mut self, id: u8) -> ParseResult<()> {
        let sps_id = self
            .get_pps(id)
            .ok_or(ParseError::BrokenLink {
                kind: "PPS",
                id: u32::from(id),
            })?
            .sps_id;

        if let Err(e) = self.fill_sps(sps_id) {
            warn!("couldn't fill sps id: {}", sps_id);
            return Err(e);
        }

        let sps = slot(&self.spses, sps_id).ok_or(ParseError::BrokenLink {
            kind: "SPS",
            id: u32::from(sps_id),
        })?;
        let pps = slot_mut(&mut self.ppses, id).ok_or(ParseError::BrokenLink {
            kind: "PPS",
            id: u32::from(id),
        })?;

        pps.record.fill(&sps.record)?;
        pps.record.sps_link = Some(ParamSetLink {
            id: sps_id,
            serial: sps.serial,
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vps(id: u8) -> Vps {
        Vps {
            id,
            ..Default::default()
        }
    }

    fn sps(id: u8, vps_id: u8) -> Sps {
        Sps {
            id,
            vps_id,
            ..Default::default()
        }
    }

    fn pps(id: u8, sps_id: u8) -> Pps {
        Pps {
            id,
            sps_id,
            ..Default::default()
        }
    }

    #[test]
    fn empty_store() {
        let store = ParameterSetStore::new();
        assert!(store.get_vps(0).is_none());
        assert!(store.get_sps(15).is_none());
        assert!(store.get_pps(63).is_none());
        assert!(store.get_pps(64).is_none());
        assert!(store.last_sps().is_none());
    }

    #[test]
    fn put_overwrites_and_tracks_last() {
        let mut store = ParameterSetStore::new();

        store.put_sps(sps(3, 0)).unwrap();
        store.put_sps(sps(1, 0)).unwrap();
        assert_eq!(store.last_sps().unwrap().id, 1);

        let first = store.sps_link(3).unwrap();
        let mut replacement = sps(3, 2);
        replacement.pic_width_in_luma_samples = 640;
        store.put_sps(replacement).unwrap();

        assert_eq!(store.last_sps().unwrap().id, 3);
        assert_eq!(store.get_sps(3).unwrap().vps_id, 2);
        assert_ne!(store.sps_link(3).unwrap(), first);
        assert_eq!(store.get_sps(1).unwrap().vps_id, 0);
    }

    #[test]
    fn out_of_range_id_is_rejected() {
        let mut store = ParameterSetStore::new();
        assert!(matches!(
            store.put_vps(vps(16)),
            Err(ParseError::ValueOutOfRange { .. })
        ));
        assert!(store.last_vps().is_none());
    }

    #[test]
    fn fill_requires_referenced_sets() {
        let mut store = ParameterSetStore::new();
        store.put_pps(pps(0, 0)).unwrap();

        assert_eq!(
            store.fill_pps(0),
            Err(ParseError::BrokenLink { kind: "SPS", id: 0 })
        );

        store.put_sps(sps(0, 4)).unwrap();
        assert_eq!(
            store.fill_pps(0),
            Err(ParseError::BrokenLink { kind: "VPS", id: 4 })
        );

        store.put_vps(vps(4)).unwrap();
        store.fill_pps(0).unwrap();
        assert_eq!(store.get_pps(0).unwrap().sps_link, store.sps_link(0));
        assert_eq!(store.get_sps(0).unwrap().vps_link, store.vps_link(4));

        assert_eq!(
            store.fill_pps(1),
            Err(ParseError::BrokenLink { kind: "PPS", id: 1 })
        );
    }

    #[test]
    fn update_checks_links() {
        let mut store = ParameterSetStore::new();
        store.put_vps(vps(0)).unwrap();
        store.put_sps(sps(0, 0)).unwrap();
        store.put_pps(pps(5, 0)).unwrap();
        store.fill_pps(5).unwrap();

        // Unlinked records go in unchecked.
        store.update_sps(sps(1, 0)).unwrap();

        let linked_pps = store.get_pps(5).unwrap().clone();
        store.update_pps(linked_pps.clone()).unwrap();

        // Replacing the SPS breaks the link held by the copy.
        store.update_sps(sps(0, 0)).unwrap();
        assert_eq!(
            store.update_pps(linked_pps),
            Err(ParseError::BrokenLink { kind: "SPS", id: 0 })
        );

        let mut linked_sps = store.get_sps(0).unwrap().clone();
        linked_sps.vps_link = Some(ParamSetLink { id: 0, serial: 0 });
        assert_eq!(
            store.update_sps(linked_sps),
            Err(ParseError::BrokenLink { kind: "VPS", id: 0 })
        );

        // Failed updates leave the store alone.
        assert!(store.get_pps(5).is_some());
        assert_eq!(store.last_pps().unwrap().id, 5);
    }
}
