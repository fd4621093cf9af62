//! Name table: obfuscated names and slot recycling
//!
//! Names are stored XOR-ed against the container's 4-byte seed. This is
//! reversible obfuscation, not encryption.
//!
//! Freed slots go to a FIFO queue and are handed out again before the table
//! grows. Each freed slot is overwritten with random padding; that padding is
//! queued too and reused as the tail of the next encoded name, so the bytes
//! past a name's length never change between "cleared" and "reused".

use std::collections::{BTreeMap, VecDeque};

use rand::RngCore;

use crate::error::{PakError, Result};
use crate::record::{NameEntry, NAME_CAPACITY};

/// XOR `bytes` against a repeating `seed`; applying it twice restores the input
pub fn obfuscate(bytes: &[u8], seed: [u8; 4]) -> Vec<u8> {
    bytes
        .iter()
        .enumerate()
        .map(|(i, b)| b ^ seed[i % seed.len()])
        .collect()
}

/// Encode `name` into a slot record laid over `padding`
pub fn encode_name(name: &str, seed: [u8; 4], padding: [u8; NAME_CAPACITY]) -> Result<NameEntry> {
    if name.len() > NAME_CAPACITY {
        return Err(PakError::NameTooLong(name.len()));
    }
    NameEntry::new(&obfuscate(name.as_bytes(), seed), padding)
}

/// Decode a slot record; empty slots decode to `None`
pub fn decode_name(entry: &NameEntry, seed: [u8; 4]) -> Result<Option<String>> {
    if entry.is_empty() {
        return Ok(None);
    }
    String::from_utf8(obfuscate(entry.obfuscated(), seed))
        .map(Some)
        .map_err(|_| PakError::CorruptTable("name is not valid UTF-8".to_string()))
}

fn random_padding() -> [u8; NAME_CAPACITY] {
    let mut padding = [0u8; NAME_CAPACITY];
    rand::thread_rng().fill_bytes(&mut padding);
    padding
}

/// In-memory mirror of the name table
#[derive(Debug)]
pub struct NameTable {
    seed: [u8; 4],
    capacity: u32,
    /// Decoded name per slot; `None` for empty slots
    slots: Vec<Option<String>>,
    free_slots: VecDeque<u32>,
    spare_padding: VecDeque<[u8; NAME_CAPACITY]>,
    live: usize,
}

impl NameTable {
    pub fn new(seed: [u8; 4], capacity: u32) -> Self {
        NameTable {
            seed,
            capacity,
            slots: Vec::new(),
            free_slots: VecDeque::new(),
            spare_padding: VecDeque::new(),
            live: 0,
        }
    }

    /// Rebuild from the names found in use on load
    ///
    /// Gaps in the sorted set of used indices become the free-slot queue, in
    /// ascending order.
    pub fn from_used(seed: [u8; 4], capacity: u32, used: BTreeMap<u32, String>) -> Self {
        let mut table = Self::new(seed, capacity);

        let len = used.keys().next_back().map_or(0, |&last| last as usize + 1);
        table.slots = vec![None; len];
        table.live = used.len();

        for (index, name) in used {
            table.slots[index as usize] = Some(name);
        }

        table.free_slots = table
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(index, _)| index as u32)
            .collect();

        table
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of live names
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Slots ever handed out (live or recycled)
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn has_capacity(&self) -> bool {
        self.next_index().is_some()
    }

    /// Slot the next `insert` will use, if any
    pub fn next_index(&self) -> Option<u32> {
        match self.free_slots.front() {
            Some(&index) => Some(index),
            None if self.slots.len() < self.capacity as usize => Some(self.slots.len() as u32),
            None => None,
        }
    }

    pub fn name(&self, index: u32) -> Option<&str> {
        self.slots.get(index as usize).and_then(|slot| slot.as_deref())
    }

    /// Store `name` in a free slot and return the record to persist
    ///
    /// Fails with `NameTooLong` before any slot is taken, and with
    /// `OutOfNames` when the table is full.
    pub fn insert(&mut self, name: &str) -> Result<(u32, NameEntry)> {
        if name.len() > NAME_CAPACITY {
            return Err(PakError::NameTooLong(name.len()));
        }

        let index = match self.free_slots.pop_front() {
            Some(index) => index,
            None if self.slots.len() < self.capacity as usize => {
                self.slots.push(None);
                (self.slots.len() - 1) as u32
            }
            None => return Err(PakError::OutOfNames),
        };

        let entry = encode_name(name, self.seed, self.take_padding())?;
        self.slots[index as usize] = Some(name.to_string());
        self.live += 1;

        Ok((index, entry))
    }

    /// Re-encode slot `index` with `name`
    pub fn rename(&mut self, index: u32, name: &str) -> Result<NameEntry> {
        let seed = self.seed;
        let padding = self.take_padding();
        let slot = self
            .slots
            .get_mut(index as usize)
            .filter(|slot| slot.is_some())
            .ok_or_else(|| PakError::CorruptTable(format!("name slot {} is empty", index)))?;

        let entry = encode_name(name, seed, padding)?;
        *slot = Some(name.to_string());
        Ok(entry)
    }

    /// Clear slot `index` and return the empty record to persist
    ///
    /// Returns `None` if the slot was already empty.
    pub fn release(&mut self, index: u32) -> Option<NameEntry> {
        let slot = self.slots.get_mut(index as usize)?;
        slot.take()?;

        self.live -= 1;
        self.free_slots.push_back(index);

        let padding = random_padding();
        self.spare_padding.push_back(padding);
        Some(NameEntry::empty(padding))
    }

    fn take_padding(&mut self) -> [u8; NAME_CAPACITY] {
        self.spare_padding
            .pop_front()
            .unwrap_or_else(random_padding)
    }
}
