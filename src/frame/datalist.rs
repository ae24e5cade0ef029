// Copyright 2014 Max Mertens
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Data list storing any number of data list items. A data list item
//! consists of an ID, a length and the data itself. Wire format is a plain
//! concatenation of `[item_id:2][length:2][payload:length]` triples, no
//! overall count prefix (ports `vsp_cmcp_datalist`).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::config::DATALIST_MAX_ITEMS;
use crate::error::{CmcpError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
struct DataItem {
    id: u16,
    payload: Vec<u8>,
}

/// An ordered collection of up to [`DATALIST_MAX_ITEMS`] items with unique
/// IDs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataList {
    items: Vec<DataItem>,
}

impl DataList {
    pub fn new() -> DataList {
        DataList { items: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn find(&self, id: u16) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }

    /// Add an item. Fails if the list is already at capacity or an item
    /// with that ID already exists.
    pub fn add_item(&mut self, id: u16, payload: &[u8]) -> Result<()> {
        if self.items.len() >= DATALIST_MAX_ITEMS {
            return Err(CmcpError::InvalidArgument("data list is full"));
        }
        if self.find(id).is_some() {
            return Err(CmcpError::InvalidArgument(
                "data list item with that ID already exists",
            ));
        }
        self.items.push(DataItem {
            id,
            payload: payload.to_vec(),
        });
        Ok(())
    }

    /// Look up an item by ID, requiring its payload to be exactly
    /// `expected_len` bytes.
    pub fn get_item(&self, id: u16, expected_len: usize) -> Option<&[u8]> {
        let index = self.find(id)?;
        let item = &self.items[index];
        if item.payload.len() != expected_len {
            return None;
        }
        Some(&item.payload)
    }

    /// Total number of bytes this list occupies on the wire.
    pub fn data_length(&self) -> usize {
        self.items.iter().map(|item| 4 + item.payload.len()).sum()
    }

    /// Serialize, appending to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        for item in &self.items {
            out.write_u16::<LittleEndian>(item.id).unwrap();
            out.write_u16::<LittleEndian>(item.payload.len() as u16)
                .unwrap();
            out.extend_from_slice(&item.payload);
        }
    }

    /// Parse a data list out of `data`. Proceeds greedily until fewer than
    /// 4 bytes remain; a trailing short fragment is discarded rather than
    /// rejected, since the outer message frame already carries the total
    /// length.
    pub fn parse(mut data: &[u8]) -> DataList {
        let mut list = DataList::new();

        while data.len() >= 4 {
            let id = data.read_u16::<LittleEndian>().unwrap();
            let len = data.read_u16::<LittleEndian>().unwrap() as usize;

            if data.len() < len {
                break;
            }

            let (payload, rest) = data.split_at(len);
            // Items are unique by construction on the sending side; a
            // duplicate ID in a received frame is silently dropped instead
            // of aborting the whole parse.
            let _ = list.add_item(id, payload);
            data = rest;
        }

        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_item_then_get_item_round_trips() {
        let mut list = DataList::new();
        list.add_item(7, b"hello").unwrap();

        assert_eq!(Some(&b"hello"[..]), list.get_item(7, 5));
    }

    #[test]
    fn get_item_with_wrong_expected_length_fails() {
        let mut list = DataList::new();
        list.add_item(7, b"hello").unwrap();

        assert_eq!(None, list.get_item(7, 4));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut list = DataList::new();
        list.add_item(1, b"a").unwrap();

        assert!(list.add_item(1, b"b").is_err());
    }

    #[test]
    fn capacity_is_sixteen_items() {
        let mut list = DataList::new();
        for id in 0..DATALIST_MAX_ITEMS as u16 {
            list.add_item(id, &[]).unwrap();
        }

        assert!(list.add_item(DATALIST_MAX_ITEMS as u16, &[]).is_err());
    }

    #[test]
    fn serialize_then_parse_round_trips() {
        let mut list = DataList::new();
        list.add_item(1, b"abc").unwrap();
        list.add_item(2, b"").unwrap();
        list.add_item(3, b"xyzzy").unwrap();

        let mut buf = Vec::new();
        list.write_to(&mut buf);

        let parsed = DataList::parse(&buf);
        assert_eq!(Some(&b"abc"[..]), parsed.get_item(1, 3));
        assert_eq!(Some(&b""[..]), parsed.get_item(2, 0));
        assert_eq!(Some(&b"xyzzy"[..]), parsed.get_item(3, 5));
        assert_eq!(3, parsed.len());
    }

    #[test]
    fn parse_discards_a_trailing_short_fragment() {
        let mut buf = Vec::new();
        buf.write_u16::<LittleEndian>(1).unwrap();
        buf.write_u16::<LittleEndian>(2).unwrap();
        buf.extend_from_slice(b"ab");
        // trailing fragment, fewer than 4 bytes
        buf.push(0xff);
        buf.push(0x00);
        buf.push(0x01);

        let parsed = DataList::parse(&buf);
        assert_eq!(1, parsed.len());
        assert_eq!(Some(&b"ab"[..]), parsed.get_item(1, 2));
    }
}
