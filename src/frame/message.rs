// Copyright 2014 Max Mertens
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Framed message envelope: `[topic_id:2][sender_id:2][command_id:2][data
//! list bytes...]`, header length always 6 bytes. Ports `vsp_cmcp_message`.
//!
//! Wire integers are little-endian (a documented, intentional departure
//! from the original host-endian C implementation — see the crate's
//! top-level design notes).

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::datalist::DataList;
use crate::error::{CmcpError, Result};

pub const HEADER_LENGTH: usize = 6;

/// Highest command value the API accepts; the low bit of the wire command
/// is reserved for the message kind.
pub const MAX_COMMAND: u16 = (1 << 15) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Control,
    Data,
}

impl MessageKind {
    fn bit(self) -> u16 {
        match self {
            MessageKind::Control => 0,
            MessageKind::Data => 1,
        }
    }

    fn from_bit(bit: u16) -> MessageKind {
        if bit & 1 == 0 {
            MessageKind::Control
        } else {
            MessageKind::Data
        }
    }
}

/// A message ready to be serialized for sending. Borrows its data list
/// rather than owning it.
pub struct OutgoingMessage<'a> {
    kind: MessageKind,
    topic_id: u16,
    sender_id: u16,
    command_id: u16,
    datalist: Option<&'a DataList>,
}

impl<'a> OutgoingMessage<'a> {
    /// `command_id` must be below [`MAX_COMMAND`].
    pub fn new(
        kind: MessageKind,
        topic_id: u16,
        sender_id: u16,
        command_id: u16,
        datalist: Option<&'a DataList>,
    ) -> Result<OutgoingMessage<'a>> {
        if command_id > MAX_COMMAND {
            return Err(CmcpError::InvalidArgument("command_id must be below 2^15"));
        }
        Ok(OutgoingMessage {
            kind,
            topic_id,
            sender_id,
            command_id,
            datalist,
        })
    }

    fn command_wire(&self) -> u16 {
        (self.command_id << 1) | self.kind.bit()
    }

    /// Number of bytes `write_to` will produce.
    pub fn data_length(&self) -> usize {
        HEADER_LENGTH + self.datalist.map_or(0, DataList::data_length)
    }

    /// Serialize this message, appending to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.write_u16::<LittleEndian>(self.topic_id).unwrap();
        out.write_u16::<LittleEndian>(self.sender_id).unwrap();
        out.write_u16::<LittleEndian>(self.command_wire()).unwrap();
        if let Some(list) = self.datalist {
            list.write_to(out);
        }
    }

    /// Serialize into a freshly allocated buffer of exactly
    /// [`OutgoingMessage::data_length`] bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.data_length());
        self.write_to(&mut buf);
        buf
    }
}

/// A message parsed from a received buffer. Owns the data list it produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    kind: MessageKind,
    topic_id: u16,
    sender_id: u16,
    command_id: u16,
    datalist: DataList,
}

impl ParsedMessage {
    /// Parse a message out of `data`. Fails if shorter than
    /// [`HEADER_LENGTH`] bytes.
    pub fn parse(mut data: &[u8]) -> Result<ParsedMessage> {
        if data.len() < HEADER_LENGTH {
            return Err(CmcpError::Parse("message frame shorter than header"));
        }

        let topic_id = data.read_u16::<LittleEndian>().unwrap();
        let sender_id = data.read_u16::<LittleEndian>().unwrap();
        let command_wire = data.read_u16::<LittleEndian>().unwrap();

        Ok(ParsedMessage {
            kind: MessageKind::from_bit(command_wire),
            topic_id,
            sender_id,
            command_id: command_wire >> 1,
            datalist: DataList::parse(data),
        })
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn topic_id(&self) -> u16 {
        self.topic_id
    }

    pub fn sender_id(&self) -> u16 {
        self.sender_id
    }

    pub fn command_id(&self) -> u16 {
        self.command_id
    }

    pub fn datalist(&self) -> &DataList {
        &self.datalist
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_header_only_control_message() {
        let msg = OutgoingMessage::new(MessageKind::Control, 10, 11, 5, None).unwrap();
        let bytes = msg.to_bytes();

        assert_eq!(HEADER_LENGTH, bytes.len());

        let parsed = ParsedMessage::parse(&bytes).unwrap();
        assert_eq!(MessageKind::Control, parsed.kind());
        assert_eq!(10, parsed.topic_id());
        assert_eq!(11, parsed.sender_id());
        assert_eq!(5, parsed.command_id());
        assert!(parsed.datalist().is_empty());
    }

    #[test]
    fn round_trips_a_data_message_with_a_datalist() {
        let mut list = DataList::new();
        list.add_item(42, b"payload").unwrap();

        let msg = OutgoingMessage::new(MessageKind::Data, 1, 2, 3, Some(&list)).unwrap();
        let bytes = msg.to_bytes();
        assert_eq!(msg.data_length(), bytes.len());

        let parsed = ParsedMessage::parse(&bytes).unwrap();
        assert_eq!(MessageKind::Data, parsed.kind());
        assert_eq!(Some(&b"payload"[..]), parsed.datalist().get_item(42, 7));
    }

    #[test]
    fn type_flag_and_command_do_not_interfere() {
        let msg = OutgoingMessage::new(MessageKind::Data, 0, 0, MAX_COMMAND, None).unwrap();
        let bytes = msg.to_bytes();
        let parsed = ParsedMessage::parse(&bytes).unwrap();

        assert_eq!(MAX_COMMAND, parsed.command_id());
        assert_eq!(MessageKind::Data, parsed.kind());
    }

    #[test]
    fn command_at_or_above_2_pow_15_is_rejected() {
        assert!(OutgoingMessage::new(MessageKind::Control, 0, 0, MAX_COMMAND + 1, None).is_err());
    }

    #[test]
    fn parsing_a_short_buffer_fails() {
        let buf = [0u8; 5];
        assert!(ParsedMessage::parse(&buf).is_err());
    }
}
