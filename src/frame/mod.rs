// Copyright 2014 Max Mertens
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Wire framing: the data list item format and the message envelope that
//! carries one around.

pub mod datalist;
pub mod message;

pub use datalist::DataList;
pub use message::{MessageKind, OutgoingMessage, ParsedMessage, HEADER_LENGTH, MAX_COMMAND};
