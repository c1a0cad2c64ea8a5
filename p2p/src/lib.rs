// Copyright 2023 The Arbor Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The peer-to-peer surface of the node: the messages the four peer classes
//! exchange, the peer handle the transport implements and the registry the
//! node broadcasts through. The wire transport itself is a collaborator.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![warn(missing_docs)]

#[macro_use]
extern crate bitflags;
#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

pub mod msg;
mod peer;
mod peers;
mod types;

pub use crate::msg::Message;
pub use crate::peer::{Peer, SubBlocksReply};
pub use crate::peers::Peers;
pub use crate::types::{Capabilities, Error, NodeType, P2PConfig, PeerId};
