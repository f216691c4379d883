//! Binary stack protocol.
//!
//! Every connection carries exactly one request and at most one response.
//!
//! ## Architecture
//!
//! ```text
//! +----------+                      +----------+
//! |  Client  |  --- Request  --->   |  Server  |
//! |          |  <-- Response ---    | stacksrv |
//! +----------+                      +----------+
//!               ^               ^
//!               |  StackCodec   |
//!               +---------------+
//! ```
//!
//! ## Wire format
//!
//! | Message       | Bytes                                           |
//! |---------------|-------------------------------------------------|
//! | Push request  | `0b0LLLLLLL` followed by `L` payload bytes      |
//! | Pop request   | `0b1xxxxxxx`                                    |
//! | Push response | `0x00`                                          |
//! | Pop response  | `0b0LLLLLLL` followed by `L` payload bytes      |
//! | Busy          | `0xFF`                                          |

pub mod codec;
pub mod error;
pub mod request;
pub mod response;

pub use codec::StackCodec;
pub use error::ProtocolError;
pub use request::{Header, MAX_PAYLOAD_LEN, Payload, Request};
pub use response::{BUSY_BYTE, PUSH_OK_BYTE, Response};
