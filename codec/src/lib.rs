//! Wire protocol for node-to-node cluster traffic: framing, the per-packet
//!  type taxonomy, the embedded length-tagged string codec, and the multipart
//!  reassembly state that together let one endpoint carry many concurrent
//!  requests and responses over a single TCP connection.
//!
//! This crate is pure: it never touches a socket. Agents feed it packets that
//!  have already been sliced out of the byte stream and get back either a
//!  complete request/response or "not yet" while multipart state accumulates.
//!
//! ## Framing
//!
//! Every packet is prefixed by a 2-byte BIG-endian length of the packet body
//!  that follows. All multi-byte integers *inside* the body are
//!  LITTLE-endian, with one deliberate exception: the session field of the
//!  short-form name-addressed request (tag 0x80) is big-endian. That
//!  inconsistency is part of the deployed wire format and is preserved here
//!  for compatibility; a future protocol revision should remove it.
//!
//! ## Request packets
//!
//! The body's first byte selects the parse rule:
//!
//! ```ascii
//! 0x00  single frame, numeric address:
//!       addr:u32 LE | session:u32 LE | cmd:string | payload:string
//! 0x01  multipart head, numeric address, call:
//!       addr:u32 LE | session:u32 LE | totalsize:u32 LE     (body is 13 bytes)
//! 0x41  multipart head, numeric address, push: same layout as 0x01
//! 0x02  multipart body: session:u32 LE | chunk bytes
//! 0x03  multipart tail: session:u32 LE | chunk bytes
//! 0x04  reserved (trace) - always a decode error
//! 0x80  single frame, name address:
//!       namelen:u8 | name | session:u32 BE | cmd:string | payload:string
//! 0x81  multipart head, name address, call:
//!       namelen:u8 | name | session:u32 LE | totalsize:u32 LE
//! 0xc1  multipart head, name address, push: same layout as 0x81
//! ```
//!
//! A session of 0 is a push (no reply expected); anything else is a call.
//!  Whether a request goes out as a single frame or as head + body/tail
//!  chunks depends on the packed payload length relative to the configured
//!  part size; the chunk size ceiling is the same value at both peers.
//!
//! ## Response packets
//!
//! Responses carry no address; the tag's high bit carries the ok flag the
//!  way it carries name-addressing for requests:
//!
//! ```ascii
//! 0x00  single frame, ok:     session:u32 LE | msg:string
//! 0x80  single frame, failed: session:u32 LE | msg:string
//! 0x01  multipart head, ok:   session:u32 LE | totalsize:u32 LE   (body is 9 bytes)
//! 0x81  multipart head, failed: same layout as 0x01
//! 0x02  multipart body: session:u32 LE | chunk bytes
//! 0x03  multipart tail: session:u32 LE | chunk bytes
//! ```
//!
//! ## Strings
//!
//! Command names and payloads are length-tagged strings. The first byte
//!  packs a 3-bit type tag in the low bits and a 5-bit cookie in the high
//!  bits. Type 4 is a short string (cookie = length < 32); type 5 is a long
//!  string whose cookie selects a 2- or 4-byte little-endian length. The
//!  remaining type tags belong to value kinds of the source ecosystem (nil,
//!  bool, number, userdata, table) that this transport does not carry; they
//!  decode to an error naming the tag.
//!
//! ## Multipart reassembly
//!
//! A head packet opens a per-session accumulator scoped to one connection;
//!  body packets append; the tail packet closes the accumulator and yields
//!  the reassembled payload (two strings for requests - command and message -
//!  one string for responses). Body or tail without a prior head is an
//!  error, as is accumulating past the declared total. Accumulators die with
//!  their connection.

pub mod error;
pub mod reassembly;
pub mod request;
pub mod response;
pub mod strings;
