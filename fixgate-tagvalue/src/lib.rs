/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # fixgate Tag-Value
//!
//! FIX tag=value encoding and decoding for the fixgate session engine.
//!
//! ## Features
//!
//! - **Framing**: BeginString, BodyLength and CheckSum computed and verified
//! - **Zero-copy tokenizing**: `memchr` delimiter search over the input buffer
//! - **Repeating groups**: nested groups rebuilt from a data dictionary
//! - **Routing scan**: `peek_header` reads CompIDs from unvalidated input

pub mod checksum;
pub mod decoder;
pub mod encoder;

pub use checksum::calculate_checksum;
pub use decoder::{DecodeOptions, Decoder, PeekedHeader, decode, peek_header};
pub use encoder::{Encoder, SOH, encode};
