/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 27/1/26
******************************************************************************/

//! # fixgate Dictionary
//!
//! FIX data dictionary support for the fixgate session engine.
//!
//! This crate provides:
//! - **Schema definitions**: Field, message and repeating group definitions
//! - **Dictionary parsing**: QuickFIX XML loader with component flattening

pub mod parser;
pub mod schema;

pub use parser::DictionaryError;
pub use schema::{
    Dictionary, FieldDef, FieldRef, FieldType, GroupDef, MessageCategory, MessageDef, Version,
};

impl From<DictionaryError> for fixgate_core::ConfigError {
    fn from(err: DictionaryError) -> Self {
        Self::Dictionary(err.to_string())
    }
}
