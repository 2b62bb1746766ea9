//! # fieldsync-legacy
//!
//! Reads the flat configuration files devices were kept in before the
//! registry existed, and offers them to the import engine as a
//! [`LegacySource`](fieldsync_core::LegacySource).
//!
//! A legacy file holds one device:
//!
//! ```text
//! # stage x, upstream
//! SN     00012
//! DESC   stage x
//! VELO=2.5
//! ```

pub mod error;
pub mod parser;
pub mod source;

pub use error::LegacyError;
pub use parser::{parse_record, parse_value};
pub use source::{read_directory, DirectorySource};
