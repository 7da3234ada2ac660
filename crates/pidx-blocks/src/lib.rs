//! Block layout index and on-disk addressing.
//!
//! The HZ address space is cut into blocks of `2^bits_per_block` samples and
//! blocks are grouped into files. [`layout`] tracks which blocks hold data and
//! how to find a block's dense position inside its file; [`header`],
//! [`filename`] and [`endian`] describe how those files look on disk.

pub mod endian;
pub mod filename;
pub mod header;
pub mod layout;

pub use endian::{apply_endianness, swap_payload};
pub use filename::{MAX_TEMPLATE_DEPTH, default_template, generate_file_name};
pub use header::{BlockEntry, FileHeader, header_size, raw_header_size};
pub use layout::BlockLayout;
