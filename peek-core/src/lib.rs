pub mod error;
pub mod fields;
pub mod header;
pub mod image;

pub use error::{DecodeError, Result};
pub use fields::*;
pub use header::dos::{decode_legacy_header, DosHeader};
pub use header::nt::{decode_variant_header, FileHeader, NtHeaderCommon};
pub use header::optional::{OptionalHeader, OptionalHeader32, OptionalHeader64};
pub use header::{machine_name, Header};
pub use image::*;
