#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::multiple_crate_versions)]

//! Shared domain types for the strata distribution core.
//!
//! Everything that crosses a subsystem boundary lives here: content digests,
//! peer and torrent identities, torrent metadata, and piece bitfields. The
//! types carry their own text serialisation (`sha256:<hex>` digests, 40-char
//! hex peer ids) so that persisted rows, wire messages, and HTTP paths all
//! agree on one form.

pub mod bitfield;
pub mod blob;
pub mod digest;
pub mod error;
pub mod metainfo;
pub mod peer;

pub use bitfield::Bitfield;
pub use blob::BlobInfo;
pub use digest::Digest;
pub use error::CoreError;
pub use metainfo::{InfoHash, MetaInfo, PieceHash};
pub use peer::PeerId;
