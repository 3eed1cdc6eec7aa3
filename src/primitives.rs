//! Fixed-size digests, timestamps and the bounds-checked binary codec
//! every other entity is built on.

pub mod codec;
pub mod hash;
pub mod merkle;
pub mod timestamp;

pub use codec::Reader;
pub use hash::Hash;
pub use merkle::merkle_root;
pub use timestamp::Timestamp;
