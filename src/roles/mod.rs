//! The BIP174 roles, each an `impl Psbt` block over the container.
//!
//! Creator and updater build the transaction and annotate its maps, the signer
//! adds partial signatures, the combiner merges PSBTs describing the same
//! transaction, the finalizer turns signatures into unlocking data and the
//! extractor produces the network transaction.

pub mod combiner;
pub mod creator;
pub mod extractor;
pub mod finalizer;
pub mod signer;
pub mod updater;

pub use self::creator::{InputSpec, OutputSpec, OutputTarget};
