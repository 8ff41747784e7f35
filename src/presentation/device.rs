//! The holder's device, answering the reader's engagement.
pub mod nfc;

pub use nfc::{HandoverMode, HolderApduResponder, HolderHandover};
