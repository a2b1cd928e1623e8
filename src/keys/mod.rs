//! Private key handling
//!
//! - `parse`: native decoding and PuTTY detection
//! - `resolver`: path to key material, converting PuTTY keys on the way
//! - `store`: the JSON key catalog and `~/.ssh` discovery
//! - `generate`: new key pairs through `ssh-keygen`

mod convert;
mod generate;
mod parse;
mod resolver;
mod store;
mod tool;

pub use convert::{KeyConverter, PuttygenConverter};
pub use generate::{
    generate_key, parse_key_bits, GenerateKeyRequest, KeyGenError, KeyGenerator, KeyType,
    SshKeygen,
};
pub use parse::{
    looks_like_putty_key, parse_candidates, parse_private_key, KeyParseError, PUTTY_KEY_MARKER,
};
pub use resolver::{AuthError, ConversionFailure, KeyConversionResult, KeyMaterialResolver};
pub use store::{KeyCatalog, KeyRecord, KeyStore, KeyStoreFile};
pub use tool::{run_tool, ToolError};

#[cfg(test)]
pub(crate) use parse::tests::{TEST_OPENSSH_KEY, TEST_PUTTY_KEY};
#[cfg(test)]
pub(crate) use resolver::tests::{FakeConverter, FakeOutcome};
